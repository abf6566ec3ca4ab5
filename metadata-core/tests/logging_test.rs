//! Subscriber installation runs in its own test binary because it is process-global.

use metadata_core::observability::init_tracing;

#[test]
fn init_tracing_installs_once_without_otlp() {
    assert!(init_tracing("metadata-core-test", "debug", None).is_ok());

    // A second global subscriber is refused instead of panicking.
    assert!(init_tracing("metadata-core-test", "debug", None).is_err());
}
