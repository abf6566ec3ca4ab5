//! Identity headers attached to calls against the authorization service.

use std::collections::BTreeMap;
use std::fmt;

use tonic::Status;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};

/// Caller email.
pub const EMAIL_HEADER: &str = "email";

/// Developer key, underscore spelling.
pub const DEVELOPER_KEY_HEADER: &str = "developer_key";

/// Developer key, hyphen spelling. Sent alongside [`DEVELOPER_KEY_HEADER`]
/// because consumers disagree on which one they read.
pub const DEVELOPER_KEY_HYPHEN_HEADER: &str = "developer-key";

/// Tag identifying the kind of client that originated the call.
pub const SOURCE_HEADER: &str = "source";

/// Headers that carry caller identity between services.
pub const IDENTITY_HEADERS: [&str; 4] = [
    EMAIL_HEADER,
    DEVELOPER_KEY_HEADER,
    DEVELOPER_KEY_HYPHEN_HEADER,
    SOURCE_HEADER,
];

/// Mapping from header name to value, applied to outbound gRPC metadata.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: BTreeMap<String, String>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, returning the previous value if one was set.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(name.into().to_ascii_lowercase(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Capture the named headers from incoming request metadata.
    ///
    /// Values that are not valid ASCII are skipped.
    pub fn from_metadata(metadata: &MetadataMap, names: &[&str]) -> Self {
        names
            .iter()
            .filter_map(|name| {
                metadata
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect()
    }

    /// Write every header into outbound metadata, replacing existing values.
    ///
    /// Fails with `INVALID_ARGUMENT` when a name or value cannot be encoded
    /// as ASCII metadata, so the misconfiguration surfaces on the call.
    #[allow(clippy::result_large_err)]
    pub fn apply_to(&self, metadata: &mut MetadataMap) -> Result<(), Status> {
        for (name, value) in &self.entries {
            let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes()).map_err(|_| {
                Status::invalid_argument(format!("Invalid metadata header name: {}", name))
            })?;
            // The parser below lets obs-text bytes (>= 0x80) through.
            if !value.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b)) {
                return Err(Status::invalid_argument(format!(
                    "Invalid metadata value for header '{}'",
                    name
                )));
            }
            let value: MetadataValue<Ascii> = value.parse().map_err(|_| {
                Status::invalid_argument(format!("Invalid metadata value for header '{}'", name))
            })?;
            metadata.insert(key, value);
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

// Developer keys are credentials; keep them out of logs.
impl fmt::Debug for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.entries {
            if name == DEVELOPER_KEY_HEADER || name == DEVELOPER_KEY_HYPHEN_HEADER {
                map.entry(name, &"[REDACTED]");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}
