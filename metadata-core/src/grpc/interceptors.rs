//! gRPC client interceptors for calls to the authorization service.
//!
//! Provides interceptors for:
//! - Attaching the resolved identity headers
//! - Trace context propagation (W3C traceparent/tracestate)

use std::sync::Arc;

use opentelemetry::trace::TraceContextExt;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::headers::HeaderSet;

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for W3C tracestate header.
pub const TRACESTATE_KEY: &str = "tracestate";

/// Attaches a fixed [`HeaderSet`] and the current trace context to every request.
#[derive(Clone, Debug, Default)]
pub struct AttachHeaders {
    headers: Option<Arc<HeaderSet>>,
}

impl AttachHeaders {
    pub fn new(headers: Option<Arc<HeaderSet>>) -> Self {
        Self { headers }
    }

    pub fn headers(&self) -> Option<&HeaderSet> {
        self.headers.as_deref()
    }
}

impl Interceptor for AttachHeaders {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(headers) = &self.headers {
            headers.apply_to(request.metadata_mut())?;
        }
        inject_trace_context(&mut request);
        Ok(request)
    }
}

/// Inject current trace context into outgoing gRPC request metadata.
///
/// Does nothing when the current span has no valid OpenTelemetry context.
pub fn inject_trace_context<T>(request: &mut Request<T>) {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if span_context.is_valid() {
        // Format: version-trace_id-span_id-trace_flags
        let traceparent = format!(
            "00-{}-{}-{:02x}",
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags().to_u8()
        );

        if let Ok(value) = traceparent.parse() {
            request.metadata_mut().insert(TRACEPARENT_KEY, value);
        }

        let trace_state = span_context.trace_state();
        let tracestate_str = trace_state.header();
        if !tracestate_str.is_empty()
            && let Ok(value) = tracestate_str.parse()
        {
            request.metadata_mut().insert(TRACESTATE_KEY, value);
        }
    }
}
