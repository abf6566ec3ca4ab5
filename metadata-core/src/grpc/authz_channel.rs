//! Shared channel to the authorization (UAC) service.
//!
//! One plaintext gRPC channel carries every sub-service client. Clients are
//! built lazily, bound to the identity headers resolved at build time, and
//! cached per [`ServiceKind`] for the lifetime of the channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use http::uri::PathAndQuery;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, error, info, instrument, trace, warn};

use super::credentials::{BackgroundTasks, CallContext, CredentialContext};
use super::headers::HeaderSet;
use super::interceptors::AttachHeaders;
use crate::config::AuthzConfig;
use crate::error::AppError;

/// Protobuf package of the authorization service.
pub const UAC_PACKAGE: &str = "ai.verta.uac";

/// Sub-services reachable over the authorization channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Roles,
    Authorization,
    Accounts,
    Teams,
    Organizations,
    /// Role client used from fire-and-forget paths; cached apart from [`ServiceKind::Roles`].
    RolesAsync,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Roles,
        ServiceKind::Authorization,
        ServiceKind::Accounts,
        ServiceKind::Teams,
        ServiceKind::Organizations,
        ServiceKind::RolesAsync,
    ];

    /// Fully-qualified gRPC service name.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Roles | Self::RolesAsync => "ai.verta.uac.RoleService",
            Self::Authorization => "ai.verta.uac.AuthzService",
            Self::Accounts => "ai.verta.uac.UACService",
            Self::Teams => "ai.verta.uac.TeamService",
            Self::Organizations => "ai.verta.uac.OrganizationService",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roles => "roles",
            Self::Authorization => "authorization",
            Self::Accounts => "accounts",
            Self::Teams => "teams",
            Self::Organizations => "organizations",
            Self::RolesAsync => "roles_async",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of the channel. Only moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    ShuttingDown,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::ShuttingDown,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::ShuttingDown => 1,
            Self::Closed => 2,
        }
    }
}

/// The physical connection underneath the stubs.
pub trait Transport: Send + Sync {
    /// A handle to the shared channel. Fails once the transport is shut down.
    fn channel(&self) -> Result<Channel, anyhow::Error>;

    /// Stop accepting new calls on the channel.
    fn shutdown(&self) -> Result<(), anyhow::Error>;
}

/// Plaintext HTTP/2 channel to `host:port`, connected on first use.
pub struct PlaintextTransport {
    target: String,
    channel: Mutex<Option<Channel>>,
}

impl PlaintextTransport {
    /// Build the channel without dialing. Must be called within a Tokio runtime.
    pub fn connect_lazy(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, AppError> {
        let target = format!("http://{}:{}", host, port);
        let channel = Endpoint::from_shared(target.clone())?
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .connect_lazy();

        Ok(Self {
            target,
            channel: Mutex::new(Some(channel)),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Transport for PlaintextTransport {
    fn channel(&self) -> Result<Channel, anyhow::Error> {
        let guard = self
            .channel
            .lock()
            .map_err(|_| anyhow::anyhow!("channel lock poisoned"))?;
        guard
            .clone()
            .ok_or_else(|| anyhow::anyhow!("channel to {} is shut down", self.target))
    }

    fn shutdown(&self) -> Result<(), anyhow::Error> {
        let mut guard = self
            .channel
            .lock()
            .map_err(|_| anyhow::anyhow!("channel lock poisoned"))?;
        // In-flight calls hold their own clones; the connection closes once they finish.
        guard.take();
        Ok(())
    }
}

/// Tracks channel state and the calls currently running over it.
#[derive(Debug)]
struct DrainTracker {
    state: AtomicU8,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl DrainTracker {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Open.as_u8()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Open -> ShuttingDown. Returns false if shutdown already began.
    fn begin_shutdown(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Open.as_u8(),
                ConnectionState::ShuttingDown.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed.as_u8(), Ordering::SeqCst);
    }

    #[allow(clippy::result_large_err)]
    fn enter(self: &Arc<Self>) -> Result<InFlightGuard, Status> {
        // Count first, then check, so close() never misses a call that got in.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            tracker: Arc::clone(self),
        };
        if self.state() != ConnectionState::Open {
            return Err(Status::unavailable(
                "authorization channel is shutting down",
            ));
        }
        Ok(guard)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard {
    tracker: Arc<DrainTracker>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

/// A client for one sub-service, bound to the headers resolved when it was built.
#[derive(Clone)]
pub struct ServiceStub {
    kind: ServiceKind,
    inner: Grpc<InterceptedService<Channel, AttachHeaders>>,
    interceptor: AttachHeaders,
    drain: Arc<DrainTracker>,
}

impl ServiceStub {
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Headers attached to every call made through this stub.
    pub fn headers(&self) -> Option<&HeaderSet> {
        self.interceptor.headers()
    }

    /// Issue a unary call to `/<service>/<method>`.
    ///
    /// Message types come from the caller's generated protobuf code.
    pub async fn unary<Req, Resp>(&self, method: &str, message: Req) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let _in_flight = self.drain.enter()?;

        let path = PathAndQuery::try_from(format!("/{}/{}", self.kind.service_name(), method))
            .map_err(|e| Status::invalid_argument(format!("Invalid method '{}': {}", method, e)))?;

        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e)))?;

        trace!(service = %self.kind, method, "Calling authorization service");
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc.unary(Request::new(message), path, codec).await?;
        Ok(response.into_inner())
    }
}

impl fmt::Debug for ServiceStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceStub")
            .field("kind", &self.kind)
            .field("headers", &self.headers())
            .finish()
    }
}

/// Owns the channel to the authorization service and hands out stubs.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    credentials: CredentialContext,
    stubs: DashMap<ServiceKind, Arc<ServiceStub>>,
    drain: Arc<DrainTracker>,
    shutdown_grace: Duration,
    interrupt: CancellationToken,
    transport_shut: AtomicBool,
}

impl ConnectionManager {
    /// Open the channel described by `config`.
    ///
    /// Fails with [`AppError::Unavailable`] when host or port is missing; the
    /// channel itself dials lazily, so this must run within a Tokio runtime.
    pub fn new(config: &AuthzConfig, background: BackgroundTasks) -> Result<Self, AppError> {
        let (host, port) = match (config.host.as_deref(), config.port) {
            (Some(host), Some(port)) if !host.trim().is_empty() => (host, port),
            _ => {
                return Err(AppError::Unavailable(
                    "Host OR Port not found for contacting authentication service".to_string(),
                ));
            }
        };
        trace!(host, port, "Opening authorization channel");

        let transport = PlaintextTransport::connect_lazy(
            host,
            port,
            config.connect_timeout(),
            config.request_timeout(),
        )?;

        Ok(Self::with_transport(
            Arc::new(transport),
            CredentialContext::from_config(config, background),
            config.shutdown_grace(),
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        credentials: CredentialContext,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            stubs: DashMap::new(),
            drain: Arc::new(DrainTracker::new()),
            shutdown_grace,
            interrupt: CancellationToken::new(),
            transport_shut: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.drain.state()
    }

    /// Number of calls currently running through any stub.
    pub fn in_flight(&self) -> usize {
        self.drain.in_flight()
    }

    /// Cancelling this token aborts a pending [`ConnectionManager::close`] wait.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub fn credentials(&self) -> &CredentialContext {
        &self.credentials
    }

    /// Get the client for `kind`.
    ///
    /// Without `explicit` headers the stub is cached per kind and bound to the
    /// headers resolved on first access. With `explicit` headers a fresh stub
    /// bound to exactly those headers is returned and nothing is cached, which
    /// is what per-request checks (e.g. authorization) need.
    pub fn get_stub(
        &self,
        kind: ServiceKind,
        call: &CallContext,
        explicit: Option<HeaderSet>,
    ) -> Result<Arc<ServiceStub>, AppError> {
        if self.state() != ConnectionState::Open {
            return Err(AppError::Unavailable(format!(
                "Authorization channel is {:?}",
                self.state()
            )));
        }

        if explicit.is_some() {
            let headers = self.credentials.resolve_headers(call, explicit);
            return self.build_stub(kind, headers).map(Arc::new);
        }

        if let Some(stub) = self.stubs.get(&kind) {
            return Ok(Arc::clone(stub.value()));
        }

        match self.stubs.entry(kind) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let headers = self.credentials.resolve_headers(call, None);
                let stub = Arc::new(self.build_stub(kind, headers)?);
                entry.insert(Arc::clone(&stub));
                debug!(service = %kind, "Cached authorization stub");
                Ok(stub)
            }
        }
    }

    fn build_stub(
        &self,
        kind: ServiceKind,
        headers: Option<HeaderSet>,
    ) -> Result<ServiceStub, AppError> {
        trace!(service = %kind, headers = ?headers, "Header attaching with stub");
        let channel = self
            .transport
            .channel()
            .map_err(|e| AppError::Unavailable(e.to_string()))?;
        let interceptor = AttachHeaders::new(headers.map(Arc::new));
        let inner = Grpc::new(InterceptedService::new(channel, interceptor.clone()));

        Ok(ServiceStub {
            kind,
            inner,
            interceptor,
            drain: Arc::clone(&self.drain),
        })
    }

    /// Shut the channel down and wait for in-flight calls to drain.
    ///
    /// Waits at most the configured grace period; a call still running after
    /// that is abandoned and the channel is reported closed anyway. If the
    /// transport shutdown fails or the wait is interrupted, the channel stays
    /// `ShuttingDown` and a later call retries both steps. Returns `Ok` only
    /// once the channel is `Closed`.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<(), AppError> {
        if self.drain.begin_shutdown() {
            self.stubs.clear();
        } else if self.state() == ConnectionState::Closed {
            debug!("Authorization channel already closed");
            return Ok(());
        } else {
            debug!("Resuming authorization channel shutdown");
        }

        if !self.transport_shut.load(Ordering::SeqCst) {
            self.transport.shutdown().map_err(|e| {
                error!(error = %e, "Error while closing the authorization channel");
                AppError::Internal(anyhow::anyhow!(
                    "Error while closing the authorization channel: {}",
                    e
                ))
            })?;
            self.transport_shut.store(true, Ordering::SeqCst);
        }

        tokio::select! {
            biased;
            _ = self.drain.wait_idle() => {}
            _ = self.interrupt.cancelled() => {
                warn!(in_flight = self.in_flight(), "Authorization channel close interrupted");
                return Err(AppError::Internal(anyhow::anyhow!(
                    "Authorization channel termination error: {}",
                    "interrupted while waiting for in-flight calls"
                )));
            }
            _ = tokio::time::sleep(self.shutdown_grace) => {
                warn!(
                    in_flight = self.in_flight(),
                    grace_secs = self.shutdown_grace.as_secs(),
                    "Authorization channel grace period elapsed with calls in flight"
                );
            }
        }

        self.drain.mark_closed();
        info!("Authorization channel closed");
        Ok(())
    }
}
