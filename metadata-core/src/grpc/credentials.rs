//! Resolution of the identity that accompanies calls to the authorization service.
//!
//! Calls made while handling an inbound request carry that caller's identity,
//! so downstream authorization attributes the action to them. Calls made by
//! background work, where no caller exists, carry the service account instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::{ExposeSecret, SecretString};
use tonic::metadata::MetadataMap;
use tracing::{debug, trace};

use super::headers::{
    DEVELOPER_KEY_HEADER, DEVELOPER_KEY_HYPHEN_HEADER, EMAIL_HEADER, HeaderSet, IDENTITY_HEADERS,
    SOURCE_HEADER,
};
use crate::config::AuthzConfig;

/// Registry of background units of work that are currently running.
///
/// Clones share the same counter.
#[derive(Clone, Debug, Default)]
pub struct BackgroundTasks {
    count: Arc<AtomicUsize>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a background task; it stays registered until the guard drops.
    pub fn register(&self, name: &str) -> BackgroundTaskGuard {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(task = name, registered = count, "Background task registered");
        BackgroundTaskGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Keeps a background task registered while alive.
#[derive(Debug)]
pub struct BackgroundTaskGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for BackgroundTaskGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The identity in effect for the current unit of work.
///
/// Request handlers build one with [`CallContext::from_metadata`] and pass it
/// down to whatever talks to the authorization service. Background work uses
/// [`CallContext::background`].
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    identity: Option<HeaderSet>,
}

impl CallContext {
    /// A context with no caller, e.g. a scheduled job.
    pub fn background() -> Self {
        Self { identity: None }
    }

    /// A context acting on behalf of the given caller headers.
    pub fn with_identity(headers: HeaderSet) -> Self {
        Self {
            identity: Some(headers),
        }
    }

    /// Capture the caller identity from an inbound request.
    ///
    /// The result always counts as an active request identity, even when the
    /// caller sent none of the identity headers.
    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        Self::with_identity(HeaderSet::from_metadata(metadata, &IDENTITY_HEADERS))
    }

    pub fn identity(&self) -> Option<&HeaderSet> {
        self.identity.as_ref()
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }
}

/// Static credentials this service uses when no caller is present.
#[derive(Clone, Debug)]
pub struct ServiceAccount {
    pub email: Option<String>,
    pub developer_key: Option<SecretString>,
    pub source_tag: String,
}

impl ServiceAccount {
    pub fn from_config(config: &AuthzConfig) -> Self {
        Self {
            email: config.service_user_email.clone(),
            developer_key: config.service_user_dev_key.clone(),
            source_tag: config.source_tag.clone(),
        }
    }

    fn headers(&self) -> HeaderSet {
        let mut headers = HeaderSet::new();
        if let Some(email) = &self.email {
            headers.insert(EMAIL_HEADER, email.as_str());
        }
        if let Some(key) = &self.developer_key {
            headers.insert(DEVELOPER_KEY_HEADER, key.expose_secret().as_str());
            headers.insert(DEVELOPER_KEY_HYPHEN_HEADER, key.expose_secret().as_str());
        }
        headers.insert(SOURCE_HEADER, self.source_tag.as_str());
        headers
    }
}

/// Decides which headers accompany an outbound call.
#[derive(Clone, Debug)]
pub struct CredentialContext {
    service_account: ServiceAccount,
    background: BackgroundTasks,
}

impl CredentialContext {
    pub fn new(service_account: ServiceAccount, background: BackgroundTasks) -> Self {
        Self {
            service_account,
            background,
        }
    }

    pub fn from_config(config: &AuthzConfig, background: BackgroundTasks) -> Self {
        Self::new(ServiceAccount::from_config(config), background)
    }

    pub fn background_tasks(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Resolve the headers for a call.
    ///
    /// An explicit override wins. Without one, the service account is used
    /// only when there is no caller identity and background work is running;
    /// otherwise the caller identity (possibly none) is returned as is.
    pub fn resolve_headers(
        &self,
        call: &CallContext,
        explicit: Option<HeaderSet>,
    ) -> Option<HeaderSet> {
        if let Some(headers) = explicit {
            trace!(headers = ?headers, "Using explicit headers");
            return Some(headers);
        }

        let background_count = self.background.count();
        trace!(background_count, "Resolving headers for outbound call");

        if background_count > 0 && !call.has_identity() {
            return Some(self.service_account.headers());
        }

        call.identity().cloned()
    }
}
