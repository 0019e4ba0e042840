//! Shared gateway state.

use crate::backend::ObjectBackend;
use crate::cache::CacheStore;
use crate::orchestrator::{CacheOrchestrator, ReaperHandle};
use crate::resolver::NamespaceResolver;
use std::sync::Arc;
use std::time::Duration;

/// Everything a gateway owns. Shared by all `Gateway` clones.
pub(crate) struct GatewayInner {
    pub(crate) resolver: Arc<NamespaceResolver>,
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) backend: Arc<dyn ObjectBackend>,
    pub(crate) orchestrator: CacheOrchestrator,
    /// How long an expired entry survives before `reap_expired` drops it.
    pub(crate) expiry_grace: Duration,
    /// Reaper task handle. Protected by async Mutex for shutdown.
    pub(crate) reaper: tokio::sync::Mutex<Option<ReaperHandle>>,
}
