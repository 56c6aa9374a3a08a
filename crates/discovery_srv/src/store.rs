//! The storage contract shared by all endpoint backends.

use crate::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-request cancellation signal.
///
/// Tripped when the http request that caused a store call goes away
/// (for example, the client disconnected). Backends that can block
/// should check it and abort; the in-memory backend never blocks
/// long enough to care.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    /// Returns true if the request has been abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error with `Internal` if the request has been abandoned.
    pub fn check(&self) -> DiscoveryResult<()> {
        if self.is_cancelled() {
            Err(DiscoveryError::internal("RequestCancelled"))
        } else {
            Ok(())
        }
    }

    /// Get a guard that cancels this token when dropped.
    pub(crate) fn guard(&self) -> CancelGuard {
        CancelGuard(self.0.clone())
    }
}

/// Trips the associated [Cancel] on drop.
pub(crate) struct CancelGuard(Arc<AtomicBool>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Endpoint storage.
///
/// Returned endpoints are shared and immutable, callers may hold them
/// after the call returns without affecting the store.
pub trait Store: 'static + Send + Sync {
    /// Stamp `lastSeen`, canonicalize `kind` and `apiVersion`, and install
    /// the endpoint at its (namespace, name) inside `universe`, creating
    /// the universe if it does not exist. Returns the stored endpoint.
    fn upsert_endpoint(
        &self,
        cancel: &Cancel,
        universe: &str,
        endpoint: DiscoveryEndpoint,
    ) -> DiscoveryResult<Arc<DiscoveryEndpoint>>;

    /// List all endpoints in `universe`, in no particular order.
    /// An unknown universe is an empty list.
    fn list_endpoints(
        &self,
        cancel: &Cancel,
        universe: &str,
    ) -> DiscoveryResult<Vec<Arc<DiscoveryEndpoint>>>;

    /// Get a single endpoint.
    fn get_endpoint(
        &self,
        cancel: &Cancel,
        universe: &str,
        key: &NamespacedName,
    ) -> DiscoveryResult<Option<Arc<DiscoveryEndpoint>>>;
}

/// Trait-object [Store].
pub type DynStore = Arc<dyn Store>;
