//! In-memory endpoint storage, sharded by universe.

use crate::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

fn poisoned<E>(_: E) -> DiscoveryError {
    DiscoveryError::internal("StoreLockPoisoned")
}

/// A map of universes, implementing [Store] in memory.
///
/// Locking is two-level. The outer lock protects the universe map and is
/// only write-locked to create (or prune) universes. Each universe has
/// its own lock protecting its endpoints, so writes to different universes
/// proceed in parallel.
#[derive(Clone)]
pub struct MemStore {
    universes: Arc<RwLock<HashMap<UniverseId, Universe>>>,
    clock: fn() -> String,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::with_clock(crate::now)
    }
}

impl MemStore {
    /// Construct a store that stamps `lastSeen` using `clock`.
    /// The clock must return RFC3339 UTC timestamps.
    pub fn with_clock(clock: fn() -> String) -> Self {
        Self {
            universes: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// The number of universes currently held.
    pub fn universe_count(&self) -> DiscoveryResult<usize> {
        Ok(self.universes.read().map_err(poisoned)?.len())
    }

    /// Remove every endpoint whose `lastSeen` is earlier than `cutoff`
    /// (an RFC3339 UTC timestamp), then every universe left empty.
    /// Returns the count of removed endpoints.
    pub fn prune(&self, cutoff: &str) -> DiscoveryResult<usize> {
        let mut removed = 0;

        // lock order is always outer then inner
        let mut map = self.universes.write().map_err(poisoned)?;

        map.retain(|_, universe| {
            let mut inner = match universe.0.write() {
                Ok(inner) => inner,
                Err(_) => return true,
            };

            let before = inner.endpoints.len();
            inner
                .endpoints
                .retain(|_, ep| ep.spec.last_seen.as_str() >= cutoff);
            removed += before - inner.endpoints.len();

            if inner.endpoints.is_empty() {
                // writers that already hold a handle will see this and retry
                inner.retired = true;
                false
            } else {
                true
            }
        });

        Ok(removed)
    }

    fn universe(&self, universe: &str) -> DiscoveryResult<Option<Universe>> {
        // minimize outer lock time
        Ok(self
            .universes
            .read()
            .map_err(poisoned)?
            .get(universe)
            .cloned())
    }

    fn universe_or_create(&self, universe: &str) -> DiscoveryResult<Universe> {
        if let Some(u) = self.universe(universe)? {
            return Ok(u);
        }

        let mut map = self.universes.write().map_err(poisoned)?;

        // another writer may have created it while we waited for the lock
        Ok(map.entry(universe.to_string()).or_default().clone())
    }
}

impl Store for MemStore {
    fn upsert_endpoint(
        &self,
        _cancel: &Cancel,
        universe: &str,
        mut endpoint: DiscoveryEndpoint,
    ) -> DiscoveryResult<Arc<DiscoveryEndpoint>> {
        loop {
            let u = self.universe_or_create(universe)?;
            let mut inner = u.0.write().map_err(poisoned)?;

            if inner.retired {
                continue;
            }

            // stamp under the write lock so that lastSeen is ordered
            // the same as the writes to this universe
            endpoint.canonicalize((self.clock)());

            let endpoint = Arc::new(endpoint);
            inner
                .endpoints
                .insert(endpoint.namespaced_name(), endpoint.clone());

            return Ok(endpoint);
        }
    }

    fn list_endpoints(
        &self,
        _cancel: &Cancel,
        universe: &str,
    ) -> DiscoveryResult<Vec<Arc<DiscoveryEndpoint>>> {
        match self.universe(universe)? {
            None => Ok(Vec::new()),
            Some(u) => Ok(u
                .0
                .read()
                .map_err(poisoned)?
                .endpoints
                .values()
                .cloned()
                .collect()),
        }
    }

    fn get_endpoint(
        &self,
        _cancel: &Cancel,
        universe: &str,
        key: &NamespacedName,
    ) -> DiscoveryResult<Option<Arc<DiscoveryEndpoint>>> {
        match self.universe(universe)? {
            None => Ok(None),
            Some(u) => Ok(u.0.read().map_err(poisoned)?.endpoints.get(key).cloned()),
        }
    }
}

/// A single concurrent universe.
#[derive(Clone, Default)]
struct Universe(Arc<RwLock<UniverseInner>>);

#[derive(Default)]
struct UniverseInner {
    endpoints: HashMap<NamespacedName, Arc<DiscoveryEndpoint>>,

    // set when pruned out of the outer map
    retired: bool,
}
