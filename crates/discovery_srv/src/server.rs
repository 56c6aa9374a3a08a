//! discovery http server types.

use std::sync::Arc;

use crate::*;

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::debug!("{}", self.0);
    }
}

/// An actual discovery_srv server instance.
///
/// This server is built to be direct, light-weight, and responsive.
/// On the server-side, as one aspect toward accomplishing this,
/// we are eschewing async code in favor of os thread workers.
/// The async layer only terminates tls and parses requests.
pub struct DiscoverySrv {
    cont: Arc<std::sync::atomic::AtomicBool>,
    workers: Vec<std::thread::JoinHandle<std::io::Result<()>>>,
    addrs: Vec<std::net::SocketAddr>,
    server: Option<Server>,
}

impl Drop for DiscoverySrv {
    fn drop(&mut self) {
        let _g = ThreadGuard("Server Shutdown Complete!");

        tracing::debug!("begin server shutdown...");
        let _ = self.shutdown();
    }
}

impl DiscoverySrv {
    /// Construct a new DiscoverySrv instance.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let config = Arc::new(config);

        // atomic flag for telling worker threads to shutdown
        let cont = Arc::new(std::sync::atomic::AtomicBool::new(true));

        // endpoints of every universe
        let store = MemStore::default();

        let tls_config = match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => {
                Some(TlsConfig::new(cert.clone(), key.clone()))
            }
            (None, None) => None,
            _ => {
                return Err(std::io::Error::other(
                    "tls_cert and tls_key must be provided together",
                ))
            }
        };

        let sconf = ServerConfig {
            addrs: config.listen_address_list.clone(),
            worker_thread_count: config.worker_thread_count,
            max_body_bytes: config.max_body_bytes,
            tls_config,
        };

        // start the actual http server
        let server = Server::new(sconf)?;

        // get the address that was assigned
        let addrs = server.server_addrs().to_vec();
        tracing::info!(?addrs, "Listening");

        // spawn our worker threads
        let mut workers = Vec::with_capacity(config.worker_thread_count + 1);
        for _ in 0..config.worker_thread_count {
            let cont = cont.clone();
            let store: DynStore = Arc::new(store.clone());
            let recv = server.receiver().clone();
            workers.push(std::thread::spawn(move || worker(cont, store, recv)));
        }

        // if requested, also set up a worker for pruning stale endpoints
        if let Some(ttl) = config.endpoint_ttl {
            let prune_cont = cont.clone();
            let prune_store = store.clone();
            workers.push(std::thread::spawn(move || {
                prune_worker(config, ttl, prune_cont, prune_store)
            }));
        }

        Ok(Self {
            cont,
            workers,
            addrs,
            server: Some(server),
        })
    }

    /// Shutdown the server, returning an error result if any
    /// of the worker threads had panicked.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        let mut is_err = false;
        self.cont.store(false, std::sync::atomic::Ordering::SeqCst);
        drop(self.server.take());
        while let Some(worker) = self.workers.pop() {
            tracing::debug!(
                "waiting on {} threads to close...",
                self.workers.len() + 1
            );
            if worker.join().is_err() {
                is_err = true;
            }
        }
        tracing::debug!("all threads closed.");
        if is_err {
            Err(std::io::Error::other("Failure shutting down worker thread"))
        } else {
            Ok(())
        }
    }

    /// Get the bound listening addresses of this server.
    pub fn listen_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    /// Print the address server started on
    pub fn print_addrs(&self) {
        println!("#discovery_srv#running#");
        for addr in self.addrs.iter() {
            // print these incase someone wants to parse for them
            println!("#discovery_srv#listening#{addr:?}#");
        }
    }
}

/// The RFC3339 timestamp `ttl` before now. Endpoints last seen
/// before this are expired.
fn expiry_cutoff(ttl: std::time::Duration) -> String {
    let cutoff = std::time::SystemTime::now()
        .checked_sub(ttl)
        .unwrap_or(std::time::UNIX_EPOCH)
        .max(std::time::UNIX_EPOCH);
    chrono::DateTime::<chrono::Utc>::from(cutoff)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn prune_worker(
    config: Arc<Config>,
    ttl: std::time::Duration,
    cont: Arc<std::sync::atomic::AtomicBool>,
    store: MemStore,
) -> std::io::Result<()> {
    let _g = ThreadGuard("prune_worker thread has ended");

    let mut last_check = std::time::Instant::now();

    while cont.load(std::sync::atomic::Ordering::SeqCst) {
        std::thread::sleep(config.request_listen_duration);

        if last_check.elapsed() >= config.prune_interval {
            last_check = std::time::Instant::now();

            match store.prune(&expiry_cutoff(ttl)) {
                Ok(0) => (),
                Ok(removed) => {
                    tracing::info!(removed, "pruned expired endpoints")
                }
                Err(err) => tracing::warn!(?err, "prune failed"),
            }
        }
    }

    Ok(())
}

fn worker(
    cont: Arc<std::sync::atomic::AtomicBool>,
    store: DynStore,
    recv: HttpReceiver,
) -> std::io::Result<()> {
    let _g = ThreadGuard("worker thread has ended");

    while cont.load(std::sync::atomic::Ordering::SeqCst) {
        let Dispatch { req, cancel, res } = match recv.recv() {
            None => break,
            Some(r) => r,
        };

        let handler = Handler {
            store: &*store,
            cancel,
            res,
        };

        handler.handle(req);
    }

    Ok(())
}

struct Handler<'lt> {
    store: &'lt dyn Store,
    cancel: Cancel,
    res: HttpRespondCb,
}

impl Handler<'_> {
    /// Wrap the handle call so we can respond to the client with errors.
    pub fn handle(self, req: HttpRequest) {
        match self.handle_inner(req) {
            Ok(res) => self.respond(res),
            Err(err) => {
                match &err {
                    DiscoveryError::Internal(_) => {
                        tracing::warn!(%err, "request failed")
                    }
                    _ => tracing::debug!(%err, "request rejected"),
                }
                let res = HttpResponse::text(err.status(), err.public_message());
                self.respond(res)
            }
        }
    }

    /// Dispatch to the correct handlers.
    fn handle_inner(&self, req: HttpRequest) -> DiscoveryResult<HttpResponse> {
        // the client may have gone away while this sat in the queue
        self.cancel.check()?;

        match req {
            HttpRequest::HealthGet => Ok(HttpResponse::json(200, b"{}".to_vec())),
            HttpRequest::OidcConfigGet { universe, host } => {
                self.handle_oidc_config_get(&universe, host.as_deref())
            }
            HttpRequest::JwksGet { universe } => self.handle_jwks_get(&universe),
            HttpRequest::ApiGroupsGet { universe, peer } => {
                resolve_identity(peer.as_ref(), &universe)?;
                ok_json(200, &ApiGroupList::discovery())
            }
            HttpRequest::ApiResourcesGet { universe, peer } => {
                resolve_identity(peer.as_ref(), &universe)?;
                ok_json(200, &ApiResourceList::discovery())
            }
            HttpRequest::EndpointList {
                universe,
                namespace,
                peer,
            } => {
                let id = resolve_identity(peer.as_ref(), &universe)?;
                self.handle_endpoint_list(&id, namespace.as_deref())
            }
            HttpRequest::EndpointGet {
                universe,
                namespace,
                name,
                peer,
            } => {
                let id = resolve_identity(peer.as_ref(), &universe)?;
                self.handle_endpoint_get(&id, NamespacedName::new(namespace, name))
            }
            HttpRequest::EndpointCreate {
                universe,
                namespace,
                peer,
                body,
            } => {
                let id = resolve_identity(peer.as_ref(), &universe)?;
                self.handle_endpoint_create(&id, &namespace, &body)
            }
            HttpRequest::EndpointApply {
                universe,
                namespace,
                name,
                peer,
                body,
            } => {
                let id = resolve_identity(peer.as_ref(), &universe)?;
                self.handle_endpoint_apply(&id, &namespace, &name, &body)
            }
        }
    }

    /// The public OIDC discovery document of a universe.
    fn handle_oidc_config_get(
        &self,
        universe: &str,
        host: Option<&str>,
    ) -> DiscoveryResult<HttpResponse> {
        let endpoints = self.store.list_endpoints(&self.cancel, universe)?;
        let doc = OpenIdConfiguration::for_universe(universe, host, &endpoints)?;
        ok_json(200, &doc)
    }

    /// The public merged JWKS of a universe.
    fn handle_jwks_get(&self, universe: &str) -> DiscoveryResult<HttpResponse> {
        let endpoints = self.store.list_endpoints(&self.cancel, universe)?;
        ok_json(200, &Jwks::merge(&endpoints))
    }

    fn handle_endpoint_list(
        &self,
        id: &PeerIdentity,
        namespace: Option<&str>,
    ) -> DiscoveryResult<HttpResponse> {
        let mut items = self.store.list_endpoints(&self.cancel, &id.universe)?;

        if let Some(namespace) = namespace {
            items.retain(|e| e.metadata.namespace == namespace);
        }

        ok_json(200, &DiscoveryEndpointList::new(items))
    }

    fn handle_endpoint_get(
        &self,
        id: &PeerIdentity,
        key: NamespacedName,
    ) -> DiscoveryResult<HttpResponse> {
        match self.store.get_endpoint(&self.cancel, &id.universe, &key)? {
            Some(endpoint) => Ok(HttpResponse::json(200, endpoint.encode()?)),
            None => Err(DiscoveryError::not_found(format!(
                "{ENDPOINT_RESOURCE} {key} not found"
            ))),
        }
    }

    /// Create (or replace) the caller's own endpoint.
    fn handle_endpoint_create(
        &self,
        id: &PeerIdentity,
        namespace: &str,
        body: &[u8],
    ) -> DiscoveryResult<HttpResponse> {
        let mut endpoint = DiscoveryEndpoint::try_from_slice(body)?;

        if endpoint.metadata.name.is_empty() {
            endpoint.metadata.name = id.client_id.clone();
        }

        check_name_binding(id, &endpoint)?;
        check_namespace(namespace, &endpoint)?;

        self.upsert(id, endpoint)
    }

    /// Server-side apply of the caller's own endpoint.
    fn handle_endpoint_apply(
        &self,
        id: &PeerIdentity,
        namespace: &str,
        name: &str,
        body: &[u8],
    ) -> DiscoveryResult<HttpResponse> {
        let endpoint = DiscoveryEndpoint::try_from_slice(body)?;

        check_name_binding(id, &endpoint)?;

        if endpoint.metadata.name != name {
            return Err(DiscoveryError::forbidden(format!(
                "metadata.name {:?} does not match path name {name:?}",
                endpoint.metadata.name,
            )));
        }

        check_namespace(namespace, &endpoint)?;

        self.upsert(id, endpoint)
    }

    fn upsert(
        &self,
        id: &PeerIdentity,
        endpoint: DiscoveryEndpoint,
    ) -> DiscoveryResult<HttpResponse> {
        let stored =
            self.store
                .upsert_endpoint(&self.cancel, &id.universe, endpoint)?;

        tracing::debug!(
            universe = %id.universe,
            key = %stored.namespaced_name(),
            "endpoint stored"
        );

        Ok(HttpResponse::json(201, stored.encode()?))
    }

    /// Process the response.
    fn respond(self, res: HttpResponse) {
        let Self { res: cb, .. } = self;
        cb(res);
    }
}

fn ok_json<T: serde::Serialize>(
    status: u16,
    t: &T,
) -> DiscoveryResult<HttpResponse> {
    Ok(HttpResponse::json(status, encode_json(t)?))
}

/// A peer may only write the endpoint named after its own ClientId.
fn check_name_binding(
    id: &PeerIdentity,
    endpoint: &DiscoveryEndpoint,
) -> DiscoveryResult<()> {
    if endpoint.metadata.name != id.client_id {
        return Err(DiscoveryError::forbidden(format!(
            "metadata.name {:?} does not match client id {:?}",
            endpoint.metadata.name, id.client_id,
        )));
    }
    Ok(())
}

fn check_namespace(
    namespace: &str,
    endpoint: &DiscoveryEndpoint,
) -> DiscoveryResult<()> {
    if endpoint.metadata.namespace != namespace {
        return Err(DiscoveryError::forbidden(format!(
            "metadata.namespace {:?} does not match path namespace {namespace:?}",
            endpoint.metadata.namespace,
        )));
    }
    Ok(())
}
