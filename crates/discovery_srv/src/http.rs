use crate::{Cancel, PeerChain, TlsConfig, ENDPOINT_RESOURCE, GROUP_VERSION};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::*;
use std::future::IntoFuture;
use std::net::SocketAddr;

pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    fn respond(self) -> response::Response {
        match response::Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, self.content_type)
            .body(body::Body::from(self.body))
        {
            Ok(res) => res,
            Err(err) => {
                tracing::warn!(?err, "failed to encode response");
                response::IntoResponse::into_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        }
    }
}

pub type HttpRespondCb = Box<dyn FnOnce(HttpResponse) + 'static + Send>;

/// A parsed request, ready for a worker.
///
/// Authenticated variants carry the tls peer chain of the connection,
/// `None` when the connection is not tls.
pub enum HttpRequest {
    HealthGet,
    OidcConfigGet {
        universe: String,
        host: Option<String>,
    },
    JwksGet {
        universe: String,
    },
    ApiGroupsGet {
        universe: String,
        peer: Option<PeerChain>,
    },
    ApiResourcesGet {
        universe: String,
        peer: Option<PeerChain>,
    },
    EndpointList {
        universe: String,
        namespace: Option<String>,
        peer: Option<PeerChain>,
    },
    EndpointGet {
        universe: String,
        namespace: String,
        name: String,
        peer: Option<PeerChain>,
    },
    EndpointCreate {
        universe: String,
        namespace: String,
        peer: Option<PeerChain>,
        body: bytes::Bytes,
    },
    EndpointApply {
        universe: String,
        namespace: String,
        name: String,
        peer: Option<PeerChain>,
        body: bytes::Bytes,
    },
}

pub struct Dispatch {
    pub req: HttpRequest,
    pub cancel: Cancel,
    pub res: HttpRespondCb,
}

type HSend = async_channel::Sender<Dispatch>;
type HRecv = async_channel::Receiver<Dispatch>;

#[derive(Clone)]
pub struct HttpReceiver(HRecv);

impl HttpReceiver {
    pub fn recv(&self) -> Option<Dispatch> {
        match self.0.recv_blocking() {
            Ok(r) => Some(r),
            Err(_) => None,
        }
    }
}

pub struct ServerConfig {
    pub addrs: Vec<std::net::SocketAddr>,
    pub worker_thread_count: usize,
    pub max_body_bytes: usize,
    pub tls_config: Option<TlsConfig>,
}

pub struct Server {
    t_join: Option<std::thread::JoinHandle<()>>,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    h_send: HSend,
    shutdown: Option<axum_server::Handle>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.h_send.close();
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        if let Some(t_join) = self.t_join.take() {
            let _ = t_join.join();
        }
    }
}

impl Server {
    pub fn new(server_config: ServerConfig) -> std::io::Result<Self> {
        let (s_ready, r_ready) = tokio::sync::oneshot::channel();
        let t_join =
            std::thread::spawn(move || tokio_thread(server_config, s_ready));
        match r_ready.blocking_recv() {
            Ok(Ok(Ready {
                h_send,
                addrs,
                receiver,
                shutdown,
            })) => Ok(Self {
                t_join: Some(t_join),
                addrs,
                receiver,
                h_send,
                shutdown: Some(shutdown),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(std::io::Error::other("failed to bind server")),
        }
    }

    pub fn server_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    pub fn receiver(&self) -> &HttpReceiver {
        &self.receiver
    }
}

struct Ready {
    h_send: HSend,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    shutdown: axum_server::Handle,
}

#[derive(Clone)]
struct AppState {
    h_send: HSend,
}

type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

fn router(h_send: HSend, max_body_bytes: usize) -> Router {
    let apis = format!("/:universe/apis/{GROUP_VERSION}");
    let ns = format!("{apis}/namespaces/:namespace/{ENDPOINT_RESOURCE}");

    Router::<AppState>::new()
        .route("/health", routing::get(handle_health_get))
        .route(
            "/:universe/.well-known/openid-configuration",
            routing::get(handle_oidc_config_get),
        )
        .route("/:universe/openid/v1/jwks", routing::get(handle_jwks_get))
        .route("/:universe/apis", routing::get(handle_api_groups_get))
        .route(&apis, routing::get(handle_api_resources_get))
        .route(
            &format!("{apis}/{ENDPOINT_RESOURCE}"),
            routing::get(handle_endpoint_list_all),
        )
        .route(
            &ns,
            routing::get(handle_endpoint_list_ns).post(handle_endpoint_create),
        )
        .route(
            &format!("{ns}/:name"),
            routing::get(handle_endpoint_get).patch(handle_endpoint_apply),
        )
        .layer(extract::DefaultBodyLimit::max(max_body_bytes))
        .with_state(AppState { h_send })
}

fn tokio_thread(
    server_config: ServerConfig,
    ready: tokio::sync::oneshot::Sender<std::io::Result<Ready>>,
) {
    tracing::trace!(addrs = ?server_config.addrs, "Starting tokio thread");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    runtime.block_on(async move {
        let (h_send, h_recv) =
            async_channel::bounded(server_config.worker_thread_count);

        let app = router(h_send.clone(), server_config.max_body_bytes);

        let acceptor = match server_config
            .tls_config
            .as_ref()
            .map(TlsConfig::create_acceptor)
            .transpose()
        {
            Ok(acceptor) => acceptor,
            Err(err) => {
                let _ = ready.send(Err(err));
                return;
            }
        };

        let receiver = HttpReceiver(h_recv);

        let mut addrs = Vec::with_capacity(server_config.addrs.len());
        let mut servers: Vec<BoxFut<'static, std::io::Result<()>>> =
            Vec::with_capacity(server_config.addrs.len());

        let shutdown_handle = axum_server::Handle::new();

        for addr in server_config.addrs {
            tracing::info!("Binding to: {}", addr);

            let listener = match tokio::task::spawn_blocking(move || {
                let listener = std::net::TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                Ok::<_, std::io::Error>(listener)
            })
            .await
            .unwrap_or_else(|err| Err(std::io::Error::other(err)))
            {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            };

            match listener.local_addr() {
                Ok(addr) => {
                    tracing::info!("Bound with local address: {}", addr);
                    addrs.push(addr)
                }
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            }

            let make_service =
                app.clone().into_make_service_with_connect_info::<SocketAddr>();
            let server = axum_server::Server::from_tcp(listener)
                .handle(shutdown_handle.clone());

            match &acceptor {
                Some(acceptor) => servers.push(Box::pin(
                    server
                        .acceptor(acceptor.clone())
                        .serve(make_service)
                        .into_future(),
                )),
                None => servers
                    .push(Box::pin(server.serve(make_service).into_future())),
            }
        }

        tracing::info!("Sending ready signal");

        if ready
            .send(Ok(Ready {
                h_send,
                addrs,
                receiver,
                shutdown: shutdown_handle,
            }))
            .is_err()
        {
            return;
        }

        for res in futures::future::join_all(servers).await {
            if let Err(err) = res {
                tracing::warn!(?err, "listener ended with error");
            }
        }
    });
}

/// Hand the request to the worker pool and await the response.
///
/// If this future is dropped (the client went away) the request's
/// [Cancel] token is tripped. There is no timeout here, a request
/// lives as long as the client waits.
async fn handle_dispatch(h_send: &HSend, req: HttpRequest) -> response::Response {
    let cancel = Cancel::default();
    let _guard = cancel.guard();

    let (s, r) = tokio::sync::oneshot::channel();
    let res = Box::new(move |res| {
        let _ = s.send(res);
    });

    if h_send.send(Dispatch { req, cancel, res }).await.is_err() {
        return HttpResponse::text(500, "Internal").respond();
    }

    match r.await {
        Ok(r) => r.respond(),
        Err(_) => HttpResponse::text(500, "Internal").respond(),
    }
}

fn peer(ext: Option<Extension<PeerChain>>) -> Option<PeerChain> {
    ext.map(|Extension(chain)| chain)
}

async fn handle_health_get(
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(&state.h_send, HttpRequest::HealthGet).await
}

async fn handle_oidc_config_get(
    extract::Path(universe): extract::Path<String>,
    extract::State(state): extract::State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> response::Response {
    // http/2 carries the host in the uri authority instead
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .map(str::to_string);
    handle_dispatch(&state.h_send, HttpRequest::OidcConfigGet { universe, host })
        .await
}

async fn handle_jwks_get(
    extract::Path(universe): extract::Path<String>,
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(&state.h_send, HttpRequest::JwksGet { universe }).await
}

async fn handle_api_groups_get(
    extract::Path(universe): extract::Path<String>,
    extract::State(state): extract::State<AppState>,
    chain: Option<Extension<PeerChain>>,
) -> response::Response {
    let peer = peer(chain);
    handle_dispatch(&state.h_send, HttpRequest::ApiGroupsGet { universe, peer })
        .await
}

async fn handle_api_resources_get(
    extract::Path(universe): extract::Path<String>,
    extract::State(state): extract::State<AppState>,
    chain: Option<Extension<PeerChain>>,
) -> response::Response {
    let peer = peer(chain);
    handle_dispatch(
        &state.h_send,
        HttpRequest::ApiResourcesGet { universe, peer },
    )
    .await
}

async fn handle_endpoint_list_all(
    extract::Path(universe): extract::Path<String>,
    extract::State(state): extract::State<AppState>,
    chain: Option<Extension<PeerChain>>,
) -> response::Response {
    let peer = peer(chain);
    handle_dispatch(
        &state.h_send,
        HttpRequest::EndpointList {
            universe,
            namespace: None,
            peer,
        },
    )
    .await
}

async fn handle_endpoint_list_ns(
    extract::Path((universe, namespace)): extract::Path<(String, String)>,
    extract::State(state): extract::State<AppState>,
    chain: Option<Extension<PeerChain>>,
) -> response::Response {
    let peer = peer(chain);
    handle_dispatch(
        &state.h_send,
        HttpRequest::EndpointList {
            universe,
            namespace: Some(namespace),
            peer,
        },
    )
    .await
}

async fn handle_endpoint_get(
    extract::Path((universe, namespace, name)): extract::Path<(
        String,
        String,
        String,
    )>,
    extract::State(state): extract::State<AppState>,
    chain: Option<Extension<PeerChain>>,
) -> response::Response {
    let peer = peer(chain);
    handle_dispatch(
        &state.h_send,
        HttpRequest::EndpointGet {
            universe,
            namespace,
            name,
            peer,
        },
    )
    .await
}

async fn handle_endpoint_create(
    extract::Path((universe, namespace)): extract::Path<(String, String)>,
    extract::State(state): extract::State<AppState>,
    chain: Option<Extension<PeerChain>>,
    body: bytes::Bytes,
) -> response::Response {
    let peer = peer(chain);
    handle_dispatch(
        &state.h_send,
        HttpRequest::EndpointCreate {
            universe,
            namespace,
            peer,
            body,
        },
    )
    .await
}

async fn handle_endpoint_apply(
    extract::Path((universe, namespace, name)): extract::Path<(
        String,
        String,
        String,
    )>,
    extract::State(state): extract::State<AppState>,
    chain: Option<Extension<PeerChain>>,
    body: bytes::Bytes,
) -> response::Response {
    let peer = peer(chain);
    handle_dispatch(
        &state.h_send,
        HttpRequest::EndpointApply {
            universe,
            namespace,
            name,
            peer,
            body,
        },
    )
    .await
}
