//! config types.

/// Configuration for running a DiscoverySrv.
#[derive(Debug)]
pub struct Config {
    /// Worker thread count.
    ///
    /// Requests are parsed by the async http layer and then handed to
    /// os thread workers which verify the peer chain and touch the store.
    /// Chain verification is cpu bound, so more workers than cpus only
    /// helps when an alternative store backend blocks on io.
    ///
    /// Defaults:
    /// - `testing = 2`
    /// - `production = 4 * cpu_count`
    pub worker_thread_count: usize,

    /// The maximum accepted request body size in bytes.
    ///
    /// An endpoint carries its addresses and its OIDC signing keys,
    /// an RSA 4096 JWK is roughly 800 bytes.
    ///
    /// Defaults:
    /// - `testing = 64KiB`
    /// - `production = 64KiB`
    pub max_body_bytes: usize,

    /// The duration background threads sleep between checks to see if the
    /// server is shutting down.
    ///
    /// Setting this very high will cause ctrl-c / server shutdown to be slow.
    ///
    /// Defaults:
    /// - `testing = 10ms`
    /// - `production = 2s`
    pub request_listen_duration: std::time::Duration,

    /// The address(es) at which to listen.
    ///
    /// Defaults:
    /// - `testing = "[127.0.0.1:0]"`
    /// - `production = "[0.0.0.0:443, [::]:443]"`
    pub listen_address_list: Vec<std::net::SocketAddr>,

    /// Remove endpoints whose `lastSeen` is older than this.
    ///
    /// Peers that stop re-publishing are otherwise retained for the
    /// lifetime of the process. Universes left without endpoints are
    /// removed as well.
    ///
    /// Defaults:
    /// - `testing = None`
    /// - `production = None`
    pub endpoint_ttl: Option<std::time::Duration>,

    /// The interval at which expired endpoints are pruned.
    /// Only used when `endpoint_ttl` is set.
    ///
    /// Defaults:
    /// - `testing = 10s`
    /// - `production = 60s`
    pub prune_interval: std::time::Duration,

    /// The path to a PEM TLS certificate chain file.
    ///
    /// Must be provided when `tls_key` is provided. Without TLS no
    /// client certificate can be presented, so only the public OIDC
    /// routes will be usable.
    ///
    /// Default:
    /// - `None`
    pub tls_cert: Option<std::path::PathBuf>,

    /// The path to a PEM TLS private key file.
    ///
    /// Must be provided when `tls_cert` is provided.
    ///
    /// Default:
    /// - `None`
    pub tls_key: Option<std::path::PathBuf>,
}

impl Config {
    /// Get a discovery server config suitable for testing.
    pub fn testing() -> Self {
        Self {
            worker_thread_count: 2,
            max_body_bytes: 64 * 1024,
            request_listen_duration: std::time::Duration::from_millis(10),
            listen_address_list: vec![(std::net::Ipv4Addr::LOCALHOST, 0).into()],
            endpoint_ttl: None,
            prune_interval: std::time::Duration::from_secs(10),
            tls_cert: None,
            tls_key: None,
        }
    }

    /// Get a discovery server config suitable for production.
    pub fn production() -> Self {
        Self {
            worker_thread_count: num_cpus::get() * 4,
            max_body_bytes: 64 * 1024,
            request_listen_duration: std::time::Duration::from_secs(2),
            listen_address_list: vec![
                (std::net::Ipv4Addr::UNSPECIFIED, 443).into(),
                (std::net::Ipv6Addr::UNSPECIFIED, 443).into(),
            ],
            endpoint_ttl: None,
            prune_interval: std::time::Duration::from_secs(60),
            tls_cert: None,
            tls_key: None,
        }
    }
}
