//! The binary discovery-srv.

use discovery_srv::*;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// By default discovery-srv runs in "testing" configuration
    /// with much lighter resource usage settings, listening on an
    /// ephemeral localhost port.
    ///
    /// To setup the server to be ready to use most of the resources available
    /// on a single given machine, and to listen on port 443 on all
    /// interfaces, you can set this "production" mode.
    #[arg(long)]
    pub production: bool,

    /// Override the listen address(es). May be specified multiple times.
    #[arg(long)]
    pub listen: Vec<std::net::SocketAddr>,

    /// PEM file containing the server certificate chain.
    /// Without tls, peers cannot present client certificates,
    /// so only the public OIDC routes are usable.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<std::path::PathBuf>,

    /// PEM file containing the server private key.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<std::path::PathBuf>,

    /// Remove endpoints that have not been re-published for this many
    /// seconds. By default endpoints are kept for the life of the process.
    #[arg(long)]
    pub endpoint_ttl_secs: Option<u64>,
}

fn main() -> std::io::Result<()> {
    let args = <Args as clap::Parser>::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = if args.production {
        Config::production()
    } else {
        Config::testing()
    };

    if !args.listen.is_empty() {
        config.listen_address_list = args.listen.clone();
    }
    config.tls_cert = args.tls_cert.clone();
    config.tls_key = args.tls_key.clone();
    config.endpoint_ttl =
        args.endpoint_ttl_secs.map(std::time::Duration::from_secs);

    tracing::info!(?args, ?config, "starting");

    let (send, recv) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
        let _ = send.send(());
    })
    .map_err(std::io::Error::other)?;

    let srv = DiscoverySrv::new(config)?;
    srv.print_addrs();

    let _ = recv.recv();

    tracing::info!("Terminating...");
    drop(srv);
    tracing::info!("Done.");

    Ok(())
}
