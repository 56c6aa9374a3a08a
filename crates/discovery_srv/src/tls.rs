use crate::PeerChain;
use axum::middleware::AddExtension;
use axum::Extension;
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures::future::BoxFuture;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::io;
use std::sync::Arc;
use tokio::net::TcpStream;
use tower::Layer;

/// Configuration for TLS.
///
/// This struct holds the paths to the certificate chain and key files to
/// use for serving over TLS.
pub struct TlsConfig {
    cert_path: std::path::PathBuf,
    key_path: std::path::PathBuf,
}

impl TlsConfig {
    /// Create a new [TlsConfig] with the given certificate and key paths.
    pub fn new(
        cert_path: std::path::PathBuf,
        key_path: std::path::PathBuf,
    ) -> Self {
        Self {
            cert_path,
            key_path,
        }
    }

    /// Load the configured files into a rustls server config.
    ///
    /// Clients are asked for a certificate, but not required to present
    /// one, and no CA is configured: any presented chain is accepted here
    /// and judged later, per request, by [crate::resolve_identity].
    pub fn create_server_config(
        &self,
    ) -> io::Result<Arc<rustls::ServerConfig>> {
        let certs = CertificateDer::pem_file_iter(&self.cert_path)
            .map_err(|err| {
                io::Error::other(format!("InvalidTlsCert: {err:?}"))
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                io::Error::other(format!("InvalidTlsCert: {err:?}"))
            })?;

        if certs.is_empty() {
            return Err(io::Error::other("InvalidTlsCert: no certificates"));
        }

        let key = PrivateKeyDer::from_pem_file(&self.key_path).map_err(
            |err| io::Error::other(format!("InvalidTlsKey: {err:?}")),
        )?;

        server_config(certs, key)
    }

    /// Create a new [PeerChainAcceptor] using the configured certificate
    /// and key paths.
    pub fn create_acceptor(&self) -> io::Result<PeerChainAcceptor> {
        Ok(PeerChainAcceptor::new(self.create_server_config()?))
    }
}

/// Build a rustls server config from an in-memory chain and key,
/// using the ring crypto provider.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> io::Result<Arc<rustls::ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config =
        rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(io::Error::other)?
            .with_client_cert_verifier(Arc::new(RequestClientCert(provider)))
            .with_single_cert(certs, key)
            .map_err(io::Error::other)?;

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Requests, but never requires, a client certificate.
///
/// The chain is not checked against any trust anchor. The handshake
/// signatures still are, so a peer must hold the leaf private key.
#[derive(Debug)]
struct RequestClientCert(Arc<CryptoProvider>);

impl ClientCertVerifier for RequestClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Terminates tls and attaches the peer certificate chain
/// to every request on the connection as a [PeerChain] extension.
#[derive(Clone)]
pub struct PeerChainAcceptor {
    inner: RustlsAcceptor,
}

impl PeerChainAcceptor {
    /// Wrap a rustls server config.
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            inner: RustlsAcceptor::new(RustlsConfig::from_config(config)),
        }
    }
}

impl<S> Accept<TcpStream, S> for PeerChainAcceptor
where
    S: Send + 'static,
{
    type Stream = tokio_rustls::server::TlsStream<TcpStream>;
    type Service = AddExtension<S, PeerChain>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = inner.accept(stream, service).await?;

            let chain = stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|certs| certs.to_vec())
                .unwrap_or_default();

            tracing::trace!(chain_len = chain.len(), "tls peer accepted");

            Ok((stream, Extension(PeerChain::new(chain)).layer(service)))
        })
    }
}
