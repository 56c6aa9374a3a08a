//! Peer identity derived from the tls client certificate chain.
//!
//! No CA is configured on this server. A peer presents its chain leaf
//! first, and the last certificate in that chain is used as the only trust
//! anchor. Verification therefore proves only that the peer holds a leaf
//! key issued (directly or through the presented intermediates) by that
//! anchor. The universe a peer may act in is then any universe whose id is
//! the spki hash of a certificate on the verified path.

use crate::*;
use rustls::pki_types::{CertificateDer, UnixTime};
use sha2::Digest;
use std::sync::Arc;

/// The universe identifier: lowercase hex sha256 of a DER encoded
/// `SubjectPublicKeyInfo`.
pub type UniverseId = String;

/// The certificate chain presented by a tls peer, leaf first.
///
/// Empty when the peer did not present a client certificate.
#[derive(Debug, Clone, Default)]
pub struct PeerChain(pub Arc<[CertificateDer<'static>]>);

impl PeerChain {
    /// Construct a new PeerChain.
    pub fn new(chain: Vec<CertificateDer<'static>>) -> Self {
        Self(chain.into())
    }

    /// The certificates, leaf first.
    pub fn certs(&self) -> &[CertificateDer<'static>] {
        &self.0
    }
}

/// An authenticated peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// The universe the peer is acting in.
    pub universe: UniverseId,

    /// The common name of the peer's leaf certificate.
    pub client_id: String,
}

/// Compute the universe id of a DER encoded `SubjectPublicKeyInfo`.
pub fn universe_id_from_spki(spki_der: &[u8]) -> UniverseId {
    hex::encode(sha2::Sha256::digest(spki_der))
}

/// Compute the universe id implied by a DER encoded certificate.
///
/// Only the subject public key contributes, so two certificates for the
/// same key map to the same universe regardless of subject or validity.
pub fn universe_id_for_cert(cert_der: &[u8]) -> DiscoveryResult<UniverseId> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|err| DiscoveryError::bad_request(format!("InvalidCert: {err}")))?;
    Ok(universe_id_from_spki(cert.public_key().raw))
}

/// Resolve the identity of a peer for a request against `universe`.
///
/// - No chain or an empty chain is `Unauthenticated`.
/// - A chain that does not verify against its own last certificate,
///   or whose leaf is not usable for client auth, is `Unauthenticated`.
/// - A verified path with no certificate hashing to `universe` is
///   `Forbidden`.
/// - An empty leaf common name is `Forbidden`.
pub fn resolve_identity(
    chain: Option<&PeerChain>,
    universe: &str,
) -> DiscoveryResult<PeerIdentity> {
    let certs = match chain {
        Some(chain) if !chain.certs().is_empty() => chain.certs(),
        _ => {
            return Err(DiscoveryError::unauthenticated(
                "no client certificate",
            ))
        }
    };

    let leaf = &certs[0];
    let root = &certs[certs.len() - 1];
    let intermediates = match certs.len() {
        0..=2 => &certs[..0],
        len => &certs[1..len - 1],
    };

    let anchors = [webpki::anchor_from_trusted_cert(root).map_err(|err| {
        tracing::debug!(?err, "invalid peer chain root");
        DiscoveryError::unauthenticated(format!("InvalidRoot: {err:?}"))
    })?];

    let ee = webpki::EndEntityCert::try_from(leaf).map_err(|err| {
        tracing::debug!(?err, "invalid peer leaf certificate");
        DiscoveryError::unauthenticated(format!("InvalidLeaf: {err:?}"))
    })?;

    let path = ee
        .verify_for_usage(
            webpki::ALL_VERIFICATION_ALGS,
            &anchors,
            intermediates,
            UnixTime::now(),
            webpki::KeyUsage::client_auth(),
            None,
            None,
        )
        .map_err(|err| {
            tracing::debug!(?err, "peer chain verification failed");
            DiscoveryError::unauthenticated(format!("InvalidChain: {err:?}"))
        })?;

    // only certificates on the verified path may select the universe,
    // an unrelated certificate appended to the chain must not
    let mut on_path: Vec<CertificateDer<'_>> = Vec::with_capacity(certs.len());
    on_path.push(leaf.clone());
    on_path.extend(path.intermediate_certificates().map(|c| c.der()));
    on_path.push(root.clone());

    let is_member = on_path.iter().any(|cert| {
        matches!(universe_id_for_cert(cert), Ok(id) if id == universe)
    });

    if !is_member {
        return Err(DiscoveryError::forbidden(
            "chain does not match universe",
        ));
    }

    let client_id = leaf_common_name(leaf)?;

    if client_id.is_empty() {
        return Err(DiscoveryError::forbidden("empty client common name"));
    }

    Ok(PeerIdentity {
        universe: universe.to_string(),
        client_id,
    })
}

fn leaf_common_name(leaf: &[u8]) -> DiscoveryResult<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(leaf)
        .map_err(|err| DiscoveryError::unauthenticated(format!("InvalidLeaf: {err}")))?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    Ok(cn)
}
