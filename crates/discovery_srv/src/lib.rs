#![deny(missing_docs)]
//! Discovery server is an HTTPS REST server for peers of many independent
//! clusters to publish their network addresses and OIDC signing keys.
//!
//! The server does not hold any CA configuration. Every peer authenticates
//! with a client certificate chain, and the public key of the CA in that
//! chain selects an isolated "universe". Within a universe, peers can list
//! each other's endpoints, and the union of their signing keys is published
//! as an unauthenticated OpenID Connect discovery document and JWKS.
//!
//! For additional details, please see the [protocol].

/// This is a documentation module containing the discovery server protocol.
///
/// #### 1. Types
///
/// - `UniverseId` - lowercase hex sha256 of the DER `SubjectPublicKeyInfo`
///                  of a CA certificate, 64 characters.
/// - `ClientId` - the Common Name of the leaf certificate presented by a peer.
/// - `Rfc3339` - string timestamp in UTC with second resolution,
///               e.g. `2024-01-02T03:04:05Z`. Lexicographic order of these
///               strings is chronological order.
///
/// ```text
/// DiscoveryEndpoint = {
///   "kind": "DiscoveryEndpoint",
///   "apiVersion": "discovery.kops.k8s.io/v1alpha1",
///   "metadata": { "namespace": string, "name": ClientId },
///   "spec": {
///     "addresses": [ string, .. ],
///     "lastSeen": Rfc3339,
///     "oidc": { "keys": [ { "kid": string, .. }, .. ] }
///   }
/// }
/// DiscoveryEndpointList = { .., "items": [ DiscoveryEndpoint, .. ] }
/// ```
///
/// Any other properties on `metadata` or on the keys will pass through.
///
/// #### 2. REST API
///
/// `G` = `discovery.kops.k8s.io/v1alpha1`.
///
/// - `GET /<UniverseId>/.well-known/openid-configuration` (public)
/// - `GET /<UniverseId>/openid/v1/jwks` (public)
/// - `GET /<UniverseId>/apis` (mTLS)
/// - `GET /<UniverseId>/apis/G` (mTLS)
/// - `GET /<UniverseId>/apis/G/discoveryendpoints` (mTLS)
/// - `GET /<UniverseId>/apis/G/namespaces/<ns>/discoveryendpoints` (mTLS)
/// - `POST /<UniverseId>/apis/G/namespaces/<ns>/discoveryendpoints` (mTLS)
/// - `GET /<UniverseId>/apis/G/namespaces/<ns>/discoveryendpoints/<name>` (mTLS)
/// - `PATCH /<UniverseId>/apis/G/namespaces/<ns>/discoveryendpoints/<name>` (mTLS)
/// - `GET /health`
///
/// Successful responses are `application/json`. Errors are `text/plain`
/// and the status code carries the error kind:
/// 400 malformed body or missing Host, 401 no usable client chain,
/// 403 chain or name mismatch, 404 not found, 500 storage failure.
///
/// #### 3. Identity
///
/// - The server MUST request, but not require, a client certificate.
/// - For mTLS routes, the peer chain is verified using the LAST certificate
///   presented as the only trust anchor and every other non-leaf certificate
///   as an intermediate. The leaf MUST carry the clientAuth extended key usage.
/// - Some certificate on the verified path MUST have a SPKI hash equal to
///   the `UniverseId` in the url.
/// - The leaf Common Name is the `ClientId` and MUST NOT be empty.
///
/// #### 4. Writes
///
/// - `metadata.name` MUST equal the `ClientId` (an empty name on POST is
///   taken to be the `ClientId`).
/// - On PATCH, `metadata.name` MUST also equal the `<name>` path segment.
/// - `metadata.namespace` MUST equal the `<ns>` path segment.
/// - The server MUST ignore the request `kind` and `apiVersion`, and MUST
///   stamp `spec.lastSeen` with its own clock.
/// - Both POST and PATCH upsert and respond `201` with the stored endpoint.
///
/// #### 5. JWKS
///
/// - Keys with an empty `kid` are ignored.
/// - When multiple endpoints publish the same `kid`, the copy from the
///   endpoint with the greatest `lastSeen` wins. Ties keep the first seen.
/// - Distinct kids are always merged.
/// - The discovery document is `404` until at least one endpoint in the
///   universe carries an `oidc` block.
#[cfg(doc)]
pub mod protocol {}

/// The current service clock as an RFC3339 UTC timestamp with
/// second resolution.
fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

mod error;
pub use error::*;

mod config;
pub use config::*;

mod model;
pub use model::*;

mod identity;
pub use identity::*;

mod store;
pub use store::*;

mod universe;
pub use universe::*;

mod oidc;
pub use oidc::*;

mod tls;
pub use tls::*;

mod http;
use http::*;

mod server;
pub use server::*;
