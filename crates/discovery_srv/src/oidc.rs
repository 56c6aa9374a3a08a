//! Unauthenticated OpenID Connect publication for a universe.

use crate::*;
use std::collections::HashMap;
use std::sync::Arc;

/// The `/.well-known/openid-configuration` document of a universe.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OpenIdConfiguration {
    /// `https://<host>/<universe>/`
    pub issuer: String,

    /// `<issuer>openid/v1/jwks`
    pub jwks_uri: String,

    /// response_types_supported
    pub response_types_supported: Vec<String>,

    /// subject_types_supported
    pub subject_types_supported: Vec<String>,

    /// id_token_signing_alg_values_supported
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl OpenIdConfiguration {
    /// Build the discovery document for `universe` as reached via `host`.
    ///
    /// Errors with `BadRequest` if `host` is missing, and with `NotFound`
    /// if no endpoint in the universe carries an `oidc` block.
    pub fn for_universe(
        universe: &str,
        host: Option<&str>,
        endpoints: &[Arc<DiscoveryEndpoint>],
    ) -> DiscoveryResult<Self> {
        let host = match host {
            Some(host) if !host.is_empty() => host,
            _ => return Err(DiscoveryError::bad_request("missing Host header")),
        };

        if !endpoints.iter().any(|e| e.spec.oidc.is_some()) {
            return Err(DiscoveryError::not_found("no oidc keys in universe"));
        }

        let issuer = format!("https://{host}/{universe}/");
        let jwks_uri = format!("{issuer}openid/v1/jwks");

        Ok(Self {
            issuer,
            jwks_uri,
            response_types_supported: vec!["id_token".into()],
            subject_types_supported: vec!["public".into()],
            id_token_signing_alg_values_supported: vec!["RS256".into()],
        })
    }
}

/// A JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Jwks {
    /// Always present, possibly empty.
    pub keys: Vec<JsonWebKey>,
}

impl Jwks {
    /// Merge the signing keys of every endpoint into a single set.
    ///
    /// Exactly one key is kept per non-empty `kid`: the one published by
    /// the endpoint with the greatest `lastSeen`. On equal `lastSeen`
    /// the first one encountered is kept. Keys are returned in the order
    /// their `kid` was first encountered.
    pub fn merge(endpoints: &[Arc<DiscoveryEndpoint>]) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut merged: Vec<(&JsonWebKey, &str)> = Vec::new();

        for ep in endpoints {
            let Some(oidc) = &ep.spec.oidc else {
                continue;
            };

            let last_seen = ep.spec.last_seen.as_str();

            for key in oidc.keys.iter() {
                let kid = key.kid();
                if kid.is_empty() {
                    continue;
                }

                match index.get(kid) {
                    None => {
                        index.insert(kid, merged.len());
                        merged.push((key, last_seen));
                    }
                    Some(&idx) => {
                        // rfc3339 utc strings order chronologically
                        if last_seen > merged[idx].1 {
                            merged[idx] = (key, last_seen);
                        }
                    }
                }
            }
        }

        Self {
            keys: merged.into_iter().map(|(k, _)| k.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn key(kid: &str, n: &str) -> JsonWebKey {
        let mut fields = serde_json::Map::new();
        if !kid.is_empty() {
            fields.insert("kid".into(), kid.into());
        }
        fields.insert("kty".into(), "RSA".into());
        fields.insert("n".into(), n.into());
        JsonWebKey { fields }
    }

    fn ep(name: &str, last_seen: &str, keys: Option<Vec<JsonWebKey>>) -> Arc<DiscoveryEndpoint> {
        let mut ep = DiscoveryEndpoint {
            metadata: ObjectMeta {
                namespace: "default".into(),
                name: name.into(),
                ..Default::default()
            },
            spec: DiscoveryEndpointSpec {
                addresses: vec!["10.0.0.1".into()],
                oidc: keys.map(|keys| OidcSpec { keys }),
                ..Default::default()
            },
            ..Default::default()
        };
        ep.canonicalize(last_seen.into());
        Arc::new(ep)
    }

    #[test]
    fn merge_newest_kid_wins() {
        let eps = vec![
            ep("c1", "2024-01-01T00:00:00Z", Some(vec![key("1", "A")])),
            ep(
                "c2",
                "2024-01-01T00:00:05Z",
                Some(vec![key("1", "B"), key("2", "C")]),
            ),
        ];

        let jwks = Jwks::merge(&eps);
        assert_eq!(vec![key("1", "B"), key("2", "C")], jwks.keys);

        // independent of endpoint order
        let rev = eps.into_iter().rev().collect::<Vec<_>>();
        let mut keys = Jwks::merge(&rev).keys;
        keys.sort_by(|a, b| a.kid().cmp(b.kid()));
        assert_eq!(vec![key("1", "B"), key("2", "C")], keys);
    }

    #[test]
    fn merge_tie_keeps_first() {
        let eps = vec![
            ep("c1", "2024-01-01T00:00:00Z", Some(vec![key("1", "A")])),
            ep("c2", "2024-01-01T00:00:00Z", Some(vec![key("1", "B")])),
        ];
        assert_eq!(vec![key("1", "A")], Jwks::merge(&eps).keys);
    }

    #[test]
    fn merge_skips_empty_kid() {
        let eps = vec![ep(
            "c1",
            "2024-01-01T00:00:00Z",
            Some(vec![key("", "A"), key("x", "B")]),
        )];
        assert_eq!(vec![key("x", "B")], Jwks::merge(&eps).keys);
    }

    #[test]
    fn merge_without_oidc_is_empty() {
        let eps = vec![ep("c1", "2024-01-01T00:00:00Z", None)];
        let jwks = Jwks::merge(&eps);
        assert!(jwks.keys.is_empty());

        let out = serde_json::to_value(&jwks).unwrap();
        assert_eq!(serde_json::json!({"keys": []}), out);
    }

    #[test]
    fn discovery_document_binds_host() {
        let u = "a".repeat(64);
        let eps = vec![ep("c1", "2024-01-01T00:00:00Z", Some(vec![]))];

        let doc = OpenIdConfiguration::for_universe(
            &u,
            Some("discovery.example.com"),
            &eps,
        )
        .unwrap();

        assert_eq!(format!("https://discovery.example.com/{u}/"), doc.issuer);
        assert_eq!(
            format!("https://discovery.example.com/{u}/openid/v1/jwks"),
            doc.jwks_uri
        );
        assert_eq!(vec!["id_token"], doc.response_types_supported);
        assert_eq!(vec!["public"], doc.subject_types_supported);
        assert_eq!(vec!["RS256"], doc.id_token_signing_alg_values_supported);
    }

    #[test]
    fn discovery_document_needs_oidc() {
        let eps = vec![ep("c1", "2024-01-01T00:00:00Z", None)];
        let err = OpenIdConfiguration::for_universe("u", Some("h"), &eps)
            .unwrap_err();
        assert_eq!(404, err.status());

        let err =
            OpenIdConfiguration::for_universe("u", Some("h"), &[]).unwrap_err();
        assert_eq!(404, err.status());
    }

    #[test]
    fn discovery_document_needs_host() {
        let eps = vec![ep("c1", "2024-01-01T00:00:00Z", Some(vec![]))];
        let err = OpenIdConfiguration::for_universe("u", None, &eps).unwrap_err();
        assert_eq!(400, err.status());
        let err =
            OpenIdConfiguration::for_universe("u", Some(""), &eps).unwrap_err();
        assert_eq!(400, err.status());
    }
}
