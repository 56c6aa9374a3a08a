//! Wire types for the discovery api surface.

use crate::*;
use std::sync::Arc;

/// The api group served by this server.
pub const API_GROUP: &str = "discovery.kops.k8s.io";

/// The only served version of [API_GROUP].
pub const API_VERSION: &str = "v1alpha1";

/// `<group>/<version>`, the canonical `apiVersion` of stored endpoints.
pub const GROUP_VERSION: &str = "discovery.kops.k8s.io/v1alpha1";

/// The canonical `kind` of stored endpoints.
pub const ENDPOINT_KIND: &str = "DiscoveryEndpoint";

/// The `kind` of a list of endpoints.
pub const ENDPOINT_LIST_KIND: &str = "DiscoveryEndpointList";

/// The plural resource name used in urls.
pub const ENDPOINT_RESOURCE: &str = "discoveryendpoints";

/// The uniqueness key of an endpoint inside a universe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    /// namespace
    pub namespace: String,

    /// name
    pub name: String,
}

impl NamespacedName {
    /// Construct a new NamespacedName.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata. Only namespace and name are interpreted,
/// other properties pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectMeta {
    /// namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Uninterpreted metadata properties.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single JSON Web Key. Only `kid` is interpreted, every member
/// is published back exactly as received.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct JsonWebKey {
    /// `kid`, `use`, `kty`, `alg`, `n`, `e`, etc.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonWebKey {
    /// The key identifier, empty if absent or not a string.
    pub fn kid(&self) -> &str {
        self.fields
            .get("kid")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    }
}

/// The OIDC signing keys published by one endpoint.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OidcSpec {
    /// keys
    #[serde(default)]
    pub keys: Vec<JsonWebKey>,
}

/// The content of an endpoint.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEndpointSpec {
    /// Network addresses of the peer, opaque to this server.
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Stamped by the server on every write, never read from requests.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_seen: String,

    /// Signing keys contributed to the universe JWKS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcSpec>,
}

/// A peer registration.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEndpoint {
    /// kind
    #[serde(default)]
    pub kind: String,

    /// apiVersion
    #[serde(default)]
    pub api_version: String,

    /// metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// spec
    #[serde(default)]
    pub spec: DiscoveryEndpointSpec,
}

impl DiscoveryEndpoint {
    /// Parse an endpoint from a request body.
    ///
    /// Create and apply bodies use the same schema.
    pub fn try_from_slice(slice: &[u8]) -> DiscoveryResult<Self> {
        serde_json::from_slice(slice).map_err(DiscoveryError::bad_request)
    }

    /// Encode this endpoint as json.
    pub fn encode(&self) -> DiscoveryResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(DiscoveryError::internal)
    }

    /// The store key of this endpoint.
    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Replace any caller supplied kind / apiVersion / lastSeen
    /// with the server's own values.
    pub fn canonicalize(&mut self, last_seen: String) {
        self.kind = ENDPOINT_KIND.to_string();
        self.api_version = GROUP_VERSION.to_string();
        self.spec.last_seen = last_seen;
    }
}

/// A list of endpoints.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEndpointList {
    /// kind
    pub kind: &'static str,

    /// apiVersion
    pub api_version: &'static str,

    /// List metadata, always empty.
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Always present, even when empty.
    pub items: Vec<Arc<DiscoveryEndpoint>>,
}

impl DiscoveryEndpointList {
    /// Wrap a list of endpoints.
    pub fn new(items: Vec<Arc<DiscoveryEndpoint>>) -> Self {
        Self {
            kind: ENDPOINT_LIST_KIND,
            api_version: GROUP_VERSION,
            metadata: serde_json::Map::new(),
            items,
        }
    }
}

/// A group/version pair as found in discovery documents.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionForDiscovery {
    /// groupVersion
    pub group_version: &'static str,

    /// version
    pub version: &'static str,
}

/// A served api group.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroup {
    /// name
    pub name: &'static str,

    /// versions
    pub versions: Vec<GroupVersionForDiscovery>,

    /// preferredVersion
    pub preferred_version: GroupVersionForDiscovery,
}

/// The `GET /<universe>/apis` document.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroupList {
    /// kind
    pub kind: &'static str,

    /// apiVersion
    pub api_version: &'static str,

    /// groups
    pub groups: Vec<ApiGroup>,
}

impl ApiGroupList {
    /// The canned group list of this server.
    pub fn discovery() -> Self {
        let version = GroupVersionForDiscovery {
            group_version: GROUP_VERSION,
            version: API_VERSION,
        };
        Self {
            kind: "APIGroupList",
            api_version: "v1",
            groups: vec![ApiGroup {
                name: API_GROUP,
                versions: vec![version.clone()],
                preferred_version: version,
            }],
        }
    }
}

/// A served resource.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    /// name
    pub name: &'static str,

    /// singularName
    pub singular_name: &'static str,

    /// namespaced
    pub namespaced: bool,

    /// kind
    pub kind: &'static str,

    /// verbs
    pub verbs: Vec<&'static str>,
}

/// The `GET /<universe>/apis/<group>/<version>` document.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceList {
    /// kind
    pub kind: &'static str,

    /// apiVersion
    pub api_version: &'static str,

    /// groupVersion
    pub group_version: &'static str,

    /// resources
    pub resources: Vec<ApiResource>,
}

impl ApiResourceList {
    /// The canned resource list of this server.
    pub fn discovery() -> Self {
        Self {
            kind: "APIResourceList",
            api_version: "v1",
            group_version: GROUP_VERSION,
            resources: vec![ApiResource {
                name: ENDPOINT_RESOURCE,
                singular_name: "discoveryendpoint",
                namespaced: true,
                kind: ENDPOINT_KIND,
                verbs: vec!["get", "list", "create", "update", "patch"],
            }],
        }
    }
}

/// Encode any response document as json.
pub(crate) fn encode_json<T: serde::Serialize>(
    t: &T,
) -> DiscoveryResult<Vec<u8>> {
    serde_json::to_vec(t).map_err(DiscoveryError::internal)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_endpoint() {
        let ep = DiscoveryEndpoint::try_from_slice(
            br#"{
                "kind": "DiscoveryEndpoint",
                "apiVersion": "discovery.kops.k8s.io/v1alpha1",
                "metadata": { "namespace": "default", "name": "c1", "uid": "u" },
                "spec": {
                    "addresses": ["1.2.3.4", "5.6.7.8"],
                    "lastSeen": "2024-01-02T03:04:05Z",
                    "oidc": { "keys": [
                        { "kid": "1", "kty": "RSA", "n": "abc", "e": "AQAB" }
                    ] }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(NamespacedName::new("default", "c1"), ep.namespaced_name());
        assert_eq!(vec!["1.2.3.4", "5.6.7.8"], ep.spec.addresses);
        assert_eq!("u", ep.metadata.extra["uid"]);

        let keys = ep.spec.oidc.unwrap().keys;
        assert_eq!(1, keys.len());
        assert_eq!("1", keys[0].kid());
        assert_eq!("abc", keys[0].fields["n"]);
        assert_eq!("AQAB", keys[0].fields["e"]);
    }

    #[test]
    fn parse_minimal_endpoint() {
        let ep = DiscoveryEndpoint::try_from_slice(b"{}").unwrap();
        assert_eq!(DiscoveryEndpoint::default(), ep);
        assert!(ep.spec.oidc.is_none());
    }

    #[test]
    fn reject_malformed_endpoint() {
        let err = DiscoveryEndpoint::try_from_slice(b"{not json").unwrap_err();
        assert_eq!(400, err.status());

        let err =
            DiscoveryEndpoint::try_from_slice(br#"{"spec":{"addresses":7}}"#)
                .unwrap_err();
        assert_eq!(400, err.status());
    }

    #[test]
    fn canonicalize_overwrites_caller_fields() {
        let mut ep = DiscoveryEndpoint::try_from_slice(
            br#"{
                "kind": "Pod",
                "apiVersion": "v1",
                "spec": { "lastSeen": "2999-01-01T00:00:00Z" }
            }"#,
        )
        .unwrap();

        ep.canonicalize("2024-01-02T03:04:05Z".into());

        assert_eq!(ENDPOINT_KIND, ep.kind);
        assert_eq!(GROUP_VERSION, ep.api_version);
        assert_eq!("2024-01-02T03:04:05Z", ep.spec.last_seen);
    }

    #[test]
    fn key_fields_pass_through() {
        let ep = DiscoveryEndpoint::try_from_slice(
            br#"{"spec":{"oidc":{"keys":[{"kid":"a","x5c":["q"],"use":"sig"}]}}}"#,
        )
        .unwrap();
        let out: serde_json::Value =
            serde_json::from_slice(&ep.encode().unwrap()).unwrap();
        assert_eq!(
            serde_json::json!({"kid": "a", "x5c": ["q"], "use": "sig"}),
            out["spec"]["oidc"]["keys"][0],
        );
    }

    #[test]
    fn key_empty_kid_survives_encode() {
        let ep = DiscoveryEndpoint::try_from_slice(
            br#"{"spec":{"oidc":{"keys":[{"kid":"","kty":"EC"},{"kty":"RSA"}]}}}"#,
        )
        .unwrap();
        let out: serde_json::Value =
            serde_json::from_slice(&ep.encode().unwrap()).unwrap();
        assert_eq!(
            serde_json::json!([{"kid": "", "kty": "EC"}, {"kty": "RSA"}]),
            out["spec"]["oidc"]["keys"],
        );
    }

    #[test]
    fn empty_list_has_items() {
        let out: serde_json::Value = serde_json::from_slice(
            &encode_json(&DiscoveryEndpointList::new(Vec::new())).unwrap(),
        )
        .unwrap();
        assert_eq!(ENDPOINT_LIST_KIND, out["kind"]);
        assert_eq!(serde_json::json!([]), out["items"]);
    }

    #[test]
    fn canned_discovery_documents() {
        let groups: serde_json::Value =
            serde_json::from_slice(&encode_json(&ApiGroupList::discovery()).unwrap())
                .unwrap();
        assert_eq!("APIGroupList", groups["kind"]);
        assert_eq!(API_GROUP, groups["groups"][0]["name"]);
        assert_eq!(
            API_VERSION,
            groups["groups"][0]["preferredVersion"]["version"]
        );
        assert_eq!(
            GROUP_VERSION,
            groups["groups"][0]["versions"][0]["groupVersion"]
        );

        let resources: serde_json::Value = serde_json::from_slice(
            &encode_json(&ApiResourceList::discovery()).unwrap(),
        )
        .unwrap();
        assert_eq!("APIResourceList", resources["kind"]);
        assert_eq!(GROUP_VERSION, resources["groupVersion"]);
        let r = &resources["resources"][0];
        assert_eq!(ENDPOINT_RESOURCE, r["name"]);
        assert_eq!("discoveryendpoint", r["singularName"]);
        assert_eq!(true, r["namespaced"]);
        assert_eq!(ENDPOINT_KIND, r["kind"]);
        assert_eq!(
            serde_json::json!(["get", "list", "create", "update", "patch"]),
            r["verbs"]
        );
    }
}
