//! Discovery server error types.

use std::sync::Arc;

/// Every failure a request can end in. Each variant maps onto exactly one
/// http status code. The context string is logged server side, and is
/// also the response body for every variant except `Unauthenticated`
/// and `Internal` (see [DiscoveryError::public_message]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// Malformed request body or missing request header.
    #[error("BadRequest: {0}")]
    BadRequest(Arc<str>),

    /// No tls session, no client certificate, or a chain that does not
    /// verify against itself.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(Arc<str>),

    /// The caller is authenticated, but not allowed to do this.
    #[error("Forbidden: {0}")]
    Forbidden(Arc<str>),

    /// The addressed object does not exist.
    #[error("NotFound: {0}")]
    NotFound(Arc<str>),

    /// Storage layer failure.
    #[error("Internal: {0}")]
    Internal(Arc<str>),
}

impl DiscoveryError {
    /// Construct a [DiscoveryError::BadRequest].
    pub fn bad_request<C: std::fmt::Display>(ctx: C) -> Self {
        Self::BadRequest(ctx.to_string().into())
    }

    /// Construct a [DiscoveryError::Unauthenticated].
    pub fn unauthenticated<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Unauthenticated(ctx.to_string().into())
    }

    /// Construct a [DiscoveryError::Forbidden].
    pub fn forbidden<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Forbidden(ctx.to_string().into())
    }

    /// Construct a [DiscoveryError::NotFound].
    pub fn not_found<C: std::fmt::Display>(ctx: C) -> Self {
        Self::NotFound(ctx.to_string().into())
    }

    /// Construct a [DiscoveryError::Internal].
    pub fn internal<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Internal(ctx.to_string().into())
    }

    /// The http status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthenticated(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }

    /// The plain text body sent to the caller.
    ///
    /// Chain verification and storage details stay server side.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthenticated(_) => "Unauthenticated".to_string(),
            Self::Internal(_) => "Internal".to_string(),
            oth => oth.to_string(),
        }
    }
}

/// The discovery server result type.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_status() {
        assert_eq!(400, DiscoveryError::bad_request("x").status());
        assert_eq!(401, DiscoveryError::unauthenticated("x").status());
        assert_eq!(403, DiscoveryError::forbidden("x").status());
        assert_eq!(404, DiscoveryError::not_found("x").status());
        assert_eq!(500, DiscoveryError::internal("x").status());
    }

    #[test]
    fn error_public_message_hides_details() {
        assert_eq!(
            "Unauthenticated",
            DiscoveryError::unauthenticated("UnknownIssuer in chain")
                .public_message(),
        );
        assert_eq!(
            "Internal",
            DiscoveryError::internal("lock poisoned").public_message(),
        );
        assert_eq!(
            "Forbidden: chain does not match universe",
            DiscoveryError::forbidden("chain does not match universe")
                .public_message(),
        );
        assert_eq!(
            "BadRequest: missing Host",
            DiscoveryError::bad_request("missing Host").public_message(),
        );
        assert_eq!(
            "NotFound: no oidc",
            DiscoveryError::not_found("no oidc").public_message(),
        );
    }
}
