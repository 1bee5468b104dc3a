//! Extract the optional visibility scope (publication status) from the request.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the publication status every joined table is restricted to.
pub const PUBLICATION_STATUS_HEADER: &str = "X-Publication-Status";

/// Optional publication-status scope from the `X-Publication-Status` header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilityScope(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for VisibilityScope
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(PUBLICATION_STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(VisibilityScope(value))
    }
}
