//! Access token checks for the streaming routes.

use crate::server::AppContext;
use axum::{
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use clipcast_common::Error;
use serde::Deserialize;

use super::error::AppError;

/// Header alternative to `Authorization: Bearer`.
pub const TOKEN_HEADER: &str = "x-access-token";

/// Decides whether a presented token grants access.
pub trait TokenValidator: Send + Sync {
    /// Whether tokens are checked at all.
    fn is_enabled(&self) -> bool;

    fn validate(&self, token: &str) -> bool;
}

/// One shared token from the config; open access when unset.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    token: Option<String>,
}

impl StaticTokenValidator {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    fn validate(&self, token: &str) -> bool {
        match &self.token {
            Some(expected) => expected == token,
            None => true,
        }
    }
}

/// The token the client authenticated with, echoed into playlist URLs.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(pub Option<String>);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn presented_token(
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    request: &Request<Body>,
) -> Option<String> {
    if let Some(TypedHeader(Authorization(bearer))) = bearer {
        return Some(bearer.token().to_string());
    }
    if let Some(value) = request.headers().get(TOKEN_HEADER) {
        if let Ok(token) = value.to_str() {
            return Some(token.to_string());
        }
    }
    Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.token)
}

/// Middleware requiring a valid token via bearer header, `X-Access-Token`
/// or `?token=`.
pub async fn token_auth_middleware(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // With auth off, a stray client token is not echoed into URLs.
    let token = if ctx.tokens.is_enabled() {
        match presented_token(bearer, &request) {
            Some(t) if ctx.tokens.validate(&t) => Some(t),
            Some(_) => return Err(Error::Unauthorized("invalid access token".into()).into()),
            None => return Err(Error::Unauthorized("access token required".into()).into()),
        }
    } else {
        None
    };

    request.extensions_mut().insert(AccessToken(token));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_validator() {
        let open = StaticTokenValidator::new(None);
        assert!(!open.is_enabled());
        assert!(open.validate("anything"));

        let locked = StaticTokenValidator::new(Some("s3cret".into()));
        assert!(locked.is_enabled());
        assert!(locked.validate("s3cret"));
        assert!(!locked.validate("guess"));
    }

    #[test]
    fn test_token_sources() {
        let request = Request::builder()
            .uri("/streams/1/hls/live.m3u8?token=from-query")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_token(None, &request).as_deref(), Some("from-query"));

        let request = Request::builder()
            .uri("/streams/1/hls/live.m3u8?token=from-query")
            .header(TOKEN_HEADER, "from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_token(None, &request).as_deref(), Some("from-header"));

        let bearer = TypedHeader(Authorization::bearer("from-bearer").unwrap());
        assert_eq!(
            presented_token(Some(bearer), &request).as_deref(),
            Some("from-bearer")
        );

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(presented_token(None, &request), None);
    }
}
