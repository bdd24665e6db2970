//! The security middleware boundary (§4.6).
//!
//! Concrete providers (bearer, API key, basic, JWT, OAuth2, rate limiters,
//! request validators, CORS/security headers) are external collaborators.
//! The core consumes a single capability set and calls it at the
//! documented points (connect, send, send_batch) — it never names a
//! concrete provider.

use crate::error::MiddlewareError;
use async_trait::async_trait;
use http::HeaderMap;
use std::collections::HashMap;

/// The authenticated identity returned by a middleware's `authenticate`.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub subject: String,
    pub claims: HashMap<String, String>,
}

/// The inbound request shape middleware hooks inspect. Deliberately
/// minimal — method, path, and headers are all the core's call sites
/// have available (it is an HTTP client, not a server).
#[derive(Debug, Clone)]
pub struct MiddlewareRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
}

/// Capability set the core consumes at its security boundary (§4.6).
///
/// `async_trait` is used here (rather than a plain `trait` with
/// `impl Future` returns) because implementors are external, non-generic
/// providers handed to the transport as a trait object
/// (`Arc<dyn SecurityMiddleware>`).
#[async_trait]
pub trait SecurityMiddleware: Send + Sync {
    /// Authenticate the request, or reject with `Unauthorized`.
    async fn authenticate(
        &self,
        request: &MiddlewareRequest,
    ) -> Result<Principal, MiddlewareError>;

    /// Check whether the caller has exceeded its rate limit.
    async fn check_rate_limit(&self, request: &MiddlewareRequest) -> Result<(), MiddlewareError>;

    /// Validate request shape/headers beyond authentication.
    async fn validate_request(&self, request: &MiddlewareRequest) -> Result<(), MiddlewareError>;

    /// Apply response headers (CORS, security headers) before a response
    /// is considered final. No-op by default since most middleware chains
    /// only care about the request side.
    fn apply_response_headers(&self, _headers: &mut HeaderMap, _request: &MiddlewareRequest) {}

    /// Attach credentials the provider wants on an outbound request (a
    /// bearer token, a signed header) before it's sent — the connect,
    /// send, and send_batch call sites all apply this. No-op by default:
    /// most chains gate via `authenticate`/`check_rate_limit` alone and
    /// inject nothing extra.
    fn apply_auth_headers(&self, _headers: &mut HeaderMap, _request: &MiddlewareRequest) {}
}

/// A middleware that authenticates and allows everything. Useful in tests
/// and as a default when no concrete provider is configured — it is not a
/// substitute for a real auth/rate-limit provider in production.
#[derive(Debug, Default)]
pub struct AllowAllMiddleware;

#[async_trait]
impl SecurityMiddleware for AllowAllMiddleware {
    async fn authenticate(
        &self,
        _request: &MiddlewareRequest,
    ) -> Result<Principal, MiddlewareError> {
        Ok(Principal::default())
    }

    async fn check_rate_limit(&self, _request: &MiddlewareRequest) -> Result<(), MiddlewareError> {
        Ok(())
    }

    async fn validate_request(&self, _request: &MiddlewareRequest) -> Result<(), MiddlewareError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_authenticates_everything() {
        let mw = AllowAllMiddleware;
        let req = MiddlewareRequest {
            method: "GET".into(),
            path: "/events".into(),
            headers: HeaderMap::new(),
        };
        assert!(mw.authenticate(&req).await.is_ok());
        assert!(mw.check_rate_limit(&req).await.is_ok());
        assert!(mw.validate_request(&req).await.is_ok());
    }
}
