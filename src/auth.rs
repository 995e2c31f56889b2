//! Bearer-token authentication.
//!
//! The gateway carries exactly one shared credential, configured at startup.
//! There is no user store: authentication is a capability check against a
//! process-wide constant, performed before any decoding or pool interaction.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

/// Outcome of authenticating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthContext {
    Authenticated,
    Rejected,
}

/// Validates the bearer credential on inbound requests.
#[derive(Debug, Clone)]
pub struct Authenticator {
    token: String,
}

impl Authenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Checks the `Authorization: Bearer <token>` header, falling back to the
    /// `_token` query parameter the hosted REST API also accepts.
    #[must_use]
    pub fn authenticate(&self, headers: &HeaderMap, query: Option<&str>) -> AuthContext {
        if let Some(candidate) = bearer_token(headers).or_else(|| query_token(query)) {
            if self.matches(&candidate) {
                return AuthContext::Authenticated;
            }
        }
        AuthContext::Rejected
    }

    fn matches(&self, candidate: &str) -> bool {
        // Constant-time comparison; length mismatch short-circuits but the
        // token length is not a secret here.
        self.token.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(str::to_owned)
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("_token="))
        .and_then(|value| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
}
