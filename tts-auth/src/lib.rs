//! Session identification for the synthesis websocket handshake.
//!
//! Full authentication (login, session issuance, JWT signing) is out of
//! scope: spec.md §6 only asks the core to exchange opaque user-session
//! material — a bearer token or an anonymous-session token — for a
//! `UserId`. [`SessionAuthenticator`] is that one seam; [`extract_bearer_token`]
//! is the header-parsing helper grounded on `dog_auth::core::
//! extract_bearer_token`.

use std::collections::HashMap;

use async_trait::async_trait;

use tts_core::{TtsError, UserId};

/// Resolves opaque session material to a `UserId`, spec.md §6's "light
/// authentication handshake". `tts-web`'s websocket upgrade handler calls
/// this once per connection; the result becomes the connection's
/// `RequestContext`.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    async fn authenticate(&self, session_token: &str) -> Result<UserId, TtsError>;
}

/// Extracts a bearer token from an `Authorization: Bearer <token>` header,
/// grounded on `dog_auth::core::extract_bearer_token`.
pub fn extract_bearer_token(headers: &HashMap<String, String>) -> Option<String> {
    let value = headers
        .get("authorization")
        .or_else(|| headers.get("Authorization"))?;
    let value = value.trim();
    let prefix = "Bearer ";
    if value.len() <= prefix.len() || !value.starts_with(prefix) {
        return None;
    }
    Some(value[prefix.len()..].trim().to_string())
}

/// Resolves any non-empty token to a deterministic `UserId`, for local
/// development and tests where a full session-material exchange isn't
/// wired up. Not suitable for production — it performs no verification.
pub struct OpaqueTokenAuthenticator;

#[async_trait]
impl SessionAuthenticator for OpaqueTokenAuthenticator {
    async fn authenticate(&self, session_token: &str) -> Result<UserId, TtsError> {
        if session_token.trim().is_empty() {
            return Err(TtsError::not_authenticated("missing session token"));
        }
        Ok(UserId::from_string(session_token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer abc123".to_string());
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn rejects_missing_or_malformed_header() {
        let headers = HashMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        let mut bad = HashMap::new();
        bad.insert("authorization".to_string(), "Basic abc123".to_string());
        assert_eq!(extract_bearer_token(&bad), None);
    }

    #[tokio::test]
    async fn opaque_authenticator_rejects_empty_token() {
        let auth = OpaqueTokenAuthenticator;
        assert!(auth.authenticate("").await.is_err());
        assert!(auth.authenticate("session-xyz").await.is_ok());
    }
}
