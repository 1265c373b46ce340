//! JWT identity for push connections.

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AuthConfig;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject: the opaque user identifier that owns addresses.
    pub sub: String,
    /// Issued at timestamp.
    pub iat: u64,
    /// Expiration timestamp.
    pub exp: u64,
}

/// Keys and validation settings for JWT verification.
#[derive(Clone)]
pub struct JwtState {
    /// Encoding key for issuing tokens.
    pub encoding_key: EncodingKey,
    /// Decoding key for JWT verification.
    pub decoding_key: DecodingKey,
    /// Validation settings.
    pub validation: Validation,
}

impl JwtState {
    /// Create a new JWT state from a secret key.
    pub fn new(secret: &str) -> Self {
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        Self {
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// Issue a token for `user` valid for `ttl_secs`.
    pub fn issue(&self, user: &str, ttl_secs: u64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp().max(0) as u64;
        let claims = JwtClaims {
            sub: user.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Decode and validate a token.
    pub fn verify(&self, token: &str) -> Result<JwtClaims, jsonwebtoken::errors::Error> {
        decode::<JwtClaims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No token in the header or the query string.
    MissingToken,
    /// Token present but invalid or expired.
    InvalidToken,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let message = match self {
            AuthRejection::MissingToken => "Missing authorization",
            AuthRejection::InvalidToken => "Invalid or expired token",
        };
        (StatusCode::UNAUTHORIZED, message).into_response()
    }
}

/// Identity policy for incoming push connections.
#[derive(Clone)]
pub struct PushAuth {
    jwt: Option<Arc<JwtState>>,
}

impl PushAuth {
    /// Accept every connection anonymously.
    pub fn disabled() -> Self {
        Self { jwt: None }
    }

    /// Require a valid JWT signed with `secret`.
    pub fn jwt(secret: &str) -> Self {
        Self {
            jwt: Some(Arc::new(JwtState::new(secret))),
        }
    }

    /// Build the policy from configuration.
    pub fn from_config(config: &AuthConfig) -> Self {
        if config.enabled {
            Self::jwt(&config.jwt_secret)
        } else {
            Self::disabled()
        }
    }

    /// Check if identities are required.
    pub fn is_enabled(&self) -> bool {
        self.jwt.is_some()
    }

    /// JWT state, when enabled.
    pub fn jwt_state(&self) -> Option<&JwtState> {
        self.jwt.as_deref()
    }

    /// Resolve the identity of a connection request.
    ///
    /// With auth disabled every request is anonymous (`Ok(None)`). With
    /// auth enabled a valid token is required and its subject becomes the
    /// identity.
    pub fn resolve_identity(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Option<String>, AuthRejection> {
        let Some(jwt) = &self.jwt else {
            return Ok(None);
        };

        let token = request_token(headers, query).ok_or(AuthRejection::MissingToken)?;
        let claims = jwt.verify(&token).map_err(|e| {
            tracing::debug!("JWT validation failed: {}", e);
            AuthRejection::InvalidToken
        })?;
        Ok(Some(claims.sub))
    }
}

/// Token from `Authorization: Bearer`, else from the `token` query
/// parameter (browsers cannot set headers on WebSocket requests).
pub fn request_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    if header_token.is_some() {
        return header_token;
    }

    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?;
        if key == "token" && !value.is_empty() {
            // URL decode the token
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_disabled_is_anonymous() {
        let auth = PushAuth::disabled();
        assert!(!auth.is_enabled());
        assert_eq!(auth.resolve_identity(&HeaderMap::new(), None), Ok(None));
    }

    #[test]
    fn test_bearer_header() {
        let auth = PushAuth::jwt(SECRET);
        let token = auth.jwt_state().unwrap().issue("u1", 60).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(
            auth.resolve_identity(&headers, None),
            Ok(Some("u1".to_string()))
        );
    }

    #[test]
    fn test_query_token() {
        let auth = PushAuth::jwt(SECRET);
        let token = auth.jwt_state().unwrap().issue("u2", 60).unwrap();
        let query = format!("x=1&token={}", urlencoding::encode(&token));
        assert_eq!(
            auth.resolve_identity(&HeaderMap::new(), Some(&query)),
            Ok(Some("u2".to_string()))
        );
    }

    #[test]
    fn test_missing_and_invalid_tokens() {
        let auth = PushAuth::jwt(SECRET);
        assert_eq!(
            auth.resolve_identity(&HeaderMap::new(), None),
            Err(AuthRejection::MissingToken)
        );
        assert_eq!(
            auth.resolve_identity(&HeaderMap::new(), Some("token=garbage")),
            Err(AuthRejection::InvalidToken)
        );

        let other = JwtState::new("other-secret").issue("u1", 60).unwrap();
        assert_eq!(
            auth.resolve_identity(&HeaderMap::new(), Some(&format!("token={other}"))),
            Err(AuthRejection::InvalidToken)
        );
    }

    #[test]
    fn test_rejection_is_401() {
        let response = AuthRejection::MissingToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
