//! Credential encoding for the imagery provider API.
//!
//! The provider authenticates every call with a base64 token derived from
//! `username:api_key`. The encoding is deterministic and invertible; the
//! token lives for a single pipeline run and is never persisted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Errors that can occur when decoding an auth token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("token is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("token is missing the ':' separator")]
    MissingSeparator,
}

/// Credentials supplied for one run, overriding any stored configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

/// Encoded `username:api_key` pair sent with every provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Encode a username and API key into a transport-ready token.
    pub fn encode(username: &str, api_key: &str) -> Self {
        Self(STANDARD.encode(format!("{username}:{api_key}")))
    }

    /// Recover the `(username, api_key)` pair from the token.
    pub fn decode(&self) -> Result<(String, String), AuthError> {
        let decoded = String::from_utf8(STANDARD.decode(&self.0)?)?;
        let (username, api_key) = decoded
            .split_once(':')
            .ok_or(AuthError::MissingSeparator)?;
        Ok((username.to_string(), api_key.to_string()))
    }

    /// The raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The token in `Basic` authorization-header form.
    pub fn basic_header(&self) -> String {
        format!("Basic {}", self.0)
    }
}

impl From<&Credentials> for AuthToken {
    fn from(credentials: &Credentials) -> Self {
        Self::encode(&credentials.username, &credentials.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let token = AuthToken::encode("mapper", "s3cret-key");
        let (username, api_key) = token.decode().unwrap();

        assert_eq!(username, "mapper");
        assert_eq!(api_key, "s3cret-key");
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = AuthToken::encode("u", "k");
        let b = AuthToken::encode("u", "k");

        assert_eq!(a, b);
        assert_eq!(a.as_str(), STANDARD.encode("u:k"));
    }

    #[test]
    fn test_basic_header_form() {
        let token = AuthToken::encode("u", "k");

        assert_eq!(token.basic_header(), format!("Basic {}", token.as_str()));
    }

    #[test]
    fn test_decode_rejects_token_without_separator() {
        let token = AuthToken(STANDARD.encode("no-separator-here"));

        assert!(matches!(token.decode(), Err(AuthError::MissingSeparator)));
    }

    #[test]
    fn test_empty_credentials_still_encode() {
        // Missing credentials are a provider-side failure, not an encoding one.
        let token = AuthToken::encode("", "");
        let (username, api_key) = token.decode().unwrap();

        assert_eq!(username, "");
        assert_eq!(api_key, "");
    }
}
