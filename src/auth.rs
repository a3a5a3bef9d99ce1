//! Short-lived token issuance for the agent connection
//!
//! The token endpoint is an external collaborator: it takes the engine's
//! API credential and returns an opaque bearer token the speech agent
//! accepts for one session. A fresh token is fetched before every
//! connect, including reconnects.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Response body of the token-issuance endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Client for the token-issuance endpoint
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl TokenClient {
    /// Create a client for the given endpoint
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.map(SecretString::from),
        }
    }

    /// Fetch a fresh bearer token
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the endpoint rejects the credential
    /// or responds without a token.
    pub async fn fetch(&self) -> Result<String> {
        let mut request = self.http.post(&self.endpoint);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("malformed token response: {e}")))?;

        if body.token.is_empty() {
            return Err(Error::Auth("token endpoint returned empty token".to_string()));
        }

        tracing::debug!("session token issued");
        Ok(body.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_deserializes() {
        let body: TokenResponse = serde_json::from_str(r#"{"token":"abc123"}"#).unwrap();
        assert_eq!(body.token, "abc123");
    }

    #[test]
    fn token_response_rejects_missing_field() {
        let parsed: std::result::Result<TokenResponse, _> =
            serde_json::from_str(r#"{"expires_in":60}"#);
        assert!(parsed.is_err());
    }
}
