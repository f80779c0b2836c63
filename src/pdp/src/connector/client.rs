//! HTTP client for external attribute adapters
//!
//! Adapters are queried with `GET {url}?id={identifier}` under a bearer
//! token obtained through the OAuth client-credentials grant. Tokens are
//! reused until shortly before expiry. Any failure talking to an adapter
//! is an attribute retrieval error; the caller fails the decision rather
//! than evaluating with partial attributes.

use crate::connector::config::AdapterEndpoint;
use crate::error::{PdpError, Result};
use crate::types::{Attribute, AttributeSet};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Tokens are refreshed this many seconds before their stated expiry
const TOKEN_EXPIRY_SKEW_SECS: u64 = 30;

fn default_token_expiry() -> u64 {
    300
}

/// Adapter response wire shape
#[derive(Debug, Deserialize)]
pub struct AdapterResponse {
    /// Identifier the attributes belong to
    #[serde(default)]
    pub id: Option<String>,

    /// Attributes asserted by the adapter
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,

    #[serde(default = "default_token_expiry")]
    expires_in: u64,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Shared adapter client with per-endpoint token caching
pub struct AdapterClient {
    http: reqwest::Client,
    tokens: DashMap<String, CachedToken>,
}

impl AdapterClient {
    /// Create a client whose requests time out after `timeout`
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PdpError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            tokens: DashMap::new(),
        })
    }

    /// Fetch the attributes an adapter asserts for an identifier
    ///
    /// # Arguments
    /// * `endpoint` - Adapter endpoint and credentials
    /// * `identifier` - Entity identifier to look up
    ///
    /// # Errors
    /// Returns [`PdpError::Retrieval`] on token failures, transport
    /// failures, timeouts, non-success statuses, and malformed bodies
    pub async fn fetch_attributes(
        &self,
        endpoint: &AdapterEndpoint,
        identifier: &str,
    ) -> Result<AttributeSet> {
        let token = self.access_token(endpoint).await?;

        let response = self
            .http
            .get(&endpoint.url)
            .query(&[("id", identifier)])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| retrieval_error(&endpoint.url, identifier, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(retrieval_error(
                &endpoint.url,
                identifier,
                format!("adapter returned {}", status),
            ));
        }

        let body: AdapterResponse = response
            .json()
            .await
            .map_err(|e| retrieval_error(&endpoint.url, identifier, e.to_string()))?;

        debug!(
            "Adapter {} returned {} attributes for '{}'",
            endpoint.url,
            body.attributes.len(),
            identifier
        );

        Ok(body.attributes.into_iter().collect())
    }

    /// Get a bearer token for an endpoint, reusing a cached one when valid
    async fn access_token(&self, endpoint: &AdapterEndpoint) -> Result<String> {
        let cache_key = format!("{}|{}", endpoint.token_url, endpoint.client_id);

        if let Some(cached) = self.tokens.get(&cache_key) {
            if cached.is_valid() {
                return Ok(cached.token.clone());
            }
        }

        debug!("Requesting client-credentials token from {}", endpoint.token_url);

        let response = self
            .http
            .post(&endpoint.token_url)
            .basic_auth(&endpoint.client_id, Some(&endpoint.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| retrieval_error(&endpoint.token_url, endpoint.client_id.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(retrieval_error(
                &endpoint.token_url,
                endpoint.client_id.as_str(),
                format!("token endpoint returned {}", status),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| retrieval_error(&endpoint.token_url, endpoint.client_id.as_str(), e.to_string()))?;

        let lifetime = body.expires_in.saturating_sub(TOKEN_EXPIRY_SKEW_SECS);
        let cached = CachedToken {
            token: body.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime as i64),
        };
        self.tokens.insert(cache_key, cached);

        Ok(body.access_token)
    }
}

fn retrieval_error(endpoint: &str, identifier: &str, reason: String) -> PdpError {
    PdpError::Retrieval {
        endpoint: endpoint.to_string(),
        identifier: identifier.to_string(),
        reason,
    }
}
