//! HTTP/JSON implementations of the collaborator traits.
//!
//! Wire contract:
//!
//! - `POST {accounts}/accounts/{account}/ssh-keys/verify` with `{"key": ...}`,
//!   answered by `{"valid": bool}`.
//! - `GET {inventory}/accounts/{account}/server`, answered by an
//!   [`AccountServer`] object.
//!
//! Any non-2xx status is a [`ServiceError`]; the caller decides what that
//! means for access.

use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::auth::fingerprint::key_fingerprint;
use crate::config::ServiceEndpoint;

use super::{AccountServer, KeyValidator, ServerInventory, ServiceError};

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    api_url: String,
    token_env: Option<String>,
}

impl Endpoint {
    fn new(client: reqwest::Client, config: &ServiceEndpoint) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            token_env: config.token_env.clone(),
        }
    }

    /// Append `segments` to the API root, percent-encoding each one so that
    /// an account identifier can never alter the request path.
    fn url(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| ServiceError::InvalidEndpoint(format!("{}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| ServiceError::InvalidEndpoint(self.api_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|token| !token.is_empty());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, ServiceError> {
        let resp = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            warn!(endpoint = %url, %status, "service returned non-success status");
            return Err(ServiceError::Status {
                endpoint: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

fn classify(url: &Url, err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout {
            endpoint: url.to_string(),
        }
    } else if err.is_decode() {
        ServiceError::Decode {
            endpoint: url.to_string(),
            detail: err.to_string(),
        }
    } else {
        ServiceError::Transport {
            endpoint: url.to_string(),
            source: err,
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, url: &Url) -> Result<T, ServiceError> {
    let body = resp.bytes().await.map_err(|e| classify(url, e))?;
    serde_json::from_slice(&body).map_err(|e| ServiceError::Decode {
        endpoint: url.to_string(),
        detail: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct VerifyKeyRequest<'a> {
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyKeyResponse {
    valid: bool,
}

/// [`KeyValidator`] backed by the account service's HTTP API.
pub struct HttpKeyValidator {
    endpoint: Endpoint,
}

impl HttpKeyValidator {
    pub fn new(client: reqwest::Client, config: &ServiceEndpoint) -> Self {
        Self {
            endpoint: Endpoint::new(client, config),
        }
    }
}

#[async_trait::async_trait]
impl KeyValidator for HttpKeyValidator {
    #[instrument(skip(self, key), fields(fingerprint = %key_fingerprint(key)))]
    async fn is_valid_key(&self, account: &str, key: &str) -> Result<bool, ServiceError> {
        let url = self
            .endpoint
            .url(&["accounts", account, "ssh-keys", "verify"])?;
        let request = self
            .endpoint
            .client
            .post(url.clone())
            .json(&VerifyKeyRequest { key });

        let resp = self.endpoint.send(request, &url).await?;
        let body: VerifyKeyResponse = decode(resp, &url).await?;

        debug!(valid = body.valid, "key validation answered");
        Ok(body.valid)
    }
}

// ---------------------------------------------------------------------------
// Server inventory
// ---------------------------------------------------------------------------

/// [`ServerInventory`] backed by the compute inventory's HTTP API.
pub struct HttpInventory {
    endpoint: Endpoint,
}

impl HttpInventory {
    pub fn new(client: reqwest::Client, config: &ServiceEndpoint) -> Self {
        Self {
            endpoint: Endpoint::new(client, config),
        }
    }
}

#[async_trait::async_trait]
impl ServerInventory for HttpInventory {
    #[instrument(skip(self))]
    async fn resolve_server(&self, account: &str) -> Result<AccountServer, ServiceError> {
        let url = self.endpoint.url(&["accounts", account, "server"])?;
        let request = self.endpoint.client.get(url.clone());

        let resp = self.endpoint.send(request, &url).await?;
        let server: AccountServer = decode(resp, &url).await?;

        debug!(?server, "resolved account server");
        Ok(server)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
