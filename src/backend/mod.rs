//! External collaborator abstraction layer.
//!
//! The hook consults two services per connection: an account service that
//! decides whether a presented public key belongs to the account, and a
//! compute inventory that resolves the account to the server backing it.
//! Both sit behind traits so the hook never sees transport details and tests
//! can substitute in-memory fakes.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::config::ServicesConfig;

// ---------------------------------------------------------------------------
// Account server
// ---------------------------------------------------------------------------

/// The compute server an account is hosted on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountServer {
    #[serde(alias = "arch")]
    pub architecture: String,
    pub hostname: String,
    /// Inventory ids may arrive as strings or integers; both are kept as text.
    #[serde(deserialize_with = "string_or_integer")]
    pub id: String,
    pub name: String,
}

fn string_or_integer<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a collaborator call.  Every variant is terminal for the
/// current invocation; nothing is retried.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("failed to decode response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },
    #[error("invalid service endpoint: {0}")]
    InvalidEndpoint(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Answers whether a public key grants access to an account.
#[async_trait::async_trait]
pub trait KeyValidator: Send + Sync {
    async fn is_valid_key(&self, account: &str, key: &str) -> Result<bool, ServiceError>;
}

/// Resolves an account to the server that hosts it.
#[async_trait::async_trait]
pub trait ServerInventory: Send + Sync {
    async fn resolve_server(&self, account: &str) -> Result<AccountServer, ServiceError>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the HTTP-backed collaborators described by `config`, sharing one
/// `reqwest` client with the configured per-request timeout.
pub fn build_backends(
    config: &ServicesConfig,
) -> Result<(Arc<dyn KeyValidator>, Arc<dyn ServerInventory>)> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("gatehook/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("failed to build reqwest client")?;

    let validator = http::HttpKeyValidator::new(client.clone(), &config.accounts);
    let inventory = http::HttpInventory::new(client, &config.inventory);
    Ok((Arc::new(validator), Arc::new(inventory)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_server_accepts_arch_alias_and_string_id() {
        let server: AccountServer = serde_json::from_value(serde_json::json!({
            "arch": "x86_64",
            "hostname": "h1",
            "id": "42",
            "name": "srv1"
        }))
        .unwrap();
        assert_eq!(
            server,
            AccountServer {
                architecture: "x86_64".to_string(),
                hostname: "h1".to_string(),
                id: "42".to_string(),
                name: "srv1".to_string(),
            }
        );
    }

    #[test]
    fn account_server_accepts_numeric_id() {
        let server: AccountServer = serde_json::from_value(serde_json::json!({
            "architecture": "arm",
            "hostname": "h2",
            "id": 1337,
            "name": "srv2",
            "state": "running"
        }))
        .unwrap();
        assert_eq!(server.id, "1337");
        assert_eq!(server.architecture, "arm");
    }

    #[test]
    fn account_server_rejects_missing_fields() {
        let result: std::result::Result<AccountServer, _> =
            serde_json::from_value(serde_json::json!({"arch": "arm", "id": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn account_server_rejects_non_scalar_id() {
        let result: std::result::Result<AccountServer, _> = serde_json::from_value(
            serde_json::json!({"arch": "arm", "hostname": "h", "id": [1], "name": "n"}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn build_backends_from_config() {
        let config: ServicesConfig = serde_yaml::from_str(
            "accounts:\n  api_url: http://127.0.0.1:9/\ninventory:\n  api_url: http://127.0.0.1:9/\n",
        )
        .unwrap();
        assert!(build_backends(&config).is_ok());
    }
}
