//! Remote catalog server client and health gate.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{error::PluginError, types::Plugin};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `GET /rest/healthcheck`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub alive: bool,
}

/// Body of `GET /rest/public`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyBody {
    pub key: String,
}

/// Transport boundary to the plugin catalog server.
///
/// Implementations carry no business logic; every method maps one HTTP
/// endpoint. Failures surface as [`PluginError::Remote`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn fetch_health(&self) -> Result<Health, PluginError>;

    /// PEM-style public key material used for artifact authenticity
    /// recovery.
    async fn fetch_public_key(&self) -> Result<String, PluginError>;

    /// Raw catalog, unsorted and unfiltered.
    async fn fetch_plugins(&self) -> Result<Vec<Plugin>, PluginError>;

    /// Authenticity-wrapped artifact payload for `(plugin_id, hash)`.
    async fn download_artifact(&self, plugin_id: &str, hash: &str)
        -> Result<Vec<u8>, PluginError>;
}

/// Health gate: any transport failure or malformed body counts as
/// unhealthy, never as an error.
pub async fn check_health(remote: &dyn RemoteClient) -> bool {
    match remote.fetch_health().await {
        Ok(health) => health.alive,
        Err(_) => false,
    }
}

/// Abort with [`PluginError::ServerUnavailable`] unless the server reports
/// itself alive. Every remote-dependent operation calls this before issuing
/// further requests.
pub async fn require_healthy(remote: &dyn RemoteClient) -> Result<(), PluginError> {
    if check_health(remote).await {
        Ok(())
    } else {
        Err(PluginError::ServerUnavailable)
    }
}

/// reqwest-backed client for the Molt catalog server.
pub struct HttpRemoteClient {
    base: Url,
    http: reqwest::Client,
}

impl HttpRemoteClient {
    /// `base` should end with a trailing slash; endpoint paths are joined
    /// relative to it.
    pub fn new(base: Url) -> Result<Self, PluginError> {
        Self::with_timeout(base, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base: Url, timeout: Duration) -> Result<Self, PluginError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PluginError::Remote(format!("failed to build http client: {e}")))?;
        Ok(Self { base, http })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, PluginError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| PluginError::Remote(format!("invalid endpoint '{path}': {e}")))?;
        debug!(%url, "GET");
        self.http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PluginError::Remote(format!("request to {url} failed: {e}")))?
            .error_for_status()
            .map_err(|e| PluginError::Remote(format!("request to {url} failed: {e}")))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch_health(&self) -> Result<Health, PluginError> {
        self.get("rest/healthcheck")
            .await?
            .json()
            .await
            .map_err(|e| PluginError::Remote(format!("malformed healthcheck body: {e}")))
    }

    async fn fetch_public_key(&self) -> Result<String, PluginError> {
        let body: PublicKeyBody = self
            .get("rest/public")
            .await?
            .json()
            .await
            .map_err(|e| PluginError::Remote(format!("malformed public key body: {e}")))?;
        Ok(body.key)
    }

    async fn fetch_plugins(&self) -> Result<Vec<Plugin>, PluginError> {
        self.get("rest/plugin")
            .await?
            .json()
            .await
            .map_err(|e| PluginError::Remote(format!("malformed plugin list body: {e}")))
    }

    async fn download_artifact(
        &self,
        plugin_id: &str,
        hash: &str,
    ) -> Result<Vec<u8>, PluginError> {
        let bytes = self
            .get(&format!("rest/plugin/{plugin_id}/version/{hash}/download"))
            .await?
            .bytes()
            .await
            .map_err(|e| PluginError::Remote(format!("failed to read artifact bytes: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyRemote {
        alive: Option<bool>,
    }

    #[async_trait]
    impl RemoteClient for FlakyRemote {
        async fn fetch_health(&self) -> Result<Health, PluginError> {
            match self.alive {
                Some(alive) => Ok(Health { alive }),
                None => Err(PluginError::Remote("connection refused".into())),
            }
        }

        async fn fetch_public_key(&self) -> Result<String, PluginError> {
            unreachable!("not used by health gate tests")
        }

        async fn fetch_plugins(&self) -> Result<Vec<Plugin>, PluginError> {
            unreachable!("not used by health gate tests")
        }

        async fn download_artifact(
            &self,
            _plugin_id: &str,
            _hash: &str,
        ) -> Result<Vec<u8>, PluginError> {
            unreachable!("not used by health gate tests")
        }
    }

    #[tokio::test]
    async fn health_gate_treats_transport_failure_as_unhealthy() {
        assert!(!check_health(&FlakyRemote { alive: None }).await);
        assert!(!check_health(&FlakyRemote { alive: Some(false) }).await);
        assert!(check_health(&FlakyRemote { alive: Some(true) }).await);
    }

    #[tokio::test]
    async fn require_healthy_maps_to_server_unavailable() {
        let err = require_healthy(&FlakyRemote { alive: None })
            .await
            .expect_err("gate should fail");
        assert!(matches!(err, PluginError::ServerUnavailable));

        require_healthy(&FlakyRemote { alive: Some(true) })
            .await
            .expect("gate should pass");
    }
}
