use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use hassdash_api::remote::{RemoteConfig, RemoteConfigUpdate};

use crate::config::AppConfig;
use crate::error::ApiResult;
use crate::store::KeyValueStore;
use crate::transport::Transport;

/// Outcome of a connectivity check.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConnectionTest {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionTest {
    const fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConnectionStatus {
    pub configured: bool,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted Home Assistant connection parameters, merged over defaults.
pub struct RemoteConfigStore {
    store: Arc<dyn KeyValueStore>,
    defaults: RemoteConfig,
    transport: Transport,
}

impl RemoteConfigStore {
    const KEY: &'static str = "remote_config";

    #[must_use]
    pub const fn new(store: Arc<dyn KeyValueStore>, defaults: RemoteConfig, transport: Transport) -> Self {
        Self {
            store,
            defaults,
            transport,
        }
    }

    /// Defaults from the process configuration. The token is never part of
    /// the config file, it is read from the environment variable named by
    /// `hass.token_env`.
    #[must_use]
    pub fn defaults_from(config: &AppConfig) -> RemoteConfig {
        let token = std::env::var(config.token_env()).unwrap_or_default();
        if token.trim().is_empty() {
            log::debug!(
                "[remote] No token in env {}, relying on stored config",
                config.token_env()
            );
        }
        RemoteConfig {
            base_url: config.hass.url.to_string(),
            token,
            websocket_url: config.hass.websocket_url.to_string(),
            use_proxy: config.hass.use_proxy,
        }
    }

    /// Fields set explicitly through [`Self::save_config`].
    fn stored(&self) -> RemoteConfigUpdate {
        match self.store.load_as::<RemoteConfigUpdate>(Self::KEY) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(err) => {
                log::warn!("[remote] Could not read stored config, using defaults: {err}");
                RemoteConfigUpdate::default()
            }
        }
    }

    /// Current config. Storage or decoding failures fall back to defaults.
    #[must_use]
    pub fn get_config(&self) -> RemoteConfig {
        self.defaults.clone().merged(self.stored())
    }

    /// Persist the fields present in `update`. Defaults are never written
    /// back, so the token from the environment stays out of the state file.
    pub fn save_config(&self, update: RemoteConfigUpdate) -> ApiResult<RemoteConfig> {
        let stored = self.stored().merged(update);
        self.store.store_as(Self::KEY, &stored)?;
        let config = self.defaults.clone().merged(stored);
        log::info!("[remote] Saved connection config for {}", config.base_url);
        Ok(config)
    }

    pub fn reset_config(&self) -> ApiResult<()> {
        self.store.remove(Self::KEY)
    }

    /// REST root, always with a trailing slash so endpoints can be joined.
    pub fn get_api_url(&self) -> ApiResult<Url> {
        let base = self.get_config().base_url;
        let base = base.trim().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/"))?)
    }

    #[must_use]
    pub fn get_auth_header(&self) -> String {
        format!("Bearer {}", self.get_config().token.trim())
    }

    pub fn get_websocket_url(&self) -> ApiResult<Url> {
        Ok(Url::parse(self.get_config().websocket_url.trim())?)
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.get_config().is_configured()
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Authenticated GET against the api root.
    pub async fn test_connection(&self) -> ConnectionTest {
        let url = match self.get_api_url() {
            Ok(url) => url,
            Err(err) => return ConnectionTest::failed(format!("Invalid url: {err}")),
        };

        let request = self
            .transport
            .http()
            .get(url.clone())
            .header(reqwest::header::AUTHORIZATION, self.get_auth_header());

        match self.transport.send(request).await {
            Ok(response) if response.status().is_success() => ConnectionTest::ok(),
            Ok(response) => ConnectionTest::failed(status_text(response.status())),
            Err(err) if err.is_network() => {
                log::warn!("[remote] Connection test to {url} failed: {err}");
                ConnectionTest::failed(format!(
                    "Network error: cannot reach {url} (is the proxy running?)"
                ))
            }
            Err(err) => ConnectionTest::failed(err.to_string()),
        }
    }

    pub async fn get_connection_status(&self) -> ConnectionStatus {
        if !self.is_configured() {
            return ConnectionStatus {
                configured: false,
                connected: false,
                error: Some("Home Assistant url and token are not configured".to_string()),
            };
        }

        let test = self.test_connection().await;
        ConnectionStatus {
            configured: true,
            connected: test.success,
            error: test.error,
        }
    }
}

fn status_text(status: StatusCode) -> String {
    if status == StatusCode::UNAUTHORIZED {
        return format!("HTTP {status}: check the access token");
    }
    format!("HTTP {status}")
}
