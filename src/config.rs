use camino::Utf8Path;
use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct HassSettings {
    /// REST root, e.g. `http://homeassistant.local:8123/api`.
    pub url: Url,
    /// Live-entities websocket endpoint.
    pub websocket_url: Url,
    pub token_env: Option<String>,
    pub use_proxy: bool,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct BackendSettings {
    pub url: Url,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct SyncSettings {
    pub reconnect_delay_secs: u64,
    /// Bound on the websocket handshake, per attempt.
    pub connect_timeout_secs: u64,
    pub max_reconnect_attempts: u32,
    /// Exact ids without a domain prefix that are routed to the binary sensor map.
    #[serde(default)]
    pub legacy_binary_sensors: Vec<String>,
    pub reconcile_on_failure: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct HistorySettings {
    pub window_hours: u32,
    pub max_readings: usize,
    #[serde(default)]
    pub legacy_temperature_sensors: Vec<String>,
    #[serde(default)]
    pub legacy_humidity_sensors: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct StorageSettings {
    pub state_file: camino::Utf8PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub hass: HassSettings,
    pub backend: BackendSettings,
    pub sync: SyncSettings,
    pub history: HistorySettings,
    pub storage: StorageSettings,
}

impl AppConfig {
    pub const DEFAULT_TOKEN_ENV: &'static str = "HASS_TOKEN";

    #[must_use]
    pub fn token_env(&self) -> &str {
        self.hass
            .token_env
            .as_deref()
            .unwrap_or(Self::DEFAULT_TOKEN_ENV)
    }
}

fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Config::builder()
        .set_default("hass.url", "http://homeassistant.local:8123/api")?
        .set_default("hass.websocket_url", "ws://homeassistant.local:8000/api/ws/entities_live")?
        .set_default("hass.use_proxy", false)?
        .set_default("hass.timeout_secs", 10)?
        .set_default("backend.url", "http://homeassistant.local:8000")?
        .set_default("backend.timeout_secs", 10)?
        .set_default("sync.reconnect_delay_secs", 5)?
        .set_default("sync.connect_timeout_secs", 10)?
        .set_default("sync.max_reconnect_attempts", 5)?
        .set_default("sync.reconcile_on_failure", true)?
        .set_default("history.window_hours", 12)?
        .set_default("history.max_readings", 288)?
        .set_default("storage.state_file", "hassdash-state.yaml")
}

pub fn parse(filename: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let settings = builder()?
        .add_source(config::File::with_name(filename.as_str()).required(false))
        .build()?;

    settings.try_deserialize()
}

/// Configuration made of defaults only.
pub fn defaults() -> Result<AppConfig, ConfigError> {
    builder()?.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = defaults().unwrap();
        assert_eq!(cfg.hass.timeout_secs, 10);
        assert_eq!(cfg.sync.reconnect_delay_secs, 5);
        assert_eq!(cfg.sync.max_reconnect_attempts, 5);
        assert_eq!(cfg.sync.connect_timeout_secs, 10);
        assert_eq!(cfg.history.window_hours, 12);
        assert_eq!(cfg.history.max_readings, 288);
        assert!(cfg.sync.legacy_binary_sensors.is_empty());
        assert_eq!(cfg.token_env(), "HASS_TOKEN");
        assert_eq!(cfg.hass.websocket_url.path(), "/api/ws/entities_live");
    }

    #[test]
    fn file_overrides_defaults() {
        let yaml = r"
hass:
  url: http://10.0.0.2:8123/api
  token_env: MY_TOKEN
sync:
  legacy_binary_sensors: [water_leak, front_door]
";
        let cfg: AppConfig = builder()
            .unwrap()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.hass.url.as_str(), "http://10.0.0.2:8123/api");
        assert_eq!(cfg.token_env(), "MY_TOKEN");
        assert_eq!(cfg.sync.legacy_binary_sensors, ["water_leak", "front_door"]);
        assert_eq!(cfg.sync.reconnect_delay_secs, 5);
    }
}
