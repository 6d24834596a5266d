use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use hassdash_api::device::DeviceList;

use crate::backend::StateSource;
use crate::backend::hass::HassClient;
use crate::backend::proxy::ProxyClient;
use crate::command::{BoxStrategy, CommandRouter};
use crate::config::AppConfig;
use crate::devices::DeviceStore;
use crate::error::ApiResult;
use crate::history::{Averages, HistoryLog};
use crate::remote::RemoteConfigStore;
use crate::store::{KeyValueStore, YamlFileStore};
use crate::sync::{LiveSync, SyncOptions};
use crate::transport::Transport;

/// Everything the dashboard runs on, wired once per process.
#[derive(Clone)]
pub struct Dashboard {
    conf: Arc<AppConfig>,
    store: Arc<dyn KeyValueStore>,
    remote: Arc<RemoteConfigStore>,
    hass: Arc<HassClient>,
    proxy: Arc<ProxyClient>,
    devices: Arc<DeviceStore>,
    history: Arc<Mutex<HistoryLog>>,
    sync: LiveSync,
}

impl Dashboard {
    pub fn from_config(config: AppConfig) -> ApiResult<Self> {
        let store = YamlFileStore::open(&config.storage.state_file)?;
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn KeyValueStore>) -> ApiResult<Self> {
        let hass_transport = Transport::new(Duration::from_secs(config.hass.timeout_secs))?;
        let backend_transport = Transport::new(Duration::from_secs(config.backend.timeout_secs))?;

        let remote = Arc::new(RemoteConfigStore::new(
            store.clone(),
            RemoteConfigStore::defaults_from(&config),
            hass_transport,
        ));
        let hass = Arc::new(HassClient::new(remote.clone()));
        let proxy = Arc::new(ProxyClient::new(
            config.backend.url.as_str(),
            backend_transport,
        )?);

        let use_proxy = remote.get_config().use_proxy;
        if use_proxy {
            log::info!("[app] Using backend at {}", proxy.base_url());
        }
        let reader: Arc<dyn StateSource> = if use_proxy {
            proxy.clone()
        } else {
            hass.clone()
        };
        let backend = use_proxy.then(|| proxy.clone() as BoxStrategy);
        let router = CommandRouter::standard(hass.clone(), backend);
        let sync = LiveSync::new(reader, router, SyncOptions::from(&config.sync));

        let mut history = HistoryLog::new(&config.history);
        if let Err(err) = history.load(&*store) {
            log::warn!("[app] Discarding unreadable sensor history: {err}");
        }

        Ok(Self {
            conf: Arc::new(config),
            devices: Arc::new(DeviceStore::new(store.clone())),
            store,
            remote,
            hass,
            proxy,
            history: Arc::new(Mutex::new(history)),
            sync,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<AppConfig> {
        self.conf.clone()
    }

    #[must_use]
    pub fn remote(&self) -> Arc<RemoteConfigStore> {
        self.remote.clone()
    }

    #[must_use]
    pub fn hass(&self) -> Arc<HassClient> {
        self.hass.clone()
    }

    #[must_use]
    pub fn proxy(&self) -> Arc<ProxyClient> {
        self.proxy.clone()
    }

    #[must_use]
    pub fn devices(&self) -> Arc<DeviceStore> {
        self.devices.clone()
    }

    #[must_use]
    pub const fn sync(&self) -> &LiveSync {
        &self.sync
    }

    /// Initial load of every tracked entity, then the live socket.
    pub async fn start(&self) -> ApiResult<usize> {
        if !self.remote.is_configured() {
            log::warn!(
                "[app] Home Assistant is not configured, set {} or run set-remote",
                self.conf.token_env()
            );
        }

        let devices = self.devices.load_or_init()?;
        let loaded = self.sync.load_devices(&devices).await;
        self.record_history_for(&devices).await?;

        match self.remote.get_websocket_url() {
            Ok(url) => self.sync.connect(url),
            Err(err) => log::error!("[app] Invalid websocket url, live updates disabled: {err}"),
        }

        Ok(loaded)
    }

    async fn record_history_for(&self, devices: &DeviceList) -> ApiResult<usize> {
        let snapshot = self.sync.get_current_data();
        let mut history = self.history.lock().await;
        let recorded = history.process_sensor_data(
            &snapshot.sensor_data,
            &devices.temperature_sensors(),
            &devices.humidity_sensors(),
        );
        if recorded > 0 {
            history.save(&*self.store)?;
        }
        Ok(recorded)
    }

    /// Feed the current sensor values to the history log.
    pub async fn record_history(&self) -> ApiResult<usize> {
        let devices = self.devices.load_or_init()?;
        self.record_history_for(&devices).await
    }

    /// Averages over the locally recorded readings.
    pub async fn local_averages(&self) -> Averages {
        self.history.lock().await.twelve_hour_averages()
    }

    /// Averages computed by Home Assistant's own history.
    pub async fn remote_averages(&self) -> ApiResult<Averages> {
        let devices = self.devices.load_or_init()?;
        Ok(self
            .hass
            .get_twelve_hour_averages(&devices.temperature_sensors(), &devices.humidity_sensors())
            .await)
    }

    pub fn shutdown(&self) {
        self.sync.disconnect();
    }
}
