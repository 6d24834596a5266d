use serde::{Deserialize, Serialize};

/// Connection parameters for Home Assistant and the live-entities socket.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: String,
    pub websocket_url: String,
    pub use_proxy: bool,
}

/// Partial update for [`RemoteConfig`]. Also the shape read back from
/// storage, so that records written by older versions still merge cleanly
/// over the defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_proxy: Option<bool>,
}

impl RemoteConfig {
    #[must_use]
    pub fn merged(mut self, update: RemoteConfigUpdate) -> Self {
        if let Some(base_url) = update.base_url {
            self.base_url = base_url;
        }
        if let Some(token) = update.token {
            self.token = token;
        }
        if let Some(websocket_url) = update.websocket_url {
            self.websocket_url = websocket_url;
        }
        if let Some(use_proxy) = update.use_proxy {
            self.use_proxy = use_proxy;
        }
        self
    }

    /// Both a token and a base url are present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty() && !self.base_url.trim().is_empty()
    }
}

impl RemoteConfigUpdate {
    /// Layer `update` over `self`. Fields absent from `update` keep their
    /// current value, so a record only ever holds what was set explicitly.
    #[must_use]
    pub fn merged(self, update: Self) -> Self {
        Self {
            base_url: update.base_url.or(self.base_url),
            token: update.token.or(self.token),
            websocket_url: update.websocket_url.or(self.websocket_url),
            use_proxy: update.use_proxy.or(self.use_proxy),
        }
    }
}
