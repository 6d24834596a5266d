use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hassdash_api::entity::Domain;

use crate::error::{ApiError, ApiResult};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LightAction {
    TurnOn,
    TurnOff,
}

impl LightAction {
    #[must_use]
    pub const fn from_on(on: bool) -> Self {
        if on { Self::TurnOn } else { Self::TurnOff }
    }

    #[must_use]
    pub const fn service(self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
        }
    }

    #[must_use]
    pub const fn state(self) -> &'static str {
        match self {
            Self::TurnOn => "on",
            Self::TurnOff => "off",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LightOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<[u8; 3]>,
}

impl LightOptions {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.brightness.is_none() && self.rgb_color.is_none()
    }
}

/// Explicit climate attribute changes. Absent fields are left alone.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ClimateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hvac_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<String>,
}

impl ClimateUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.hvac_mode.is_none() && self.temperature.is_none() && self.fan_mode.is_none()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Action {
    Power,
    Toggle,
    Climate,
}

/// A resolved command: the target state is already decided, so every
/// strategy executes the same intent.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Power {
        entity_id: String,
        action: LightAction,
        options: LightOptions,
    },
    /// Flip an entity whose current state is not mirrored locally.
    Toggle { entity_id: String },
    Climate {
        entity_id: String,
        update: ClimateUpdate,
    },
}

impl Command {
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Power { entity_id, .. }
            | Self::Toggle { entity_id }
            | Self::Climate { entity_id, .. } => entity_id,
        }
    }

    #[must_use]
    pub const fn action(&self) -> Action {
        match self {
            Self::Power { .. } => Action::Power,
            Self::Toggle { .. } => Action::Toggle,
            Self::Climate { .. } => Action::Climate,
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        Domain::of(self.entity_id())
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power {
                entity_id, action, ..
            } => write!(f, "{} {entity_id}", action.service()),
            Self::Toggle { entity_id } => write!(f, "toggle {entity_id}"),
            Self::Climate { entity_id, update } => write!(f, "climate {entity_id} {update:?}"),
        }
    }
}

/// One way of carrying out a [`Command`] against a remote system.
#[async_trait]
pub trait CommandStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, command: &Command) -> ApiResult<()>;
}

pub type BoxStrategy = Arc<dyn CommandStrategy>;

/// Ordered strategies per `(domain, action)`. The first strategy to succeed
/// wins, the rest are not tried.
#[derive(Clone, Default)]
pub struct CommandRouter {
    routes: HashMap<(Domain, Action), Vec<BoxStrategy>>,
}

impl CommandRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, domain: Domain, action: Action, strategies: Vec<BoxStrategy>) -> Self {
        self.routes.insert((domain, action), strategies);
        self
    }

    /// Routing used by the application:
    ///
    /// - lights (power and toggle): backend first (when enabled), then Home
    ///   Assistant directly
    /// - climate: Home Assistant directly, the backend has no climate support
    /// - switches and fans: Home Assistant `toggle` / `turn_on` / `turn_off`
    #[must_use]
    pub fn standard(direct: BoxStrategy, backend: Option<BoxStrategy>) -> Self {
        let lights: Vec<BoxStrategy> = backend
            .into_iter()
            .chain(std::iter::once(direct.clone()))
            .collect();

        let mut router = Self::new()
            .route(Domain::Light, Action::Power, lights.clone())
            .route(Domain::Light, Action::Toggle, lights)
            .route(Domain::Climate, Action::Climate, vec![direct.clone()]);

        for domain in [Domain::Switch, Domain::Fan] {
            router = router
                .route(domain, Action::Power, vec![direct.clone()])
                .route(domain, Action::Toggle, vec![direct.clone()]);
        }
        router
    }

    #[must_use]
    pub fn strategies(&self, domain: Domain, action: Action) -> &[BoxStrategy] {
        self.routes
            .get(&(domain, action))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Try each strategy for `command` in order. Returns the name of the one
    /// that succeeded.
    pub async fn dispatch(&self, command: &Command) -> ApiResult<&'static str> {
        let strategies = self.strategies(command.domain(), command.action());
        if strategies.is_empty() {
            return Err(ApiError::NoCommandRoute(command.to_string()));
        }

        for strategy in strategies {
            match strategy.execute(command).await {
                Ok(()) => {
                    log::debug!("[command] {command} via {}", strategy.name());
                    return Ok(strategy.name());
                }
                Err(err) => {
                    log::warn!("[command] {command} via {} failed: {err}", strategy.name());
                }
            }
        }

        Err(ApiError::CommandFailed(strategies.len()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Strategy double that records what it was asked to do.
    pub struct Recorder {
        pub name: &'static str,
        pub fail: bool,
        pub seen: Mutex<Vec<Command>>,
    }

    impl Recorder {
        pub fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                seen: Mutex::new(vec![]),
            })
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandStrategy for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, command: &Command) -> ApiResult<()> {
            self.seen.lock().unwrap().push(command.clone());
            if self.fail {
                Err(ApiError::Backend(format!("{} refused", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn power(entity_id: &str) -> Command {
        Command::Power {
            entity_id: entity_id.to_string(),
            action: LightAction::TurnOn,
            options: LightOptions::default(),
        }
    }

    #[tokio::test]
    async fn falls_back_in_order() {
        let backend = Recorder::new("backend", true);
        let direct = Recorder::new("direct", false);
        let router = CommandRouter::standard(direct.clone(), Some(backend.clone()));

        let used = router.dispatch(&power("light.kitchen")).await.unwrap();

        assert_eq!(used, "direct");
        assert_eq!(backend.calls(), 1);
        assert_eq!(direct.calls(), 1);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let backend = Recorder::new("backend", false);
        let direct = Recorder::new("direct", false);
        let router = CommandRouter::standard(direct.clone(), Some(backend.clone()));

        assert_eq!(router.dispatch(&power("light.kitchen")).await.unwrap(), "backend");
        assert_eq!(direct.calls(), 0);
    }

    #[tokio::test]
    async fn light_toggle_prefers_backend() {
        let toggle = Command::Toggle {
            entity_id: "light.garage".to_string(),
        };

        let backend = Recorder::new("backend", false);
        let direct = Recorder::new("direct", false);
        let router = CommandRouter::standard(direct.clone(), Some(backend.clone()));
        assert_eq!(router.dispatch(&toggle).await.unwrap(), "backend");
        assert_eq!(direct.calls(), 0);

        let backend = Recorder::new("backend", true);
        let direct = Recorder::new("direct", false);
        let router = CommandRouter::standard(direct.clone(), Some(backend.clone()));
        assert_eq!(router.dispatch(&toggle).await.unwrap(), "direct");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn climate_skips_backend() {
        let backend = Recorder::new("backend", false);
        let direct = Recorder::new("direct", false);
        let router = CommandRouter::standard(direct.clone(), Some(backend.clone()));

        let cmd = Command::Climate {
            entity_id: "climate.ac".to_string(),
            update: ClimateUpdate {
                temperature: Some(21.0),
                ..ClimateUpdate::default()
            },
        };
        assert_eq!(router.dispatch(&cmd).await.unwrap(), "direct");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn all_failing_reports_count() {
        let backend = Recorder::new("backend", true);
        let direct = Recorder::new("direct", true);
        let router = CommandRouter::standard(direct, Some(backend));

        let err = router.dispatch(&power("light.kitchen")).await.unwrap_err();
        assert!(matches!(err, ApiError::CommandFailed(2)));
    }

    #[tokio::test]
    async fn sensors_have_no_route() {
        let router = CommandRouter::standard(Recorder::new("direct", false), None);
        let err = router.dispatch(&power("binary_sensor.door")).await.unwrap_err();
        assert!(matches!(err, ApiError::NoCommandRoute(_)));
    }
}
