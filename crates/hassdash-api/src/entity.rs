use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entity category, derived from the prefix of the entity id.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Light,
    BinarySensor,
    Climate,
    Sensor,
    Camera,
    Switch,
    Fan,
    Other,
}

impl Domain {
    #[must_use]
    pub fn of(entity_id: &str) -> Self {
        match entity_id.split_once('.') {
            Some(("light", _)) => Self::Light,
            Some(("binary_sensor", _)) => Self::BinarySensor,
            Some(("climate", _)) => Self::Climate,
            Some(("sensor", _)) => Self::Sensor,
            Some(("camera", _)) => Self::Camera,
            Some(("switch", _)) => Self::Switch,
            Some(("fan", _)) => Self::Fan,
            _ => Self::Other,
        }
    }

    /// Service domain name, as used in `/api/services/{domain}/{service}`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::BinarySensor => "binary_sensor",
            Self::Climate => "climate",
            Self::Sensor => "sensor",
            Self::Camera => "camera",
            Self::Switch => "switch",
            Self::Fan => "fan",
            Self::Other => "homeassistant",
        }
    }

    /// Sensors only ever report, they never accept commands.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::BinarySensor | Self::Sensor)
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a snapshot record came from.
///
/// Seed records are placeholders shown before the first real fetch. A record
/// is always entirely one or the other.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Seed,
    #[default]
    Live,
}

/// HVAC modes known to Home Assistant climate entities.
pub const HVAC_MODES: &[&str] = &["off", "heat", "cool", "heat_cool", "fan_only", "dry"];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub entity_id: String,
    #[serde(default)]
    pub old_state: String,
    #[serde(default)]
    pub new_state: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(skip)]
    pub origin: Origin,
}

impl EntityState {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        let state = state.into();
        Self {
            entity_id: entity_id.into(),
            old_state: state.clone(),
            new_state: state,
            user_id: None,
            timestamp: Utc::now(),
            attributes: Map::new(),
            origin: Origin::Live,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub const fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        Domain::of(&self.entity_id)
    }

    #[must_use]
    pub fn is_seed(&self) -> bool {
        self.origin == Origin::Seed
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        self.new_state == "on"
    }

    /// Numeric value of the current state, if it is a finite number.
    #[must_use]
    pub fn numeric_state(&self) -> Option<f64> {
        parse_numeric(&self.new_state)
    }

    #[must_use]
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn device_class(&self) -> Option<&str> {
        self.attribute_str("device_class")
    }

    #[must_use]
    pub fn hvac_modes(&self) -> Vec<String> {
        self.attributes
            .get("hvac_modes")
            .and_then(Value::as_array)
            .map(|modes| {
                modes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mode following the current one in the entity's allowed-modes list,
    /// wrapping around. Falls back to the standard mode list when the entity
    /// does not advertise any.
    #[must_use]
    pub fn next_hvac_mode(&self) -> String {
        let mut modes = self.hvac_modes();
        if modes.is_empty() {
            modes = HVAC_MODES.iter().map(ToString::to_string).collect();
        }
        let next = modes
            .iter()
            .position(|mode| *mode == self.new_state)
            .map_or(0, |idx| (idx + 1) % modes.len());
        modes[next].clone()
    }

    /// Copy of this record moved to `new_state`, keeping attributes and origin.
    #[must_use]
    pub fn transitioned(&self, new_state: impl Into<String>) -> Self {
        Self {
            entity_id: self.entity_id.clone(),
            old_state: self.new_state.clone(),
            new_state: new_state.into(),
            user_id: None,
            timestamp: Utc::now(),
            attributes: self.attributes.clone(),
            origin: self.origin,
        }
    }
}

/// Parse a state string as a finite float. `"unavailable"`, `"NaN"` and
/// friends yield `None`.
#[must_use]
pub fn parse_numeric(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
}
