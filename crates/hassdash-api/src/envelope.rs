use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{EntityState, Origin};

/// Response wrapper used by every backend endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    /// Payload of a successful response.
    ///
    /// A `success: false` response yields the backend's own explanation,
    /// preferring `message` over `error`.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self
                .message
                .or(self.error)
                .unwrap_or_else(|| "backend reported failure".to_string()))
        }
    }
}

/// Entity state as returned by `GET /api/ha/state/{entity_id}`. The backend
/// does not report timestamps.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BackendEntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl From<BackendEntityState> for EntityState {
    /// The timestamp is the time of conversion.
    fn from(value: BackendEntityState) -> Self {
        Self {
            entity_id: value.entity_id,
            old_state: value.state.clone(),
            new_state: value.state,
            user_id: None,
            timestamp: Utc::now(),
            attributes: value.attributes,
            origin: Origin::Live,
        }
    }
}

/// Body of `POST /api/ha/service/light_toggle`.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct LightToggleRequest {
    pub entity_id: String,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_yields_data() {
        let env: Envelope<BackendEntityState> = serde_json::from_str(
            r#"{"success":true,"data":{"entity_id":"light.a","state":"on"}}"#,
        )
        .unwrap();
        let data = env.into_result().unwrap().unwrap();
        assert_eq!(data.entity_id, "light.a");
        assert!(data.attributes.is_empty());
    }

    #[test]
    fn failure_envelope_prefers_message() {
        let env: Envelope<Value> =
            serde_json::from_str(r#"{"success":false,"message":"nope","error":"E42"}"#).unwrap();
        assert_eq!(env.into_result().unwrap_err(), "nope");

        let env: Envelope<Value> = serde_json::from_str(r#"{"success":false,"error":"E42"}"#).unwrap();
        assert_eq!(env.into_result().unwrap_err(), "E42");

        let env: Envelope<Value> = serde_json::from_str("{}").unwrap();
        assert_eq!(env.into_result().unwrap_err(), "backend reported failure");
    }

    #[test]
    fn backend_state_converts_to_live_record() {
        let state = EntityState::from(BackendEntityState {
            entity_id: "light.a".to_string(),
            state: "off".to_string(),
            attributes: Map::new(),
        });
        assert_eq!(state.old_state, "off");
        assert_eq!(state.new_state, "off");
        assert!(state.user_id.is_none());
        assert!(!state.is_seed());
    }
}
