use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::join_all;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use hassdash_api::entity::{EntityState, Origin, parse_numeric};
use hassdash_api::snapshot::SnapshotPatch;

use crate::backend::StateSource;
use crate::error::{ApiError, ApiResult};
use crate::history::Averages;
use crate::remote::RemoteConfigStore;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct HassContext {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Entity state as served by `GET /api/states/{entity_id}`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HassState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Option<HassContext>,
}

impl From<HassState> for EntityState {
    fn from(value: HassState) -> Self {
        Self {
            entity_id: value.entity_id,
            old_state: value.state.clone(),
            new_state: value.state,
            user_id: value.context.and_then(|ctx| ctx.user_id),
            timestamp: value
                .last_updated
                .or(value.last_changed)
                .unwrap_or_else(Utc::now),
            attributes: value.attributes,
            origin: Origin::Live,
        }
    }
}

/// One entry of `GET /api/history/period/...`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HistoryPoint {
    #[serde(default)]
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
}

/// Sum and count of the numeric states in `points`. Non-numeric states
/// ("unavailable", "unknown", ...) are left out of both.
#[must_use]
pub fn numeric_sum(points: &[HistoryPoint]) -> (f64, usize) {
    points
        .iter()
        .filter_map(|point| parse_numeric(&point.state))
        .fold((0.0, 0), |(sum, count), value| (sum + value, count + 1))
}

#[allow(clippy::cast_precision_loss)]
fn mean((sum, count): (f64, usize)) -> f64 {
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Direct Home Assistant REST client.
///
/// Reads never fail towards the caller: errors are logged and turned into
/// "no data". Only [`HassClient::call_service`] reports errors, so command
/// routing can decide what to do next.
pub struct HassClient {
    remote: Arc<RemoteConfigStore>,
}

impl HassClient {
    pub const HISTORY_WINDOW_HOURS: i64 = 12;

    #[must_use]
    pub const fn new(remote: Arc<RemoteConfigStore>) -> Self {
        Self { remote }
    }

    fn endpoint_url(&self, endpoint: &str) -> ApiResult<Url> {
        Ok(self
            .remote
            .get_api_url()?
            .join(endpoint.trim_start_matches('/'))?)
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
        action: &str,
    ) -> ApiResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_else(|_| String::new());

        if status == StatusCode::UNAUTHORIZED {
            log::warn!("[hass] Unauthorized during {action}. Verify the access token");
        }

        Err(ApiError::HttpStatus {
            action: action.to_string(),
            status,
            body,
        })
    }

    async fn get(&self, endpoint: &str) -> ApiResult<reqwest::Response> {
        let url = self.endpoint_url(endpoint)?;
        let request = self
            .remote
            .transport()
            .http()
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.remote.get_auth_header());
        let response = self.remote.transport().send(request).await?;
        self.check_status(response, &format!("GET {endpoint}")).await
    }

    pub async fn get_state(&self, entity_id: &str) -> ApiResult<HassState> {
        let response = self.get(&format!("states/{entity_id}")).await?;
        Ok(response.json().await?)
    }

    pub async fn get_states(&self) -> ApiResult<Vec<HassState>> {
        let response = self.get("states").await?;
        Ok(response.json().await?)
    }

    pub async fn fetch_entity_state(&self, entity_id: &str) -> Option<HassState> {
        match self.get_state(entity_id).await {
            Ok(state) => Some(state),
            Err(err) => {
                log::warn!("[hass] Failed to fetch state of {entity_id}: {err}");
                None
            }
        }
    }

    /// Fetch all `entity_ids` at once. Failed entities are absent from the
    /// result.
    pub async fn fetch_multiple_entity_states(
        &self,
        entity_ids: &[String],
    ) -> HashMap<String, HassState> {
        let fetches = entity_ids.iter().map(|id| self.fetch_entity_state(id));
        join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .map(|state| (state.entity_id.clone(), state))
            .collect()
    }

    /// Fetch and convert `entity_ids`, bucketed by domain. Ids outside the
    /// four snapshot domains are dropped.
    pub async fn fetch_configured_entity_states(&self, entity_ids: &[String]) -> SnapshotPatch {
        let states = self.fetch_multiple_entity_states(entity_ids).await;
        log::debug!(
            "[hass] Fetched {}/{} configured entities",
            states.len(),
            entity_ids.len()
        );
        states.into_values().map(EntityState::from).collect()
    }

    pub async fn fetch_entity_history(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
    ) -> Vec<HistoryPoint> {
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let endpoint = format!("history/period/{start}?filter_entity_id={entity_id}");

        let result: ApiResult<Vec<Vec<HistoryPoint>>> = async {
            let response = self.get(&endpoint).await?;
            Ok(response.json().await?)
        }
        .await;

        match result {
            Ok(lists) => lists.into_iter().next().unwrap_or_default(),
            Err(err) => {
                log::warn!("[hass] Failed to fetch history of {entity_id}: {err}");
                vec![]
            }
        }
    }

    async fn window_sum(&self, entity_ids: &[String], start: DateTime<Utc>) -> (f64, usize) {
        let fetches = entity_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(|id| self.fetch_entity_history(id, start));

        join_all(fetches)
            .await
            .iter()
            .map(|points| numeric_sum(points))
            .fold((0.0, 0), |(sum, count), (s, c)| (sum + s, count + c))
    }

    /// Plain arithmetic mean over the last twelve hours of history of each
    /// sensor group.
    pub async fn get_twelve_hour_averages(
        &self,
        temperature_sensors: &[String],
        humidity_sensors: &[String],
    ) -> Averages {
        let start = Utc::now() - Duration::hours(Self::HISTORY_WINDOW_HOURS);

        let (temperature, humidity) = futures::join!(
            self.window_sum(temperature_sensors, start),
            self.window_sum(humidity_sensors, start),
        );

        Averages {
            temperature: mean(temperature),
            humidity: mean(humidity),
            temperature_count: temperature.1,
            humidity_count: humidity.1,
        }
    }

    pub async fn test_connection(&self) -> bool {
        match self.get("").await {
            Ok(_) => true,
            Err(err) => {
                log::debug!("[hass] Connection test failed: {err}");
                false
            }
        }
    }

    /// `POST /api/services/{domain}/{service}`. Unlike the readers, this
    /// reports failures to the caller.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        mut data: Map<String, Value>,
    ) -> ApiResult<()> {
        let endpoint = format!("services/{domain}/{service}");
        let url = self.endpoint_url(&endpoint)?;
        if !entity_id.trim().is_empty() {
            data.insert(
                "entity_id".to_string(),
                Value::String(entity_id.to_string()),
            );
        }

        let request = self
            .remote
            .transport()
            .http()
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.remote.get_auth_header())
            .json(&Value::Object(data));
        let response = self.remote.transport().send(request).await?;
        self.check_status(response, &format!("POST {endpoint}"))
            .await?;

        log::debug!("[hass] Called {domain}.{service} for {entity_id}");
        Ok(())
    }
}

#[async_trait]
impl StateSource for HassClient {
    fn name(&self) -> &'static str {
        "hass"
    }

    async fn fetch_entity(&self, entity_id: &str) -> Option<EntityState> {
        self.fetch_entity_state(entity_id)
            .await
            .map(EntityState::from)
    }

    async fn fetch_configured(&self, entity_ids: &[String]) -> SnapshotPatch {
        self.fetch_configured_entity_states(entity_ids).await
    }
}
