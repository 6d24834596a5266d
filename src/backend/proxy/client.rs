use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use hassdash_api::entity::{Domain, EntityState};
use hassdash_api::envelope::{BackendEntityState, Envelope, LightToggleRequest};
use hassdash_api::snapshot::SnapshotPatch;

use crate::backend::StateSource;
use crate::command::{ClimateUpdate, Command, CommandStrategy, LightAction, LightOptions};
use crate::error::{ApiError, ApiResult};
use crate::transport::Transport;

/// Client for the intermediary backend that fronts Home Assistant.
///
/// Every response comes wrapped in an [`Envelope`]. A `success: false`
/// envelope is treated like any other failure.
pub struct ProxyClient {
    base_url: Url,
    transport: Transport,
}

impl ProxyClient {
    pub fn new(base_url: &str, transport: Transport) -> ApiResult<Self> {
        let base = base_url.trim().trim_end_matches('/');
        Ok(Self {
            base_url: Url::parse(&format!("{base}/"))?,
            transport,
        })
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> ApiResult<Option<T>> {
        let response = self.transport.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::HttpStatus {
                action: action.to_string(),
                status,
                body,
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        envelope.into_result().map_err(ApiError::Backend)
    }

    async fn get_data<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<Option<T>> {
        let url = self.base_url.join(endpoint)?;
        let request = self.transport.http().get(url);
        self.unwrap_envelope(request, &format!("GET {endpoint}"))
            .await
    }

    pub async fn health(&self) -> bool {
        match self.get_data::<Value>("api/health").await {
            Ok(_) => true,
            Err(err) => {
                log::debug!("[backend] Health check failed: {err}");
                false
            }
        }
    }

    pub async fn get_entity_state(&self, entity_id: &str) -> Option<BackendEntityState> {
        match self
            .get_data::<BackendEntityState>(&format!("api/ha/state/{entity_id}"))
            .await
        {
            Ok(Some(state)) => Some(state),
            Ok(None) => {
                log::warn!("[backend] No state returned for {entity_id}");
                None
            }
            Err(err) => {
                log::warn!("[backend] Failed to fetch state of {entity_id}: {err}");
                None
            }
        }
    }

    /// Post an explicit light state. Errors are returned, not logged.
    pub async fn set_light_state(&self, entity_id: &str, action: LightAction) -> ApiResult<()> {
        let endpoint = "api/ha/service/light_toggle";
        let url = self.base_url.join(endpoint)?;
        let body = LightToggleRequest {
            entity_id: entity_id.to_string(),
            state: action.state().to_string(),
        };
        let request = self.transport.http().post(url).json(&body);
        self.unwrap_envelope::<Value>(request, &format!("POST {endpoint}"))
            .await?;
        log::debug!("[backend] Set {entity_id} {}", action.state());
        Ok(())
    }

    async fn flip_light(&self, entity_id: &str) -> ApiResult<()> {
        let current = self
            .get_entity_state(entity_id)
            .await
            .ok_or_else(|| ApiError::Backend(format!("current state of {entity_id} unknown")))?;
        let target = LightAction::from_on(current.state != "on");
        self.set_light_state(entity_id, target).await
    }

    /// Read the current state, then post its opposite.
    pub async fn toggle_light(&self, entity_id: &str) -> bool {
        match self.flip_light(entity_id).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[backend] Toggle of {entity_id} failed: {err}");
                false
            }
        }
    }

    /// The backend only accepts the on/off state, so brightness and color
    /// are not forwarded.
    async fn power_light(
        &self,
        entity_id: &str,
        action: LightAction,
        options: &LightOptions,
    ) -> ApiResult<()> {
        if !options.is_empty() {
            log::info!("[backend] Ignoring light options for {entity_id}: {options:?}");
        }
        self.set_light_state(entity_id, action).await
    }

    /// Switch a light on or off.
    pub async fn control_light(
        &self,
        entity_id: &str,
        action: LightAction,
        options: &LightOptions,
    ) -> bool {
        match self.power_light(entity_id, action, options).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[backend] {} {entity_id} failed: {err}", action.service());
                false
            }
        }
    }

    /// The backend has no climate endpoint. Always `false`.
    pub fn control_climate(&self, entity_id: &str, update: &ClimateUpdate) -> bool {
        log::debug!("[backend] Climate control unsupported ({entity_id}: {update:?})");
        false
    }

    async fn get_value(&self, endpoint: &str) -> Option<Value> {
        match self.get_data::<Value>(endpoint).await {
            Ok(data) => data,
            Err(err) => {
                log::warn!("[backend] Failed to fetch {endpoint}: {err}");
                None
            }
        }
    }

    pub async fn get_dashboard_data(&self) -> Option<Value> {
        self.get_value("api/dashboard").await
    }

    pub async fn get_all_entities(&self) -> Option<Value> {
        self.get_value("api/entities").await
    }

    pub async fn fetch_multiple_entity_states(
        &self,
        entity_ids: &[String],
    ) -> HashMap<String, BackendEntityState> {
        let fetches = entity_ids.iter().map(|id| self.get_entity_state(id));
        join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .map(|state| (state.entity_id.clone(), state))
            .collect()
    }

    pub async fn fetch_configured_entity_states(&self, entity_ids: &[String]) -> SnapshotPatch {
        let states = self.fetch_multiple_entity_states(entity_ids).await;
        log::debug!(
            "[backend] Fetched {}/{} configured entities",
            states.len(),
            entity_ids.len()
        );
        states.into_values().map(EntityState::from).collect()
    }
}

#[async_trait]
impl StateSource for ProxyClient {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn fetch_entity(&self, entity_id: &str) -> Option<EntityState> {
        self.get_entity_state(entity_id)
            .await
            .map(EntityState::from)
    }

    async fn fetch_configured(&self, entity_ids: &[String]) -> SnapshotPatch {
        self.fetch_configured_entity_states(entity_ids).await
    }
}

#[async_trait]
impl CommandStrategy for ProxyClient {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn execute(&self, command: &Command) -> ApiResult<()> {
        match command {
            Command::Power {
                entity_id,
                action,
                options,
            } if Domain::of(entity_id) == Domain::Light => {
                self.power_light(entity_id, *action, options).await
            }
            Command::Toggle { entity_id } if Domain::of(entity_id) == Domain::Light => {
                self.flip_light(entity_id).await
            }
            Command::Climate { entity_id, update } => {
                self.control_climate(entity_id, update);
                Err(ApiError::Backend(
                    "climate control is not available through the backend".to_string(),
                ))
            }
            other => Err(ApiError::Backend(format!("unsupported command: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hassdash_api::snapshot::Bucket;
    use mockito::{Matcher, Mock, ServerGuard};
    use serde_json::json;

    use crate::testutil::dead_url;

    use super::*;

    fn client(base: &str) -> ProxyClient {
        ProxyClient::new(base, Transport::new(Duration::from_secs(2)).unwrap()).unwrap()
    }

    fn ok(data: &Value) -> String {
        json!({"success": true, "data": data}).to_string()
    }

    /// Backend double with the kitchen light off and the hall light on.
    async fn backend() -> (ServerGuard, Vec<Mock>) {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = vec![];

        for (id, state) in [("light.kitchen", "off"), ("light.hall", "on")] {
            mocks.push(
                server
                    .mock("GET", format!("/api/ha/state/{id}").as_str())
                    .with_status(200)
                    .with_header("content-type", "application/json")
                    .with_body(ok(&json!({"entity_id": id, "state": state})))
                    .create_async()
                    .await,
            );
        }

        mocks.push(
            server
                .mock("GET", "/api/health")
                .with_body(ok(&json!({"status": "ok"})))
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("GET", "/api/dashboard")
                .with_body(ok(&json!({"rooms": 3})))
                .create_async()
                .await,
        );
        mocks.push(
            server
                .mock("GET", "/api/entities")
                .with_body(json!({"success": false, "message": "not ready"}).to_string())
                .create_async()
                .await,
        );

        (server, mocks)
    }

    async fn expect_post(server: &mut ServerGuard, entity_id: &str, state: &str) -> Mock {
        server
            .mock("POST", "/api/ha/service/light_toggle")
            .match_body(Matcher::Json(json!({"entity_id": entity_id, "state": state})))
            .with_body(ok(&json!(null)))
            .expect(1)
            .create_async()
            .await
    }

    #[test]
    fn base_url_normalized() {
        assert_eq!(client("http://b.local:8000").base_url().as_str(), "http://b.local:8000/");
        assert_eq!(client("http://b.local:8000/").base_url().as_str(), "http://b.local:8000/");
    }

    #[tokio::test]
    async fn entity_state_unwraps_envelope() {
        let (server, _mocks) = backend().await;
        let client = client(&server.url());

        let state = client.get_entity_state("light.kitchen").await.unwrap();
        assert_eq!(state.state, "off");
        assert!(client.get_entity_state("light.none").await.is_none());
        assert!(client.health().await);
    }

    #[tokio::test]
    async fn toggle_posts_opposite_state() {
        let (mut server, _mocks) = backend().await;
        let kitchen_on = expect_post(&mut server, "light.kitchen", "on").await;
        let hall_off = expect_post(&mut server, "light.hall", "off").await;
        let client = client(&server.url());

        assert!(client.toggle_light("light.kitchen").await);
        assert!(client.toggle_light("light.hall").await);
        kitchen_on.assert_async().await;
        hall_off.assert_async().await;

        // nothing to flip when the current state is unknown
        assert!(!client.toggle_light("light.none").await);
    }

    #[tokio::test]
    async fn toggle_command_reads_then_posts() {
        let (mut server, _mocks) = backend().await;
        let hall_off = expect_post(&mut server, "light.hall", "off").await;
        let client = client(&server.url());

        client
            .execute(&Command::Toggle {
                entity_id: "light.hall".to_string(),
            })
            .await
            .unwrap();
        hall_off.assert_async().await;
    }

    #[tokio::test]
    async fn control_light_drops_options() {
        let (mut server, _mocks) = backend().await;
        let post = expect_post(&mut server, "light.kitchen", "on").await;
        let client = client(&server.url());

        let options = LightOptions {
            brightness: Some(40),
            rgb_color: None,
        };
        assert!(client.control_light("light.kitchen", LightAction::TurnOn, &options).await);
        post.assert_async().await;
    }

    #[tokio::test]
    async fn power_command_drops_options() {
        let (mut server, _mocks) = backend().await;
        let post = expect_post(&mut server, "light.kitchen", "off").await;
        let client = client(&server.url());

        client
            .execute(&Command::Power {
                entity_id: "light.kitchen".to_string(),
                action: LightAction::TurnOff,
                options: LightOptions {
                    brightness: None,
                    rgb_color: Some([255, 0, 0]),
                },
            })
            .await
            .unwrap();
        post.assert_async().await;
    }

    #[tokio::test]
    async fn climate_is_never_handled() {
        let client = client(&dead_url(""));
        assert!(!client.control_climate("climate.ac", &ClimateUpdate::default()));

        let err = client
            .execute(&Command::Climate {
                entity_id: "climate.ac".to_string(),
                update: ClimateUpdate::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Backend(_)));
    }

    #[tokio::test]
    async fn aggregate_reads() {
        let (server, _mocks) = backend().await;
        let client = client(&server.url());

        assert_eq!(client.get_dashboard_data().await, Some(json!({"rooms": 3})));
        // success: false
        assert_eq!(client.get_all_entities().await, None);
    }

    #[tokio::test]
    async fn unreachable_backend_yields_nothing() {
        let client = client(&dead_url(""));
        assert!(!client.health().await);
        assert!(client.get_entity_state("light.kitchen").await.is_none());
        assert!(
            !client
                .control_light("light.kitchen", LightAction::TurnOff, &LightOptions::default())
                .await
        );
    }

    #[tokio::test]
    async fn configured_states_get_timestamps() {
        let (server, _mocks) = backend().await;
        let client = client(&server.url());

        let patch = client
            .fetch_configured_entity_states(&["light.kitchen".to_string(), "light.none".to_string()])
            .await;

        let lights = patch.bucket(Bucket::Light).unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(lights["light.kitchen"].new_state, "off");
    }
}
