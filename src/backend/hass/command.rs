use async_trait::async_trait;
use serde_json::{Map, Value, json};

use hassdash_api::entity::Domain;

use crate::backend::hass::HassClient;
use crate::command::{ClimateUpdate, Command, CommandStrategy, LightAction, LightOptions};
use crate::error::ApiResult;

fn light_data(options: &LightOptions) -> Map<String, Value> {
    let mut data = Map::new();
    if let Some(bri) = options.brightness {
        data.insert("brightness".to_string(), json!(bri));
    }
    if let Some(rgb) = options.rgb_color {
        data.insert("rgb_color".to_string(), json!(rgb));
    }
    data
}

impl HassClient {
    async fn set_power(
        &self,
        entity_id: &str,
        action: LightAction,
        options: &LightOptions,
    ) -> ApiResult<()> {
        let domain = Domain::of(entity_id);
        let data = match (domain, action) {
            (Domain::Light, LightAction::TurnOn) => light_data(options),
            _ => Map::new(),
        };
        self.call_service(domain.as_str(), action.service(), entity_id, data)
            .await
    }

    /// Applies each requested change as its own service call, temperature
    /// first and mode last.
    async fn set_climate(&self, entity_id: &str, update: &ClimateUpdate) -> ApiResult<()> {
        if let Some(temperature) = update.temperature {
            let mut data = Map::new();
            data.insert("temperature".to_string(), json!(temperature));
            self.call_service("climate", "set_temperature", entity_id, data)
                .await?;
        }

        if let Some(fan_mode) = &update.fan_mode {
            let mut data = Map::new();
            data.insert("fan_mode".to_string(), json!(fan_mode));
            self.call_service("climate", "set_fan_mode", entity_id, data)
                .await?;
        }

        if let Some(hvac_mode) = &update.hvac_mode {
            let mut data = Map::new();
            data.insert("hvac_mode".to_string(), json!(hvac_mode));
            self.call_service("climate", "set_hvac_mode", entity_id, data)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl CommandStrategy for HassClient {
    fn name(&self) -> &'static str {
        "hass"
    }

    async fn execute(&self, command: &Command) -> ApiResult<()> {
        match command {
            Command::Power {
                entity_id,
                action,
                options,
            } => self.set_power(entity_id, *action, options).await,
            Command::Toggle { entity_id } => {
                let domain = Domain::of(entity_id);
                self.call_service(domain.as_str(), "toggle", entity_id, Map::new())
                    .await
            }
            Command::Climate { entity_id, update } => self.set_climate(entity_id, update).await,
        }
    }
}
