use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Water,
    Radar,
    Door,
    Light,
    Camera,
    Ac,
    Security,
    TempHumidity,
}

/// A user-configured device, as edited from the settings screen.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    /// Primary entity id. Empty means "not configured yet".
    #[serde(default)]
    pub entity: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupancy_sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    /// Temp/humidity devices: humidity entity, when separate from `entity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_entity: Option<String>,
}

impl DeviceConfig {
    #[must_use]
    pub fn new(id: &str, name: &str, entity: &str, kind: DeviceKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            entity: entity.to_string(),
            kind,
            motion_sensor: None,
            occupancy_sensor: None,
            stream_url: None,
            humidity_entity: None,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.entity.trim().is_empty()
    }

    /// Entity ids this device needs live state for: the primary entity and,
    /// for cameras, the motion and occupancy sensors.
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        let extra = match self.kind {
            DeviceKind::Camera => [self.motion_sensor.as_deref(), self.occupancy_sensor.as_deref()],
            DeviceKind::TempHumidity => [self.humidity_entity.as_deref(), None],
            _ => [None, None],
        };
        std::iter::once(self.entity.as_str())
            .chain(extra.into_iter().flatten())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Derive the de-duplicated list of entity ids to track, in first-seen order.
pub fn tracked_entity_ids<'a>(devices: impl IntoIterator<Item = &'a DeviceConfig>) -> Vec<String> {
    devices
        .into_iter()
        .flat_map(DeviceConfig::entity_ids)
        .unique()
        .map(ToString::to_string)
        .collect()
}

/// Persisted device configuration, grouped by category.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceList {
    #[serde(default)]
    pub water_sensors: Vec<DeviceConfig>,
    #[serde(default)]
    pub radar_sensors: Vec<DeviceConfig>,
    #[serde(default)]
    pub temp_humidity_sensors: Vec<DeviceConfig>,
    pub door_sensor: DeviceConfig,
    pub security_sensor: DeviceConfig,
    #[serde(default)]
    pub lights: Vec<DeviceConfig>,
    #[serde(default)]
    pub cameras: Vec<DeviceConfig>,
    #[serde(default)]
    pub air_conditioners: Vec<DeviceConfig>,
}

impl Default for DeviceList {
    fn default() -> Self {
        let camera = |id: &str, name: &str| DeviceConfig {
            stream_url: Some(String::new()),
            motion_sensor: Some(String::new()),
            occupancy_sensor: Some(String::new()),
            ..DeviceConfig::new(id, name, "", DeviceKind::Camera)
        };
        let temp = |id: &str, name: &str, entity: &str, humidity: &str| DeviceConfig {
            humidity_entity: Some(humidity.to_string()),
            ..DeviceConfig::new(id, name, entity, DeviceKind::TempHumidity)
        };

        Self {
            water_sensors: vec![
                DeviceConfig::new("water-1", "Kitchen Water", "", DeviceKind::Water),
                DeviceConfig::new("water-2", "Bathroom Water", "", DeviceKind::Water),
            ],
            radar_sensors: vec![
                DeviceConfig::new("radar-1", "Living Room Radar", "", DeviceKind::Radar),
                DeviceConfig::new("radar-2", "Hallway Radar", "", DeviceKind::Radar),
            ],
            temp_humidity_sensors: vec![
                temp("th-1", "Living Room", "sensor.living_room_temperature", "sensor.living_room_humidity"),
                temp("th-2", "Bedroom", "", ""),
            ],
            door_sensor: DeviceConfig::new("door-1", "Front Door", "", DeviceKind::Door),
            security_sensor: DeviceConfig::new("security-1", "Security", "", DeviceKind::Security),
            lights: vec![
                DeviceConfig::new("light-1", "Living Room", "light.living_room", DeviceKind::Light),
                DeviceConfig::new("light-2", "Kitchen", "light.kitchen", DeviceKind::Light),
                DeviceConfig::new("light-3", "Bedroom", "", DeviceKind::Light),
            ],
            cameras: vec![camera("camera-1", "Front Camera"), camera("camera-2", "Backyard Camera")],
            air_conditioners: vec![
                DeviceConfig::new("ac-1", "Living Room AC", "climate.living_room", DeviceKind::Ac),
                DeviceConfig::new("ac-2", "Bedroom AC", "", DeviceKind::Ac),
            ],
        }
    }
}

impl DeviceList {
    pub fn iter(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.water_sensors
            .iter()
            .chain(&self.radar_sensors)
            .chain(&self.temp_humidity_sensors)
            .chain(std::iter::once(&self.door_sensor))
            .chain(std::iter::once(&self.security_sensor))
            .chain(&self.lights)
            .chain(&self.cameras)
            .chain(&self.air_conditioners)
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceConfig> {
        self.water_sensors
            .iter_mut()
            .chain(&mut self.radar_sensors)
            .chain(&mut self.temp_humidity_sensors)
            .chain(std::iter::once(&mut self.door_sensor))
            .chain(std::iter::once(&mut self.security_sensor))
            .chain(&mut self.lights)
            .chain(&mut self.cameras)
            .chain(&mut self.air_conditioners)
    }

    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.iter().find(|dev| dev.id == device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut DeviceConfig> {
        self.iter_mut().find(|dev| dev.id == device_id)
    }

    #[must_use]
    pub fn tracked_entity_ids(&self) -> Vec<String> {
        tracked_entity_ids(self.iter())
    }

    /// Temperature sources: the primary entity of every temp/humidity device.
    #[must_use]
    pub fn temperature_sensors(&self) -> Vec<String> {
        self.temp_humidity_sensors
            .iter()
            .map(|dev| dev.entity.trim())
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    #[must_use]
    pub fn humidity_sensors(&self) -> Vec<String> {
        self.temp_humidity_sensors
            .iter()
            .filter_map(|dev| dev.humidity_entity.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn front_camera() -> DeviceConfig {
        DeviceConfig {
            motion_sensor: Some("binary_sensor.m".to_string()),
            occupancy_sensor: Some("binary_sensor.o".to_string()),
            stream_url: Some("rtsp://cam/front".to_string()),
            ..DeviceConfig::new("camera-1", "Front", "camera.front", DeviceKind::Camera)
        }
    }

    #[test]
    fn camera_contributes_sensor_ids() {
        let cam = front_camera();
        assert_eq!(
            tracked_entity_ids([&cam]),
            ["camera.front", "binary_sensor.m", "binary_sensor.o"]
        );
    }

    #[test]
    fn tracked_ids_are_unique_across_overlapping_lists() {
        let cam = front_camera();
        let motion = DeviceConfig::new("radar-1", "Radar", "binary_sensor.m", DeviceKind::Radar);

        let first = tracked_entity_ids([&cam, &cam]);
        let second = tracked_entity_ids([&cam, &motion, &cam]);

        assert_eq!(first, ["camera.front", "binary_sensor.m", "binary_sensor.o"]);
        assert_eq!(second, first);
    }

    #[test]
    fn unconfigured_devices_are_skipped() {
        let light = DeviceConfig::new("light-9", "Nowhere", "  ", DeviceKind::Light);
        let water = DeviceConfig {
            motion_sensor: Some("binary_sensor.ignored".to_string()),
            ..DeviceConfig::new("water-9", "Sink", "binary_sensor.sink", DeviceKind::Water)
        };
        assert!(!light.is_configured());
        assert_eq!(tracked_entity_ids([&light, &water]), ["binary_sensor.sink"]);
    }

    #[test]
    fn default_list_sensor_lists() {
        let list = DeviceList::default();
        assert_eq!(list.temperature_sensors(), ["sensor.living_room_temperature"]);
        assert_eq!(list.humidity_sensors(), ["sensor.living_room_humidity"]);
        assert!(list.tracked_entity_ids().contains(&"light.kitchen".to_string()));
    }

    #[test]
    fn get_mut_finds_single_slots() {
        let mut list = DeviceList::default();
        list.get_mut("door-1").unwrap().entity = "binary_sensor.front_door".to_string();
        assert_eq!(list.door_sensor.entity, "binary_sensor.front_door");
        assert!(list.get("missing").is_none());
    }

    #[test]
    fn device_kind_uses_type_key() {
        let dev: DeviceConfig = serde_json::from_str(
            r#"{"id":"ac-1","name":"AC","entity":"climate.ac","type":"ac"}"#,
        )
        .unwrap();
        assert_eq!(dev.kind, DeviceKind::Ac);
        assert_eq!(dev.motion_sensor, None);
    }
}
