use serde_json::json;

use hassdash_api::entity::{EntityState, Origin};
use hassdash_api::snapshot::{Bucket, Snapshot};

fn seed(entity_id: &str, state: &str) -> EntityState {
    EntityState::new(entity_id, state).with_origin(Origin::Seed)
}

/// Placeholder entities shown until the first fetch answers.
#[must_use]
pub fn seed_snapshot() -> Snapshot {
    let entities = [
        seed("binary_sensor.water_leak_kitchen", "off").with_attribute("device_class", "moisture"),
        seed("binary_sensor.water_leak_bathroom", "off").with_attribute("device_class", "moisture"),
        seed("binary_sensor.radar_living_room", "off").with_attribute("device_class", "occupancy"),
        seed("binary_sensor.radar_hallway", "on").with_attribute("device_class", "occupancy"),
        seed("binary_sensor.front_door", "off").with_attribute("device_class", "door"),
        seed("binary_sensor.security", "off").with_attribute("device_class", "safety"),
        seed("light.living_room", "on")
            .with_attribute("brightness", 180)
            .with_attribute("friendly_name", "Living Room"),
        seed("light.kitchen", "off").with_attribute("friendly_name", "Kitchen"),
        seed("light.bedroom", "off").with_attribute("friendly_name", "Bedroom"),
        seed("climate.living_room", "cool")
            .with_attribute("hvac_modes", json!(["off", "heat", "cool", "fan_only", "dry"]))
            .with_attribute("fan_modes", json!(["auto", "low", "medium", "high"]))
            .with_attribute("temperature", 24)
            .with_attribute("current_temperature", 26.5)
            .with_attribute("fan_mode", "auto"),
        seed("climate.bedroom", "off")
            .with_attribute("hvac_modes", json!(["off", "heat", "cool", "dry"]))
            .with_attribute("temperature", 22),
        seed("sensor.living_room_temperature", "23.4")
            .with_attribute("device_class", "temperature")
            .with_attribute("unit_of_measurement", "°C"),
        seed("sensor.living_room_humidity", "48")
            .with_attribute("device_class", "humidity")
            .with_attribute("unit_of_measurement", "%"),
    ];

    let mut snapshot = Snapshot::default();
    for state in entities {
        if let Some(bucket) = Bucket::for_entity(&state.entity_id) {
            snapshot.insert(bucket, state);
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_seed_is_marked() {
        let snapshot = seed_snapshot();
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.seed_count(), snapshot.len());
        for bucket in Bucket::ALL {
            assert!(!snapshot.bucket(bucket).is_empty(), "{bucket:?} has no seed data");
        }
    }
}
