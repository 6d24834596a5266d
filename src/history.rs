use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use hassdash_api::snapshot::EntityMap;

use crate::config::HistorySettings;
use crate::error::ApiResult;
use crate::store::KeyValueStore;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Temperature,
    Humidity,
}

impl ReadingKind {
    fn from_device_class(class: &str) -> Option<Self> {
        match class {
            "temperature" => Some(Self::Temperature),
            "humidity" => Some(Self::Humidity),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Averages {
    pub temperature: f64,
    pub humidity: f64,
    pub temperature_count: usize,
    pub humidity_count: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    #[serde(default)]
    temperature: Vec<Reading>,
    #[serde(default)]
    humidity: Vec<Reading>,
}

#[allow(clippy::cast_precision_loss)]
fn mean<'a>(readings: impl Iterator<Item = &'a Reading>) -> (f64, usize) {
    let (sum, count) = readings.fold((0.0, 0), |(sum, count), r| (sum + r.value, count + 1));
    if count == 0 {
        (0.0, 0)
    } else {
        (sum / count as f64, count)
    }
}

/// Rolling window of temperature and humidity readings.
///
/// Each list is kept newest first, capped in length, and pruned to the
/// window on every write. Reads filter by the window again.
///
/// Sensor scans stamp readings with the time of observation. The entity's
/// own `last_updated` only serves to skip states already recorded.
#[derive(Debug)]
pub struct HistoryLog {
    window: Duration,
    max_readings: usize,
    temperature: Vec<Reading>,
    humidity: Vec<Reading>,
    last_seen: HashMap<(ReadingKind, String), DateTime<Utc>>,
    legacy_temperature: HashSet<String>,
    legacy_humidity: HashSet<String>,
}

impl HistoryLog {
    pub const KEY: &'static str = "sensor_history";

    #[must_use]
    pub fn new(settings: &HistorySettings) -> Self {
        Self {
            window: Duration::hours(i64::from(settings.window_hours)),
            max_readings: settings.max_readings,
            temperature: vec![],
            humidity: vec![],
            last_seen: HashMap::new(),
            legacy_temperature: settings.legacy_temperature_sensors.iter().cloned().collect(),
            legacy_humidity: settings.legacy_humidity_sensors.iter().cloned().collect(),
        }
    }

    /// Replace the in-memory readings with the persisted ones, if any.
    pub fn load(&mut self, store: &dyn KeyValueStore) -> ApiResult<()> {
        if let Some(saved) = store.load_as::<Persisted>(Self::KEY)? {
            self.temperature = saved.temperature;
            self.humidity = saved.humidity;
            let now = Utc::now();
            for kind in [ReadingKind::Temperature, ReadingKind::Humidity] {
                self.prune(kind, now);
            }
            log::debug!(
                "[history] Loaded {} temperature and {} humidity readings",
                self.temperature.len(),
                self.humidity.len()
            );
        }
        Ok(())
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> ApiResult<()> {
        let data = Persisted {
            temperature: self.temperature.clone(),
            humidity: self.humidity.clone(),
        };
        store.store_as(Self::KEY, &data)
    }

    const fn list(&self, kind: ReadingKind) -> &Vec<Reading> {
        match kind {
            ReadingKind::Temperature => &self.temperature,
            ReadingKind::Humidity => &self.humidity,
        }
    }

    const fn list_mut(&mut self, kind: ReadingKind) -> &mut Vec<Reading> {
        match kind {
            ReadingKind::Temperature => &mut self.temperature,
            ReadingKind::Humidity => &mut self.humidity,
        }
    }

    #[must_use]
    pub fn readings(&self, kind: ReadingKind) -> &[Reading] {
        self.list(kind)
    }

    fn prune(&mut self, kind: ReadingKind, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        let max = self.max_readings;
        let list = self.list_mut(kind);
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        list.truncate(max);
        list.retain(|r| r.timestamp >= cutoff);
    }

    /// Record a reading, timestamped now unless given. Non-finite values are
    /// rejected. Returns whether the reading is still held after pruning.
    pub fn add_reading(
        &mut self,
        kind: ReadingKind,
        value: f64,
        entity_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        let now = Utc::now();
        self.add_reading_at(kind, value, entity_id, timestamp.unwrap_or(now), now)
    }

    pub fn add_reading_at(
        &mut self,
        kind: ReadingKind,
        value: f64,
        entity_id: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if !value.is_finite() {
            log::debug!("[history] Rejecting non-finite {kind:?} reading from {entity_id}");
            return false;
        }
        self.list_mut(kind).push(Reading {
            value,
            timestamp,
            entity_id: entity_id.to_string(),
        });
        self.prune(kind, now);
        self.list(kind)
            .iter()
            .any(|r| r.entity_id == entity_id && r.timestamp == timestamp)
    }

    #[must_use]
    pub fn average_at(&self, kind: ReadingKind, now: DateTime<Utc>) -> (f64, usize) {
        let cutoff = now - self.window;
        mean(self.list(kind).iter().filter(|r| r.timestamp >= cutoff))
    }

    /// Mean over the window, 0 when there is nothing to average.
    #[must_use]
    pub fn twelve_hour_average(&self, kind: ReadingKind) -> f64 {
        self.average_at(kind, Utc::now()).0
    }

    #[must_use]
    pub fn twelve_hour_averages(&self) -> Averages {
        let now = Utc::now();
        let (temperature, temperature_count) = self.average_at(ReadingKind::Temperature, now);
        let (humidity, humidity_count) = self.average_at(ReadingKind::Humidity, now);
        Averages {
            temperature,
            humidity,
            temperature_count,
            humidity_count,
        }
    }

    fn kind_of(&self, entity_id: &str, device_class: Option<&str>) -> Option<ReadingKind> {
        if let Some(kind) = device_class.and_then(ReadingKind::from_device_class) {
            return Some(kind);
        }
        if self.legacy_temperature.contains(entity_id) {
            Some(ReadingKind::Temperature)
        } else if self.legacy_humidity.contains(entity_id) {
            Some(ReadingKind::Humidity)
        } else {
            None
        }
    }

    fn record(&mut self, kind: ReadingKind, sensors: &EntityMap, entity_id: &str) -> bool {
        let Some(state) = sensors.get(entity_id).filter(|state| !state.is_seed()) else {
            return false;
        };
        let Some(value) = state.numeric_state() else {
            return false;
        };
        let key = (kind, entity_id.to_string());
        if self.last_seen.get(&key) == Some(&state.timestamp) {
            return false;
        }
        self.last_seen.insert(key, state.timestamp);
        self.add_reading(kind, value, entity_id, None)
    }

    /// Record the current value of every known temperature and humidity
    /// sensor in `sensors`.
    ///
    /// Configured sensors come first. Other entries are picked up by their
    /// `device_class`, then by the legacy id lists. No entity is recorded
    /// twice per call, and an unchanged state is not recorded again. Seed
    /// placeholders are never recorded.
    pub fn process_sensor_data(
        &mut self,
        sensors: &EntityMap,
        temperature_sensors: &[String],
        humidity_sensors: &[String],
    ) -> usize {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut recorded = 0;

        let configured = temperature_sensors
            .iter()
            .map(|id| (ReadingKind::Temperature, id))
            .chain(humidity_sensors.iter().map(|id| (ReadingKind::Humidity, id)));

        for (kind, id) in configured {
            let id = id.trim();
            if id.is_empty() || !seen.insert(id) {
                continue;
            }
            recorded += usize::from(self.record(kind, sensors, id));
        }

        for (id, state) in sensors {
            if seen.contains(id.as_str()) {
                continue;
            }
            if let Some(kind) = self.kind_of(id, state.device_class()) {
                seen.insert(id);
                recorded += usize::from(self.record(kind, sensors, id));
            }
        }

        if recorded > 0 {
            log::trace!("[history] Recorded {recorded} sensor readings");
        }
        recorded
    }
}
