use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{Domain, EntityState};

pub type EntityMap = BTreeMap<String, EntityState>;

/// One of the four snapshot partitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    BinarySensor,
    Climate,
    Light,
    Sensor,
}

impl Bucket {
    pub const ALL: [Self; 4] = [Self::BinarySensor, Self::Climate, Self::Light, Self::Sensor];

    /// Partition an entity belongs to, decided by its id prefix alone.
    #[must_use]
    pub fn for_entity(entity_id: &str) -> Option<Self> {
        match Domain::of(entity_id) {
            Domain::BinarySensor => Some(Self::BinarySensor),
            Domain::Climate => Some(Self::Climate),
            Domain::Light => Some(Self::Light),
            Domain::Sensor => Some(Self::Sensor),
            _ => None,
        }
    }
}

/// Immutable view of every tracked entity, partitioned by domain.
///
/// Updates never touch a published snapshot: they build a new one (see
/// [`Snapshot::with_entity`] and [`Snapshot::with_patch`]) which is then
/// swapped in wholesale.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub binary_sensor_data: EntityMap,
    #[serde(default)]
    pub climate_data: EntityMap,
    #[serde(default)]
    pub light_data: EntityMap,
    #[serde(default)]
    pub sensor_data: EntityMap,
}

impl Snapshot {
    #[must_use]
    pub const fn bucket(&self, bucket: Bucket) -> &EntityMap {
        match bucket {
            Bucket::BinarySensor => &self.binary_sensor_data,
            Bucket::Climate => &self.climate_data,
            Bucket::Light => &self.light_data,
            Bucket::Sensor => &self.sensor_data,
        }
    }

    pub const fn bucket_mut(&mut self, bucket: Bucket) -> &mut EntityMap {
        match bucket {
            Bucket::BinarySensor => &mut self.binary_sensor_data,
            Bucket::Climate => &mut self.climate_data,
            Bucket::Light => &mut self.light_data,
            Bucket::Sensor => &mut self.sensor_data,
        }
    }

    /// Look an entity up in whichever partition holds it.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        Bucket::ALL
            .iter()
            .find_map(|bucket| self.bucket(*bucket).get(entity_id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        Bucket::ALL.iter().map(|b| self.bucket(*b).len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records that are still seed placeholders.
    #[must_use]
    pub fn seed_count(&self) -> usize {
        Bucket::ALL
            .iter()
            .flat_map(|b| self.bucket(*b).values())
            .filter(|state| state.is_seed())
            .count()
    }

    /// Insert `state` into `bucket`, replacing any previous record for the
    /// same id in every partition.
    pub fn insert(&mut self, bucket: Bucket, state: EntityState) {
        for other in Bucket::ALL {
            if other != bucket {
                self.bucket_mut(other).remove(&state.entity_id);
            }
        }
        self.bucket_mut(bucket)
            .insert(state.entity_id.clone(), state);
    }

    /// New snapshot with one entity replaced. Every other record is shared
    /// unchanged.
    #[must_use]
    pub fn with_entity(&self, bucket: Bucket, state: EntityState) -> Self {
        let mut next = self.clone();
        next.insert(bucket, state);
        next
    }

    /// New snapshot where each partition present in `patch` is replaced by
    /// the patch contents. Partitions the patch has no data for are kept.
    #[must_use]
    pub fn with_patch(&self, patch: SnapshotPatch) -> Self {
        let mut next = self.clone();
        for (bucket, entities) in patch.buckets {
            if entities.is_empty() {
                continue;
            }
            for other in Bucket::ALL {
                if other != bucket {
                    let map = next.bucket_mut(other);
                    map.retain(|id, _| !entities.contains_key(id));
                }
            }
            *next.bucket_mut(bucket) = entities;
        }
        next
    }
}

/// Partial snapshot produced by a bulk fetch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotPatch {
    buckets: BTreeMap<Bucket, EntityMap>,
}

impl SnapshotPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket `state` by its prefix. Returns `false` (and drops the state)
    /// for ids outside the four partitions.
    pub fn push(&mut self, state: EntityState) -> bool {
        let Some(bucket) = Bucket::for_entity(&state.entity_id) else {
            return false;
        };
        self.buckets
            .entry(bucket)
            .or_default()
            .insert(state.entity_id.clone(), state);
        true
    }

    #[must_use]
    pub fn bucket(&self, bucket: Bucket) -> Option<&EntityMap> {
        self.buckets.get(&bucket)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<EntityState> for SnapshotPatch {
    fn from_iter<T: IntoIterator<Item = EntityState>>(iter: T) -> Self {
        let mut patch = Self::new();
        for state in iter {
            patch.push(state);
        }
        patch
    }
}
