pub mod hass;
pub mod proxy;

use async_trait::async_trait;

use hassdash_api::entity::EntityState;
use hassdash_api::snapshot::SnapshotPatch;

/// Pull-side access to entity states.
///
/// Implementations never fail towards the caller. Anything that goes wrong
/// is logged, and reported as missing data.
#[async_trait]
pub trait StateSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_entity(&self, entity_id: &str) -> Option<EntityState>;

    async fn fetch_configured(&self, entity_ids: &[String]) -> SnapshotPatch;
}
