use std::sync::Arc;

use hassdash_api::device::DeviceList;

use crate::error::{ApiError, ApiResult};
use crate::store::KeyValueStore;

/// Persisted device list. Devices are only ever re-pointed, never deleted.
pub struct DeviceStore {
    store: Arc<dyn KeyValueStore>,
}

impl DeviceStore {
    const KEY: &'static str = "devices";

    #[must_use]
    pub const fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored list, or the default list (which is then saved) on first run.
    pub fn load_or_init(&self) -> ApiResult<DeviceList> {
        if let Some(devices) = self.store.load_as::<DeviceList>(Self::KEY)? {
            return Ok(devices);
        }
        log::info!("[devices] No device list stored, creating default list");
        let devices = DeviceList::default();
        self.save(&devices)?;
        Ok(devices)
    }

    pub fn save(&self, devices: &DeviceList) -> ApiResult<()> {
        self.store.store_as(Self::KEY, devices)
    }

    /// Point `device_id` at `entity`. An empty entity marks the device as
    /// unconfigured.
    pub fn update_entity(&self, device_id: &str, entity: &str) -> ApiResult<DeviceList> {
        let mut devices = self.load_or_init()?;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| ApiError::service_error(format!("No such device: {device_id}")))?;
        device.entity = entity.trim().to_string();
        log::info!("[devices] {device_id} now tracks {:?}", device.entity);
        self.save(&devices)?;
        Ok(devices)
    }
}
