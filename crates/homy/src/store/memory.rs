use std::sync::Mutex;
use std::sync::MutexGuard;

use super::Device;
use super::DeviceId;
use super::Devices;
use super::MetadataEdits;
use super::Store;
use super::StoreError;

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: Mutex<Devices>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Devices>, StoreError> {
        self.devices.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemoryStore {
    fn create_device(&self, name: &str, address: &str) -> Result<DeviceId, StoreError> {
        Ok(super::create_device(&mut *self.lock()?, name, address))
    }

    fn create_device_with_entities(
        &self,
        name: &str,
        address: &str,
        internal_names: &[String],
    ) -> Result<DeviceId, StoreError> {
        Ok(super::create_device_with_entities(
            &mut *self.lock()?,
            name,
            address,
            internal_names,
        ))
    }

    fn add_entities(&self, device: DeviceId, internal_names: &[String]) -> Result<(), StoreError> {
        super::add_entities(&mut *self.lock()?, device, internal_names)
    }

    fn commit_entity_metadata(
        &self,
        device: DeviceId,
        edits: &MetadataEdits,
    ) -> Result<(), StoreError> {
        super::commit_entity_metadata(&mut *self.lock()?, device, edits)
    }

    fn device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    fn devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(super::sorted_devices(&*self.lock()?))
    }

    fn delete_device(&self, id: DeviceId) -> Result<(), StoreError> {
        super::delete_device(&mut *self.lock()?, id)
    }
}
