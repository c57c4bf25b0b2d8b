//! Persisted device/entity model.
//!
//! Discovery creates devices and their entities; the metadata editing step is the only
//! other writer. Both back-ends share the mutation logic in this module so they agree on
//! idempotence and atomicity.

mod device;
mod file;
mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;

pub use device::Device;
pub use device::DeviceId;
pub use device::Entity;
pub use device::EntityMetadata;
pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Metadata edits keyed by entity internal name.
pub type MetadataEdits = BTreeMap<String, EntityMetadata>;

type Devices = BTreeMap<DeviceId, Device>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Device {device} has no entity named '{internal_name}'")]
    UnknownEntity {
        device: DeviceId,
        internal_name: String,
    },

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Failed to access store file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to (de)serialize store file {0}: {1}")]
    Serde(PathBuf, #[source] serde_json::Error),
}

/// Device/entity persistence used by discovery and onboarding.
pub trait Store: Send + Sync {
    /// Create a device with no entities.
    fn create_device(&self, name: &str, address: &str) -> Result<DeviceId, StoreError>;

    /// Create a device already holding entities with empty metadata, in one write.
    ///
    /// On error nothing is stored.
    fn create_device_with_entities(
        &self,
        name: &str,
        address: &str,
        internal_names: &[String],
    ) -> Result<DeviceId, StoreError>;

    /// Append entities with empty metadata. Names already present are skipped.
    fn add_entities(&self, device: DeviceId, internal_names: &[String]) -> Result<(), StoreError>;

    /// Apply metadata edits to existing entities.
    ///
    /// Either every edit is applied or, if any names an unknown entity, none is.
    fn commit_entity_metadata(
        &self,
        device: DeviceId,
        edits: &MetadataEdits,
    ) -> Result<(), StoreError>;

    fn device(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;

    /// All devices, oldest first.
    fn devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Remove a device together with all of its entities.
    fn delete_device(&self, id: DeviceId) -> Result<(), StoreError>;
}

fn create_device(devices: &mut Devices, name: &str, address: &str) -> DeviceId {
    let device = Device::new(name, address);
    let id = device.id;
    devices.insert(id, device);
    id
}

fn create_device_with_entities(
    devices: &mut Devices,
    name: &str,
    address: &str,
    internal_names: &[String],
) -> DeviceId {
    let mut device = Device::new(name, address);
    for internal_name in internal_names {
        device.add_entity(internal_name);
    }
    let id = device.id;
    devices.insert(id, device);
    id
}

fn add_entities(
    devices: &mut Devices,
    id: DeviceId,
    internal_names: &[String],
) -> Result<(), StoreError> {
    let device = devices.get_mut(&id).ok_or(StoreError::UnknownDevice(id))?;
    for name in internal_names {
        device.add_entity(name);
    }
    Ok(())
}

fn commit_entity_metadata(
    devices: &mut Devices,
    id: DeviceId,
    edits: &MetadataEdits,
) -> Result<(), StoreError> {
    let device = devices.get_mut(&id).ok_or(StoreError::UnknownDevice(id))?;

    if let Some(missing) = edits.keys().find(|name| device.entity(name).is_none()) {
        return Err(StoreError::UnknownEntity {
            device: id,
            internal_name: missing.clone(),
        });
    }

    for (name, metadata) in edits {
        if let Some(entity) = device.entity_mut(name) {
            entity.apply(metadata);
        }
    }
    Ok(())
}

fn delete_device(devices: &mut Devices, id: DeviceId) -> Result<(), StoreError> {
    devices
        .remove(&id)
        .map(|_| ())
        .ok_or(StoreError::UnknownDevice(id))
}

fn sorted_devices(devices: &Devices) -> Vec<Device> {
    let mut all: Vec<Device> = devices.values().cloned().collect();
    all.sort_by_key(|d| d.created_at);
    all
}
