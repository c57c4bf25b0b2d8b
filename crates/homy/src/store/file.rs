use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::debug;
use tracing::info;

use super::Device;
use super::DeviceId;
use super::Devices;
use super::MetadataEdits;
use super::Store;
use super::StoreError;

/// Store persisted as a JSON document on disk.
///
/// Every mutation is applied to a copy of the current snapshot, written to a sibling
/// temp file and renamed into place. The in-memory view only changes once the write
/// succeeded, so a failed write leaves both disk and memory at the previous state.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    devices: Mutex<Devices>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing contents if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let devices = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).map_err(|e| StoreError::Io(path.clone(), e))?;
            let list: Vec<Device> =
                serde_json::from_str(&contents).map_err(|e| StoreError::Serde(path.clone(), e))?;
            info!("Loaded {} device(s) from {}", list.len(), path.display());
            list.into_iter().map(|d| (d.id, d)).collect()
        } else {
            info!("Store file {} not found, starting empty", path.display());
            Devices::new()
        };

        Ok(Self {
            path,
            devices: Mutex::new(devices),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Devices>, StoreError> {
        self.devices.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` against a copy of the snapshot and persist it before swapping it in.
    fn transact<T>(
        &self,
        f: impl FnOnce(&mut Devices) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.write(&next)?;
        *guard = next;
        Ok(out)
    }

    fn write(&self, devices: &Devices) -> Result<(), StoreError> {
        let list = super::sorted_devices(devices);
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| StoreError::Serde(self.path.clone(), e))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::Io(tmp.clone(), e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::Io(self.path.clone(), e))?;

        debug!("Wrote {} device(s) to {}", list.len(), self.path.display());
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn create_device(&self, name: &str, address: &str) -> Result<DeviceId, StoreError> {
        self.transact(|devices| Ok(super::create_device(devices, name, address)))
    }

    fn create_device_with_entities(
        &self,
        name: &str,
        address: &str,
        internal_names: &[String],
    ) -> Result<DeviceId, StoreError> {
        self.transact(|devices| {
            Ok(super::create_device_with_entities(
                devices,
                name,
                address,
                internal_names,
            ))
        })
    }

    fn add_entities(&self, device: DeviceId, internal_names: &[String]) -> Result<(), StoreError> {
        self.transact(|devices| super::add_entities(devices, device, internal_names))
    }

    fn commit_entity_metadata(
        &self,
        device: DeviceId,
        edits: &MetadataEdits,
    ) -> Result<(), StoreError> {
        self.transact(|devices| super::commit_entity_metadata(devices, device, edits))
    }

    fn device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    fn devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(super::sorted_devices(&*self.lock()?))
    }

    fn delete_device(&self, id: DeviceId) -> Result<(), StoreError> {
        self.transact(|devices| super::delete_device(devices, id))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::EntityMetadata;

    #[test]
    fn test_reopen_preserves_devices_and_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("homy.json");

        let id = {
            let store = JsonFileStore::open(&path).unwrap();
            let id = store.create_device("Weather station", "station.local").unwrap();
            store
                .add_entities(id, &["temp".to_string(), "wind".to_string()])
                .unwrap();

            let mut edits = MetadataEdits::new();
            edits.insert(
                "wind".to_string(),
                EntityMetadata {
                    display_name: "Wind speed".to_string(),
                    unit: "m/s".to_string(),
                    icon: "wind".to_string(),
                },
            );
            store.commit_entity_metadata(id, &edits).unwrap();
            id
        };

        let reopened = JsonFileStore::open(&path).unwrap();
        let device = reopened.device(id).unwrap().unwrap();
        assert_eq!(device.name, "Weather station");
        assert_eq!(device.entities.len(), 2);
        assert_eq!(device.entity("wind").unwrap().unit, "m/s");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_failed_commit_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("homy.json");

        let store = JsonFileStore::open(&path).unwrap();
        let id = store.create_device("Sensor", "10.0.0.5").unwrap();
        store.add_entities(id, &["temp".to_string()]).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let mut edits = MetadataEdits::new();
        edits.insert("missing".to_string(), EntityMetadata::default());
        assert!(store.commit_entity_metadata(id, &edits).is_err());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_failed_write_stores_nothing() {
        let temp_dir = TempDir::new().unwrap();
        // the parent directory does not exist, so every write fails
        let path = temp_dir.path().join("missing").join("homy.json");

        let store = JsonFileStore::open(&path).unwrap();
        let err = store
            .create_device_with_entities("Sensor", "10.0.0.5", &["temp".to_string()])
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(..)));
        assert!(store.devices().unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("homy.json");
        std::fs::write(&path, "not json").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serde(..)));
    }
}
