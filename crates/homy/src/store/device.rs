use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Stable identifier of a persisted device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A device added during onboarding.
///
/// The device exclusively owns its entities: removing the device removes them too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub entities: Vec<Entity>,
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(),
            name: name.into(),
            address: address.into(),
            created_at: Utc::now(),
            entities: Vec::new(),
        }
    }

    /// Append an entity with empty metadata.
    ///
    /// Returns false if an entity with the same internal name already exists.
    pub fn add_entity(&mut self, internal_name: &str) -> bool {
        if self.entity(internal_name).is_some() {
            return false;
        }
        self.entities.push(Entity::new(self.id, internal_name));
        true
    }

    pub fn entity(&self, internal_name: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.internal_name == internal_name)
    }

    pub fn entity_mut(&mut self, internal_name: &str) -> Option<&mut Entity> {
        self.entities
            .iter_mut()
            .find(|e| e.internal_name == internal_name)
    }
}

/// A named data point exposed by a device, e.g. a sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Owning device (lookup only)
    pub device: DeviceId,

    /// Raw key reported by the device
    pub internal_name: String,

    pub display_name: String,
    pub unit: String,
    pub icon: String,
}

impl Entity {
    pub fn new(device: DeviceId, internal_name: impl Into<String>) -> Self {
        Self {
            device,
            internal_name: internal_name.into(),
            display_name: String::new(),
            unit: String::new(),
            icon: String::new(),
        }
    }

    pub fn apply(&mut self, metadata: &EntityMetadata) {
        self.display_name = metadata.display_name.clone();
        self.unit = metadata.unit.clone();
        self.icon = metadata.icon.clone();
    }

    pub fn metadata(&self) -> EntityMetadata {
        EntityMetadata {
            display_name: self.display_name.clone(),
            unit: self.unit.clone(),
            icon: self.icon.clone(),
        }
    }
}

/// User-editable fields of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub icon: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_entity_is_idempotent() {
        let mut device = Device::new("Living room", "192.168.1.42");
        assert!(device.add_entity("temp"));
        assert!(!device.add_entity("temp"));
        assert!(device.add_entity("humidity"));

        assert_eq!(device.entities.len(), 2);
        let temp = device.entity("temp").unwrap();
        assert_eq!(temp.device, device.id);
        assert_eq!(temp.metadata(), EntityMetadata::default());
    }

    #[test]
    fn test_device_id_round_trips_through_display() {
        let id = DeviceId::new();
        let parsed: DeviceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
