use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;

/// Maximum number of past positions kept per device.
pub const TRAIL_CAPACITY: usize = 100;

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One tracked unit.
///
/// The identifier is fixed at construction. The trail is only reachable
/// through [`Device::trail`] and [`Device::push_trail`], which keeps it
/// bounded by [`TRAIL_CAPACITY`].
#[derive(Debug, Clone)]
pub struct Device {
    id: String,
    pub name: String,
    pub phone: String,
    pub position: Position,
    pub online: bool,
    pub sos_active: bool,
    pub battery: Option<u8>,
    pub last_update: DateTime<Utc>,
    trail: VecDeque<Position>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
        position: Position,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: phone.into(),
            position,
            online: true,
            sos_active: false,
            battery: None,
            last_update,
            trail: VecDeque::with_capacity(TRAIL_CAPACITY),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Past positions, oldest first.
    pub fn trail(&self) -> impl ExactSizeIterator<Item = &Position> + '_ {
        self.trail.iter()
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    /// Appends a position, evicting from the front once over capacity.
    pub fn push_trail(&mut self, position: Position) {
        self.trail.push_back(position);
        while self.trail.len() > TRAIL_CAPACITY {
            self.trail.pop_front();
        }
    }

    pub fn view(&self) -> DeviceView {
        DeviceView {
            id: self.id.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            position: self.position,
            online: self.online,
            sos_active: self.sos_active,
            battery: self.battery,
            last_update: self.last_update,
            trail: self.trail.iter().copied().collect(),
        }
    }
}

/// Serializable snapshot of a [`Device`] handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub position: Position,
    pub online: bool,
    pub sos_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    pub last_update: DateTime<Utc>,
    pub trail: Vec<Position>,
}

/// Request body for adding a device
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub position: Position,
    #[serde(default = "default_online")]
    pub online: bool,
    #[serde(default)]
    pub battery: Option<u8>,
}

fn default_online() -> bool {
    true
}

impl NewDevice {
    pub fn into_device(self, at: DateTime<Utc>) -> Device {
        let mut device = Device::new(self.id, self.name, self.phone, self.position, at);
        device.online = self.online;
        device.battery = self.battery;
        device
    }
}

/// A field of an update: either left as is or replaced.
///
/// On the wire a missing or `null` field means `Keep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// Writes the value into `slot` if set; returns whether it did.
    pub fn apply_to(self, slot: &mut T) -> bool {
        match self {
            Patch::Keep => false,
            Patch::Set(value) => {
                *slot = value;
                true
            }
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Patch::Set(value),
            None => Patch::Keep,
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Patch::Keep => serializer.serialize_none(),
            Patch::Set(value) => serializer.serialize_some(value),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}

/// Partial, timestamped observation about one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub position: Patch<Position>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub online: Patch<bool>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub sos_active: Patch<bool>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub name: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub phone: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub battery: Patch<u8>,
    pub timestamp: DateTime<Utc>,
}

impl UpdateEvent {
    /// An event that changes nothing but the timestamp.
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            position: Patch::Keep,
            online: Patch::Keep,
            sos_active: Patch::Keep,
            name: Patch::Keep,
            phone: Patch::Keep,
            battery: Patch::Keep,
            timestamp,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Patch::Set(position);
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = Patch::Set(online);
        self
    }

    pub fn with_sos(mut self, sos_active: bool) -> Self {
        self.sos_active = Patch::Set(sos_active);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Patch::Set(name.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Patch::Set(phone.into());
        self
    }

    pub fn with_battery(mut self, battery: u8) -> Self {
        self.battery = Patch::Set(battery);
        self
    }
}
