use crate::model::{Device, Patch, UpdateEvent};
use crate::notify::{ChangeNotifier, StateChange, Subscription};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of merging an update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// No device with that id; the event was dropped.
    UnknownDevice,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    device: Device,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Slot>,
    selected: Option<String>,
    next_seq: u64,
    notifier: ChangeNotifier,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    /// Inserts or replaces a device. Selects it if nothing is selected.
    pub fn add_device(&mut self, device: Device) {
        let id = device.id().to_string();

        match self.devices.get_mut(&id) {
            Some(slot) => {
                debug!(device_id = %id, "Replacing existing device");
                slot.device = device;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.devices.insert(id.clone(), Slot { seq, device });
            }
        }

        if self.selected.is_none() {
            self.selected = Some(id.clone());
        }

        info!(device_id = %id, devices = self.devices.len(), "Device added");
        self.notifier.notify(StateChange::DeviceAdded(id));
    }

    /// Deletes a device. Unknown ids are ignored.
    pub fn remove_device(&mut self, id: &str) {
        if self.devices.remove(id).is_none() {
            debug!(device_id = %id, "Remove ignored for unknown device");
            return;
        }

        if self.selected.as_deref() == Some(id) {
            self.selected = self.list_devices().first().map(|d| d.id().to_string());
            debug!(selected = ?self.selected, "Selection reassigned after removal");
        }

        info!(device_id = %id, devices = self.devices.len(), "Device removed");
        self.notifier.notify(StateChange::DeviceRemoved(id.to_string()));
    }

    /// Selects a device. Unknown ids are ignored.
    pub fn select_device(&mut self, id: &str) {
        if !self.devices.contains_key(id) {
            debug!(device_id = %id, "Select ignored for unknown device");
            return;
        }

        self.selected = Some(id.to_string());
        self.notifier
            .notify(StateChange::SelectionChanged(self.selected.clone()));
    }

    /// Merges an update into the addressed device.
    ///
    /// Absent fields leave the device untouched. A position becomes the
    /// current position and is appended to the trail. The timestamp is
    /// always taken from the event, even if older than the stored one.
    pub fn apply_update(&mut self, event: &UpdateEvent) -> MergeOutcome {
        let Some(slot) = self.devices.get_mut(&event.id) else {
            return MergeOutcome::UnknownDevice;
        };
        let device = &mut slot.device;

        if event.timestamp < device.last_update {
            debug!(
                device_id = %event.id,
                last_update = %device.last_update,
                timestamp = %event.timestamp,
                "Applying out-of-order update"
            );
        }

        let was_sos = device.sos_active;

        event.name.clone().apply_to(&mut device.name);
        event.phone.clone().apply_to(&mut device.phone);
        event.online.apply_to(&mut device.online);
        event.sos_active.apply_to(&mut device.sos_active);
        if let Patch::Set(battery) = event.battery {
            device.battery = Some(battery);
        }
        if event.position.apply_to(&mut device.position) {
            device.push_trail(device.position);
        }
        device.last_update = event.timestamp;

        match (was_sos, device.sos_active) {
            (false, true) => warn!(device_id = %event.id, name = %device.name, "SOS raised"),
            (true, false) => info!(device_id = %event.id, name = %device.name, "SOS cleared"),
            _ => {}
        }

        self.notifier
            .notify(StateChange::DeviceUpdated(event.id.clone()));
        MergeOutcome::Merged
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id).map(|slot| &slot.device)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected(&self) -> Option<&Device> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    /// All devices by case-insensitive name, then insertion order.
    pub fn list_devices(&self) -> Vec<&Device> {
        let mut slots: Vec<&Slot> = self.devices.values().collect();
        slots.sort_by(|a, b| {
            a.device
                .name
                .to_lowercase()
                .cmp(&b.device.name.to_lowercase())
                .then(a.seq.cmp(&b.seq))
        });
        slots.into_iter().map(|slot| &slot.device).collect()
    }

    pub fn any_sos_active(&self) -> bool {
        self.devices.values().any(|slot| slot.device.sos_active)
    }

    /// Devices with SOS active, in list order.
    pub fn sos_devices(&self) -> Vec<&Device> {
        self.list_devices()
            .into_iter()
            .filter(|device| device.sos_active)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
