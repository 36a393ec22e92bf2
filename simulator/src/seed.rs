use chrono::{DateTime, Utc};
use tracker::{Device, Position};

pub fn demo_devices(at: DateTime<Utc>) -> Vec<Device> {
    vec![
        Device::new(
            "356938035643809",
            "Daughter",
            "+27821234567",
            Position::new(-26.2041, 28.0473),
            at,
        ),
        Device::new(
            "356938035643817",
            "Son",
            "+27827654321",
            Position::new(-33.9249, 18.4241),
            at,
        ),
    ]
}

/// Feed starting points for the given devices.
pub fn origins(devices: &[Device]) -> Vec<(String, Position)> {
    devices
        .iter()
        .map(|device| (device.id().to_string(), device.position))
        .collect()
}
