use crate::errors::{Error, Result};
use crate::model::{Device, Patch, Position, UpdateEvent};

const LATITUDE_MIN: f64 = -90.0;
const LATITUDE_MAX: f64 = 90.0;
const LONGITUDE_MIN: f64 = -180.0;
const LONGITUDE_MAX: f64 = 180.0;
const BATTERY_MAX: u8 = 100;

/// Validates a device before it is added to the registry
pub fn validate_device(device: &Device) -> Result<()> {
    validate_id(device.id())?;
    validate_name(&device.name)?;
    validate_position(&device.position)?;
    if let Some(battery) = device.battery {
        validate_battery(battery)?;
    }
    Ok(())
}

/// Parses and validates an update event from a JSON payload
pub fn parse_update(payload: &[u8]) -> Result<UpdateEvent> {
    let event = serde_json::from_slice::<UpdateEvent>(payload)?;
    validate_update(&event)?;
    Ok(event)
}

/// Validates an update event arriving from an untrusted transport
pub fn validate_update(event: &UpdateEvent) -> Result<()> {
    validate_id(&event.id)?;

    if let Patch::Set(position) = &event.position {
        validate_position(position)?;
    }
    if let Patch::Set(name) = &event.name {
        validate_name(name)?;
    }
    if let Patch::Set(battery) = event.battery {
        validate_battery(battery)?;
    }

    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Validation("Device ID cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("Device name cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_position(position: &Position) -> Result<()> {
    if !position.latitude.is_finite()
        || position.latitude < LATITUDE_MIN
        || position.latitude > LATITUDE_MAX
    {
        return Err(Error::Validation(format!(
            "Latitude {} out of range [{}, {}]",
            position.latitude, LATITUDE_MIN, LATITUDE_MAX
        )));
    }

    if !position.longitude.is_finite()
        || position.longitude < LONGITUDE_MIN
        || position.longitude > LONGITUDE_MAX
    {
        return Err(Error::Validation(format!(
            "Longitude {} out of range [{}, {}]",
            position.longitude, LONGITUDE_MIN, LONGITUDE_MAX
        )));
    }

    Ok(())
}

fn validate_battery(battery: u8) -> Result<()> {
    if battery > BATTERY_MAX {
        return Err(Error::Validation(format!(
            "Battery {} out of range [0, {}]",
            battery, BATTERY_MAX
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_valid_update() {
        let event = UpdateEvent::new("dev-1", Utc::now())
            .with_position(Position::new(-26.2041, 28.0473))
            .with_battery(80);

        assert!(validate_update(&event).is_ok());
    }

    #[test]
    fn test_empty_update_is_valid() {
        let event = UpdateEvent::new("dev-1", Utc::now());

        assert!(validate_update(&event).is_ok());
    }

    #[test]
    fn test_invalid_latitude() {
        let event = UpdateEvent::new("dev-1", Utc::now()).with_position(Position::new(91.0, 0.0));

        assert!(validate_update(&event).is_err());
    }

    #[test]
    fn test_invalid_longitude() {
        let event =
            UpdateEvent::new("dev-1", Utc::now()).with_position(Position::new(0.0, -180.5));

        assert!(validate_update(&event).is_err());
    }

    #[test]
    fn test_nan_position() {
        let event =
            UpdateEvent::new("dev-1", Utc::now()).with_position(Position::new(f64::NAN, 0.0));

        assert!(validate_update(&event).is_err());
    }

    #[test]
    fn test_invalid_battery() {
        let event = UpdateEvent::new("dev-1", Utc::now()).with_battery(150);

        assert!(validate_update(&event).is_err());
    }

    #[test]
    fn test_empty_device_id() {
        let event = UpdateEvent::new("", Utc::now());

        assert!(validate_update(&event).is_err());
    }

    #[test]
    fn test_parse_update() {
        let payload = br#"{
            "id": "dev-1",
            "position": {"latitude": 1.5, "longitude": 2.5},
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;
        let event = parse_update(payload).unwrap();
        assert_eq!(event.position, Patch::Set(Position::new(1.5, 2.5)));

        assert!(matches!(parse_update(b"invalid json"), Err(Error::Json(_))));

        let out_of_range = br#"{
            "id": "dev-1",
            "position": {"latitude": 99.0, "longitude": 0.0},
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;
        assert!(matches!(parse_update(out_of_range), Err(Error::Validation(_))));
    }

    #[test]
    fn test_blank_name_rejected() {
        let event = UpdateEvent::new("dev-1", Utc::now()).with_name("  ");
        assert!(validate_update(&event).is_err());

        let device = Device::new("dev-1", "", "+27820000001", Position::new(0.0, 0.0), Utc::now());
        assert!(validate_device(&device).is_err());
    }
}
