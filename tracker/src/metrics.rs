use crate::errors::Result;
use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref UPDATES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tracker_updates_total",
        "Total update events received by the relay"
    ))
    .unwrap();
    pub static ref UPDATES_MERGED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tracker_updates_merged_total",
        "Total update events merged into a device"
    ))
    .unwrap();
    pub static ref UPDATES_UNKNOWN_DEVICE_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tracker_updates_unknown_device_total",
        "Total update events dropped because the device does not exist"
    ))
    .unwrap();
    pub static ref UPDATES_INVALID_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tracker_updates_invalid_total",
        "Total update events rejected by validation"
    ))
    .unwrap();
    pub static ref DEVICES: Gauge = Gauge::with_opts(Opts::new(
        "tracker_devices",
        "Number of devices in the registry"
    ))
    .unwrap();
    pub static ref SOS_ACTIVE_DEVICES: Gauge = Gauge::with_opts(Opts::new(
        "tracker_sos_active_devices",
        "Number of devices with SOS active"
    ))
    .unwrap();
}

pub fn init_metrics() -> Result<()> {
    REGISTRY.register(Box::new(UPDATES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPDATES_MERGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPDATES_UNKNOWN_DEVICE_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPDATES_INVALID_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICES.clone()))?;
    REGISTRY.register(Box::new(SOS_ACTIVE_DEVICES.clone()))?;
    Ok(())
}

/// Refreshes the registry-level gauges.
pub fn record_registry(devices: usize, sos_active: usize) {
    DEVICES.set(devices as f64);
    SOS_ACTIVE_DEVICES.set(sos_active as f64);
}

pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
