//! Device tracking core: canonical per-device state, merging of partial
//! update events, trail history and SOS alert derivation.

pub mod errors;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod registry;
pub mod relay;
pub mod rest;
pub mod validate;

pub use errors::{Error, Result};
pub use model::{Device, DeviceView, Patch, Position, UpdateEvent, TRAIL_CAPACITY};
pub use notify::{StateChange, Subscription};
pub use registry::{DeviceRegistry, MergeOutcome};
pub use relay::{Relay, RelayHandle, RelayStats, SharedRegistry};
