use crate::feed::FeedConfig;
use clap::Parser;
use std::time::Duration;

/// Runtime options; each one can also be set through its environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "simulator", about = "Simulated device tracker with SOS alerts")]
pub struct Config {
    /// Seed for the simulated update feed
    #[arg(long, env = "FEED_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Milliseconds between emitted updates
    #[arg(long, env = "FEED_INTERVAL_MS", default_value_t = 2000)]
    pub interval_ms: u64,

    /// Chance that an update also sets or clears SOS
    #[arg(long, env = "SOS_PROBABILITY", default_value_t = 0.05)]
    pub sos_probability: f64,

    /// Largest per-axis step in degrees
    #[arg(long, env = "MAX_OFFSET_DEG", default_value_t = 0.0015)]
    pub max_offset_deg: f64,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// Capacity of the channel between the feed and the registry
    #[arg(
        long,
        env = "CHANNEL_CAPACITY",
        default_value_t = 1024,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub channel_capacity: usize,
}

impl Config {
    pub fn feed(&self) -> FeedConfig {
        FeedConfig {
            seed: self.seed,
            interval: Duration::from_millis(self.interval_ms),
            max_offset_deg: self.max_offset_deg,
            sos_probability: self.sos_probability,
        }
    }
}
