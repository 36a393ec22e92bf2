pub mod config;
pub mod feed;
pub mod seed;

pub use config::Config;
pub use feed::{FeedConfig, FeedHandle, UpdateFeed};
