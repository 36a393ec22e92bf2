use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use tracker::{Error, Position, Result, UpdateEvent};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
/// About 150 m of latitude.
pub const DEFAULT_MAX_OFFSET_DEG: f64 = 0.0015;
pub const DEFAULT_SOS_PROBABILITY: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub seed: u64,
    pub interval: Duration,
    pub max_offset_deg: f64,
    pub sos_probability: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            interval: DEFAULT_INTERVAL,
            max_offset_deg: DEFAULT_MAX_OFFSET_DEG,
            sos_probability: DEFAULT_SOS_PROBABILITY,
        }
    }
}

#[derive(Debug)]
struct Track {
    id: String,
    last: Position,
}

#[derive(Debug)]
pub struct UpdateFeed {
    config: FeedConfig,
    rng: StdRng,
    tracks: Vec<Track>,
}

impl UpdateFeed {
    /// Builds a feed over the given devices and their starting positions.
    pub fn new(config: FeedConfig, origins: Vec<(String, Position)>) -> Result<Self> {
        if origins.is_empty() {
            return Err(Error::Validation(
                "Update feed needs at least one device".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.sos_probability) {
            return Err(Error::Validation(format!(
                "SOS probability {} out of range [0, 1]",
                config.sos_probability
            )));
        }
        if !config.max_offset_deg.is_finite() || config.max_offset_deg < 0.0 {
            return Err(Error::Validation(format!(
                "Max offset {} must be a non-negative number of degrees",
                config.max_offset_deg
            )));
        }
        if config.interval.is_zero() {
            return Err(Error::Validation("Feed interval must be positive".to_string()));
        }

        let tracks = origins
            .into_iter()
            .map(|(id, last)| Track { id, last })
            .collect();

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            tracks,
        })
    }

    /// Produces the next event, stamped with `at`.
    pub fn next_event(&mut self, at: DateTime<Utc>) -> UpdateEvent {
        let index = self.rng.gen_range(0..self.tracks.len());
        let offset = self.config.max_offset_deg;

        let (d_lat, d_lon) = if offset > 0.0 {
            (
                self.rng.gen_range(-offset..=offset),
                self.rng.gen_range(-offset..=offset),
            )
        } else {
            (0.0, 0.0)
        };

        let sos = if self.rng.gen_bool(self.config.sos_probability) {
            Some(self.rng.gen_bool(0.5))
        } else {
            None
        };

        let track = &mut self.tracks[index];
        track.last = Position::new(
            (track.last.latitude + d_lat).clamp(-90.0, 90.0),
            (track.last.longitude + d_lon).clamp(-180.0, 180.0),
        );

        let mut event = UpdateEvent::new(track.id.clone(), at).with_position(track.last);
        if let Some(sos) = sos {
            event = event.with_sos(sos);
        }
        event
    }

    /// Starts emitting on a timer. The first event is sent one interval
    /// after the call.
    pub fn spawn(self, tx: mpsc::Sender<UpdateEvent>) -> FeedHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_feed(self, tx, shutdown_rx));

        FeedHandle {
            shutdown_tx,
            handle: Some(handle),
            emitted: 0,
        }
    }
}

/// Infinite; each event is stamped with the current time.
impl Iterator for UpdateFeed {
    type Item = UpdateEvent;

    fn next(&mut self) -> Option<UpdateEvent> {
        Some(self.next_event(Utc::now()))
    }
}

pub struct FeedHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<u64>>,
    emitted: u64,
}

impl FeedHandle {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the timer and waits for the task. Safe to call repeatedly;
    /// no event is pushed after this returns. Returns the number of
    /// events emitted.
    pub async fn stop(&mut self) -> u64 {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(true);
            match handle.await {
                Ok(emitted) => self.emitted = emitted,
                Err(e) => error!("Feed task failed: {}", e),
            }
            info!(emitted = self.emitted, "Update feed stopped");
        }
        self.emitted
    }
}

async fn run_feed(
    mut feed: UpdateFeed,
    tx: mpsc::Sender<UpdateEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let period = feed.config.interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut emitted = 0u64;

    info!(
        seed = feed.config.seed,
        interval_ms = period.as_millis() as u64,
        devices = feed.tracks.len(),
        "Update feed started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!("Feed received shutdown signal");
                break;
            }

            _ = ticker.tick() => {
                let event = feed.next_event(Utc::now());
                match serde_json::to_string(&event) {
                    Ok(payload) => trace!(%payload, "Emitting update"),
                    Err(e) => warn!("Failed to serialize update: {}", e),
                }

                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        debug!("Feed stopped while waiting for capacity");
                        break;
                    }

                    sent = tx.send(event) => {
                        if sent.is_err() {
                            info!("Update receiver dropped, stopping feed");
                            break;
                        }
                        emitted += 1;
                    }
                }
            }
        }
    }

    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracker::Patch;

    fn origins() -> Vec<(String, Position)> {
        vec![
            ("A".to_string(), Position::new(-26.2041, 28.0473)),
            ("B".to_string(), Position::new(-33.9249, 18.4241)),
        ]
    }

    fn tuples(feed: &mut UpdateFeed, k: usize) -> Vec<(String, Position, Patch<bool>)> {
        let at = Utc::now();
        (0..k)
            .map(|_| {
                let event = feed.next_event(at);
                let position = match event.position {
                    Patch::Set(p) => p,
                    Patch::Keep => panic!("feed events always carry a position"),
                };
                (event.id, position, event.sos_active)
            })
            .collect()
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let config = FeedConfig {
            seed: 1234,
            ..FeedConfig::default()
        };
        let mut a = UpdateFeed::new(config.clone(), origins()).unwrap();
        let mut b = UpdateFeed::new(config, origins()).unwrap();

        let left = tuples(&mut a, 500);
        let right = tuples(&mut b, 500);
        for ((id_a, pos_a, sos_a), (id_b, pos_b, sos_b)) in left.iter().zip(&right) {
            assert_eq!(id_a, id_b);
            assert_eq!(pos_a.latitude.to_bits(), pos_b.latitude.to_bits());
            assert_eq!(pos_a.longitude.to_bits(), pos_b.longitude.to_bits());
            assert_eq!(sos_a, sos_b);
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let config = |seed| FeedConfig {
            seed,
            ..FeedConfig::default()
        };
        let mut a = UpdateFeed::new(config(1), origins()).unwrap();
        let mut b = UpdateFeed::new(config(2), origins()).unwrap();

        assert_ne!(tuples(&mut a, 20), tuples(&mut b, 20));
    }

    #[test]
    fn test_steps_stay_within_offset() {
        let mut feed = UpdateFeed::new(FeedConfig::default(), origins()).unwrap();
        let mut last: HashMap<String, Position> = origins().into_iter().collect();

        for (id, position, _) in tuples(&mut feed, 1000) {
            let previous = last.insert(id.clone(), position).unwrap();
            let limit = DEFAULT_MAX_OFFSET_DEG + 1e-12;
            assert!((position.latitude - previous.latitude).abs() <= limit);
            assert!((position.longitude - previous.longitude).abs() <= limit);
        }
    }

    #[test]
    fn test_sos_is_rare_and_both_ways() {
        let mut feed = UpdateFeed::new(FeedConfig::default(), origins()).unwrap();
        let events = tuples(&mut feed, 10_000);

        let set: Vec<bool> = events
            .iter()
            .filter_map(|(_, _, sos)| match sos {
                Patch::Set(v) => Some(*v),
                Patch::Keep => None,
            })
            .collect();

        // 5% of 10k is 500; allow generous slack.
        assert!(set.len() > 300 && set.len() < 700, "got {}", set.len());
        assert!(set.iter().any(|v| *v));
        assert!(set.iter().any(|v| !*v));
    }

    #[test]
    fn test_both_devices_picked() {
        let mut feed = UpdateFeed::new(FeedConfig::default(), origins()).unwrap();
        let events = tuples(&mut feed, 200);

        assert!(events.iter().any(|(id, _, _)| id == "A"));
        assert!(events.iter().any(|(id, _, _)| id == "B"));
    }

    #[test]
    fn test_iterator_is_unbounded() {
        let feed = UpdateFeed::new(FeedConfig::default(), origins()).unwrap();
        assert_eq!(feed.take(50).count(), 50);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(UpdateFeed::new(FeedConfig::default(), Vec::new()).is_err());

        let config = FeedConfig {
            sos_probability: 1.5,
            ..FeedConfig::default()
        };
        assert!(UpdateFeed::new(config, origins()).is_err());

        let config = FeedConfig {
            interval: Duration::ZERO,
            ..FeedConfig::default()
        };
        assert!(UpdateFeed::new(config, origins()).is_err());
    }

    #[tokio::test]
    async fn test_spawn_emits_and_stops() {
        let config = FeedConfig {
            interval: Duration::from_millis(5),
            ..FeedConfig::default()
        };
        let feed = UpdateFeed::new(config, origins()).unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut handle = feed.spawn(tx);

        let first = rx.recv().await.unwrap();
        assert!(first.id == "A" || first.id == "B");

        let emitted = handle.stop().await;
        assert!(emitted >= 1);
        assert!(!handle.is_running());
        assert_eq!(handle.stop().await, emitted);

        let mut received = 1;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, emitted);
    }

    #[tokio::test]
    async fn test_feed_ends_when_receiver_dropped() {
        let config = FeedConfig {
            interval: Duration::from_millis(1),
            ..FeedConfig::default()
        };
        let feed = UpdateFeed::new(config, origins()).unwrap();
        let (tx, rx) = mpsc::channel(1);
        let mut handle = feed.spawn(tx);
        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.is_running() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.stop().await, 0);
    }
}
