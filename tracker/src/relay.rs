use crate::errors::Result;
use crate::metrics::{
    record_registry, UPDATES_INVALID_TOTAL, UPDATES_MERGED_TOTAL, UPDATES_TOTAL,
    UPDATES_UNKNOWN_DEVICE_TOTAL,
};
use crate::model::UpdateEvent;
use crate::registry::{DeviceRegistry, MergeOutcome};
use crate::validate::validate_update;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Registry behind a single-writer lock, shared by the relay and readers.
pub type SharedRegistry = Arc<RwLock<DeviceRegistry>>;

pub fn shared(registry: DeviceRegistry) -> SharedRegistry {
    Arc::new(RwLock::new(registry))
}

/// Counts of what a relay did with the events it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub merged: u64,
    pub unknown_device: u64,
    pub invalid: u64,
}

/// Validates and merges one event into the shared registry.
pub async fn apply_event(registry: &SharedRegistry, event: &UpdateEvent) -> Result<MergeOutcome> {
    UPDATES_TOTAL.inc();

    if let Err(e) = validate_update(event) {
        UPDATES_INVALID_TOTAL.inc();
        return Err(e);
    }

    let mut registry = registry.write().await;
    let outcome = registry.apply_update(event);

    match outcome {
        MergeOutcome::Merged => {
            UPDATES_MERGED_TOTAL.inc();
            debug!(device_id = %event.id, "Update merged");
        }
        MergeOutcome::UnknownDevice => {
            UPDATES_UNKNOWN_DEVICE_TOTAL.inc();
            warn!(device_id = %event.id, "Dropping update for unknown device");
        }
    }

    record_registry(registry.len(), registry.sos_devices().len());
    Ok(outcome)
}

pub struct Relay;

impl Relay {
    /// Spawns the relay task. Must be called within a tokio runtime.
    pub fn attach(registry: SharedRegistry, rx: mpsc::Receiver<UpdateEvent>) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_relay(registry, rx, shutdown_rx));
        info!("Relay attached to update stream");

        RelayHandle {
            shutdown_tx,
            handle: Some(handle),
            stats: None,
        }
    }
}

pub struct RelayHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<RelayStats>>,
    stats: Option<RelayStats>,
}

impl RelayHandle {
    pub fn is_attached(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the relay and waits for it. Once this returns, no further
    /// merges happen. Calling it again returns the same stats.
    pub async fn detach(&mut self) -> RelayStats {
        self.finish(true).await
    }

    /// Waits for the relay to end on its own, after the sender side of
    /// the stream is closed and every queued event has been applied.
    pub async fn drained(&mut self) -> RelayStats {
        self.finish(false).await
    }

    async fn finish(&mut self, signal: bool) -> RelayStats {
        if let Some(handle) = self.handle.take() {
            if signal {
                // The task may already be gone if the stream closed.
                let _ = self.shutdown_tx.send(true);
            }
            let stats = match handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    error!("Relay task failed: {}", e);
                    RelayStats::default()
                }
            };
            info!(
                received = stats.received,
                merged = stats.merged,
                unknown_device = stats.unknown_device,
                invalid = stats.invalid,
                "Relay stopped"
            );
            self.stats = Some(stats);
        }

        self.stats.unwrap_or_default()
    }
}

async fn run_relay(
    registry: SharedRegistry,
    mut rx: mpsc::Receiver<UpdateEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> RelayStats {
    let mut stats = RelayStats::default();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!("Relay received shutdown signal");
                break;
            }

            event = rx.recv() => {
                match event {
                    Some(event) => {
                        stats.received += 1;
                        match apply_event(&registry, &event).await {
                            Ok(MergeOutcome::Merged) => stats.merged += 1,
                            Ok(MergeOutcome::UnknownDevice) => stats.unknown_device += 1,
                            Err(e) => {
                                stats.invalid += 1;
                                warn!(device_id = %event.id, "Rejected update: {}", e);
                            }
                        }
                    }
                    None => {
                        info!("Update stream closed");
                        break;
                    }
                }
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Device, Position};
    use chrono::Utc;

    fn registry() -> SharedRegistry {
        let mut registry = DeviceRegistry::new();
        registry.add_device(Device::new(
            "A",
            "Daughter",
            "+27821111111",
            Position::new(-26.2041, 28.0473),
            Utc::now(),
        ));
        shared(registry)
    }

    #[tokio::test]
    async fn test_relay_merges_in_order() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(16);
        let mut relay = Relay::attach(registry.clone(), rx);

        for i in 1..=5 {
            let event = UpdateEvent::new("A", Utc::now())
                .with_position(Position::new(-26.0 + i as f64 * 0.001, 28.0));
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let stats = relay.drained().await;
        assert_eq!(stats.received, 5);
        assert_eq!(stats.merged, 5);

        let registry = registry.read().await;
        let device = registry.get("A").unwrap();
        let lats: Vec<f64> = device.trail().map(|p| p.latitude).collect();
        assert_eq!(lats.len(), 5);
        assert!(lats.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(device.position.latitude, lats[4]);
    }

    #[tokio::test]
    async fn test_relay_counts_unknown_and_invalid() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(16);
        let mut relay = Relay::attach(registry.clone(), rx);

        tx.send(UpdateEvent::new("ghost", Utc::now()).with_sos(true))
            .await
            .unwrap();
        tx.send(UpdateEvent::new("A", Utc::now()).with_position(Position::new(123.0, 0.0)))
            .await
            .unwrap();
        tx.send(UpdateEvent::new("A", Utc::now()).with_sos(true))
            .await
            .unwrap();
        drop(tx);

        let stats = relay.drained().await;
        assert_eq!(
            stats,
            RelayStats {
                received: 3,
                merged: 1,
                unknown_device: 1,
                invalid: 1,
            }
        );

        let registry = registry.read().await;
        assert!(registry.any_sos_active());
        assert_eq!(registry.get("A").unwrap().trail_len(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_detach_is_idempotent_and_final() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(16);
        let mut relay = Relay::attach(registry.clone(), rx);
        assert!(relay.is_attached());

        let first = relay.detach().await;
        let second = relay.detach().await;
        assert_eq!(first, second);
        assert!(!relay.is_attached());

        // The relay dropped its receiver, so nothing more can be merged.
        let result = tx
            .send(UpdateEvent::new("A", Utc::now()).with_sos(true))
            .await;
        assert!(result.is_err());
        assert!(!registry.read().await.any_sos_active());
    }

    #[test]
    fn test_apply_event_rejects_invalid() {
        tokio_test::block_on(async {
            let registry = registry();
            let event = UpdateEvent::new("", Utc::now());

            assert!(apply_event(&registry, &event).await.is_err());
        });
    }
}
