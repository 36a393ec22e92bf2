use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    DeviceAdded(String),
    DeviceRemoved(String),
    SelectionChanged(Option<String>),
    DeviceUpdated(String),
}

#[derive(Debug)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<StateChange>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn notify(&self, change: StateChange) {
        // No subscribers is fine; the signal is simply dropped.
        if let Err(broadcast::error::SendError(change)) = self.tx.send(change) {
            debug!(?change, "No subscribers for state change");
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer's attachment to the change stream. Dropping it detaches.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<StateChange>,
}

impl Subscription {
    /// Waits for the next change. Returns `None` once the registry is gone.
    ///
    /// A slow subscriber that falls behind skips the missed signals; since
    /// consumers re-read full state, only the latest one matters.
    pub async fn changed(&mut self) -> Option<StateChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Subscriber lagged behind state changes");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll for a pending change.
    pub fn try_changed(&mut self) -> Option<StateChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
