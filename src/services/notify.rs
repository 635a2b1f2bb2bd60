//! Change signals for the push layer.
//!
//! A signal means "the item table moved, go pull". Subscribers re-read
//! through the cursor protocol, so one signal per logical write (or per
//! batch) is enough.

use tokio::sync::broadcast;

/// Signals buffered per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 256;

/// The write that triggered a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemChange {
    pub item_id: i64,
    pub list_id: i64,
    pub version: i64,
}

/// Broadcasts [`ItemChange`] signals after commit.
pub struct ChangeNotifier {
    tx: broadcast::Sender<ItemChange>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ItemChange> {
        self.tx.subscribe()
    }

    /// Send a signal. Having no subscribers is fine.
    pub fn notify(&self, change: ItemChange) {
        let _ = self.tx.send(change);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_without_subscribers() {
        let notifier = ChangeNotifier::new();
        notifier.notify(ItemChange {
            item_id: 1,
            list_id: 1,
            version: 1,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_change() {
        let notifier = ChangeNotifier::new();
        let mut rx = notifier.subscribe();
        let change = ItemChange {
            item_id: 2,
            list_id: 3,
            version: 4,
        };
        notifier.notify(change);
        assert_eq!(rx.recv().await.unwrap(), change);
        assert!(rx.try_recv().is_err());
    }
}
