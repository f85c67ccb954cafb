//! Progress bus: bounded fan-out from task runners to WebSocket subscribers.
//!
//! Delivery is best-effort and at-most-once per subscriber. A slow
//! subscriber skips lagged events instead of blocking publishers.

use crate::event::{ProgressEvent, TerminalKind};
use tokio::sync::broadcast;

/// Default per-subscriber buffer, in events.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// In-memory publish/subscribe fan-out for progress events.
///
/// Cloning is cheap; all clones publish into the same channel. Publishing
/// never blocks and succeeds even with no subscribers connected.
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    /// Create a bus with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with a custom per-subscriber buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        if event.is_terminal() {
            tracing::debug!(task_id = %event.task_id, terminal = ?event.terminal, "task finished");
        }
        // send only errors when there are no receivers, which is fine.
        self.tx.send(event).unwrap_or(0)
    }

    /// Convenience: publish a plain status message.
    pub fn message(&self, task_id: &str, message: impl Into<String>) {
        self.publish(ProgressEvent::message(task_id, message));
    }

    /// Convenience: publish a status message with a percentage.
    pub fn percent(&self, task_id: &str, message: impl Into<String>, percent: u8) {
        self.publish(ProgressEvent::percent(task_id, message, percent));
    }

    /// Convenience: publish the terminal event for a task.
    pub fn terminal(&self, task_id: &str, message: impl Into<String>, kind: TerminalKind) {
        self.publish(ProgressEvent::terminal(task_id, message, kind));
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            rx: self.tx.subscribe(),
            lagged: 0,
        }
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus.
///
/// Dropping the subscription unsubscribes; dropping twice is a no-op by
/// construction.
pub struct ProgressSubscription {
    rx: broadcast::Receiver<ProgressEvent>,
    lagged: u64,
}

impl ProgressSubscription {
    /// Receive the next event, skipping over any lagged gap.
    ///
    /// Returns `None` once the bus is closed and drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.lagged += n;
                    tracing::debug!(missed = n, "slow progress subscriber skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total events this subscriber missed due to lag.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe();

        bus.message("t1", "starting");
        bus.percent("t1", "halfway", 50);

        let first = sub.recv().await.unwrap();
        assert_eq!(first.task_id, "t1");
        assert_eq!(first.message, "starting");

        let second = sub.recv().await.unwrap();
        assert_eq!(second.percent, Some(50));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = ProgressBus::new();
        assert_eq!(bus.publish(ProgressEvent::message("t1", "nobody home")), 0);
    }

    #[tokio::test]
    async fn test_terminal_delivered_to_all_subscribers() {
        let bus = ProgressBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let delivered = bus.publish(ProgressEvent::terminal(
            "t1",
            "done",
            TerminalKind::Succeeded,
        ));
        assert_eq!(delivered, 2);

        assert!(a.recv().await.unwrap().is_terminal());
        assert!(b.recv().await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_lagged() {
        let bus = ProgressBus::with_capacity(4);
        let mut sub = bus.subscribe();

        for i in 0..32 {
            bus.message("t1", format!("event {i}"));
        }

        // The subscriber can still make progress and observes the lag.
        let event = sub.recv().await.unwrap();
        assert!(event.message.starts_with("event"));
        assert!(sub.lagged() > 0);
    }

    #[tokio::test]
    async fn test_subscribers_only_see_later_events() {
        let bus = ProgressBus::new();
        bus.message("t1", "before subscribe");

        let mut sub = bus.subscribe();
        bus.message("t1", "after subscribe");

        let event = sub.recv().await.unwrap();
        assert_eq!(event.message, "after subscribe");
    }

    #[tokio::test]
    async fn test_per_task_publish_order_preserved() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe();

        for i in 0..10u8 {
            bus.percent("t1", "step", i * 10);
        }

        let mut last = None;
        for _ in 0..10 {
            let event = sub.recv().await.unwrap();
            if let (Some(prev), Some(cur)) = (last, event.percent) {
                assert!(cur > prev, "events must arrive in publish order");
            }
            last = event.percent;
        }
    }
}
