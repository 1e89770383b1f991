use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed engine events, one channel per branch.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a branch's events. Creates the channel if needed.
    pub fn subscribe(&self, branch_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(branch_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish to the event's branch. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let branch_id = event.branch_id();
        let Some(sender) = self.channels.get(&branch_id).map(|s| s.value().clone()) else {
            return;
        };
        if sender.send(event.clone()).is_err() {
            // Last subscriber went away; drop the channel so idle branches don't accumulate.
            self.channels
                .remove_if(&branch_id, |_, s| s.receiver_count() == 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let branch = Ulid::new();
        let mut rx = hub.subscribe(branch);

        let event = Event::StaffRemoved {
            id: Ulid::new(),
            branch_id: branch,
        };
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn events_stay_in_their_branch() {
        let hub = NotifyHub::new();
        let branch_a = Ulid::new();
        let branch_b = Ulid::new();
        let mut rx_a = hub.subscribe(branch_a);

        hub.send(&Event::StaffRemoved {
            id: Ulid::new(),
            branch_id: branch_b,
        });
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let branch = Ulid::new();
        hub.send(&Event::ServiceRemoved {
            id: Ulid::new(),
            branch_id: branch,
        });

        drop(hub.subscribe(branch));
        hub.send(&Event::ServiceRemoved {
            id: Ulid::new(),
            branch_id: branch,
        });
        assert!(hub.channels.get(&branch).is_none());
    }
}
