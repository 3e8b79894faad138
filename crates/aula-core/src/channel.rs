use tokio::sync::broadcast;

use crate::types::ChannelEvent;

/// Broadcast event stream type used by channel observers.
pub type EventStream = broadcast::Receiver<ChannelEvent>;

/// Fan-out of notification channel events to any number of observers.
#[derive(Clone, Debug)]
pub struct ChannelObservers {
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl ChannelObservers {
    /// Create an observer hub buffering up to `event_buffer` events per subscriber.
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted channel events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn observer_count(&self) -> usize {
        self.event_tx.receiver_count()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; with no subscribers the event is dropped and
    /// lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for ChannelObservers {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ChannelError, types::ConnectionState};

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let observers = ChannelObservers::new(16);
        let mut a = observers.subscribe();
        let mut b = observers.subscribe();
        assert_eq!(observers.observer_count(), 2);

        observers.emit(ChannelEvent::StateChanged {
            state: ConnectionState::Connecting,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let observers = ChannelObservers::default();
        observers.emit(ChannelEvent::Error(ChannelError::MissingToken));
        assert_eq!(observers.observer_count(), 0);
    }
}
