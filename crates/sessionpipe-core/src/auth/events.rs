use tokio::sync::broadcast;
use tracing::debug;

/// Events are rare and payload-less; a handful of slots is plenty.
const EVENT_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session could not be renewed and local state was cleared.
    Expired,
}

/// Broadcast of session-level events, owned by the API client.
///
/// Clone shares the underlying channel.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn emit_expired(&self) {
        if self.sender.send(SessionEvent::Expired).is_err() {
            debug!("Session expired with no subscribers listening");
        }
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_emit_reaches_subscriber_once() {
        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);

        events.emit_expired();

        assert_eq!(rx.try_recv(), Ok(SessionEvent::Expired));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let events = SessionEvents::new();
        events.emit_expired();
        assert_eq!(events.subscriber_count(), 0);
    }
}
