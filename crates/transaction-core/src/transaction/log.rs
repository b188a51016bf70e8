use parking_lot::Mutex;
use tokio::time::Instant;

use tfm_sip_core::Message;

/// Whether a logged message was sent or received by the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// One entry of a [`MessageLog`]
#[derive(Debug, Clone)]
pub struct LoggedMessage {
    pub direction: Direction,
    pub message: Message,
    pub at: Instant,
}

/// Messages a transaction sent or received, in order.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Mutex<Vec<LoggedMessage>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, message: &Message) {
        self.record(Direction::Sent, message);
    }

    pub fn record_received(&self, message: &Message) {
        self.record(Direction::Received, message);
    }

    fn record(&self, direction: Direction, message: &Message) {
        self.entries.lock().push(LoggedMessage {
            direction,
            message: message.clone(),
            at: Instant::now(),
        });
    }

    pub fn entries(&self) -> Vec<LoggedMessage> {
        self.entries.lock().clone()
    }

    /// Number of messages sent, retransmissions included.
    pub fn sent_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.direction == Direction::Sent)
            .count()
    }

    pub fn received_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.direction == Direction::Received)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfm_sip_core::{Method, SimpleRequestBuilder};

    #[test]
    fn counts_by_direction() {
        let request = SimpleRequestBuilder::new(Method::Options, "sip:bob@127.0.0.1")
            .unwrap()
            .from("", "sip:alice@127.0.0.1", Some("a"))
            .to("", "sip:bob@127.0.0.1", None)
            .call_id("log-test")
            .cseq(1)
            .via("127.0.0.1:5060", "UDP", None)
            .build()
            .unwrap();
        let message = Message::Request(request);

        let log = MessageLog::new();
        log.record_sent(&message);
        log.record_sent(&message);
        log.record_received(&message);

        assert_eq!(log.sent_count(), 2);
        assert_eq!(log.received_count(), 1);
        assert_eq!(log.entries()[2].direction, Direction::Received);
    }
}
