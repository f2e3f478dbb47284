//! Channel-backed ack/fail collector.
//!
//! Forwards every ack or fail as an [`AckEvent`] over an unbounded tokio
//! channel so whoever owns the receiving end (the upstream source, a CLI,
//! a test) can settle its records.

use tokio::sync::mpsc;
use tracing::warn;

use crate::traits::{AckChannel, Record};

/// Terminal signal for one record, keyed by record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckEvent {
    Ack(u64),
    Fail(u64),
}

impl AckEvent {
    pub fn id(&self) -> u64 {
        match self {
            AckEvent::Ack(id) | AckEvent::Fail(id) => *id,
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, AckEvent::Ack(_))
    }
}

/// [`AckChannel`] that sends events into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelCollector {
    tx: mpsc::UnboundedSender<AckEvent>,
}

impl ChannelCollector {
    pub fn new(tx: mpsc::UnboundedSender<AckEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: AckEvent) {
        if self.tx.send(event).is_err() {
            warn!(record = event.id(), "ack receiver dropped; signal lost");
        }
    }
}

impl AckChannel for ChannelCollector {
    fn ack(&mut self, record: &Record) {
        self.send(AckEvent::Ack(record.id));
    }

    fn fail(&mut self, record: &Record) {
        self.send(AckEvent::Fail(record.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_forwarded_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut collector = ChannelCollector::new(tx);

        collector.ack(&Record::new(1, "{}"));
        collector.fail(&Record::new(2, "{}"));

        assert_eq!(rx.try_recv().unwrap(), AckEvent::Ack(1));
        assert_eq!(rx.try_recv().unwrap(), AckEvent::Fail(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut collector = ChannelCollector::new(tx);
        collector.ack(&Record::new(1, "{}"));
    }

    #[test]
    fn test_event_accessors() {
        assert_eq!(AckEvent::Ack(5).id(), 5);
        assert_eq!(AckEvent::Fail(6).id(), 6);
        assert!(AckEvent::Ack(5).is_ack());
        assert!(!AckEvent::Fail(6).is_ack());
    }
}
