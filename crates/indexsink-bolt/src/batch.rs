//! In-flight batch bookkeeping for acknowledged writes.
//!
//! Records are kept in submission order, so a record's index in the buffer
//! is its position within the batch sent since the last flush. The backend
//! reports failures by that same position, which lets [`InflightBatch::resolve`]
//! map a [`BulkOutcome`] back onto the original records.
//!
//! ## Lifecycle
//!
//! 1. **Push**: each accepted record gets the next position (0, 1, 2, ...)
//! 2. **Resolve** or **fail all**: every record gets exactly one signal
//! 3. **Clear**: the buffer is emptied on both paths, the next record is position 0

use tracing::warn;

use crate::outcome::BulkOutcome;
use crate::traits::{AckChannel, Record};

/// Counts of one resolved batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSummary {
    pub acked: usize,
    pub failed: usize,
}

/// Ordered buffer of records awaiting their flush outcome.
#[derive(Debug)]
pub struct InflightBatch {
    records: Vec<Record>,
}

impl InflightBatch {
    /// Buffer sized for `batch_size` records plus the one that triggers the flush.
    pub fn new(batch_size: usize) -> Self {
        Self {
            records: Vec::with_capacity(batch_size + 1),
        }
    }

    /// Append a record and return its position.
    pub fn push(&mut self, record: Record) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// True once the batch reached `threshold` records. A zero threshold never fills.
    pub fn is_full(&self, threshold: usize) -> bool {
        threshold > 0 && self.records.len() >= threshold
    }

    /// Ack or fail every record according to `outcome`, then clear.
    pub fn resolve(&mut self, outcome: &BulkOutcome, channel: &mut dyn AckChannel) -> ResolveSummary {
        let failed = outcome.failed_positions();

        let stray = failed.iter().filter(|&&p| p >= self.records.len()).count();
        if stray > 0 {
            warn!(
                positions = stray,
                batch = self.records.len(),
                "bulk outcome reported failures beyond the batch; ignoring them"
            );
        }

        let mut summary = ResolveSummary::default();
        for (position, record) in self.records.iter().enumerate() {
            if failed.contains(&position) {
                channel.fail(record);
                summary.failed += 1;
            } else {
                channel.ack(record);
                summary.acked += 1;
            }
        }

        // Cleared in one go once every record has its signal.
        self.records.clear();
        summary
    }

    /// Fail every buffered record and clear. Returns how many were failed.
    pub fn fail_all(&mut self, channel: &mut dyn AckChannel) -> usize {
        let count = self.records.len();
        for record in &self.records {
            channel.fail(record);
        }
        self.records.clear();
        count
    }
}
