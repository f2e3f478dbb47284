//! Flush strategies.
//!
//! The acknowledgment mode is fixed at initialization, so the controller
//! picks one [`FlushStrategy`] variant up front instead of branching on the
//! mode at every call site. Only the acknowledged variant owns a buffer.

use tracing::{debug, error, warn};

use crate::batch::{InflightBatch, ResolveSummary};
use crate::config::Mode;
use crate::error::Result;
use crate::traits::{AckChannel, BulkWriter, Record};

/// Per-mode flush behavior.
#[derive(Debug)]
pub enum FlushStrategy {
    /// Records wait in `batch` until a flush tells whether they were written.
    Acknowledged {
        batch: InflightBatch,
        batch_size: usize,
    },
    /// Records were acked on submission; flushing only drains the backend.
    FireAndForget,
}

impl FlushStrategy {
    pub fn for_mode(mode: Mode, batch_size: usize) -> Self {
        match mode {
            Mode::Acknowledged => FlushStrategy::Acknowledged {
                batch: InflightBatch::new(batch_size),
                batch_size,
            },
            Mode::FireAndForget => FlushStrategy::FireAndForget,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            FlushStrategy::Acknowledged { .. } => Mode::Acknowledged,
            FlushStrategy::FireAndForget => Mode::FireAndForget,
        }
    }

    /// Records buffered and not yet acked or failed.
    pub fn pending(&self) -> usize {
        match self {
            FlushStrategy::Acknowledged { batch, .. } => batch.len(),
            FlushStrategy::FireAndForget => 0,
        }
    }

    /// Record the outcome of handing `record` to the backend.
    ///
    /// A submitted record joins the batch (acknowledged) or is acked
    /// immediately (fire-and-forget). A rejected record is failed right away
    /// when acknowledged; fire-and-forget has no record-level signal for it.
    /// Returns true when the batch reached its size threshold.
    pub fn on_submitted(
        &mut self,
        record: Record,
        submitted: bool,
        channel: &mut dyn AckChannel,
    ) -> bool {
        match self {
            FlushStrategy::Acknowledged { batch, batch_size } => {
                if !submitted {
                    channel.fail(&record);
                    return false;
                }
                batch.push(record);
                batch.is_full(*batch_size)
            }
            FlushStrategy::FireAndForget => {
                if submitted {
                    channel.ack(&record);
                }
                false
            }
        }
    }

    /// Flush the backend and settle whatever the mode owes the upstream.
    pub async fn flush(
        &mut self,
        writer: &mut dyn BulkWriter,
        channel: &mut dyn AckChannel,
    ) -> Result<ResolveSummary> {
        match self {
            FlushStrategy::Acknowledged { batch, .. } => {
                let outcome = match writer.flush().await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // The batch's fate is unknown: fail everything so upstream replays.
                        let failed = batch.fail_all(channel);
                        error!(error = %e, failed, "bulk flush failed; failing every pending record");
                        return Err(e);
                    }
                };

                let summary = batch.resolve(&outcome, channel);
                if summary.failed > 0 {
                    warn!(
                        acked = summary.acked,
                        failed = summary.failed,
                        "bulk flush rejected some documents"
                    );
                } else {
                    debug!(acked = summary.acked, "bulk flush acknowledged");
                }
                Ok(summary)
            }
            FlushStrategy::FireAndForget => {
                let outcome = writer.flush().await?;
                if outcome.has_failures() {
                    for doc in outcome.errors() {
                        warn!(
                            position = doc.position,
                            status = doc.status,
                            cause = %doc.cause,
                            "document rejected after it was acknowledged"
                        );
                    }
                }
                debug!(documents = outcome.documents(), "bulk flush completed");
                Ok(ResolveSummary::default())
            }
        }
    }
}
