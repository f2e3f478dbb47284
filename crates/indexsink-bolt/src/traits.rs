//! Collaborator interfaces of the bolt.
//!
//! The controller sits between two collaborators it does not own: the
//! upstream framework, which delivers [`Input`]s and receives ack/fail
//! signals through an [`AckChannel`], and the bulk-indexing backend, reached
//! through a [`BulkWriter`] obtained from a [`WriterFactory`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::Settings;
use crate::error::Result;
use crate::outcome::BulkOutcome;

/// A record delivered by the upstream source.
///
/// The payload is opaque to the controller; only the backend writer
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Framework-assigned message id, used upstream to correlate ack/fail.
    pub id: u64,
    /// Record payload.
    pub payload: Bytes,
}

impl Record {
    pub fn new(id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// What the framework hands to [`accept`](crate::BatchAckController::accept).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A real record.
    Record(Record),
    /// Periodic timer signal.
    Tick,
}

impl From<Record> for Input {
    fn from(record: Record) -> Self {
        Input::Record(record)
    }
}

/// Position of one controller instance among its parallel siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub task_index: usize,
    pub total_tasks: usize,
}

impl TaskContext {
    pub fn new(task_index: usize, total_tasks: usize) -> Self {
        Self {
            task_index,
            total_tasks,
        }
    }

    /// Context of a topology running a single task.
    pub fn single() -> Self {
        Self::new(0, 1)
    }
}

/// Upstream ack/fail channel.
///
/// The controller calls exactly one of these methods once for every record
/// it buffered or acknowledged.
pub trait AckChannel: Send {
    /// The record was written; the upstream may forget it.
    fn ack(&mut self, record: &Record);

    /// The record was not written; the upstream may replay it.
    fn fail(&mut self, record: &Record);
}

/// Handle to the bulk-indexing backend for one task.
#[async_trait]
pub trait BulkWriter: Send + Sync {
    /// Hand one record to the backend.
    ///
    /// An error means this record was not accepted.
    async fn submit(&mut self, record: &Record) -> Result<()>;

    /// Flush everything submitted since the previous flush.
    ///
    /// An `Ok` outcome lists the positions of documents the backend refused;
    /// an `Err` means the fate of the whole batch is unknown.
    async fn flush(&mut self) -> Result<BulkOutcome>;

    /// Release the handle.
    async fn close(&mut self) -> Result<()>;
}

/// Acquires writer handles scoped to one task's partition.
pub trait WriterFactory: Send + Sync {
    fn create_writer(&self, settings: &Settings, task: TaskContext) -> Result<Box<dyn BulkWriter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Record / Input
    // ---------------------------------------------------------------

    #[test]
    fn test_record_construction() {
        let rec = Record::new(7, r#"{"one":1}"#);
        assert_eq!(rec.id, 7);
        assert_eq!(rec.payload, Bytes::from(r#"{"one":1}"#));
    }

    #[test]
    fn test_record_into_input() {
        let input: Input = Record::new(1, "x").into();
        assert!(matches!(input, Input::Record(ref r) if r.id == 1));
        assert_ne!(input, Input::Tick);
    }

    #[test]
    fn test_task_context_single() {
        let ctx = TaskContext::single();
        assert_eq!(ctx.task_index, 0);
        assert_eq!(ctx.total_tasks, 1);
    }

    // ---------------------------------------------------------------
    // Trait object safety (compile-time verification)
    // ---------------------------------------------------------------

    struct NullWriter;

    #[async_trait]
    impl BulkWriter for NullWriter {
        async fn submit(&mut self, _record: &Record) -> Result<()> {
            Ok(())
        }
        async fn flush(&mut self) -> Result<BulkOutcome> {
            Ok(BulkOutcome::default())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct NullChannel;

    impl AckChannel for NullChannel {
        fn ack(&mut self, _record: &Record) {}
        fn fail(&mut self, _record: &Record) {}
    }

    #[test]
    fn test_object_safety() {
        let writer = NullWriter;
        let _: &dyn BulkWriter = &writer;
        let channel = NullChannel;
        let _: &dyn AckChannel = &channel;
    }

    #[tokio::test]
    async fn test_null_writer_lifecycle() {
        let mut writer: Box<dyn BulkWriter> = Box::new(NullWriter);
        writer.submit(&Record::new(0, "{}")).await.unwrap();
        let outcome = writer.flush().await.unwrap();
        assert!(!outcome.has_failures());
        writer.close().await.unwrap();
    }
}
