//! indexsink bolt
//!
//! Batches records from a stream-processing source into bulk-indexing
//! requests and reports, record by record, whether each one was written, so
//! the upstream framework can replay the ones that were not.
//!
//! ## Architecture
//!
//! - **Traits**: `BulkWriter`, `WriterFactory` and `AckChannel` describe the backend and the
//!   upstream framework the controller talks to.
//! - **Controller**: `BatchAckController` buffers records, triggers flushes and emits
//!   exactly one ack or fail per record.
//! - **Strategy**: `FlushStrategy` holds the per-mode flush behavior (acknowledged or
//!   fire-and-forget), chosen once at initialization.
//! - **Batch**: `InflightBatch` tracks batch positions so per-document failures in a
//!   `BulkOutcome` map back to the records that caused them.
//! - **Config**: `Settings` and `BoltConfig` resolve the string key/value configuration.
//! - **Writers**: `HttpBulkWriter` talks to a `_bulk` HTTP endpoint.
//! - **Runtime**: `BoltRuntime` hosts one controller per parallel task.

pub mod batch;
pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod outcome;
pub mod runtime;
pub mod strategy;
pub mod traits;
pub mod writers;

// Re-export key types at crate root for convenience.
pub use batch::{InflightBatch, ResolveSummary};
pub use collector::{AckEvent, ChannelCollector};
pub use config::{BoltConfig, ControllerState, Mode, Settings};
pub use controller::BatchAckController;
pub use error::{BoltError, Result};
pub use outcome::{BulkOutcome, DocumentError};
pub use runtime::BoltRuntime;
pub use strategy::FlushStrategy;
pub use traits::{AckChannel, BulkWriter, Input, Record, TaskContext, WriterFactory};
pub use writers::{HttpBulkWriter, HttpWriterFactory};
