//! Backend writer implementations.
//!
//! Each writer implements [`BulkWriter`](crate::traits::BulkWriter) for one
//! kind of bulk-indexing backend, together with the
//! [`WriterFactory`](crate::traits::WriterFactory) that creates one writer
//! per task.

pub mod http;

pub use http::{HttpBulkWriter, HttpWriterConfig, HttpWriterFactory};
