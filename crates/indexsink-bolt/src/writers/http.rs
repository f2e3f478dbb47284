//! HTTP Bulk Writer
//!
//! Writes records to a search cluster through the `_bulk` API. Submitted
//! records are encoded into a pending NDJSON body; a flush POSTs the body and
//! maps the per-item results of the response back to positions in the batch.
//!
//! ## Configuration
//!
//! | Key                  | Description                               | Default                 |
//! |----------------------|-------------------------------------------|-------------------------|
//! | `connection.url`     | Comma separated node URLs                 | `http://localhost:9200` |
//! | `resource.write`     | Target index (`index` or `index/type`)    | required                |
//! | `document.id`        | JSON field to use as document `_id`       | (auto-generated)        |
//! | `batch.size.entries` | Records per self-triggered bulk request   | `1000`                  |
//! | `batch.flush.manual` | Only flush when asked                     | `false`                 |

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{BoltError, Result};
use crate::outcome::{BulkOutcome, DocumentError};
use crate::traits::{BulkWriter, Record, TaskContext, WriterFactory};

/// Parsed configuration for the HTTP bulk writer.
#[derive(Debug, Clone)]
pub struct HttpWriterConfig {
    pub nodes: Vec<String>,
    pub index: String,
    pub document_id_field: Option<String>,
    pub batch_size_entries: usize,
    pub flush_manual: bool,
}

impl HttpWriterConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let nodes = settings.connection_urls();
        if nodes.is_empty() {
            return Err(BoltError::ConfigError(
                "'connection.url' lists no nodes".to_string(),
            ));
        }

        let resource = settings.resource_write()?;
        // Typed resources ("index/type") predate typeless bulk requests.
        let index = resource
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if index.is_empty() {
            return Err(BoltError::ConfigError(format!(
                "invalid resource '{}'",
                resource
            )));
        }

        Ok(HttpWriterConfig {
            nodes,
            index,
            document_id_field: settings.document_id_field(),
            batch_size_entries: settings.batch_size_entries()?,
            flush_manual: settings.flush_manual()?,
        })
    }

    /// Node a task writes to; parallel tasks are spread across the nodes.
    pub fn node_for(&self, task: TaskContext) -> &str {
        &self.nodes[task.task_index % self.nodes.len()]
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponseBody {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn error_cause(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => {
            let kind = obj.get("type").and_then(|v| v.as_str());
            let reason = obj.get("reason").and_then(|v| v.as_str());
            match (kind, reason) {
                (Some(k), Some(r)) => format!("{}: {}", k, r),
                (Some(k), None) => k.to_string(),
                (None, Some(r)) => r.to_string(),
                (None, None) => error.to_string(),
            }
        }
        other => other.to_string(),
    }
}

/// `BulkWriter` over the `_bulk` HTTP API.
pub struct HttpBulkWriter {
    config: HttpWriterConfig,
    node: String,
    client: reqwest::Client,
    body: String,
    pending: usize,
}

impl HttpBulkWriter {
    pub fn new(config: HttpWriterConfig, task: TaskContext, client: reqwest::Client) -> Self {
        let node = config.node_for(task).to_string();
        Self {
            config,
            node,
            client,
            body: String::new(),
            pending: 0,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Records submitted since the last flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Append the action and document lines for one record.
    ///
    /// ```text
    /// {"index":{"_index":"my-index","_id":"doc-123"}}
    /// {"field1":"value1"}
    /// ```
    pub fn encode_record(
        index: &str,
        id_field: Option<&str>,
        record: &Record,
        body: &mut String,
    ) -> Result<()> {
        let value_str = std::str::from_utf8(&record.payload).map_err(|e| {
            BoltError::SerializationError(format!("invalid UTF-8 in record {}: {}", record.id, e))
        })?;
        let doc: serde_json::Value = serde_json::from_str(value_str)?;
        if !doc.is_object() {
            return Err(BoltError::SerializationError(format!(
                "record {} is not a JSON object",
                record.id
            )));
        }

        let doc_id = id_field.and_then(|field| {
            doc.get(field).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        });

        let action = match doc_id {
            Some(id) => serde_json::json!({"index": {"_index": index, "_id": id}}),
            None => serde_json::json!({"index": {"_index": index}}),
        };

        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        // Re-serialized so a pretty-printed payload stays on one line.
        body.push_str(&serde_json::to_string(&doc)?);
        body.push('\n');
        Ok(())
    }

    /// Map a `_bulk` response body onto a [`BulkOutcome`].
    pub fn parse_bulk_response(body: &str, documents: usize) -> Result<BulkOutcome> {
        let resp: BulkResponseBody = serde_json::from_str(body)
            .map_err(|e| BoltError::BulkError(format!("failed to parse bulk response: {}", e)))?;

        if !resp.errors {
            return Ok(BulkOutcome::success(documents));
        }

        if resp.items.len() != documents {
            warn!(
                items = resp.items.len(),
                documents, "bulk response item count does not match the request"
            );
        }

        // A document the response says nothing about is failed, never acked.
        let errors = (0..documents)
            .filter_map(|position| {
                let item = match resp.items.get(position).and_then(|i| i.values().next()) {
                    Some(item) => item,
                    None => {
                        return Some(DocumentError {
                            position,
                            status: 0,
                            cause: "no result reported for document".to_string(),
                        })
                    }
                };
                if item.error.is_none() && item.status < 300 {
                    return None;
                }
                Some(DocumentError {
                    position,
                    status: item.status,
                    cause: item
                        .error
                        .as_ref()
                        .map(error_cause)
                        .unwrap_or_else(|| format!("status {}", item.status)),
                })
            })
            .collect();

        Ok(BulkOutcome::new(documents, errors))
    }

    async fn send_bulk(&self, body: String, documents: usize) -> Result<BulkOutcome> {
        let url = format!("{}/_bulk", self.node);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| BoltError::ConnectionError(format!("bulk request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BoltError::ConnectionError(format!("failed to read bulk response: {}", e)))?;

        if !status.is_success() {
            return Err(BoltError::BulkError(format!(
                "bulk API returned {}: {}",
                status, text
            )));
        }

        Self::parse_bulk_response(&text, documents)
    }
}

#[async_trait]
impl BulkWriter for HttpBulkWriter {
    async fn submit(&mut self, record: &Record) -> Result<()> {
        Self::encode_record(
            &self.config.index,
            self.config.document_id_field.as_deref(),
            record,
            &mut self.body,
        )?;
        self.pending += 1;

        if !self.config.flush_manual
            && self.config.batch_size_entries > 0
            && self.pending >= self.config.batch_size_entries
        {
            let outcome = self.flush().await?;
            if outcome.has_failures() {
                warn!(
                    node = %self.node,
                    failed = outcome.errors().len(),
                    "self-triggered bulk flush rejected documents"
                );
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<BulkOutcome> {
        if self.pending == 0 {
            return Ok(BulkOutcome::default());
        }

        let body = std::mem::take(&mut self.body);
        let documents = std::mem::take(&mut self.pending);
        let outcome = self.send_bulk(body, documents).await?;

        debug!(
            node = %self.node,
            index = %self.config.index,
            documents,
            failed = outcome.errors().len(),
            "flushed bulk request"
        );
        Ok(outcome)
    }

    async fn close(&mut self) -> Result<()> {
        if self.pending > 0 {
            warn!(
                node = %self.node,
                pending = self.pending,
                "closing writer with unflushed documents; discarding them"
            );
        }
        self.body.clear();
        self.pending = 0;
        Ok(())
    }
}

/// Creates one [`HttpBulkWriter`] per task, sharing a connection pool.
#[derive(Debug, Clone)]
pub struct HttpWriterFactory {
    client: reqwest::Client,
}

impl HttpWriterFactory {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            BoltError::ConnectionError(format!("failed to build HTTP client: {}", e))
        })?;
        Ok(Self { client })
    }

    /// Use an already-built client (useful for custom TLS or timeouts).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl WriterFactory for HttpWriterFactory {
    fn create_writer(&self, settings: &Settings, task: TaskContext) -> Result<Box<dyn BulkWriter>> {
        let config = HttpWriterConfig::from_settings(settings)?;
        let writer = HttpBulkWriter::new(config, task, self.client.clone());
        debug!(node = %writer.node(), task = task.task_index, "created bulk writer");
        Ok(Box::new(writer))
    }
}
