//! indexsink-bolt binary
//!
//! Reads newline-delimited JSON documents from stdin and indexes them through
//! the bolt runtime, then reports how many were acknowledged or failed.
//!
//! # Environment Variables
//!
//! - `INDEXSINK_TARGET`: Target index (required)
//! - `INDEXSINK_URL`: Comma-separated node URLs (default: http://localhost:9200)
//! - `INDEXSINK_ACK`: Acknowledge documents only once flushed (default: true)
//! - `INDEXSINK_BATCH`: Documents per acknowledged batch (default: 100)
//! - `INDEXSINK_TASKS`: Parallel tasks (default: 1)
//! - `INDEXSINK_TICK_MS`: Timer flush period in milliseconds (default: 1000)
//! - `RUST_LOG`: Log level (default: info)
//!
//! # Example
//!
//! ```bash
//! export INDEXSINK_TARGET=simple-write
//! echo '{"OTP":"Otopeni","SFO":"San Fran"}' | cargo run --bin indexsink-bolt
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use indexsink_bolt::config::{
    BOLT_FLUSH_ENTRIES, BOLT_WRITE_ACK, CONNECTION_URL, DEFAULT_CONNECTION_URL, RESOURCE_WRITE,
    TICK_INTERVAL_MS,
};
use indexsink_bolt::{AckEvent, BoltRuntime, HttpWriterFactory, Record};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let target = std::env::var("INDEXSINK_TARGET")
        .map_err(|_| "INDEXSINK_TARGET must name the target index")?;
    let tasks: usize = env_or("INDEXSINK_TASKS", "1")
        .parse()
        .map_err(|e| format!("invalid INDEXSINK_TASKS: {}", e))?;

    let mut component = HashMap::new();
    component.insert(RESOURCE_WRITE.to_string(), target.clone());
    component.insert(
        CONNECTION_URL.to_string(),
        env_or("INDEXSINK_URL", DEFAULT_CONNECTION_URL),
    );
    component.insert(BOLT_WRITE_ACK.to_string(), env_or("INDEXSINK_ACK", "true"));
    component.insert(BOLT_FLUSH_ENTRIES.to_string(), env_or("INDEXSINK_BATCH", "100"));
    component.insert(
        TICK_INTERVAL_MS.to_string(),
        env_or("INDEXSINK_TICK_MS", "1000"),
    );

    info!(target = %target, tasks, "indexsink-bolt starting");

    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    let factory = Arc::new(HttpWriterFactory::new()?);
    let runtime = BoltRuntime::start(
        "indexsink-bolt",
        &HashMap::new(),
        &component,
        tasks,
        factory,
        ack_tx,
    )
    .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut next_id: u64 = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = Record::new(next_id, line.to_string());
        next_id += 1;
        // An undeliverable record comes back as a fail event.
        if let Err(e) = runtime.dispatch(record).await {
            error!(error = %e, "stopping input");
            break;
        }
    }

    let stopped = runtime.stop().await;

    let (mut acked, mut failed) = (0u64, 0u64);
    while let Some(event) = ack_rx.recv().await {
        match event {
            AckEvent::Ack(_) => acked += 1,
            AckEvent::Fail(id) => {
                failed += 1;
                error!(record = id, "document failed");
            }
        }
    }

    println!("read {} documents: {} acked, {} failed", next_id, acked, failed);

    if let Err(e) = stopped {
        error!(error = %e, "bolt stopped with error");
        std::process::exit(1);
    }
    if failed > 0 {
        std::process::exit(2);
    }
    Ok(())
}
