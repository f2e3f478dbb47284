//! Configuration for the indexsink bolt.
//!
//! Settings arrive as two string maps: the topology-wide framework
//! configuration and the component-level map declared with the bolt. They
//! are merged once at initialization (component keys win) into [`Settings`],
//! which the controller then resolves into a typed [`BoltConfig`].
//!
//! ## Configuration
//!
//! | Key                  | Description                                  | Default                      |
//! |----------------------|----------------------------------------------|------------------------------|
//! | `resource.write`     | Target index                                 | required                     |
//! | `bolt.write.ack`     | Acknowledge records only after they are flushed | `false`                   |
//! | `bolt.flush.entries` | Records per acknowledged batch               | value of `batch.size.entries`|
//! | `bolt.tick.flush`    | Flush when a timer tick arrives              | `true`                       |
//! | `batch.size.entries` | Backend's own batch threshold                | `1000`                       |
//! | `batch.flush.manual` | Backend flushes only when asked              | `false`                      |
//! | `connection.url`     | Comma separated backend URLs                 | `http://localhost:9200`      |
//! | `document.id`        | JSON field to use as document `_id`          | (auto-generated)             |
//! | `tick.interval_ms`   | Period of the runtime's timer tick           | `1000`                       |

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BoltError, Result};

pub const RESOURCE_WRITE: &str = "resource.write";
pub const BOLT_WRITE_ACK: &str = "bolt.write.ack";
pub const BOLT_FLUSH_ENTRIES: &str = "bolt.flush.entries";
pub const BOLT_TICK_FLUSH: &str = "bolt.tick.flush";
pub const BATCH_SIZE_ENTRIES: &str = "batch.size.entries";
pub const BATCH_FLUSH_MANUAL: &str = "batch.flush.manual";
pub const CONNECTION_URL: &str = "connection.url";
pub const DOCUMENT_ID: &str = "document.id";
pub const TICK_INTERVAL_MS: &str = "tick.interval_ms";

pub const DEFAULT_CONNECTION_URL: &str = "http://localhost:9200";
pub const DEFAULT_BATCH_SIZE_ENTRIES: usize = 1000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE_ENTRIES
}

fn default_flush_on_tick() -> bool {
    true
}

/// Merged key/value settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    props: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(props: HashMap<String, String>) -> Self {
        Self { props }
    }

    /// Copy the framework configuration, then apply component overrides.
    pub fn merge(framework: &HashMap<String, String>, component: &HashMap<String, String>) -> Self {
        let mut props = framework.clone();
        props.extend(component.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { props }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<String>) {
        self.props.insert(key.to_string(), value.into());
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.props
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(s) => Err(BoltError::ConfigError(format!(
                "invalid {}: expected true or false, got '{}'",
                key, s
            ))),
        }
    }

    fn parse_number<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<T>()
                    .map_err(|e| BoltError::ConfigError(format!("invalid {}: {}", key, e)))
            })
            .transpose()
    }

    /// Target resource of the writes.
    pub fn resource_write(&self) -> Result<String> {
        self.get(RESOURCE_WRITE)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                BoltError::ConfigError(format!("missing required '{}'", RESOURCE_WRITE))
            })
    }

    pub fn write_ack(&self) -> Result<bool> {
        self.parse_bool(BOLT_WRITE_ACK, false)
    }

    pub fn tick_flush(&self) -> Result<bool> {
        self.parse_bool(BOLT_TICK_FLUSH, true)
    }

    pub fn flush_manual(&self) -> Result<bool> {
        self.parse_bool(BATCH_FLUSH_MANUAL, false)
    }

    pub fn batch_size_entries(&self) -> Result<usize> {
        Ok(self
            .parse_number(BATCH_SIZE_ENTRIES)?
            .unwrap_or(DEFAULT_BATCH_SIZE_ENTRIES))
    }

    /// Records per acknowledged batch; falls back to the backend's own batch size.
    pub fn flush_entries(&self) -> Result<usize> {
        match self.parse_number(BOLT_FLUSH_ENTRIES)? {
            Some(n) => Ok(n),
            None => self.batch_size_entries(),
        }
    }

    pub fn connection_urls(&self) -> Vec<String> {
        self.get(CONNECTION_URL)
            .unwrap_or(DEFAULT_CONNECTION_URL)
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn document_id_field(&self) -> Option<String> {
        self.get(DOCUMENT_ID)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn tick_interval(&self) -> Result<Duration> {
        let ms = self
            .parse_number::<u64>(TICK_INTERVAL_MS)?
            .unwrap_or(DEFAULT_TICK_INTERVAL_MS);
        if ms == 0 {
            return Err(BoltError::ConfigError(format!(
                "invalid {}: must be greater than 0",
                TICK_INTERVAL_MS
            )));
        }
        Ok(Duration::from_millis(ms))
    }
}

/// How records are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Ack or fail each record once the flush covering it returns.
    Acknowledged,
    /// Ack each record as soon as the backend accepted it.
    #[default]
    FireAndForget,
}

impl Mode {
    pub fn from_ack(ack: bool) -> Self {
        if ack {
            Mode::Acknowledged
        } else {
            Mode::FireAndForget
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Acknowledged => write!(f, "acknowledged"),
            Mode::FireAndForget => write!(f, "fire-and-forget"),
        }
    }
}

/// Configuration resolved once at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoltConfig {
    /// Target resource (index).
    pub target: String,

    #[serde(default)]
    pub mode: Mode,

    /// Records per acknowledged batch; 0 leaves flushing to ticks and shutdown.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_on_tick")]
    pub flush_on_tick: bool,
}

impl BoltConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(BoltConfig {
            target: settings.resource_write()?,
            mode: Mode::from_ack(settings.write_ack()?),
            batch_size: settings.flush_entries()?,
            flush_on_tick: settings.tick_flush()?,
        })
    }

    /// Parse from a plain key/value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        Self::from_settings(&Settings::from_map(config.clone()))
    }
}

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Uninitialized,
    Prepared,
    Running,
    Flushing,
    Closed,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Uninitialized => write!(f, "UNINITIALIZED"),
            ControllerState::Prepared => write!(f, "PREPARED"),
            ControllerState::Running => write!(f, "RUNNING"),
            ControllerState::Flushing => write!(f, "FLUSHING"),
            ControllerState::Closed => write!(f, "CLOSED"),
        }
    }
}
