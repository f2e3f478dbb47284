//! Batch acknowledgment controller.
//!
//! One controller runs per parallel task. It hands every record to its
//! backend writer, decides when to flush, and turns each flush result into
//! exactly one ack or fail per record for the upstream framework.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --initialize--> Prepared --accept--> Running <--> Flushing
//!                                                       |
//!                                                   shutdown
//!                                                       v
//!                                                    Closed
//! ```
//!
//! In acknowledged mode the backend is switched to manual flushing with its
//! batch size aligned to the controller's, so nothing reaches the backend's
//! bulk endpoint except through [`BatchAckController::flush`]. Otherwise the
//! positions tracked in the buffer would drift from what was actually sent.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::config::{
    BoltConfig, ControllerState, Mode, Settings, BATCH_FLUSH_MANUAL, BATCH_SIZE_ENTRIES,
    BOLT_WRITE_ACK, RESOURCE_WRITE,
};
use crate::error::{BoltError, Result};
use crate::strategy::FlushStrategy;
use crate::traits::{AckChannel, BulkWriter, Input, TaskContext, WriterFactory};

/// Batches records for one task and settles their acknowledgments.
pub struct BatchAckController {
    /// Component-level settings; override the framework configuration.
    component: HashMap<String, String>,
    state: ControllerState,
    task: TaskContext,
    config: Option<BoltConfig>,
    strategy: Option<FlushStrategy>,
    writer: Option<Box<dyn BulkWriter>>,
    collector: Option<Box<dyn AckChannel>>,
}

impl BatchAckController {
    /// Controller writing to `target` with every other option taken from the framework.
    pub fn new(target: &str) -> Self {
        Self::from_component(target, None, None)
    }

    /// Controller writing to `target` with an explicit acknowledgment mode.
    pub fn with_ack(target: &str, write_ack: bool) -> Self {
        Self::from_component(target, Some(write_ack), None)
    }

    /// Controller writing to `target` with extra component settings.
    ///
    /// Keys in `config` win over `target`.
    pub fn with_config(target: &str, config: &HashMap<String, String>) -> Self {
        Self::from_component(target, None, Some(config))
    }

    fn from_component(
        target: &str,
        write_ack: Option<bool>,
        config: Option<&HashMap<String, String>>,
    ) -> Self {
        let mut component = HashMap::new();
        component.insert(RESOURCE_WRITE.to_string(), target.to_string());
        if let Some(ack) = write_ack {
            component.insert(BOLT_WRITE_ACK.to_string(), ack.to_string());
        }
        if let Some(config) = config {
            component.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Self {
            component,
            state: ControllerState::Uninitialized,
            task: TaskContext::single(),
            config: None,
            strategy: None,
            writer: None,
            collector: None,
        }
    }

    /// Resolve the configuration and acquire this task's writer.
    pub fn initialize(
        &mut self,
        framework: &HashMap<String, String>,
        task: TaskContext,
        factory: &dyn WriterFactory,
        collector: Box<dyn AckChannel>,
    ) -> Result<()> {
        if self.state != ControllerState::Uninitialized {
            return Err(BoltError::StateError(format!(
                "controller already initialized (state: {})",
                self.state
            )));
        }

        let mut settings = Settings::merge(framework, &self.component);
        let config = BoltConfig::from_settings(&settings)?;

        if config.mode == Mode::Acknowledged {
            settings.set_property(BATCH_FLUSH_MANUAL, "true");
            settings.set_property(BATCH_SIZE_ENTRIES, config.batch_size.to_string());
        }

        let writer = factory.create_writer(&settings, task)?;

        info!(
            bolt = %config.target,
            task = task.task_index,
            total_tasks = task.total_tasks,
            mode = %config.mode,
            batch_size = config.batch_size,
            flush_on_tick = config.flush_on_tick,
            "bolt prepared"
        );

        self.strategy = Some(FlushStrategy::for_mode(config.mode, config.batch_size));
        self.writer = Some(writer);
        self.collector = Some(collector);
        self.config = Some(config);
        self.task = task;
        self.state = ControllerState::Prepared;
        Ok(())
    }

    /// Take one input from the framework.
    pub async fn accept(&mut self, input: Input) -> Result<()> {
        self.ensure_open("accept")?;

        let record = match input {
            Input::Record(record) => record,
            Input::Tick => {
                if self.flush_on_tick() {
                    return self.flush().await;
                }
                debug!(task = self.task.task_index, "tick flush disabled; ignoring tick");
                return Ok(());
            }
        };

        self.state = ControllerState::Running;
        let task_index = self.task.task_index;
        let id = record.id;

        let (writer, strategy, collector) = self.parts()?;
        let submitted = writer.submit(&record).await;
        let full = strategy.on_submitted(record, submitted.is_ok(), collector);

        if let Err(e) = submitted {
            error!(task = task_index, record = id, error = %e, "backend refused record");
            return Err(e);
        }

        if full {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush the backend and settle every pending record.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open("flush")?;

        self.state = ControllerState::Flushing;
        let task_index = self.task.task_index;
        let result = match self.parts() {
            Ok((writer, strategy, collector)) => strategy.flush(writer, collector).await,
            Err(e) => Err(e),
        };
        self.state = ControllerState::Running;

        let summary = result?;
        debug!(
            task = task_index,
            acked = summary.acked,
            failed = summary.failed,
            "flush completed"
        );
        Ok(())
    }

    /// Final flush, then release the writer whatever the flush returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == ControllerState::Closed {
            return Ok(());
        }

        let flushed = if self.writer.is_some() {
            self.flush().await
        } else {
            Ok(())
        };

        let closed = match self.writer.take() {
            Some(mut writer) => writer.close().await,
            None => Ok(()),
        };
        self.state = ControllerState::Closed;

        info!(
            task = self.task.task_index,
            flushed = flushed.is_ok(),
            closed = closed.is_ok(),
            "bolt closed"
        );

        match (flushed, closed) {
            (Err(flush_err), Err(close_err)) => {
                warn!(task = self.task.task_index, error = %close_err, "error closing writer");
                Err(flush_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Mode resolved at initialization.
    pub fn mode(&self) -> Option<Mode> {
        self.config.as_ref().map(|c| c.mode)
    }

    pub fn config(&self) -> Option<&BoltConfig> {
        self.config.as_ref()
    }

    /// Records buffered and still waiting for a flush.
    pub fn pending(&self) -> usize {
        self.strategy.as_ref().map_or(0, FlushStrategy::pending)
    }

    fn flush_on_tick(&self) -> bool {
        self.config.as_ref().map_or(false, |c| c.flush_on_tick)
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        match self.state {
            ControllerState::Uninitialized | ControllerState::Closed => Err(BoltError::StateError(
                format!("cannot {} in state {}", op, self.state),
            )),
            _ => Ok(()),
        }
    }

    fn parts(&mut self) -> Result<(&mut dyn BulkWriter, &mut FlushStrategy, &mut dyn AckChannel)> {
        match (
            self.writer.as_deref_mut(),
            self.strategy.as_mut(),
            self.collector.as_deref_mut(),
        ) {
            (Some(writer), Some(strategy), Some(collector)) => Ok((writer, strategy, collector)),
            _ => Err(BoltError::StateError("writer is not available".to_string())),
        }
    }
}

impl Drop for BatchAckController {
    fn drop(&mut self) {
        if self.writer.is_some() {
            warn!(
                task = self.task.task_index,
                pending = self.pending(),
                "bolt dropped without shutdown; writer was not closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BOLT_FLUSH_ENTRIES, BOLT_TICK_FLUSH};
    use crate::outcome::BulkOutcome;
    use crate::traits::Record;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct NullChannel;

    impl AckChannel for NullChannel {
        fn ack(&mut self, _record: &Record) {}
        fn fail(&mut self, _record: &Record) {}
    }

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

    /// Factory that remembers the settings it was handed.
    #[derive(Default)]
    struct CapturingFactory {
        seen: Arc<Mutex<Vec<(Settings, TaskContext)>>>,
    }

    impl WriterFactory for CapturingFactory {
        fn create_writer(
            &self,
            settings: &Settings,
            task: TaskContext,
        ) -> Result<Box<dyn BulkWriter>> {
            self.seen.lock().unwrap().push((settings.clone(), task));
            Ok(Box::new(NullWriter))
        }
    }

    fn framework() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(BATCH_SIZE_ENTRIES.to_string(), "500".to_string());
        m
    }

    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    #[test]
    fn test_new_is_uninitialized() {
        let bolt = BatchAckController::new("index/docs");
        assert_eq!(bolt.state(), ControllerState::Uninitialized);
        assert!(bolt.mode().is_none());
        assert_eq!(bolt.pending(), 0);
    }

    #[test]
    fn test_with_config_overrides_target() {
        let mut extra = HashMap::new();
        extra.insert(RESOURCE_WRITE.to_string(), "other".to_string());
        let bolt = BatchAckController::with_config("index", &extra);
        assert_eq!(bolt.component.get(RESOURCE_WRITE).unwrap(), "other");
    }

    // ---------------------------------------------------------------
    // initialize
    // ---------------------------------------------------------------

    #[test]
    fn test_initialize_acknowledged_forces_manual_flush() {
        let mut extra = HashMap::new();
        extra.insert(BOLT_FLUSH_ENTRIES.to_string(), "10".to_string());
        extra.insert(BOLT_WRITE_ACK.to_string(), "true".to_string());
        let mut bolt = BatchAckController::with_config("events", &extra);
        let factory = CapturingFactory::default();

        bolt.initialize(
            &framework(),
            TaskContext::new(2, 4),
            &factory,
            Box::new(NullChannel),
        )
        .unwrap();

        assert_eq!(bolt.state(), ControllerState::Prepared);
        assert_eq!(bolt.mode(), Some(Mode::Acknowledged));

        let seen = factory.seen.lock().unwrap();
        let (settings, task) = &seen[0];
        assert_eq!(*task, TaskContext::new(2, 4));
        assert_eq!(settings.get(BATCH_FLUSH_MANUAL), Some("true"));
        assert_eq!(settings.get(BATCH_SIZE_ENTRIES), Some("10"));
    }

    #[test]
    fn test_initialize_fire_and_forget_leaves_backend_alone() {
        let mut bolt = BatchAckController::new("events");
        let factory = CapturingFactory::default();
        bolt.initialize(
            &framework(),
            TaskContext::single(),
            &factory,
            Box::new(NullChannel),
        )
        .unwrap();

        assert_eq!(bolt.mode(), Some(Mode::FireAndForget));
        let seen = factory.seen.lock().unwrap();
        assert!(seen[0].0.get(BATCH_FLUSH_MANUAL).is_none());
        assert_eq!(seen[0].0.get(BATCH_SIZE_ENTRIES), Some("500"));
    }

    #[test]
    fn test_ack_batch_size_defaults_to_backend_batch_size() {
        let mut bolt = BatchAckController::with_ack("events", true);
        let factory = CapturingFactory::default();
        bolt.initialize(
            &framework(),
            TaskContext::single(),
            &factory,
            Box::new(NullChannel),
        )
        .unwrap();
        assert_eq!(bolt.config().unwrap().batch_size, 500);
    }

    #[test]
    fn test_initialize_twice_rejected() {
        let mut bolt = BatchAckController::new("events");
        let factory = CapturingFactory::default();
        bolt.initialize(&framework(), TaskContext::single(), &factory, Box::new(NullChannel))
            .unwrap();
        let again =
            bolt.initialize(&framework(), TaskContext::single(), &factory, Box::new(NullChannel));
        assert!(matches!(again, Err(BoltError::StateError(_))));
    }

    #[test]
    fn test_initialize_invalid_config() {
        let mut extra = HashMap::new();
        extra.insert(BOLT_TICK_FLUSH.to_string(), "sometimes".to_string());
        let mut bolt = BatchAckController::with_config("events", &extra);
        let factory = CapturingFactory::default();
        let result =
            bolt.initialize(&framework(), TaskContext::single(), &factory, Box::new(NullChannel));
        assert!(matches!(result, Err(BoltError::ConfigError(_))));
        assert_eq!(bolt.state(), ControllerState::Uninitialized);
        assert!(factory.seen.lock().unwrap().is_empty());
    }

    // ---------------------------------------------------------------
    // State guards
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_accept_before_initialize() {
        let mut bolt = BatchAckController::new("events");
        let result = bolt.accept(Input::Record(Record::new(1, "{}"))).await;
        assert!(matches!(result, Err(BoltError::StateError(_))));
    }

    #[tokio::test]
    async fn test_shutdown_without_initialize_is_noop() {
        let mut bolt = BatchAckController::new("events");
        bolt.shutdown().await.unwrap();
        assert_eq!(bolt.state(), ControllerState::Closed);
    }

    #[tokio::test]
    async fn test_accept_after_shutdown() {
        let mut bolt = BatchAckController::new("events");
        let factory = CapturingFactory::default();
        bolt.initialize(&framework(), TaskContext::single(), &factory, Box::new(NullChannel))
            .unwrap();
        bolt.shutdown().await.unwrap();

        let result = bolt.accept(Input::Tick).await;
        assert!(matches!(result, Err(BoltError::StateError(_))));
        // A second shutdown is harmless.
        bolt.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_returns_to_running_after_flush() {
        let mut bolt = BatchAckController::with_ack("events", true);
        let factory = CapturingFactory::default();
        bolt.initialize(&framework(), TaskContext::single(), &factory, Box::new(NullChannel))
            .unwrap();
        bolt.accept(Input::Record(Record::new(1, "{}"))).await.unwrap();
        assert_eq!(bolt.state(), ControllerState::Running);
        bolt.flush().await.unwrap();
        assert_eq!(bolt.state(), ControllerState::Running);
        bolt.shutdown().await.unwrap();
    }
}
