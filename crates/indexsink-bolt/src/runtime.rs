//! Runtime hosting the parallel task instances of one bolt.
//!
//! `BoltRuntime` plays the part of the stream framework: it initializes one
//! [`BatchAckController`] per task index, runs each on its own tokio task
//! with a private input channel, and injects [`Input::Tick`] on a timer when
//! tick flushing is enabled. Tasks share nothing but the ack channel.
//!
//! An error from `accept` ends that task: the controller is shut down, any
//! records still queued for it are failed, and the task reports the error
//! when the runtime is stopped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::collector::{AckEvent, ChannelCollector};
use crate::config::Settings;
use crate::controller::BatchAckController;
use crate::error::{BoltError, Result};
use crate::traits::{AckChannel, Input, Record, TaskContext, WriterFactory};

/// Capacity of each task's input channel.
const INPUT_CHANNEL_CAPACITY: usize = 1024;

/// Handle to one running task.
struct TaskHandle {
    input_tx: mpsc::Sender<Record>,
    join_handle: JoinHandle<Result<()>>,
}

/// Runs `total_tasks` independent controllers for one bolt.
///
/// # Example
///
/// ```ignore
/// let (ack_tx, mut ack_rx) = tokio::sync::mpsc::unbounded_channel();
/// let factory = Arc::new(HttpWriterFactory::new()?);
/// let runtime = BoltRuntime::start("docs", &framework, &component, 4, factory, ack_tx).await?;
/// runtime.dispatch(Record::new(1, r#"{"one":1}"#)).await?;
/// runtime.stop().await?;
/// ```
pub struct BoltRuntime {
    name: String,
    tasks: Vec<TaskHandle>,
    ack_tx: mpsc::UnboundedSender<AckEvent>,
}

impl BoltRuntime {
    /// Initialize every task instance, then spawn their loops.
    ///
    /// Fails without spawning anything when any instance fails to initialize;
    /// the instances initialized before it are shut down first.
    pub async fn start(
        name: &str,
        framework: &HashMap<String, String>,
        component: &HashMap<String, String>,
        total_tasks: usize,
        factory: Arc<dyn WriterFactory>,
        ack_tx: mpsc::UnboundedSender<AckEvent>,
    ) -> Result<Self> {
        if total_tasks == 0 {
            return Err(BoltError::RuntimeError(format!(
                "bolt '{}' needs at least one task",
                name
            )));
        }

        let settings = Settings::merge(framework, component);
        let tick_interval = settings.tick_interval()?;
        let target = settings.resource_write()?;

        let mut controllers: Vec<BatchAckController> = Vec::with_capacity(total_tasks);
        for task_index in 0..total_tasks {
            let mut controller = BatchAckController::with_config(&target, component);
            let initialized = controller.initialize(
                framework,
                TaskContext::new(task_index, total_tasks),
                factory.as_ref(),
                Box::new(ChannelCollector::new(ack_tx.clone())),
            );
            if let Err(e) = initialized {
                error!(bolt = %name, task = task_index, error = %e, "task failed to initialize");
                for mut prepared in controllers {
                    if let Err(shutdown_err) = prepared.shutdown().await {
                        warn!(bolt = %name, error = %shutdown_err, "error releasing writer");
                    }
                }
                return Err(e);
            }
            controllers.push(controller);
        }

        let tasks = controllers
            .into_iter()
            .enumerate()
            .map(|(task_index, controller)| {
                let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
                let ticker = controller
                    .config()
                    .filter(|c| c.flush_on_tick)
                    .map(|_| {
                        let mut ticker = interval(tick_interval);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker
                    });
                let join_handle = tokio::spawn(run_task(
                    name.to_string(),
                    task_index,
                    controller,
                    input_rx,
                    ticker,
                    ChannelCollector::new(ack_tx.clone()),
                ));
                TaskHandle {
                    input_tx,
                    join_handle,
                }
            })
            .collect();

        info!(bolt = %name, tasks = total_tasks, "bolt runtime started");
        Ok(Self {
            name: name.to_string(),
            tasks,
            ack_tx,
        })
    }

    /// Route a record to its task (`id % total_tasks`).
    ///
    /// A record sent to a task that has ended is failed before the error is
    /// returned.
    pub async fn dispatch(&self, record: Record) -> Result<()> {
        let task_index = (record.id % self.tasks.len() as u64) as usize;
        match self.tasks[task_index].input_tx.send(record).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(record)) => {
                let _ = self.ack_tx.send(AckEvent::Fail(record.id));
                Err(BoltError::RuntimeError(format!(
                    "task {} of bolt '{}' is no longer running",
                    task_index, self.name
                )))
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the task at `task_index` is still accepting input.
    pub fn is_running(&self, task_index: usize) -> bool {
        self.tasks
            .get(task_index)
            .map_or(false, |t| !t.join_handle.is_finished())
    }

    /// Close every input, wait for the tasks to drain and shut down.
    ///
    /// Returns the first error any task ended with.
    pub async fn stop(self) -> Result<()> {
        let mut first_error = None;

        let handles: Vec<_> = self
            .tasks
            .into_iter()
            .map(|t| {
                drop(t.input_tx);
                t.join_handle
            })
            .collect();

        for (task_index, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(BoltError::RuntimeError(format!(
                    "task {} panicked: {}",
                    task_index, e
                ))),
            };
            if let Err(e) = result {
                error!(bolt = %self.name, task = task_index, error = %e, "task ended with error");
                first_error.get_or_insert(e);
            }
        }

        info!(bolt = %self.name, "bolt runtime stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_task(
    name: String,
    task_index: usize,
    mut controller: BatchAckController,
    mut input_rx: mpsc::Receiver<Record>,
    mut ticker: Option<Interval>,
    mut rejects: ChannelCollector,
) -> Result<()> {
    // The first tick of an interval fires immediately.
    if let Some(t) = ticker.as_mut() {
        t.reset();
    }

    loop {
        let input = tokio::select! {
            record = input_rx.recv() => match record {
                Some(record) => Input::Record(record),
                None => break,
            },
            _ = next_tick(&mut ticker) => Input::Tick,
        };

        if let Err(e) = controller.accept(input).await {
            error!(
                bolt = %name,
                task = task_index,
                error = %e,
                batch_level = e.is_batch_level(),
                "task failed; shutting down"
            );
            input_rx.close();
            if let Err(shutdown_err) = controller.shutdown().await {
                warn!(bolt = %name, task = task_index, error = %shutdown_err, "error during shutdown");
            }

            let mut dropped = 0usize;
            while let Ok(record) = input_rx.try_recv() {
                rejects.fail(&record);
                dropped += 1;
            }
            if dropped > 0 {
                warn!(bolt = %name, task = task_index, dropped, "failed records queued behind the error");
            }
            return Err(e);
        }
    }

    controller.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BOLT_TICK_FLUSH, RESOURCE_WRITE};
    use crate::outcome::BulkOutcome;
    use crate::traits::BulkWriter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkWriter;

    #[async_trait]
    impl BulkWriter for OkWriter {
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

    struct OkFactory;

    impl WriterFactory for OkFactory {
        fn create_writer(&self, _: &Settings, _: TaskContext) -> Result<Box<dyn BulkWriter>> {
            Ok(Box::new(OkWriter))
        }
    }

    /// Writer that counts how often it was released.
    struct CountingWriter {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BulkWriter for CountingWriter {
        async fn submit(&mut self, _record: &Record) -> Result<()> {
            Ok(())
        }
        async fn flush(&mut self) -> Result<BulkOutcome> {
            Ok(BulkOutcome::default())
        }
        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Factory that cannot create a writer for one task index.
    struct FailingFactory {
        fail_task: usize,
        created: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl WriterFactory for FailingFactory {
        fn create_writer(&self, _: &Settings, task: TaskContext) -> Result<Box<dyn BulkWriter>> {
            if task.task_index == self.fail_task {
                return Err(BoltError::ConnectionError("no route to node".to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingWriter {
                closes: self.closes.clone(),
            }))
        }
    }

    fn component() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(RESOURCE_WRITE.to_string(), "docs".to_string());
        m.insert(BOLT_TICK_FLUSH.to_string(), "false".to_string());
        m
    }

    #[tokio::test]
    async fn test_zero_tasks_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = BoltRuntime::start(
            "b",
            &HashMap::new(),
            &component(),
            0,
            Arc::new(OkFactory),
            tx,
        )
        .await;
        assert!(matches!(result, Err(BoltError::RuntimeError(_))));
    }

    #[tokio::test]
    async fn test_missing_target_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = BoltRuntime::start(
            "b",
            &HashMap::new(),
            &HashMap::new(),
            1,
            Arc::new(OkFactory),
            tx,
        )
        .await;
        assert!(matches!(result, Err(BoltError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_failed_initialize_releases_prepared_writers() {
        let factory = Arc::new(FailingFactory {
            fail_task: 1,
            created: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let result =
            BoltRuntime::start("b", &HashMap::new(), &component(), 3, factory.clone(), tx).await;

        assert!(matches!(result, Err(BoltError::ConnectionError(_))));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let runtime =
            BoltRuntime::start("b", &HashMap::new(), &component(), 3, Arc::new(OkFactory), tx)
                .await
                .unwrap();
        assert_eq!(runtime.task_count(), 3);
        assert!(runtime.is_running(0));
        assert!(!runtime.is_running(7));
        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_acks_in_fire_and_forget() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime =
            BoltRuntime::start("b", &HashMap::new(), &component(), 2, Arc::new(OkFactory), tx)
                .await
                .unwrap();
        for id in 0..4 {
            runtime.dispatch(Record::new(id, "{}")).await.unwrap();
        }
        runtime.stop().await.unwrap();

        let mut acked = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert!(event.is_ack());
            acked.push(event.id());
        }
        acked.sort();
        assert_eq!(acked, vec![0, 1, 2, 3]);
    }
}
