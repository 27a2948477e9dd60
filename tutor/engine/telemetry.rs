use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    sync::{
        mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
};

/// Event types emitted by a training session.
pub mod events {
    /// A dataset was accepted.
    pub const DATASET_LOADED: &str = "tutor.dataset.loaded";
    /// A run started, resumed, or restarted.
    pub const TRAINING_STARTED: &str = "tutor.training.started";
    /// One step committed.
    pub const TRAINING_TICK: &str = "tutor.training.tick";
    /// A history entry was appended.
    pub const LOSS_SAMPLE: &str = "tutor.training.loss_sample";
    /// A run was paused.
    pub const TRAINING_PAUSED: &str = "tutor.training.paused";
    /// A run reached its budget.
    pub const TRAINING_COMPLETED: &str = "tutor.training.completed";
    /// A run ended on an error.
    pub const TRAINING_ABORTED: &str = "tutor.training.aborted";
    /// Run state was reset.
    pub const TRAINING_RESET: &str = "tutor.training.reset";
}

/// Builder for [`TutorTelemetry`].
pub struct TutorTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    sink: Option<Arc<dyn LogSink>>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl TutorTelemetryBuilder {
    /// Creates a builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            sink: None,
            min_level: LogLevel::default(),
            event_publisher: None,
        }
    }

    /// Writes logs as JSON lines to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Writes logs to an existing sink; takes precedence over `log_path`.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the handle, opening the log file if one was configured.
    ///
    /// # Errors
    ///
    /// Fails when the log file cannot be opened.
    pub fn build(self) -> Result<TutorTelemetry> {
        let sink: Option<Arc<dyn LogSink>> = match (self.sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?)),
            (None, None) => None,
        };
        Ok(TutorTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                min_level: self.min_level,
                event: self.event_publisher.map(EventHandle::new),
            }),
        })
    }
}

/// Cloneable telemetry handle shared by the session and the tick loop.
#[derive(Clone)]
pub struct TutorTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for TutorTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TutorTelemetry")
            .field("module", &self.inner.module)
            .field("min_level", &self.inner.min_level)
            .finish_non_exhaustive()
    }
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    min_level: LogLevel,
    event: Option<EventHandle>,
}

struct EventHandle {
    publisher: Arc<dyn EventPublisher>,
    writer: Mutex<Option<UnboundedSender<Outbound>>>,
    fallback: OnceLock<Runtime>,
}

enum Outbound {
    Event(EventRecord),
    Flush(oneshot::Sender<()>),
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            writer: Mutex::new(None),
            fallback: OnceLock::new(),
        }
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            self.send(&handle, Outbound::Event(record));
            return Ok(());
        }
        if self.fallback.get().is_none() {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            let _ = self.fallback.set(runtime);
        }
        let runtime = self
            .fallback
            .get()
            .ok_or_else(|| anyhow!("fallback runtime unavailable"))?;
        runtime.block_on(self.publisher.publish(record))
    }

    async fn flush(&self) -> Result<()> {
        let Ok(handle) = Handle::try_current() else {
            return Ok(());
        };
        if self.writer.lock().is_none() {
            return Ok(());
        }
        let (done, waiter) = oneshot::channel();
        self.send(&handle, Outbound::Flush(done));
        waiter
            .await
            .map_err(|_| anyhow!("event writer stopped before flushing"))
    }

    /// Queues on the single writer task, restarting it when its runtime is gone.
    fn send(&self, handle: &Handle, message: Outbound) {
        let mut writer = self.writer.lock();
        let message = match writer.as_ref() {
            Some(sender) => match sender.send(message) {
                Ok(()) => return,
                Err(SendError(message)) => message,
            },
            None => message,
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(drain(Arc::clone(&self.publisher), receiver));
        let _ = sender.send(message);
        *writer = Some(sender);
    }
}

async fn drain(publisher: Arc<dyn EventPublisher>, mut receiver: UnboundedReceiver<Outbound>) {
    while let Some(message) = receiver.recv().await {
        match message {
            Outbound::Event(record) => {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("telemetry event publish failed: {err:?}");
                }
            }
            Outbound::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl TutorTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> TutorTelemetryBuilder {
        TutorTelemetryBuilder::new(module)
    }

    /// Module label stamped on records and events.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs structured metadata if `level` passes the filter.
    ///
    /// # Errors
    ///
    /// Propagates sink write failures.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if level < self.inner.min_level {
            return Ok(());
        }
        if let Some(sink) = &self.inner.sink {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            sink.write(&record)?;
        }
        Ok(())
    }

    /// Waits until every event emitted so far inside the runtime has been
    /// handed to the publisher. Events emitted outside a runtime are
    /// published synchronously and need no flush.
    ///
    /// # Errors
    ///
    /// Fails when the writer task ended before reaching the flush marker.
    pub async fn flush(&self) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.flush().await?;
        }
        Ok(())
    }

    /// Emits an event on the configured publisher. Inside a runtime the event
    /// is queued for the writer task; outside one it is published in place.
    ///
    /// # Errors
    ///
    /// Fails when publishing outside a runtime fails.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord::new(
                self.inner.module.clone(),
                event_type,
                payload,
            ))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use shared_logging::MemoryLogger;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tutor.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = TutorTelemetry::builder("tutor")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "trainer.started", json!({ "total": 25 }))
            .unwrap();
        telemetry
            .event(events::TRAINING_COMPLETED, json!({ "iterations": 25 }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("trainer.started"));
        let completed = bus.events_of_type(events::TRAINING_COMPLETED);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].source, "tutor");
    }

    #[test]
    fn records_below_min_level_are_dropped() {
        let sink = Arc::new(MemoryLogger::new());
        let telemetry = TutorTelemetry::builder("tutor")
            .log_sink(sink.clone())
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "trainer.step", json!({}))
            .unwrap();
        telemetry
            .log(LogLevel::Warn, "trainer.aborted", json!({}))
            .unwrap();
        assert_eq!(sink.messages(), vec!["trainer.aborted"]);
    }

    #[test]
    fn telemetry_without_sinks_is_silent() {
        let telemetry = TutorTelemetry::builder("quiet").build().unwrap();
        telemetry.log(LogLevel::Error, "x", json!({})).unwrap();
        telemetry.event("y", json!({})).unwrap();
        assert_eq!(telemetry.module(), "quiet");
    }

    #[tokio::test]
    async fn events_keep_their_order_inside_a_runtime() {
        let bus = Arc::new(MemoryEventBus::new(64));
        let telemetry = TutorTelemetry::builder("async")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        for iteration in 0..20 {
            telemetry
                .event(events::TRAINING_TICK, json!({ "iteration": iteration }))
                .unwrap();
        }
        telemetry.flush().await.unwrap();
        let seen: Vec<u64> = bus
            .snapshot()
            .iter()
            .map(|event| event.payload["iteration"].as_u64().unwrap())
            .collect();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn flush_without_publisher_returns_immediately() {
        let telemetry = TutorTelemetry::builder("quiet").build().unwrap();
        telemetry.flush().await.unwrap();
    }
}
