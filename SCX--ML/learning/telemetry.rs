use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde_json::Value;
use shared_event_bus::{EventPublisher, PipelineEvent};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Builder, Handle, Runtime};

/// Builder for [`PipelineTelemetry`].
pub struct PipelineTelemetryBuilder {
    stage: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetryBuilder {
    /// Starts a builder for the given stage (or binary) name.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            log_path: None,
            min_level: LogLevel::Info,
            event_publisher: None,
        }
    }

    /// Writes JSON log lines to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Publishes stage events to `publisher`.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Opens the log file.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?.with_min_level(self.min_level)),
            None => None,
        };
        let events = match self.event_publisher {
            Some(publisher) => Some(EventHandle::new(publisher)),
            None => None,
        };
        Ok(PipelineTelemetry {
            stage: self.stage,
            inner: Arc::new(TelemetryInner { logger, events }),
        })
    }
}

/// Cheap-to-clone handle shared by the stages.
#[derive(Clone)]
pub struct PipelineTelemetry {
    stage: String,
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("stage", &self.stage)
            .field("logs", &self.inner.logger.as_ref().map(JsonLogger::path))
            .field("events", &self.inner.events.is_some())
            .finish()
    }
}

struct TelemetryInner {
    logger: Option<JsonLogger>,
    events: Option<EventHandle>,
}

struct EventHandle {
    /// Built on the first publish made outside a runtime.
    runtime: OnceCell<Runtime>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            runtime: OnceCell::new(),
            publisher,
        }
    }

    fn publish(&self, event: PipelineEvent) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            // Already inside a runtime: the caller's executor delivers it.
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(event).await {
                    eprintln!("pipeline event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            let runtime = self
                .runtime
                .get_or_try_init(|| Builder::new_current_thread().build())?;
            runtime.block_on(self.publisher.publish(event))
        }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        // The last handle may be dropped from async code.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(stage: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(stage)
    }

    /// Same sinks, records attributed to another stage.
    #[must_use]
    pub fn for_stage(&self, stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stage name stamped on records and events.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Writes a structured log line (no-op without a log path).
    pub fn log(&self, level: LogLevel, message: &str, fields: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            logger.log(&LogRecord::new(&self.stage, level, message).with_fields(fields))?;
        }
        Ok(())
    }

    /// Publishes a stage event (no-op without a publisher).
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(events) = &self.inner.events {
            events.publish(PipelineEvent::new(&self.stage, event_type, payload))?;
        }
        Ok(())
    }
}

/// Logs through optional telemetry; failures are reported on stderr and never abort a stage.
pub(crate) fn log(
    telemetry: Option<&PipelineTelemetry>,
    level: LogLevel,
    message: &str,
    fields: Value,
) {
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.log(level, message, fields) {
            eprintln!("telemetry log failed: {err:?}");
        }
    }
}

/// Emits through optional telemetry; failures are reported on stderr and never abort a stage.
pub(crate) fn event(telemetry: Option<&PipelineTelemetry>, event_type: &str, payload: Value) {
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.event(event_type, payload) {
            eprintln!("telemetry event failed: {err:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("logs/pipeline.log.jsonl");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = PipelineTelemetry::builder("trn")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap()
            .for_stage("trainer");
        telemetry
            .log(LogLevel::Info, "trainer.started", json!({ "rows": 105 }))
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "trainer.filtered_out", json!({}))
            .unwrap();
        telemetry
            .event("pipeline.train.completed", json!({ "models": 1 }))
            .unwrap();
        let records = shared_logging::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "trainer.started");
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, "trainer");
    }

    #[test]
    fn telemetry_is_usable_inside_a_runtime() {
        let bus = Arc::new(MemoryEventBus::new(4));
        let rt = Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let telemetry = PipelineTelemetry::builder("trn")
                .event_publisher(bus.clone())
                .build()
                .unwrap();
            telemetry
                .event("pipeline.collect.completed", json!({ "rows": 150 }))
                .unwrap();
            tokio::task::yield_now().await;
            drop(telemetry);
        });
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[test]
    fn blocking_publishes_then_drops_inside_a_runtime() {
        let bus = Arc::new(MemoryEventBus::new(4));
        let telemetry = PipelineTelemetry::builder("trn")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry.event("pipeline.split.completed", json!({})).unwrap();
        let rt = Builder::new_current_thread().build().unwrap();
        rt.block_on(async move { drop(telemetry) });
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[test]
    fn silent_without_sinks() {
        let telemetry = PipelineTelemetry::builder("collector").build().unwrap();
        telemetry.log(LogLevel::Error, "nothing", json!({})).unwrap();
        telemetry.event("nothing", json!({})).unwrap();
    }
}
