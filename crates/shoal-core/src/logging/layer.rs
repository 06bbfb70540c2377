//! `tracing` layer writing events to an [`InstanceLogWriter`], and the
//! builder that installs it.

use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::JsonLogEntry;
use super::writer::InstanceLogWriter;
use crate::config::EngineConfig;

/// Filter used when neither `RUST_LOG` nor [`LoggingBuilder::with_filter`] is set
pub const DEFAULT_FILTER: &str = "shoal_core=info";

/// Writes every event it sees as one JSONL entry
pub struct JsonlLayer {
    writer: Arc<InstanceLogWriter>,
}

impl JsonlLayer {
    /// Layer writing to today's file for `instance` under `logs_dir`
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            writer: Arc::new(InstanceLogWriter::new(logs_dir, instance)?),
        })
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn instance(&self) -> &str {
        self.writer.instance()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut entry = JsonLogEntry::new(
            metadata.level().as_str().to_lowercase(),
            self.writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        if !visitor.fields.is_empty() {
            entry = entry.with_fields(serde_json::Value::Object(visitor.fields));
        }
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                entry = entry.with_span(spans.join(" > "));
            }
        }

        // A failing log write must not take the engine down
        let _ = self.writer.write(&entry);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);

        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, serde_json::Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, serde_json::Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }
}

/// Installs the global subscriber: an [`EnvFilter`], the [`JsonlLayer`] and,
/// unless disabled, console output.
pub struct LoggingBuilder {
    logs_dir: PathBuf,
    instance: String,
    console_output: bool,
    env_filter: Option<String>,
}

impl LoggingBuilder {
    pub fn new(logs_dir: impl Into<PathBuf>, instance: impl Into<String>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            instance: instance.into(),
            console_output: true,
            env_filter: None,
        }
    }

    /// Builder named after the engine instance in `config`
    pub fn for_engine(logs_dir: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        Self::new(logs_dir, config.instance.clone())
    }

    /// Only write the JSONL file
    pub fn no_console(mut self) -> Self {
        self.console_output = false;
        self
    }

    /// Filter directives used when `RUST_LOG` is not set
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// The JSONL layer alone, for callers composing their own subscriber
    pub fn build_layer(&self) -> std::io::Result<JsonlLayer> {
        JsonlLayer::new(&self.logs_dir, &self.instance)
    }

    /// Install the global subscriber. Returns the log file path.
    ///
    /// Fails if a global subscriber is already set.
    pub fn init(self) -> std::io::Result<PathBuf> {
        let jsonl = self.build_layer()?;
        let path = jsonl.log_path().to_path_buf();

        let directives = self.env_filter.as_deref().unwrap_or(DEFAULT_FILTER);
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
        let console = self.console_output.then(tracing_subscriber::fmt::layer);

        tracing_subscriber::registry()
            .with(filter)
            .with(jsonl)
            .with(console)
            .try_init()
            .map_err(std::io::Error::other)?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layer_captures_events_with_fields_and_spans() {
        let temp = TempDir::new().unwrap();
        let layer = JsonlLayer::new(temp.path(), "reef").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Transport started");
            let span = tracing::info_span!("dispatch");
            let _guard = span.enter();
            tracing::warn!(address = "tcp://bob:7070", attempted = 2u64, "Skipping address");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        let entries: Vec<JsonLogEntry> = content
            .lines()
            .map(|line| JsonLogEntry::from_json_line(line).unwrap())
            .collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].msg, "Transport started");
        assert_eq!(entries[0].level, "info");
        assert_eq!(entries[0].instance, "reef");
        assert!(entries[0].span.is_none());

        assert_eq!(entries[1].level, "warn");
        assert_eq!(entries[1].field("address"), Some("tcp://bob:7070"));
        assert_eq!(entries[1].span.as_deref(), Some("dispatch"));
        let fields = entries[1].fields.as_ref().unwrap();
        assert_eq!(fields["attempted"], 2);
    }

    #[test]
    fn test_builder_uses_engine_instance() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig {
            instance: "lagoon".to_string(),
            ..EngineConfig::default()
        };
        let layer = LoggingBuilder::for_engine(temp.path(), &config)
            .no_console()
            .build_layer()
            .unwrap();
        assert_eq!(layer.instance(), "lagoon");
        assert!(layer.log_path().to_string_lossy().ends_with("_lagoon.jsonl"));
    }
}
