use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use pulsarbeat_api::{BoxFuture, ConnectorError, Event, Sink};

/// Writes each event as one JSON document, to stdout or appended to a file.
///
/// ```text
/// {"@timestamp":"2024-05-01T10:00:00.000Z","pulsar":{"topic":"orders","producer":"shop","key":"k-1","timestamp":"..."},"message":"..."}
/// ```
pub struct ConsoleSink {
    target: String,
    pretty: bool,
    writer: Mutex<Box<dyn Write + Send>>,
}

#[derive(Serialize)]
struct Document<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    pulsar: PulsarFields<'a>,
    message: String,
}

#[derive(Serialize)]
struct PulsarFields<'a> {
    topic: &'a str,
    producer: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    timestamp: String,
}

fn rfc3339(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ConsoleSink {
    pub fn stdout(pretty: bool) -> Self {
        Self::with_writer("stdout", Box::new(std::io::stdout()), pretty)
    }

    /// Append to `path`, creating the file and its parent directories.
    pub fn file(path: &str, pretty: bool) -> Result<Self, ConnectorError> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConnectorError::io(format!("mkdir {}: {e}", parent.display())))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ConnectorError::io(format!("open {path}: {e}")))?;
        Ok(Self::with_writer(path, Box::new(std::io::LineWriter::new(file)), pretty))
    }

    pub fn with_writer(target: impl Into<String>, writer: Box<dyn Write + Send>, pretty: bool) -> Self {
        Self {
            target: target.into(),
            pretty,
            writer: Mutex::new(writer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        match self.writer.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(target_name = %self.target, "sink writer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn render(&self, event: &Event) -> Result<String, ConnectorError> {
        let doc = Document {
            timestamp: rfc3339(event.received_at_ms),
            pulsar: PulsarFields {
                topic: &event.topic,
                producer: &event.producer,
                key: event.key.as_deref(),
                timestamp: rfc3339(event.publish_time_ms),
            },
            message: String::from_utf8_lossy(&event.payload).into_owned(),
        };
        let rendered = if self.pretty {
            serde_json::to_string_pretty(&doc)
        } else {
            serde_json::to_string(&doc)
        };
        rendered.map_err(|e| ConnectorError::io(format!("json serialize: {e}")))
    }

    fn write(&self, event: &Event) -> Result<(), ConnectorError> {
        let line = self.render(event)?;
        let mut writer = self.lock();
        writeln!(writer, "{line}").map_err(|e| ConnectorError::io(format!("write {}: {e}", self.target)))
    }
}

impl Sink for ConsoleSink {
    fn send(&self, event: Event) -> BoxFuture<'_, Result<(), ConnectorError>> {
        let result = self.write(&event);
        Box::pin(async move { result })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ConnectorError>> {
        let result = self
            .lock()
            .flush()
            .map_err(|e| ConnectorError::io(format!("flush {}: {e}", self.target)));
        tracing::debug!(target_name = %self.target, "sink closed");
        Box::pin(async move { result })
    }
}
