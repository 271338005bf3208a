//! Feed a [`MemoryBroker`] from a JSON-lines file.
//!
//! Each non-empty line is one record:
//!
//! ```json
//! {"topic": "orders", "key": "k-1", "producer": "shop", "payload": "hello", "properties": {"a": "b"}}
//! ```

use std::collections::BTreeMap;
use std::io::BufRead;

use serde::Deserialize;

use pulsarbeat_api::ConnectorError;

use crate::{MemoryBroker, Outgoing};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Record {
    topic: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    producer: Option<String>,
    payload: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

/// Publish every record from `reader`. Returns how many were published.
///
/// Stops at the first malformed line; records before it stay published.
pub fn replay_jsonl(broker: &MemoryBroker, reader: impl BufRead) -> Result<usize, ConnectorError> {
    let mut published = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: Record =
            serde_json::from_str(line).map_err(|e| ConnectorError::from(e).with_context(format!("line {}", index + 1)))?;
        broker.publish(
            &record.topic,
            Outgoing {
                key: record.key,
                producer_name: record.producer,
                properties: record.properties,
                payload: record.payload.into_bytes(),
            },
        )?;
        published += 1;
    }
    tracing::info!(published, "replayed messages");
    Ok(published)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pulsarbeat_api::ErrorKind;

    use super::*;

    #[test]
    fn publishes_each_line() {
        let broker = MemoryBroker::new();
        let input = r#"
{"topic": "a", "payload": "one"}
# comment
{"topic": "b", "key": "k", "producer": "p", "payload": "two", "properties": {"x": "y"}}
"#;
        let count = replay_jsonl(&broker, Cursor::new(input)).unwrap();
        assert_eq!(count, 2);
        assert_eq!(broker.topic_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn reports_the_bad_line() {
        let broker = MemoryBroker::new();
        let input = "{\"topic\": \"a\", \"payload\": \"ok\"}\n{\"topic\": \"a\"}\n";
        let err = replay_jsonl(&broker, Cursor::new(input)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message.contains("line 2"), "{err}");
    }
}
