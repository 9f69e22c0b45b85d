//! Append-only event log (`events.log`).
//!
//! One JSON object per line: `ts` (RFC 3339, microseconds, UTC) followed by
//! the emitted fields. Timestamps never go backwards within one log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::HarnessError;

pub const EVENTS_FILE: &str = "events.log";

/// Fields of one event, without its timestamp.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    pub fn new(name: &str) -> Self {
        Self::from(name)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get("event").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("event".to_string(), Value::String(name.to_string()));
        Self { fields }
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<Value> for Event {
    /// Objects are taken as-is; any other value becomes `{"event": value}`.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            other => {
                let mut fields = Map::new();
                fields.insert("event".to_string(), other);
                Self { fields }
            }
        }
    }
}

/// An event read back from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl EventRecord {
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let mut fields = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => return Err("event line is not an object".to_string()),
            Err(e) => return Err(e.to_string()),
        };
        let ts = fields
            .remove("ts")
            .and_then(|ts| ts.as_str().map(str::to_string))
            .ok_or_else(|| "event line has no ts".to_string())?;
        let ts = DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| format!("bad ts {ts}: {e}"))?
            .with_timezone(&Utc);
        Ok(Self { ts, fields })
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get("event").and_then(Value::as_str)
    }

    /// True when every `(key, value)` of `matcher` is present here.
    pub fn matches(&self, matcher: &Map<String, Value>) -> bool {
        matcher
            .iter()
            .all(|(key, value)| self.fields.get(key) == Some(value))
    }
}

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

pub fn format_event_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Writer side of the log.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: File,
    last_ts: Option<DateTime<Utc>>,
}

impl EventLog {
    /// Create (or truncate) the log.
    pub fn create(path: &Path) -> Result<Self, HarnessError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| HarnessError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            last_ts: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event` stamped with the current time.
    pub fn log(&mut self, event: impl Into<Event>) -> Result<EventRecord, HarnessError> {
        self.log_at(event, Utc::now())
    }

    /// Append `event` stamped `at`, clamped so timestamps never decrease.
    pub fn log_at(&mut self, event: impl Into<Event>, at: DateTime<Utc>) -> Result<EventRecord, HarnessError> {
        let event = event.into();
        let ts = match self.last_ts {
            Some(last) if last > at => last,
            _ => at,
        };

        let mut fields = event.fields.clone();
        fields.remove("ts");
        let mut raw = serde_json::to_string(&Line {
            ts: format_event_ts(ts),
            fields: &fields,
        })?;
        raw.push('\n');
        self.file
            .write_all(raw.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| HarnessError::io(&self.path, e))?;

        self.last_ts = Some(ts);
        tracing::debug!(event = ?event.name(), ts = %format_event_ts(ts), "event logged");
        Ok(EventRecord {
            ts,
            fields: event.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_bare_string_becomes_event_field() {
        let event = Event::from("run_start");
        assert_eq!(event.fields().get("event"), Some(&json!("run_start")));
        let event = Event::from(json!({"event": "deployment", "name": "nodes"}));
        assert_eq!(event.name(), Some("deployment"));
    }

    #[test]
    fn test_lines_are_json_with_ts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(EVENTS_FILE);
        let mut log = EventLog::create(&path).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        log.log_at("run_start", t0).unwrap();
        log.log_at(Event::new("deployment").with("name", "nodes"), t0).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"ts":"2024-05-01T12:00:00.000000Z""#));
        let record = EventRecord::parse_line(lines[1]).unwrap();
        assert_eq!(record.ts, t0);
        assert_eq!(record.fields["name"], json!("nodes"));
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::create(&dir.path().join(EVENTS_FILE)).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        log.log_at("a", later).unwrap();
        let record = log.log_at("b", earlier).unwrap();
        assert_eq!(record.ts, later);
    }

    #[test]
    fn test_matches_is_superset_check() {
        let record = EventRecord::parse_line(
            r#"{"ts":"2024-05-01T12:00:00Z","event":"deployment","name":"nodes"}"#,
        )
        .unwrap();
        let Value::Object(matcher) = json!({"event": "deployment"}) else {
            unreachable!()
        };
        assert!(record.matches(&matcher));
        let Value::Object(matcher) = json!({"event": "deployment", "name": "other"}) else {
            unreachable!()
        };
        assert!(!record.matches(&matcher));
    }

    #[test]
    fn test_malformed_lines() {
        assert!(EventRecord::parse_line("not json").is_err());
        assert!(EventRecord::parse_line(r#"{"event":"x"}"#).is_err());
        assert!(EventRecord::parse_line("[1,2]").is_err());
    }
}
