//! Event post-processing: derive run intervals from `events.log`.
//!
//! Each [`EventMapping`] binds the timestamp of the first matching event to a
//! `/`-separated path in the output tree. Paths ending in `start` / `end` pair
//! up into intervals; an interval is emitted only when both ends were seen,
//! the raw ends are ordered and the shifted interval is still non-empty.
//! Anything else is dropped with a warning and the rest is still emitted.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::HarnessError;
use crate::experiment::EventRecord;

/// Timestamp format of the output tree.
pub const OUTPUT_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(start|end|start_ms|end_ms)\}").expect("valid")
});

#[derive(Debug, Clone, PartialEq)]
pub struct EventMapping {
    matcher: Map<String, Value>,
    target: String,
    shift: TimeDelta,
}

impl EventMapping {
    /// Match on the `event` field alone.
    pub fn new(event: &str, target: &str) -> Self {
        let mut matcher = Map::new();
        matcher.insert("event".to_string(), Value::String(event.to_string()));
        Self::matching(matcher, target)
    }

    /// Match events carrying every field of `matcher`.
    pub fn matching(matcher: Map<String, Value>, target: &str) -> Self {
        Self {
            matcher,
            target: target.trim_matches('/').to_string(),
            shift: TimeDelta::zero(),
        }
    }

    /// Signed offset added to the bound timestamp.
    pub fn shifted(mut self, shift: TimeDelta) -> Self {
        self.shift = shift;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[derive(Debug, Clone, Copy)]
struct Bound {
    raw: DateTime<Utc>,
    shift: TimeDelta,
}

impl Bound {
    fn shifted(&self) -> DateTime<Utc> {
        self.raw + self.shift
    }
}

enum Slot<'a> {
    Start(&'a str),
    End(&'a str),
    Point,
}

fn classify(target: &str) -> Slot<'_> {
    match target.rsplit_once('/') {
        Some((prefix, "start")) => Slot::Start(prefix),
        Some((prefix, "end")) => Slot::End(prefix),
        _ => Slot::Point,
    }
}

pub fn format_output_ts(ts: DateTime<Utc>) -> String {
    ts.format(OUTPUT_TS_FORMAT).to_string()
}

/// Expand `{start}`, `{end}`, `{start_ms}` and `{end_ms}` in `template`.
pub fn expand_link(template: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
        "start" => format_output_ts(start),
        "end" => format_output_ts(end),
        "start_ms" => start.timestamp_millis().to_string(),
        _ => end.timestamp_millis().to_string(),
    })
    .into_owned()
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut node = root;
    for segment in segments {
        let entry = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        node = next;
    }
    node.insert(last.to_string(), value);
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    mappings: Vec<EventMapping>,
    links: BTreeMap<String, String>,
}

impl PostProcessor {
    pub fn new(mappings: Vec<EventMapping>) -> Self {
        Self {
            mappings,
            links: BTreeMap::new(),
        }
    }

    /// Link name to URL template, attached under every emitted interval.
    pub fn with_links(mut self, links: BTreeMap<String, String>) -> Self {
        self.links = links;
        self
    }

    fn bind(&self, events: &[EventRecord]) -> BTreeMap<&str, Bound> {
        let mut bound = BTreeMap::new();
        for mapping in &self.mappings {
            match events.iter().find(|e| e.matches(&mapping.matcher)) {
                Some(event) => {
                    bound.insert(
                        mapping.target.as_str(),
                        Bound {
                            raw: event.ts,
                            shift: mapping.shift,
                        },
                    );
                }
                None => debug!(mapping = %mapping.target, "no event for mapping"),
            }
        }
        bound
    }

    /// Build the output tree.
    pub fn process(&self, events: &[EventRecord]) -> Value {
        let bound = self.bind(events);
        let mut intervals: BTreeMap<&str, (Option<Bound>, Option<Bound>)> = BTreeMap::new();
        let mut out = Map::new();

        for mapping in &self.mappings {
            let target = mapping.target.as_str();
            let value = bound.get(target).copied();
            match classify(target) {
                Slot::Start(prefix) => intervals.entry(prefix).or_default().0 = value,
                Slot::End(prefix) => intervals.entry(prefix).or_default().1 = value,
                Slot::Point => {
                    if let Some(b) = value {
                        insert_path(&mut out, target, Value::String(format_output_ts(b.shifted())));
                    }
                }
            }
        }

        for (name, ends) in intervals {
            let (start, end) = match ends {
                (Some(start), Some(end)) => (start, end),
                (start, end) => {
                    warn!(
                        interval = %name,
                        has_start = start.is_some(),
                        has_end = end.is_some(),
                        "interval not observed in the event log, dropped"
                    );
                    continue;
                }
            };
            if start.raw > end.raw {
                warn!(interval = %name, "interval ends before it starts, dropped");
                continue;
            }
            let (start, end) = (start.shifted(), end.shifted());
            if start >= end {
                warn!(
                    interval = %name,
                    start = %format_output_ts(start),
                    end = %format_output_ts(end),
                    "shifted interval is empty, dropped"
                );
                continue;
            }

            let mut interval = Map::new();
            interval.insert("start".to_string(), Value::String(format_output_ts(start)));
            interval.insert("end".to_string(), Value::String(format_output_ts(end)));
            if !self.links.is_empty() {
                let links = self
                    .links
                    .iter()
                    .map(|(k, template)| (k.clone(), Value::String(expand_link(template, start, end))))
                    .collect();
                interval.insert("links".to_string(), Value::Object(links));
            }
            insert_path(&mut out, name, Value::Object(interval));
        }
        Value::Object(out)
    }

    pub fn process_file(&self, path: &Path) -> Result<Value, HarnessError> {
        Ok(self.process(&read_event_log(path)?))
    }
}

/// Read `events.log`; malformed lines are skipped with a warning.
pub fn read_event_log(path: &Path) -> Result<Vec<EventRecord>, HarnessError> {
    let file = std::fs::File::open(path).map_err(|e| HarnessError::io(path, e))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| HarnessError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match EventRecord::parse_line(&line) {
            Ok(event) => events.push(event),
            Err(reason) => warn!(line = index + 1, reason = %reason, "skipping malformed event"),
        }
    }
    Ok(events)
}

pub fn write_metadata(path: &Path, metadata: &Value) -> Result<(), HarnessError> {
    let raw = serde_json::to_string_pretty(metadata)?;
    std::fs::write(path, raw).map_err(|e| HarnessError::io(path, e))
}

/// `complete` spans the whole run; `stable` trims publisher ramp-up and
/// drain.
pub fn regression_event_mappings() -> Vec<EventMapping> {
    vec![
        EventMapping::new("wait_for_clear_finished", "complete/start"),
        EventMapping::new("internal_run_finished", "complete/end")
            .shifted(TimeDelta::seconds(30)),
        EventMapping::new("publisher_deploy_start", "stable/start")
            .shifted(TimeDelta::minutes(3)),
        EventMapping::new("publisher_messages_finished", "stable/end")
            .shifted(TimeDelta::seconds(-30)),
    ]
}
