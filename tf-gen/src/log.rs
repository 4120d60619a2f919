//! The generated event log: traces of timestamped events with case and event attributes.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{
    BufReader,
    BufWriter,
};
use std::path::Path;

use anyhow::Result;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    instrument,
    warn,
};

use crate::value::Value;

/// Attribute name → value.
pub type Attributes = BTreeMap<String, Value>;

/// Names of the well-known attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogKeys {
    /// Trace attribute holding the case identifier.
    pub case: String,
    /// Event attribute holding the activity name.
    pub activity: String,
    /// Event attribute holding the timestamp.
    pub timestamp: String,
}

impl Default for LogKeys {
    fn default() -> Self {
        Self {
            case: "case:concept:name".into(),
            activity: "concept:name".into(),
            timestamp: "time:timestamp".into(),
        }
    }
}

/// One event: a flat attribute map that includes at least the activity and timestamp.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(pub Attributes);

impl Event {
    /// Value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set `key` to `value`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Timestamp stored under `key`, if there is one.
    #[must_use]
    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(Value::as_timestamp)
    }

    /// Activity name stored under `key`, if there is one.
    #[must_use]
    pub fn activity(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// One simulated case.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Case attributes, including the case identifier.
    pub attributes: Attributes,
    /// Events in the order they happened.
    pub events: Vec<Event>,
}

impl Trace {
    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trace has no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Activity names in order; events without one are skipped.
    #[must_use]
    pub fn activities<'a>(&'a self, key: &str) -> Vec<&'a str> {
        self.events.iter().filter_map(|e| e.activity(key)).collect()
    }
}

/// An ordered collection of traces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    /// Names of the well-known attributes.
    pub keys: LogKeys,
    /// The traces.
    pub traces: Vec<Trace>,
}

impl EventLog {
    /// An empty log using `keys`.
    #[must_use]
    pub const fn new(keys: LogKeys) -> Self {
        Self { keys, traces: Vec::new() }
    }

    /// Number of traces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether there are no traces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Number of events over all traces.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.traces.iter().map(Trace::len).sum()
    }

    /// Case identifier of `trace`.
    #[must_use]
    pub fn case_id<'a>(&self, trace: &'a Trace) -> Option<&'a Value> {
        trace.attributes.get(&self.keys.case)
    }

    /// Parse a log from JSON, turning RFC 3339 strings under the timestamp key back into
    /// timestamps.
    ///
    /// # Errors
    /// Malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut log: Self = serde_json::from_str(json)?;
        log.restore_timestamps();
        Ok(log)
    }

    /// Read a log written by [`EventLog::write_json`].
    ///
    /// # Errors
    /// I/O failures and malformed JSON.
    #[instrument]
    pub fn read_json(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut log: Self = serde_json::from_reader(BufReader::new(file))?;
        log.restore_timestamps();
        Ok(log)
    }

    /// Write the log as pretty-printed JSON.
    ///
    /// # Errors
    /// I/O and serialization failures.
    #[instrument(skip(self), fields(traces = self.len()))]
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Convert string timestamps (as produced by JSON) back into [`Value::Timestamp`].
    fn restore_timestamps(&mut self) {
        let key = self.keys.timestamp.clone();
        for event in self.traces.iter_mut().flat_map(|t| t.events.iter_mut()) {
            let Some(Value::Str(s)) = event.get(&key).cloned() else { continue };
            match DateTime::parse_from_rfc3339(&s) {
                Ok(ts) => event.insert(key.clone(), ts.with_timezone(&Utc)),
                Err(e) => warn!(timestamp = %s, error = %e, "leaving unparseable timestamp as a string"),
            }
        }
    }
}
