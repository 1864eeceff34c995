//! Structured lifecycle events with host-style level filtering.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Host logging levels, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    All,
    Trace,
    Debug,
    Config,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Config => "Config",
            Self::Info => "Info",
            Self::Warn => "Warn",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }

    pub fn parse(word: &str) -> Option<Self> {
        [
            Self::All,
            Self::Trace,
            Self::Debug,
            Self::Config,
            Self::Info,
            Self::Warn,
            Self::Error,
            Self::Fatal,
        ]
        .into_iter()
        .find(|level| level.as_str() == word)
    }

    /// Unrecognized words log at `Debug`.
    pub fn from_word_or_default(word: &str) -> Self {
        Self::parse(word).unwrap_or(Self::Debug)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// One structured event; keys are stable for downstream evidence tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyEvent {
    pub trace_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub level: LogLevel,
    pub error_code: Option<String>,
    pub detail: BTreeMap<String, String>,
}

impl StudyEvent {
    pub fn new(trace_id: &str, component: &str, event: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            component: component.to_string(),
            event: event.to_string(),
            outcome: "ok".to_string(),
            level: LogLevel::Debug,
            error_code: None,
            detail: BTreeMap::new(),
        }
    }

    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = outcome.to_string();
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn error_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self.outcome = "error".to_string();
        self
    }

    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.detail.insert(key.to_string(), value.to_string());
        self
    }
}

/// Append-only buffer that drops events below its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    threshold: LogLevel,
    events: Vec<StudyEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(LogLevel::Debug)
    }
}

impl EventLog {
    pub fn new(threshold: LogLevel) -> Self {
        Self {
            threshold,
            events: Vec::new(),
        }
    }

    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }

    /// Returns whether the event was kept.
    pub fn emit(&mut self, event: StudyEvent) -> bool {
        if event.level < self.threshold {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn events(&self) -> &[StudyEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<StudyEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::All < LogLevel::Trace);
        assert!(LogLevel::Debug < LogLevel::Config);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Fatal);
    }

    #[test]
    fn unknown_level_words_default_to_debug() {
        assert_eq!(LogLevel::parse("Warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("warn"), None);
        assert_eq!(LogLevel::from_word_or_default("Loud"), LogLevel::Debug);
    }

    #[test]
    fn threshold_filters_quieter_events() {
        let mut log = EventLog::new(LogLevel::Info);
        assert!(!log.emit(StudyEvent::new("t", "c", "noise").level(LogLevel::Debug)));
        assert!(log.emit(StudyEvent::new("t", "c", "signal").level(LogLevel::Warn)));
        assert_eq!(log.events().len(), 1);
        assert_eq!(log.events()[0].event, "signal");
    }

    #[test]
    fn error_code_marks_outcome() {
        let event = StudyEvent::new("t", "c", "failed").error_code("STUDY-X-0001");
        assert_eq!(event.outcome, "error");
        assert_eq!(event.error_code.as_deref(), Some("STUDY-X-0001"));
    }

    #[test]
    fn drain_empties_buffer() {
        let mut log = EventLog::default();
        log.emit(StudyEvent::new("t", "c", "a").with("k", 1));
        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].detail.get("k").map(String::as_str), Some("1"));
        assert!(log.events().is_empty());
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = StudyEvent::new("study:startup:1", "orchestrator", "variation_chosen")
            .level(LogLevel::Info)
            .with("variation", "var3");
        let json = serde_json::to_string(&event).unwrap();
        let back: StudyEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
