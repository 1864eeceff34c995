//! Preference gateway for writes requested by untrusted content.
//!
//! Only names on the whitelist may be written. Unknown names are skipped
//! silently; a value whose JSON type does not match the declared type
//! fails the whole request before anything is written.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::{HostError, PreferenceStore};
use crate::tours::COMPLETABLE_TOUR_IDS;

/// Root of every preference this add-on owns.
pub const ONBOARDING_BRANCH: &str = "browser.onboarding";

/// Declared storage type of a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefType {
    Bool,
    Int,
    String,
}

impl PrefType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::String => "string",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "string" => Some(Self::String),
            _ => None,
        }
    }
}

impl fmt::Display for PrefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Typed preference value as stored by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Int(i32),
    String(String),
}

impl PrefValue {
    pub const fn pref_type(&self) -> PrefType {
        match self {
            Self::Bool(_) => PrefType::Bool,
            Self::Int(_) => PrefType::Int,
            Self::String(_) => PrefType::String,
        }
    }

    /// Write through the typed setter matching this value.
    pub fn write_to<S: PreferenceStore + ?Sized>(
        &self,
        store: &mut S,
        name: &str,
    ) -> Result<(), HostError> {
        match self {
            Self::Bool(value) => store.set_bool(name, *value),
            Self::Int(value) => store.set_int(name, *value),
            Self::String(value) => store.set_string(name, value),
        }
    }
}

/// One externally settable preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceWhitelistEntry {
    pub name: String,
    pub pref_type: PrefType,
}

/// Closed set of preferences content may ask us to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceWhitelist {
    entries: Vec<PreferenceWhitelistEntry>,
}

impl PreferenceWhitelist {
    /// The onboarding whitelist: notification bookkeeping plus one
    /// `completed` flag per known tour.
    pub fn onboarding() -> Self {
        let mut entries: Vec<PreferenceWhitelistEntry> = [
            ("browser.onboarding.enabled", PrefType::Bool),
            ("browser.onboarding.hidden", PrefType::Bool),
            ("browser.onboarding.notification.finished", PrefType::Bool),
            ("browser.onboarding.notification.prompt-count", PrefType::Int),
            (
                "browser.onboarding.notification.last-time-of-changing-tour-sec",
                PrefType::Int,
            ),
            (
                "browser.onboarding.notification.tour-ids-queue",
                PrefType::String,
            ),
        ]
        .into_iter()
        .map(|(name, pref_type)| PreferenceWhitelistEntry {
            name: name.to_string(),
            pref_type,
        })
        .collect();

        entries.extend(
            COMPLETABLE_TOUR_IDS
                .iter()
                .map(|tour_id| PreferenceWhitelistEntry {
                    name: tour_completed_pref(tour_id),
                    pref_type: PrefType::Bool,
                }),
        );
        Self { entries }
    }

    /// Build a whitelist from `(name, type tag)` pairs, e.g. loaded from data.
    pub fn from_tagged<'a, I>(pairs: I) -> Result<Self, PreferenceError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let entries = pairs
            .into_iter()
            .map(|(name, tag)| {
                PrefType::from_tag(tag)
                    .map(|pref_type| PreferenceWhitelistEntry {
                        name: name.to_string(),
                        pref_type,
                    })
                    .ok_or_else(|| PreferenceError::UnknownTypeTag {
                        name: name.to_string(),
                        tag: tag.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn lookup(&self, name: &str) -> Option<&PreferenceWhitelistEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn entries(&self) -> &[PreferenceWhitelistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PreferenceWhitelist {
    fn default() -> Self {
        Self::onboarding()
    }
}

/// `browser.onboarding.tour.<tour_id>.completed`
pub fn tour_completed_pref(tour_id: &str) -> String {
    format!("{ONBOARDING_BRANCH}.tour.{tour_id}.completed")
}

/// Written on fresh install, after the onboarding branch is cleared.
pub fn fresh_install_baseline() -> [(&'static str, PrefValue); 6] {
    [
        ("browser.onboarding.enabled", PrefValue::Bool(true)),
        // Marks an upgraded profile so the new-user tour set is not offered.
        ("browser.onboarding.tourset-version", PrefValue::Int(1)),
        ("browser.onboarding.hidden", PrefValue::Bool(false)),
        ("browser.onboarding.notification.finished", PrefValue::Bool(false)),
        ("browser.onboarding.updatetour", PrefValue::String(String::new())),
        ("extensions.screenshots.disabled", PrefValue::Bool(false)),
    ]
}

/// One requested write, as carried by the content bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefWrite {
    pub name: String,
    pub value: Value,
}

impl PrefWrite {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What a `set_preferences` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceWriteReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PreferenceError {
    #[error("unexpected type ({actual}) for preference {name}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: PrefType,
        actual: String,
    },
    #[error("unknown type tag `{tag}` declared for preference {name}")]
    UnknownTypeTag { name: String, tag: String },
    #[error(transparent)]
    Host(#[from] HostError),
}

impl PreferenceError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::TypeMismatch { .. } => "STUDY-PREF-0001",
            Self::UnknownTypeTag { .. } => "STUDY-PREF-0002",
            Self::Host(_) => "STUDY-PREF-0003",
        }
    }
}

/// Applies whitelisted writes to the host preference store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceGateway {
    whitelist: PreferenceWhitelist,
}

impl PreferenceGateway {
    pub fn new(whitelist: PreferenceWhitelist) -> Self {
        Self { whitelist }
    }

    pub fn whitelist(&self) -> &PreferenceWhitelist {
        &self.whitelist
    }

    /// Validate every entry, then write the accepted ones in request order.
    ///
    /// A type mismatch on any entry rejects the request with nothing
    /// written; unknown names are reported in `skipped`.
    pub fn set_preferences<S: PreferenceStore + ?Sized>(
        &self,
        store: &mut S,
        entries: &[PrefWrite],
    ) -> Result<PreferenceWriteReport, PreferenceError> {
        let mut report = PreferenceWriteReport::default();
        let mut planned = Vec::with_capacity(entries.len());

        for entry in entries {
            let Some(allowed) = self.whitelist.lookup(&entry.name) else {
                report.skipped.push(entry.name.clone());
                continue;
            };
            let value = coerce_value(&allowed.name, allowed.pref_type, &entry.value)?;
            planned.push((allowed.name.as_str(), value));
        }

        for (name, value) in planned {
            value.write_to(store, name)?;
            report.applied.push(name.to_string());
        }
        Ok(report)
    }
}

fn coerce_value(name: &str, expected: PrefType, value: &Value) -> Result<PrefValue, PreferenceError> {
    let coerced = match expected {
        PrefType::Bool => value.as_bool().map(PrefValue::Bool),
        PrefType::Int => value
            .as_i64()
            .and_then(|raw| i32::try_from(raw).ok())
            .map(PrefValue::Int),
        PrefType::String => value.as_str().map(|raw| PrefValue::String(raw.to_string())),
    };
    coerced.ok_or_else(|| PreferenceError::TypeMismatch {
        name: name.to_string(),
        expected,
        actual: json_type_name(value).to_string(),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_i64() || number.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Deterministic in-memory store used by tests and offline tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryPreferenceStore {
    values: BTreeMap<String, PrefValue>,
    write_count: u64,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(PrefValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        match self.values.get(name) {
            Some(PrefValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(PrefValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn values(&self) -> &BTreeMap<String, PrefValue> {
        &self.values
    }

    /// Total successful writes, deletions excluded.
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    fn put(&mut self, name: &str, value: PrefValue) {
        self.write_count = self.write_count.saturating_add(1);
        self.values.insert(name.to_string(), value);
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn set_bool(&mut self, name: &str, value: bool) -> Result<(), HostError> {
        self.put(name, PrefValue::Bool(value));
        Ok(())
    }

    fn set_int(&mut self, name: &str, value: i32) -> Result<(), HostError> {
        self.put(name, PrefValue::Int(value));
        Ok(())
    }

    fn set_string(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        self.put(name, PrefValue::String(value.to_string()));
        Ok(())
    }

    fn delete_branch(&mut self, prefix: &str) -> Result<(), HostError> {
        let child_prefix = format!("{prefix}.");
        self.values
            .retain(|name, _| name != prefix && !name.starts_with(&child_prefix));
        Ok(())
    }

    fn get(&self, name: &str) -> Option<PrefValue> {
        self.values.get(name).cloned()
    }
}
