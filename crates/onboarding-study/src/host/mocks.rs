//! In-memory host that records every collaborator call.
//!
//! Used by unit and integration tests and by offline tooling. Each call is
//! appended to a journal before it takes effect; a whole service can be
//! made to fail, and the study can be flagged as ending the moment a given
//! operation runs, which is how tests interleave a concurrent ending with
//! startup.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::*;
use crate::preferences::InMemoryPreferenceStore;

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostCall {
    Setup(StudySetup),
    SetLoggingLevel(LogLevel),
    TelemetryId,
    SetVariation(VariationAssignment),
    FirstSeen,
    IsEligible,
    Startup(RawReason),
    EndStudy(EndingReason),
    ImportModule(String),
    UnloadModule(String),
    AddMessageListener(String),
    RemoveMessageListener(String),
    SendAsyncMessage {
        target: MessageTarget,
        channel: String,
        payload: Value,
    },
    LoadFrameScript {
        url: String,
        allow_delayed_load: bool,
    },
    CheckTourType,
    SignedInUser,
    AddObserver(Topic, Subscriber),
    RemoveObserver(Topic, Subscriber),
    SetPref {
        name: String,
        value: PrefValue,
    },
    DeleteBranch(String),
}

impl HostCall {
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::SetLoggingLevel(_) => "set_logging_level",
            Self::TelemetryId => "telemetry_id",
            Self::SetVariation(_) => "set_variation",
            Self::FirstSeen => "first_seen",
            Self::IsEligible => "is_eligible",
            Self::Startup(_) => "startup",
            Self::EndStudy(_) => "end_study",
            Self::ImportModule(_) => "import_module",
            Self::UnloadModule(_) => "unload_module",
            Self::AddMessageListener(_) => "add_message_listener",
            Self::RemoveMessageListener(_) => "remove_message_listener",
            Self::SendAsyncMessage { .. } => "send_async_message",
            Self::LoadFrameScript { .. } => "load_frame_script",
            Self::CheckTourType => "check_tour_type",
            Self::SignedInUser => "signed_in_user",
            Self::AddObserver(..) => "add_observer",
            Self::RemoveObserver(..) => "remove_observer",
            Self::SetPref { .. } => "set_pref",
            Self::DeleteBranch(_) => "delete_branch",
        }
    }

    pub const fn service(&self) -> &'static str {
        match self {
            Self::Setup(_)
            | Self::SetLoggingLevel(_)
            | Self::TelemetryId
            | Self::SetVariation(_)
            | Self::FirstSeen
            | Self::Startup(_)
            | Self::EndStudy(_) => "telemetry",
            Self::IsEligible => "eligibility",
            Self::ImportModule(_) | Self::UnloadModule(_) => "modules",
            Self::AddMessageListener(_)
            | Self::RemoveMessageListener(_)
            | Self::SendAsyncMessage { .. }
            | Self::LoadFrameScript { .. } => "content",
            Self::CheckTourType => "runtime",
            Self::SignedInUser => "auth",
            Self::AddObserver(..) | Self::RemoveObserver(..) => "bus",
            Self::SetPref { .. } | Self::DeleteBranch(_) => "prefs",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingHost {
    prefs: InMemoryPreferenceStore,
    observers: Vec<(Topic, Subscriber)>,
    listeners: Vec<String>,
    calls: Vec<HostCall>,
    signed_in_user: Option<String>,
    telemetry_id: String,
    eligible: bool,
    starting_up: bool,
    ending: bool,
    failing_service: Option<&'static str>,
    failing_call: Option<(&'static str, usize)>,
    ending_on: Option<&'static str>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            prefs: InMemoryPreferenceStore::new(),
            observers: Vec::new(),
            listeners: Vec::new(),
            calls: Vec::new(),
            signed_in_user: None,
            telemetry_id: "00000000-0000-4000-8000-000000000000".to_string(),
            eligible: true,
            starting_up: false,
            ending: false,
            failing_service: None,
            failing_call: None,
            ending_on: None,
        }
    }

    pub fn with_signed_in_user(mut self, user: &str) -> Self {
        self.signed_in_user = Some(user.to_string());
        self
    }

    pub fn with_telemetry_id(mut self, id: &str) -> Self {
        self.telemetry_id = id.to_string();
        self
    }

    pub fn with_eligible(mut self, eligible: bool) -> Self {
        self.eligible = eligible;
        self
    }

    pub fn with_starting_up(mut self, starting_up: bool) -> Self {
        self.starting_up = starting_up;
        self
    }

    /// Every call to `service` fails with [`HostError::Unavailable`].
    pub fn failing_service(mut self, service: &'static str) -> Self {
        self.failing_service = Some(service);
        self
    }

    /// Only the `nth` call (1-based) to `op` fails; earlier and later calls succeed.
    pub fn failing_call(mut self, op: &'static str, nth: usize) -> Self {
        self.failing_call = Some((op, nth));
        self
    }

    /// The study starts ending as soon as `op` is called.
    pub fn ending_on(mut self, op: &'static str) -> Self {
        self.ending_on = Some(op);
        self
    }

    pub fn set_starting_up(&mut self, starting_up: bool) {
        self.starting_up = starting_up;
    }

    pub fn set_signed_in_user(&mut self, user: Option<&str>) {
        self.signed_in_user = user.map(str::to_string);
    }

    pub fn set_ending(&mut self, ending: bool) {
        self.ending = ending;
    }

    pub fn prefs(&self) -> &InMemoryPreferenceStore {
        &self.prefs
    }

    pub fn prefs_mut(&mut self) -> &mut InMemoryPreferenceStore {
        &mut self.prefs
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls.iter().map(HostCall::op).collect()
    }

    pub fn count_op(&self, op: &str) -> usize {
        self.calls.iter().filter(|call| call.op() == op).count()
    }

    /// Active subscriptions on `topic`, duplicates included.
    pub fn subscription_count(&self, topic: Topic) -> usize {
        self.observers
            .iter()
            .filter(|(subscribed, _)| *subscribed == topic)
            .count()
    }

    /// Who a notification on `topic` would reach, in subscription order.
    pub fn subscribers(&self, topic: Topic) -> Vec<Subscriber> {
        self.observers
            .iter()
            .filter(|(subscribed, _)| *subscribed == topic)
            .map(|(_, subscriber)| *subscriber)
            .collect()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .iter()
            .filter(|listening| listening.as_str() == channel)
            .count()
    }

    /// Payloads sent on `channel`, in order.
    pub fn sent_messages(&self, channel: &str) -> Vec<(MessageTarget, Value)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HostCall::SendAsyncMessage {
                    target,
                    channel: sent_on,
                    payload,
                } if sent_on == channel => Some((*target, payload.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, call: HostCall) -> Result<(), HostError> {
        let op = call.op();
        let service = call.service();
        self.calls.push(call);
        if self.failing_service == Some(service) {
            return Err(HostError::unavailable(service, format!("injected failure in {op}")));
        }
        if let Some((failing_op, nth)) = self.failing_call
            && failing_op == op
            && self.count_op(op) == nth
        {
            return Err(HostError::unavailable(service, format!("injected failure in {op} #{nth}")));
        }
        if self.ending_on == Some(op) {
            self.ending = true;
        }
        Ok(())
    }
}

impl PreferenceStore for RecordingHost {
    fn set_bool(&mut self, name: &str, value: bool) -> Result<(), HostError> {
        self.record(HostCall::SetPref {
            name: name.to_string(),
            value: PrefValue::Bool(value),
        })?;
        self.prefs.set_bool(name, value)
    }

    fn set_int(&mut self, name: &str, value: i32) -> Result<(), HostError> {
        self.record(HostCall::SetPref {
            name: name.to_string(),
            value: PrefValue::Int(value),
        })?;
        self.prefs.set_int(name, value)
    }

    fn set_string(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        self.record(HostCall::SetPref {
            name: name.to_string(),
            value: PrefValue::String(value.to_string()),
        })?;
        self.prefs.set_string(name, value)
    }

    fn delete_branch(&mut self, prefix: &str) -> Result<(), HostError> {
        self.record(HostCall::DeleteBranch(prefix.to_string()))?;
        self.prefs.delete_branch(prefix)
    }

    fn get(&self, name: &str) -> Option<PrefValue> {
        self.prefs.get(name)
    }
}

impl NotificationBus for RecordingHost {
    fn add_observer(&mut self, topic: Topic, subscriber: Subscriber) -> Result<(), HostError> {
        self.record(HostCall::AddObserver(topic, subscriber))?;
        self.observers.push((topic, subscriber));
        Ok(())
    }

    fn remove_observer(&mut self, topic: Topic, subscriber: Subscriber) -> Result<(), HostError> {
        self.record(HostCall::RemoveObserver(topic, subscriber))?;
        if let Some(index) = self
            .observers
            .iter()
            .position(|entry| *entry == (topic, subscriber))
        {
            self.observers.remove(index);
        }
        Ok(())
    }
}

impl AuthService for RecordingHost {
    fn signed_in_user(&mut self) -> Result<Option<String>, HostError> {
        self.record(HostCall::SignedInUser)?;
        Ok(self.signed_in_user.clone())
    }
}

impl StudyTelemetry for RecordingHost {
    fn setup(&mut self, setup: &StudySetup) -> Result<(), HostError> {
        self.record(HostCall::Setup(setup.clone()))
    }

    fn set_logging_level(&mut self, level: LogLevel) -> Result<(), HostError> {
        self.record(HostCall::SetLoggingLevel(level))
    }

    fn telemetry_id(&mut self) -> Result<String, HostError> {
        self.record(HostCall::TelemetryId)?;
        Ok(self.telemetry_id.clone())
    }

    fn set_variation(&mut self, assignment: &VariationAssignment) -> Result<(), HostError> {
        self.record(HostCall::SetVariation(assignment.clone()))
    }

    fn first_seen(&mut self) -> Result<(), HostError> {
        self.record(HostCall::FirstSeen)
    }

    fn startup(&mut self, reason: RawReason) -> Result<(), HostError> {
        self.record(HostCall::Startup(reason))
    }

    fn end_study(&mut self, reason: EndingReason) -> Result<(), HostError> {
        self.record(HostCall::EndStudy(reason))?;
        self.ending = true;
        Ok(())
    }

    fn is_ending(&self) -> bool {
        self.ending
    }
}

impl EligibilityCheck for RecordingHost {
    fn is_eligible(&mut self) -> Result<bool, HostError> {
        self.record(HostCall::IsEligible)?;
        Ok(self.eligible)
    }
}

impl ModuleLoader for RecordingHost {
    fn import_module(&mut self, path: &str) -> Result<(), HostError> {
        self.record(HostCall::ImportModule(path.to_string()))
    }

    fn unload_module(&mut self, path: &str) -> Result<(), HostError> {
        self.record(HostCall::UnloadModule(path.to_string()))
    }
}

impl ContentChannel for RecordingHost {
    fn add_message_listener(&mut self, channel: &str) -> Result<(), HostError> {
        self.record(HostCall::AddMessageListener(channel.to_string()))?;
        self.listeners.push(channel.to_string());
        Ok(())
    }

    fn remove_message_listener(&mut self, channel: &str) -> Result<(), HostError> {
        self.record(HostCall::RemoveMessageListener(channel.to_string()))?;
        if let Some(index) = self.listeners.iter().position(|name| name == channel) {
            self.listeners.remove(index);
        }
        Ok(())
    }

    fn send_async_message(
        &mut self,
        target: MessageTarget,
        channel: &str,
        payload: &Value,
    ) -> Result<(), HostError> {
        self.record(HostCall::SendAsyncMessage {
            target,
            channel: channel.to_string(),
            payload: payload.clone(),
        })
    }

    fn load_frame_script(&mut self, url: &str, allow_delayed_load: bool) -> Result<(), HostError> {
        self.record(HostCall::LoadFrameScript {
            url: url.to_string(),
            allow_delayed_load,
        })
    }
}

impl OnboardingRuntime for RecordingHost {
    fn is_starting_up(&self) -> bool {
        self.starting_up
    }

    fn check_tour_type(&mut self) -> Result<(), HostError> {
        self.record(HostCall::CheckTourType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_records_calls_in_order() {
        let mut host = RecordingHost::new();
        host.first_seen().unwrap();
        host.import_module("a.jsm").unwrap();
        host.set_bool("browser.onboarding.enabled", true).unwrap();
        assert_eq!(host.ops(), vec!["first_seen", "import_module", "set_pref"]);
    }

    #[test]
    fn failing_call_fails_only_the_nth_call() {
        let mut host = RecordingHost::new().failing_call("add_observer", 2);
        host.add_observer(Topic::BrowserReady, Subscriber::Bootstrap).unwrap();
        assert!(host.add_observer(Topic::SessionRestored, Subscriber::Bootstrap).is_err());
        host.add_observer(Topic::SessionRestored, Subscriber::Bootstrap).unwrap();
        assert_eq!(host.subscription_count(Topic::BrowserReady), 1);
        assert_eq!(host.subscription_count(Topic::SessionRestored), 1);
        assert_eq!(host.count_op("add_observer"), 3);
    }

    #[test]
    fn failing_service_fails_every_call_of_that_service() {
        let mut host = RecordingHost::new().failing_service("modules");
        assert!(host.import_module("a.jsm").is_err());
        assert!(host.unload_module("a.jsm").is_err());
        assert!(host.first_seen().is_ok());
    }

    #[test]
    fn ending_on_flags_the_study() {
        let mut host = RecordingHost::new().ending_on("startup");
        assert!(!host.is_ending());
        host.startup(RawReason::Known(crate::reason::LifecycleReason::AppStartup))
            .unwrap();
        assert!(host.is_ending());
    }

    #[test]
    fn duplicate_observers_are_kept() {
        let mut host = RecordingHost::new();
        host.add_observer(Topic::AuthLogin, Subscriber::LoginTracker)
            .unwrap();
        host.add_observer(Topic::AuthLogin, Subscriber::LoginTracker)
            .unwrap();
        assert_eq!(host.subscription_count(Topic::AuthLogin), 2);
        host.remove_observer(Topic::AuthLogin, Subscriber::LoginTracker)
            .unwrap();
        assert_eq!(
            host.subscribers(Topic::AuthLogin),
            vec![Subscriber::LoginTracker]
        );
    }
}
