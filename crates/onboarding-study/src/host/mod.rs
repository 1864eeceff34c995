//! Collaborator boundary for host-runtime services.
//!
//! The study controller never talks to the browser directly. Preference
//! storage, the observer bus, frame messaging, module loading, telemetry
//! and the onboarding runtime are all reached through the traits in this
//! module. [`StudyHost`] bundles them so orchestrator entry points take a
//! single `&mut H` the same way every call threads one context.
//!
//! Calls are synchronous from the controller's point of view; a host is
//! free to suspend inside any of them. Re-entrant lifecycle calls (for
//! example the second shutdown triggered by ending the study) arrive as
//! separate calls into the orchestrator, never as callbacks out of a
//! collaborator.

pub mod mocks;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::StudySetup;
use crate::event_log::LogLevel;
use crate::preferences::PrefValue;
use crate::reason::RawReason;
use crate::variation::VariationAssignment;

/// Generic collaborator failure. This layer neither swallows nor retries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum HostError {
    #[error("{service} unavailable: {detail}")]
    Unavailable { service: String, detail: String },
    #[error("{service} rejected request: {detail}")]
    Rejected { service: String, detail: String },
}

impl HostError {
    pub fn unavailable(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub fn rejected(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Rejected {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "STUDY-HOST-0001",
            Self::Rejected { .. } => "STUDY-HOST-0002",
        }
    }
}

/// Observer-bus topics this controller subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// First browser window finished its delayed startup.
    BrowserReady,
    /// Session store restored the previous windows.
    SessionRestored,
    AuthLogin,
    AuthLogout,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Self::BrowserReady,
        Self::SessionRestored,
        Self::AuthLogin,
        Self::AuthLogout,
    ];

    /// Host topic name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BrowserReady => "browser-delayed-startup-finished",
            Self::SessionRestored => "sessionstore-windows-restored",
            Self::AuthLogin => "fxaccounts:onlogin",
            Self::AuthLogout => "fxaccounts:onlogout",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Identity of an observer registered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscriber {
    /// Startup continuation owned by the orchestrator.
    Bootstrap,
    LoginTracker,
}

/// Frame that sent a content message and receives the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageTarget(pub u64);

/// Typed key/value preference storage under dotted paths.
pub trait PreferenceStore {
    fn set_bool(&mut self, name: &str, value: bool) -> Result<(), HostError>;
    fn set_int(&mut self, name: &str, value: i32) -> Result<(), HostError>;
    fn set_string(&mut self, name: &str, value: &str) -> Result<(), HostError>;
    /// Remove `prefix` and every preference below `prefix.`.
    fn delete_branch(&mut self, prefix: &str) -> Result<(), HostError>;
    fn get(&self, name: &str) -> Option<PrefValue>;
}

/// Topic-based observer bus. Adding the same `(topic, subscriber)` twice
/// delivers twice; callers own idempotency.
pub trait NotificationBus {
    fn add_observer(&mut self, topic: Topic, subscriber: Subscriber) -> Result<(), HostError>;
    fn remove_observer(&mut self, topic: Topic, subscriber: Subscriber) -> Result<(), HostError>;
}

/// Account service used by the login tracker.
pub trait AuthService {
    /// Currently signed-in user, if any.
    fn signed_in_user(&mut self) -> Result<Option<String>, HostError>;
}

/// Study telemetry and lifecycle utilities.
pub trait StudyTelemetry {
    fn setup(&mut self, setup: &StudySetup) -> Result<(), HostError>;
    fn set_logging_level(&mut self, level: LogLevel) -> Result<(), HostError>;
    /// Stable per-installation identifier.
    fn telemetry_id(&mut self) -> Result<String, HostError>;
    fn set_variation(&mut self, assignment: &VariationAssignment) -> Result<(), HostError>;
    /// Sends the "enter" ping on first install.
    fn first_seen(&mut self) -> Result<(), HostError>;
    fn startup(&mut self, reason: RawReason) -> Result<(), HostError>;
    /// Reports the ending and deactivates the study; usually uninstalls
    /// the add-on, which re-enters shutdown.
    fn end_study(&mut self, reason: EndingReason) -> Result<(), HostError>;
    /// True once any party has begun ending the study.
    fn is_ending(&self) -> bool;
}

/// Add-on specific eligibility predicate consulted on fresh install.
pub trait EligibilityCheck {
    fn is_eligible(&mut self) -> Result<bool, HostError>;
}

/// Auxiliary module import/unload.
pub trait ModuleLoader {
    fn import_module(&mut self, path: &str) -> Result<(), HostError>;
    fn unload_module(&mut self, path: &str) -> Result<(), HostError>;
}

/// Parent-side frame messaging.
pub trait ContentChannel {
    fn add_message_listener(&mut self, channel: &str) -> Result<(), HostError>;
    fn remove_message_listener(&mut self, channel: &str) -> Result<(), HostError>;
    fn send_async_message(
        &mut self,
        target: MessageTarget,
        channel: &str,
        payload: &Value,
    ) -> Result<(), HostError>;
    fn load_frame_script(&mut self, url: &str, allow_delayed_load: bool) -> Result<(), HostError>;
}

/// Browser startup state and the onboarding UI hooks.
pub trait OnboardingRuntime {
    /// True while the host is still bringing up its first window.
    fn is_starting_up(&self) -> bool;
    fn check_tour_type(&mut self) -> Result<(), HostError>;
}

/// Everything the orchestrator needs from the host.
pub trait StudyHost:
    PreferenceStore
    + NotificationBus
    + AuthService
    + StudyTelemetry
    + EligibilityCheck
    + ModuleLoader
    + ContentChannel
    + OnboardingRuntime
{
}

impl<T> StudyHost for T where
    T: PreferenceStore
        + NotificationBus
        + AuthService
        + StudyTelemetry
        + EligibilityCheck
        + ModuleLoader
        + ContentChannel
        + OnboardingRuntime
        + ?Sized
{
}

/// Reason reported when the study ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndingReason {
    Ineligible,
    UserDisable,
    Expired,
}

impl EndingReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ineligible => "ineligible",
            Self::UserDisable => "user-disable",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for EndingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_name(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::from_name("quit-application"), None);
    }

    #[test]
    fn ending_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&EndingReason::UserDisable).unwrap();
        assert_eq!(json, "\"user-disable\"");
        assert_eq!(EndingReason::UserDisable.to_string(), "user-disable");
    }

    #[test]
    fn host_error_codes_are_stable() {
        assert_eq!(
            HostError::unavailable("telemetry", "offline").error_code(),
            "STUDY-HOST-0001"
        );
        let rejected = HostError::rejected("modules", "bad path");
        assert_eq!(rejected.error_code(), "STUDY-HOST-0002");
        assert_eq!(rejected.to_string(), "modules rejected request: bad path");
    }

    #[test]
    fn host_error_serde_roundtrip() {
        let err = HostError::unavailable("auth", "timeout");
        let json = serde_json::to_string(&err).unwrap();
        let back: HostError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
