//! Tracks account login so the sync tour can be marked complete.
//!
//! The tracker queries the account service once on `init`, then follows
//! login/logout notifications. Completion is sticky: a logout clears the
//! in-memory login flag but never the `completed` preference.

use serde::{Deserialize, Serialize};

use crate::host::{AuthService, HostError, NotificationBus, PreferenceStore, Subscriber, Topic};
use crate::preferences::tour_completed_pref;

pub const SYNC_TOUR_ID: &str = "onboarding-tour-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    Login,
    Logout,
}

impl AuthEvent {
    pub const fn from_topic(topic: Topic) -> Option<Self> {
        match topic {
            Topic::AuthLogin => Some(Self::Login),
            Topic::AuthLogout => Some(Self::Logout),
            Topic::BrowserReady | Topic::SessionRestored => None,
        }
    }

    pub const fn topic(self) -> Topic {
        match self {
            Self::Login => Topic::AuthLogin,
            Self::Logout => Topic::AuthLogout,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    pub logged_in: bool,
    pub registered: bool,
}

/// Coarse tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Unregistered,
    RegisteredLoggedOut,
    RegisteredLoggedIn,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginTracker {
    state: LoginState,
    completion_marked: bool,
}

impl LoginTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn status(&self) -> TrackerStatus {
        match (self.state.registered, self.state.logged_in) {
            (false, _) => TrackerStatus::Unregistered,
            (true, false) => TrackerStatus::RegisteredLoggedOut,
            (true, true) => TrackerStatus::RegisteredLoggedIn,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.logged_in
    }

    pub fn is_registered(&self) -> bool {
        self.state.registered
    }

    /// True once the sync tour was marked complete in this process.
    pub fn completion_marked(&self) -> bool {
        self.completion_marked
    }

    /// Query the account service, mark completion if signed in, then
    /// subscribe to future changes.
    pub fn init<H>(&mut self, host: &mut H) -> Result<(), HostError>
    where
        H: AuthService + NotificationBus + PreferenceStore + ?Sized,
    {
        if host.signed_in_user()?.is_some() {
            self.set_complete(host)?;
        }
        self.register(host)?;
        Ok(())
    }

    /// Subscribe to login/logout. Returns `false` if already subscribed.
    pub fn register<B: NotificationBus + ?Sized>(&mut self, bus: &mut B) -> Result<bool, HostError> {
        if self.state.registered {
            return Ok(false);
        }
        bus.add_observer(Topic::AuthLogin, Subscriber::LoginTracker)?;
        bus.add_observer(Topic::AuthLogout, Subscriber::LoginTracker)?;
        self.state.registered = true;
        Ok(true)
    }

    /// Returns `false` if there was nothing to remove.
    pub fn unregister<B: NotificationBus + ?Sized>(
        &mut self,
        bus: &mut B,
    ) -> Result<bool, HostError> {
        if !self.state.registered {
            return Ok(false);
        }
        bus.remove_observer(Topic::AuthLogin, Subscriber::LoginTracker)?;
        bus.remove_observer(Topic::AuthLogout, Subscriber::LoginTracker)?;
        self.state.registered = false;
        Ok(true)
    }

    pub fn observe<S: PreferenceStore + ?Sized>(
        &mut self,
        prefs: &mut S,
        event: AuthEvent,
    ) -> Result<(), HostError> {
        match event {
            AuthEvent::Login => self.set_complete(prefs),
            AuthEvent::Logout => {
                self.state.logged_in = false;
                Ok(())
            }
        }
    }

    pub fn uninit<B: NotificationBus + ?Sized>(&mut self, bus: &mut B) -> Result<bool, HostError> {
        self.unregister(bus)
    }

    fn set_complete<S: PreferenceStore + ?Sized>(&mut self, prefs: &mut S) -> Result<(), HostError> {
        self.state.logged_in = true;
        prefs.set_bool(&tour_completed_pref(SYNC_TOUR_ID), true)?;
        self.completion_marked = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mocks::RecordingHost;

    const SYNC_PREF: &str = "browser.onboarding.tour.onboarding-tour-sync.completed";

    #[test]
    fn init_when_signed_in_marks_completion_and_registers() {
        let mut host = RecordingHost::new().with_signed_in_user("user@example.org");
        let mut tracker = LoginTracker::new();
        tracker.init(&mut host).unwrap();

        assert_eq!(tracker.status(), TrackerStatus::RegisteredLoggedIn);
        assert!(tracker.completion_marked());
        assert_eq!(host.prefs().get_bool(SYNC_PREF), Some(true));
        assert_eq!(host.subscription_count(Topic::AuthLogin), 1);
        assert_eq!(host.subscription_count(Topic::AuthLogout), 1);
    }

    #[test]
    fn init_when_signed_out_only_registers() {
        let mut host = RecordingHost::new();
        let mut tracker = LoginTracker::new();
        tracker.init(&mut host).unwrap();

        assert_eq!(tracker.status(), TrackerStatus::RegisteredLoggedOut);
        assert!(!tracker.is_logged_in());
        assert_eq!(host.prefs().get_bool(SYNC_PREF), None);
    }

    #[test]
    fn register_twice_keeps_one_subscription() {
        let mut host = RecordingHost::new();
        let mut tracker = LoginTracker::new();
        assert!(tracker.register(&mut host).unwrap());
        assert!(!tracker.register(&mut host).unwrap());
        assert_eq!(host.subscription_count(Topic::AuthLogin), 1);
        assert_eq!(host.subscription_count(Topic::AuthLogout), 1);
    }

    #[test]
    fn init_after_direct_register_does_not_duplicate() {
        let mut host = RecordingHost::new();
        let mut tracker = LoginTracker::new();
        tracker.register(&mut host).unwrap();
        tracker.init(&mut host).unwrap();
        assert_eq!(host.subscription_count(Topic::AuthLogin), 1);
    }

    #[test]
    fn logout_after_login_keeps_completion_sticky() {
        let mut host = RecordingHost::new();
        let mut tracker = LoginTracker::new();
        tracker.init(&mut host).unwrap();

        tracker.observe(&mut host, AuthEvent::Login).unwrap();
        assert!(tracker.is_logged_in());
        tracker.observe(&mut host, AuthEvent::Logout).unwrap();

        assert!(!tracker.is_logged_in());
        assert!(tracker.completion_marked());
        assert_eq!(host.prefs().get_bool(SYNC_PREF), Some(true));
    }

    #[test]
    fn repeated_login_is_idempotent() {
        let mut host = RecordingHost::new();
        let mut tracker = LoginTracker::new();
        tracker.observe(&mut host, AuthEvent::Login).unwrap();
        tracker.observe(&mut host, AuthEvent::Login).unwrap();
        assert!(tracker.is_logged_in());
        assert_eq!(host.prefs().get_bool(SYNC_PREF), Some(true));
    }

    #[test]
    fn uninit_is_safe_when_unregistered() {
        let mut host = RecordingHost::new();
        let mut tracker = LoginTracker::new();
        assert!(!tracker.uninit(&mut host).unwrap());

        tracker.register(&mut host).unwrap();
        assert!(tracker.uninit(&mut host).unwrap());
        assert!(!tracker.uninit(&mut host).unwrap());
        assert_eq!(host.subscription_count(Topic::AuthLogin), 0);
        assert_eq!(tracker.status(), TrackerStatus::Unregistered);
    }

    #[test]
    fn auth_failure_propagates_and_leaves_tracker_unregistered() {
        let mut host = RecordingHost::new().failing_service("auth");
        let mut tracker = LoginTracker::new();
        let err = tracker.init(&mut host).unwrap_err();
        assert_eq!(err.error_code(), "STUDY-HOST-0001");
        assert!(!tracker.is_registered());
    }

    #[test]
    fn auth_events_map_from_topics() {
        assert_eq!(AuthEvent::from_topic(Topic::AuthLogin), Some(AuthEvent::Login));
        assert_eq!(AuthEvent::from_topic(Topic::AuthLogout), Some(AuthEvent::Logout));
        assert_eq!(AuthEvent::from_topic(Topic::BrowserReady), None);
        assert_eq!(AuthEvent::Logout.topic(), Topic::AuthLogout);
    }
}
