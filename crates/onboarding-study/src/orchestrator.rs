//! Lifecycle Orchestrator.
//!
//! Sequences the host's install/startup/shutdown/uninstall calls for the
//! study. Startup configures the telemetry collaborator, fixes the
//! variation, gates fresh installs on eligibility, writes the onboarding
//! preferences and then either starts the onboarding surface or defers it
//! until the browser reports ready.
//!
//! Shutdown is deliberately called twice when the user removes the
//! add-on: the first call ends the study, which makes the host uninstall
//! the add-on and call shutdown again. The phase the second call arrives
//! in (`Ending`) is what tells it to unload modules.
//!
//! The host may interleave other calls with any collaborator call. Before
//! each side-effecting step of startup the orchestrator re-checks whether
//! the study has begun ending and halts if it has.

use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeError, BridgeOutcome, ContentMessageBridge, IgnoreReason, InboundMessage, ONBOARDING_FRAME_SCRIPT};
use crate::config::{AddonInfo, ConfigError, ExperimentConfig, StudySetup};
use crate::event_log::{EventLog, LogLevel, StudyEvent};
use crate::host::{EndingReason, HostError, StudyHost, StudyTelemetry, Subscriber, Topic};
use crate::lifecycle::{LifecyclePhase, PhaseError, PhaseTracker, PhaseTransition, PhaseTransitionRecord};
use crate::login_tracker::{AuthEvent, LoginTracker};
use crate::preferences::{ONBOARDING_BRANCH, PreferenceError, PreferenceGateway, fresh_install_baseline};
use crate::reason::{LifecycleReason, RawReason};
use crate::tours::TourPreferenceSet;
use crate::variation::{VariationAssignment, VariationChooser, VariationError};

const COMPONENT: &str = "study_orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupOutcome {
    /// Fresh install failed the eligibility check; the study was ended.
    Ineligible,
    /// The study began ending while startup was in progress.
    Halted,
    /// Waiting for the browser-ready notification.
    Deferred,
    Running,
}

impl StartupOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ineligible => "ineligible",
            Self::Halted => "halted",
            Self::Deferred => "deferred",
            Self::Running => "running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// User-initiated disable/uninstall; the study was asked to end.
    EndingRequested,
    /// Second shutdown of an ending study; modules were unloaded.
    Unloaded,
    /// Modules were already unloaded by an earlier shutdown.
    AlreadyUnloaded,
    /// Ordinary shutdown; the study stays enrolled.
    Released,
}

impl ShutdownOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EndingRequested => "ending_requested",
            Self::Unloaded => "unloaded",
            Self::AlreadyUnloaded => "already_unloaded",
            Self::Released => "released",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    BrowserReady,
    TrackerStarted,
    AuthObserved { event: AuthEvent },
    Ignored { topic: Topic },
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Variation(#[from] VariationError),
    #[error(transparent)]
    Preference(#[from] PreferenceError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Phase(#[from] PhaseError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("startup called in phase `{phase}`")]
    AlreadyStarted { phase: LifecyclePhase },
}

impl OrchestratorError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Config(err) => err.error_code(),
            Self::Variation(err) => err.error_code(),
            Self::Preference(err) => err.error_code(),
            Self::Bridge(err) => err.error_code(),
            Self::Phase(err) => err.error_code(),
            Self::Host(err) => err.error_code(),
            Self::AlreadyStarted { .. } => "STUDY-ORCH-0001",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudyOrchestrator {
    config: ExperimentConfig,
    gateway: PreferenceGateway,
    phases: PhaseTracker,
    assignment: Option<VariationAssignment>,
    tracker: LoginTracker,
    bridge: ContentMessageBridge,
    awaiting_browser_ready: bool,
    awaiting_session_restore: bool,
    log: EventLog,
    trace_seq: u64,
}

impl StudyOrchestrator {
    pub fn new(config: ExperimentConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let log = EventLog::new(config.log.bootstrap.level());
        Ok(Self {
            config,
            gateway: PreferenceGateway::default(),
            phases: PhaseTracker::new(),
            assignment: None,
            tracker: LoginTracker::new(),
            bridge: ContentMessageBridge::new(),
            awaiting_browser_ready: false,
            awaiting_session_restore: false,
            log,
            trace_seq: 0,
        })
    }

    /// Replace the content-writable preference whitelist.
    pub fn with_gateway(mut self, gateway: PreferenceGateway) -> Self {
        self.gateway = gateway;
        self
    }

    // -----------------------------------------------------------------------
    // Host lifecycle entry points
    // -----------------------------------------------------------------------

    pub fn install(&mut self, reason: RawReason) -> Option<LifecycleReason> {
        let trace_id = self.next_trace_id("install");
        self.emit(
            StudyEvent::new(&trace_id, COMPONENT, "install")
                .level(LogLevel::Info)
                .with("reason", reason),
        );
        reason.known()
    }

    pub fn uninstall(&mut self, reason: RawReason) -> Option<LifecycleReason> {
        let trace_id = self.next_trace_id("uninstall");
        self.emit(
            StudyEvent::new(&trace_id, COMPONENT, "uninstall")
                .level(LogLevel::Info)
                .with("reason", reason),
        );
        reason.known()
    }

    pub fn startup<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        addon: &AddonInfo,
        reason: RawReason,
    ) -> Result<StartupOutcome, OrchestratorError> {
        let trace_id = self.next_trace_id("startup");
        let result = self.run_startup(host, addon, reason, &trace_id);
        if let Ok(outcome) = &result {
            self.emit(
                StudyEvent::new(&trace_id, COMPONENT, "startup_complete")
                    .outcome(outcome.as_str())
                    .level(LogLevel::Info)
                    .with("phase", self.phases.phase()),
            );
        }
        self.record_failure(&trace_id, "startup", result)
    }

    /// Delivery of an observer-bus notification.
    pub fn handle_notification<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        topic: Topic,
    ) -> Result<NotificationOutcome, OrchestratorError> {
        let trace_id = self.next_trace_id("notify");
        let result = self.run_notification(host, topic, &trace_id);
        self.record_failure(&trace_id, "notification", result)
    }

    /// A message from content on the onboarding channel.
    pub fn handle_content_message<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        message: &InboundMessage,
    ) -> Result<BridgeOutcome, OrchestratorError> {
        let trace_id = self.next_trace_id("content");
        let result = if self.ending_guard(&*host, &trace_id)? {
            Ok(BridgeOutcome::Ignored {
                reason: IgnoreReason::StudyEnding,
            })
        } else {
            self.bridge
                .dispatch(host, &self.gateway, &self.tracker, message)
                .map_err(OrchestratorError::from)
        };
        if let Ok(outcome) = &result {
            let event = match outcome {
                BridgeOutcome::PrefsApplied { report } => {
                    StudyEvent::new(&trace_id, COMPONENT, "content_set_prefs")
                        .with("applied", report.applied.len())
                        .with("skipped", report.skipped.len())
                }
                BridgeOutcome::LoginStatusSent { is_logged_in } => {
                    StudyEvent::new(&trace_id, COMPONENT, "content_login_status")
                        .with("is_logged_in", is_logged_in)
                        .with("target", message.target.0)
                }
                BridgeOutcome::Ignored { reason } => {
                    let event = StudyEvent::new(&trace_id, COMPONENT, "content_ignored").outcome("ignored");
                    match reason {
                        IgnoreReason::UnknownAction { action } => event.with("action", action),
                        IgnoreReason::NotListening => event.with("reason", "not_listening"),
                        IgnoreReason::StudyEnding => event.with("reason", "study_ending"),
                    }
                }
            };
            self.emit(event);
        }
        self.record_failure(&trace_id, "content_message", result)
    }

    /// Ask the study collaborator to end the study. Returns `false` when
    /// the study was already ending, in which case nothing is sent.
    pub fn end_study<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        reason: EndingReason,
    ) -> Result<bool, OrchestratorError> {
        let trace_id = self.next_trace_id("end_study");
        let result = self.run_end_study(host, reason, &trace_id);
        self.record_failure(&trace_id, "end_study", result)
    }

    pub fn shutdown<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        reason: RawReason,
    ) -> Result<ShutdownOutcome, OrchestratorError> {
        let trace_id = self.next_trace_id("shutdown");
        let result = self.run_shutdown(host, reason, &trace_id);
        if let Ok(outcome) = &result {
            self.emit(
                StudyEvent::new(&trace_id, COMPONENT, "shutdown_complete")
                    .outcome(outcome.as_str())
                    .level(LogLevel::Info)
                    .with("phase", self.phases.phase()),
            );
        }
        self.record_failure(&trace_id, "shutdown", result)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phases.phase()
    }

    pub fn phase_history(&self) -> &[PhaseTransitionRecord] {
        self.phases.history()
    }

    pub fn assignment(&self) -> Option<&VariationAssignment> {
        self.assignment.as_ref()
    }

    pub fn tour_preferences(&self) -> Option<TourPreferenceSet> {
        self.assignment.as_ref().map(TourPreferenceSet::for_assignment)
    }

    pub fn tracker(&self) -> &LoginTracker {
        &self.tracker
    }

    pub fn bridge(&self) -> &ContentMessageBridge {
        &self.bridge
    }

    pub fn is_awaiting_browser_ready(&self) -> bool {
        self.awaiting_browser_ready
    }

    pub fn events(&self) -> &[StudyEvent] {
        self.log.events()
    }

    pub fn drain_events(&mut self) -> Vec<StudyEvent> {
        self.log.drain()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn run_startup<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        addon: &AddonInfo,
        reason: RawReason,
        trace_id: &str,
    ) -> Result<StartupOutcome, OrchestratorError> {
        let phase = self.phases.phase();
        if phase != LifecyclePhase::NotStarted {
            return Err(OrchestratorError::AlreadyStarted { phase });
        }
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "startup")
                .level(LogLevel::Info)
                .with("reason", reason),
        );

        host.setup(&StudySetup::new(&self.config.study, addon))?;
        host.set_logging_level(self.config.log.study_utils.level())?;

        let assignment = match &self.assignment {
            Some(cached) => cached.clone(),
            None => VariationChooser::choose(&self.config.study, host)?,
        };
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "variation_chosen")
                .level(LogLevel::Info)
                .with("variation", &assignment.name)
                .with("source", assignment.source),
        );
        host.set_variation(&assignment)?;
        let tours = TourPreferenceSet::for_assignment(&assignment);
        self.assignment = Some(assignment);

        for module in &self.config.modules {
            host.import_module(module)?;
            self.log.emit(StudyEvent::new(trace_id, COMPONENT, "module_imported").with("module", module));
        }

        let fresh_install = reason.is(LifecycleReason::AddonInstall);
        if fresh_install {
            host.first_seen()?;
            if !host.is_eligible()? {
                if self.ending_guard(&*host, trace_id)? {
                    return Ok(self.halted(trace_id, "eligibility"));
                }
                self.begin_ending(host, EndingReason::Ineligible, trace_id)?;
                return Ok(StartupOutcome::Ineligible);
            }
        }
        if self.ending_guard(&*host, trace_id)? {
            return Ok(self.halted(trace_id, "eligibility"));
        }

        host.startup(reason)?;
        if self.ending_guard(&*host, trace_id)? {
            return Ok(self.halted(trace_id, "study_startup"));
        }

        if fresh_install {
            host.delete_branch(ONBOARDING_BRANCH)?;
            let baseline = fresh_install_baseline();
            let derived = tours.preference_writes();
            let mut written = 0usize;
            for (name, value) in baseline.iter().chain(derived.iter()) {
                if self.ending_guard(&*host, trace_id)? {
                    self.emit(
                        StudyEvent::new(trace_id, COMPONENT, "fresh_install_prefs")
                            .outcome("partial")
                            .with("written", written),
                    );
                    return Ok(self.halted(trace_id, "fresh_install_prefs"));
                }
                value.write_to(host, name)?;
                written += 1;
            }
            self.emit(
                StudyEvent::new(trace_id, COMPONENT, "fresh_install_prefs")
                    .with("written", written)
                    .with("tour_order", tours.tour_order_string()),
            );
            if self.ending_guard(&*host, trace_id)? {
                return Ok(self.halted(trace_id, "fresh_install_prefs"));
            }
        }

        if host.is_starting_up() {
            // A failed earlier attempt may have left one of these in place.
            if !self.awaiting_browser_ready {
                host.add_observer(Topic::BrowserReady, Subscriber::Bootstrap)?;
                self.awaiting_browser_ready = true;
            }
            if !self.awaiting_session_restore {
                host.add_observer(Topic::SessionRestored, Subscriber::Bootstrap)?;
                self.awaiting_session_restore = true;
            }
            self.phases.apply(PhaseTransition::Defer)?;
            return Ok(StartupOutcome::Deferred);
        }

        self.phases.apply(PhaseTransition::Activate)?;
        self.start_onboarding(host)?;
        self.tracker.init(host)?;
        Ok(StartupOutcome::Running)
    }

    fn run_notification<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        topic: Topic,
        trace_id: &str,
    ) -> Result<NotificationOutcome, OrchestratorError> {
        if self.ending_guard(&*host, trace_id)? {
            return Ok(self.ignored(trace_id, topic));
        }
        match topic {
            Topic::BrowserReady => {
                if !self.awaiting_browser_ready {
                    return Ok(self.ignored(trace_id, topic));
                }
                host.remove_observer(Topic::BrowserReady, Subscriber::Bootstrap)?;
                self.awaiting_browser_ready = false;
                self.phases.apply(PhaseTransition::Activate)?;
                self.start_onboarding(host)?;
                self.emit(StudyEvent::new(trace_id, COMPONENT, "browser_ready").level(LogLevel::Info));
                Ok(NotificationOutcome::BrowserReady)
            }
            Topic::SessionRestored => {
                if !self.awaiting_session_restore {
                    return Ok(self.ignored(trace_id, topic));
                }
                host.remove_observer(Topic::SessionRestored, Subscriber::Bootstrap)?;
                self.awaiting_session_restore = false;
                self.tracker.init(host)?;
                self.emit(
                    StudyEvent::new(trace_id, COMPONENT, "login_tracker_started")
                        .with("logged_in", self.tracker.is_logged_in()),
                );
                Ok(NotificationOutcome::TrackerStarted)
            }
            Topic::AuthLogin | Topic::AuthLogout => {
                let Some(event) = AuthEvent::from_topic(topic) else {
                    return Ok(self.ignored(trace_id, topic));
                };
                if !self.tracker.is_registered() {
                    return Ok(self.ignored(trace_id, topic));
                }
                self.tracker.observe(host, event)?;
                self.emit(StudyEvent::new(trace_id, COMPONENT, "auth_observed").with("topic", topic));
                Ok(NotificationOutcome::AuthObserved { event })
            }
        }
    }

    fn run_end_study<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        reason: EndingReason,
        trace_id: &str,
    ) -> Result<bool, OrchestratorError> {
        if self.ending_guard(&*host, trace_id)? {
            self.emit(
                StudyEvent::new(trace_id, COMPONENT, "end_study_skipped")
                    .outcome("already_ending")
                    .with("reason", reason),
            );
            return Ok(false);
        }
        self.begin_ending(host, reason, trace_id)?;
        Ok(true)
    }

    fn run_shutdown<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        reason: RawReason,
        trace_id: &str,
    ) -> Result<ShutdownOutcome, OrchestratorError> {
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "shutdown")
                .level(LogLevel::Info)
                .with("reason", reason)
                .with("phase", self.phases.phase()),
        );

        let terminating = reason
            .known()
            .is_some_and(LifecycleReason::is_disable_or_uninstall);
        let outcome = if !terminating {
            if self.phases.can_apply(PhaseTransition::Release) {
                self.phases.apply(PhaseTransition::Release)?;
            }
            ShutdownOutcome::Released
        } else if !self.ending_guard(&*host, trace_id)? {
            // First requestor: the user disabled or removed the add-on.
            self.begin_ending(host, EndingReason::UserDisable, trace_id)?;
            ShutdownOutcome::EndingRequested
        } else if self.phases.phase() == LifecyclePhase::Ended {
            ShutdownOutcome::AlreadyUnloaded
        } else {
            self.unload_modules(host, trace_id)?;
            self.phases.apply(PhaseTransition::Finish)?;
            ShutdownOutcome::Unloaded
        };

        self.teardown(host, trace_id)?;
        Ok(outcome)
    }

    /// Tour-type check, frame script, content listener.
    fn start_onboarding<H: StudyHost + ?Sized>(&mut self, host: &mut H) -> Result<(), OrchestratorError> {
        host.check_tour_type()?;
        host.load_frame_script(ONBOARDING_FRAME_SCRIPT, true)?;
        self.bridge.start(host)?;
        Ok(())
    }

    fn begin_ending<H: StudyTelemetry + ?Sized>(
        &mut self,
        host: &mut H,
        reason: EndingReason,
        trace_id: &str,
    ) -> Result<(), OrchestratorError> {
        self.phases.apply(PhaseTransition::BeginEnding)?;
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "study_ending")
                .level(LogLevel::Warn)
                .with("reason", reason),
        );
        host.end_study(reason)?;
        Ok(())
    }

    fn unload_modules<H: StudyHost + ?Sized>(
        &mut self,
        host: &mut H,
        trace_id: &str,
    ) -> Result<(), OrchestratorError> {
        for module in self.config.modules.iter().chain(&self.config.config_modules) {
            host.unload_module(module)?;
            self.log.emit(StudyEvent::new(trace_id, COMPONENT, "module_unloaded").with("module", module));
        }
        Ok(())
    }

    /// Runs on every shutdown. Each step is a no-op when already done.
    fn teardown<H: StudyHost + ?Sized>(&mut self, host: &mut H, trace_id: &str) -> Result<(), OrchestratorError> {
        if self.awaiting_browser_ready {
            host.remove_observer(Topic::BrowserReady, Subscriber::Bootstrap)?;
            self.awaiting_browser_ready = false;
        }
        if self.awaiting_session_restore {
            host.remove_observer(Topic::SessionRestored, Subscriber::Bootstrap)?;
            self.awaiting_session_restore = false;
        }
        let tracker_stopped = self.tracker.uninit(host)?;
        let bridge_stopped = self.bridge.stop(host)?;
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "teardown")
                .with("tracker_stopped", tracker_stopped)
                .with("bridge_stopped", bridge_stopped),
        );
        Ok(())
    }

    /// True if the study is ending, by our own phase or the collaborator's
    /// word. An ending first seen here moves the phase to `Ending`.
    fn ending_guard<T: StudyTelemetry + ?Sized>(
        &mut self,
        telemetry: &T,
        trace_id: &str,
    ) -> Result<bool, OrchestratorError> {
        if self.phases.phase().is_ending_or_ended() {
            return Ok(true);
        }
        if !telemetry.is_ending() {
            return Ok(false);
        }
        self.phases.apply(PhaseTransition::BeginEnding)?;
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "ending_observed")
                .level(LogLevel::Warn)
                .outcome("external"),
        );
        Ok(true)
    }

    fn halted(&mut self, trace_id: &str, step: &str) -> StartupOutcome {
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "startup_halted")
                .level(LogLevel::Warn)
                .outcome("halted")
                .with("step", step),
        );
        StartupOutcome::Halted
    }

    fn ignored(&mut self, trace_id: &str, topic: Topic) -> NotificationOutcome {
        self.emit(
            StudyEvent::new(trace_id, COMPONENT, "notification_ignored")
                .outcome("ignored")
                .with("topic", topic)
                .with("phase", self.phases.phase()),
        );
        NotificationOutcome::Ignored { topic }
    }

    fn record_failure<T>(
        &mut self,
        trace_id: &str,
        operation: &str,
        result: Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        if let Err(err) = &result {
            self.emit(
                StudyEvent::new(trace_id, COMPONENT, &format!("{operation}_failed"))
                    .level(LogLevel::Error)
                    .error_code(err.error_code())
                    .with("error", err),
            );
        }
        result
    }

    fn emit(&mut self, event: StudyEvent) {
        self.log.emit(event);
    }

    fn next_trace_id(&mut self, operation: &str) -> String {
        self.trace_seq += 1;
        format!("{}:{operation}:{}", self.config.study_name(), self.trace_seq)
    }
}
