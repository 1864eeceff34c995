#![forbid(unsafe_code)]

//! Lifecycle controller for a variation-driven onboarding tour study.
//!
//! [`orchestrator::StudyOrchestrator`] is the entry point; every host
//! service it needs is reached through the traits in [`host`].

pub mod bridge;
pub mod config;
pub mod event_log;
pub mod host;
pub mod lifecycle;
pub mod login_tracker;
pub mod orchestrator;
pub mod preferences;
pub mod reason;
pub mod tours;
pub mod variation;

pub use bridge::{BridgeError, BridgeOutcome, ContentMessageBridge, ContentRequest, InboundMessage};
pub use config::{AddonInfo, ConfigError, ExperimentConfig, StudyConfig, StudySetup};
pub use event_log::{EventLog, LogLevel, StudyEvent};
pub use host::{EndingReason, HostError, StudyHost, Topic};
pub use lifecycle::{LifecyclePhase, PhaseError, PhaseTransition};
pub use login_tracker::{AuthEvent, LoginState, LoginTracker};
pub use orchestrator::{
    NotificationOutcome, OrchestratorError, ShutdownOutcome, StartupOutcome, StudyOrchestrator,
};
pub use preferences::{
    PrefType, PrefValue, PrefWrite, PreferenceError, PreferenceGateway, PreferenceWhitelist,
};
pub use reason::{LifecycleReason, RawReason};
pub use tours::{TourId, TourPreferenceSet};
pub use variation::{VariationAssignment, VariationChooser, VariationError, VariationSource};
