//! Study lifecycle phase machine.
//!
//! ```text
//! NotStarted --defer--> WaitingForBrowserReady --activate--> Running
//! NotStarted --activate--> Running
//! {NotStarted, WaitingForBrowserReady, Running} --begin_ending--> Ending --finish--> Ended
//! {WaitingForBrowserReady, Running} --release--> NotStarted
//! ```
//!
//! `Ending` is entered at most once; `Ended` is terminal. A second shutdown
//! is distinguished from the first purely by the phase it arrives in.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    NotStarted,
    WaitingForBrowserReady,
    Running,
    Ending,
    Ended,
}

impl LifecyclePhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::WaitingForBrowserReady => "waiting_for_browser_ready",
            Self::Running => "running",
            Self::Ending => "ending",
            Self::Ended => "ended",
        }
    }

    pub const fn is_ending_or_ended(self) -> bool {
        matches!(self, Self::Ending | Self::Ended)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTransition {
    /// Host UI not ready yet; wait for the browser-ready notification.
    Defer,
    Activate,
    BeginEnding,
    Finish,
    /// Non-terminal shutdown (application exit, upgrade, ...).
    Release,
}

impl PhaseTransition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Defer => "defer",
            Self::Activate => "activate",
            Self::BeginEnding => "begin_ending",
            Self::Finish => "finish",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for PhaseTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

pub const fn phase_target(
    phase: LifecyclePhase,
    transition: PhaseTransition,
) -> Option<LifecyclePhase> {
    use LifecyclePhase as P;
    use PhaseTransition as T;
    match (phase, transition) {
        (P::NotStarted, T::Defer) => Some(P::WaitingForBrowserReady),
        (P::NotStarted, T::Activate) | (P::WaitingForBrowserReady, T::Activate) => Some(P::Running),
        (P::NotStarted, T::BeginEnding)
        | (P::WaitingForBrowserReady, T::BeginEnding)
        | (P::Running, T::BeginEnding) => Some(P::Ending),
        (P::Ending, T::Finish) => Some(P::Ended),
        (P::WaitingForBrowserReady, T::Release) | (P::Running, T::Release) => Some(P::NotStarted),
        _ => None,
    }
}

pub fn allowed_phase_transitions(phase: LifecyclePhase) -> &'static [PhaseTransition] {
    use LifecyclePhase as P;
    use PhaseTransition as T;
    match phase {
        P::NotStarted => &[T::Defer, T::Activate, T::BeginEnding],
        P::WaitingForBrowserReady => &[T::Activate, T::BeginEnding, T::Release],
        P::Running => &[T::BeginEnding, T::Release],
        P::Ending => &[T::Finish],
        P::Ended => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PhaseError {
    #[error("transition `{transition}` is not allowed from phase `{from}`")]
    InvalidTransition {
        from: LifecyclePhase,
        transition: PhaseTransition,
    },
}

impl PhaseError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "STUDY-PHASE-0001",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransitionRecord {
    pub seq: u64,
    pub from: LifecyclePhase,
    pub transition: PhaseTransition,
    pub to: LifecyclePhase,
}

/// Current phase plus the ordered log of every applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTracker {
    phase: LifecyclePhase,
    history: Vec<PhaseTransitionRecord>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: LifecyclePhase::NotStarted,
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseTransitionRecord] {
        &self.history
    }

    pub fn can_apply(&self, transition: PhaseTransition) -> bool {
        phase_target(self.phase, transition).is_some()
    }

    pub fn apply(&mut self, transition: PhaseTransition) -> Result<LifecyclePhase, PhaseError> {
        let from = self.phase;
        let to = phase_target(from, transition)
            .ok_or(PhaseError::InvalidTransition { from, transition })?;
        self.history.push(PhaseTransitionRecord {
            seq: self.history.len() as u64 + 1,
            from,
            transition,
            to,
        });
        self.phase = to;
        Ok(to)
    }

    /// How many times `Ending` was entered. Never more than one.
    pub fn ending_entries(&self) -> usize {
        self.history
            .iter()
            .filter(|record| record.to == LifecyclePhase::Ending)
            .count()
    }
}
