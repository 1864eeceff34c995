//! Add-on lifecycle reason codes.
//!
//! The host passes an integer reason with every install/startup/shutdown/
//! uninstall call. Codes map onto a closed enum through a fixed table;
//! anything outside the table is carried as [`RawReason::Unknown`] so it
//! can still be logged by number.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why the host invoked a lifecycle entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleReason {
    /// The application is starting up.
    AppStartup,
    /// The application is shutting down.
    AppShutdown,
    /// The add-on is being enabled.
    AddonEnable,
    /// The add-on is being disabled (also sent during uninstallation).
    AddonDisable,
    /// The add-on is being installed.
    AddonInstall,
    /// The add-on is being uninstalled.
    AddonUninstall,
    /// The add-on is being upgraded.
    AddonUpgrade,
    /// The add-on is being downgraded.
    AddonDowngrade,
}

/// Fixed code table, ordered by code.
pub const REASON_TABLE: [(LifecycleReason, i64); 8] = [
    (LifecycleReason::AppStartup, 1),
    (LifecycleReason::AppShutdown, 2),
    (LifecycleReason::AddonEnable, 3),
    (LifecycleReason::AddonDisable, 4),
    (LifecycleReason::AddonInstall, 5),
    (LifecycleReason::AddonUninstall, 6),
    (LifecycleReason::AddonUpgrade, 7),
    (LifecycleReason::AddonDowngrade, 8),
];

impl LifecycleReason {
    pub const ALL: [LifecycleReason; 8] = [
        Self::AppStartup,
        Self::AppShutdown,
        Self::AddonEnable,
        Self::AddonDisable,
        Self::AddonInstall,
        Self::AddonUninstall,
        Self::AddonUpgrade,
        Self::AddonDowngrade,
    ];

    pub const fn code(self) -> i64 {
        match self {
            Self::AppStartup => 1,
            Self::AppShutdown => 2,
            Self::AddonEnable => 3,
            Self::AddonDisable => 4,
            Self::AddonInstall => 5,
            Self::AddonUninstall => 6,
            Self::AddonUpgrade => 7,
            Self::AddonDowngrade => 8,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::AppStartup),
            2 => Some(Self::AppShutdown),
            3 => Some(Self::AddonEnable),
            4 => Some(Self::AddonDisable),
            5 => Some(Self::AddonInstall),
            6 => Some(Self::AddonUninstall),
            7 => Some(Self::AddonUpgrade),
            8 => Some(Self::AddonDowngrade),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppStartup => "APP_STARTUP",
            Self::AppShutdown => "APP_SHUTDOWN",
            Self::AddonEnable => "ADDON_ENABLE",
            Self::AddonDisable => "ADDON_DISABLE",
            Self::AddonInstall => "ADDON_INSTALL",
            Self::AddonUninstall => "ADDON_UNINSTALL",
            Self::AddonUpgrade => "ADDON_UPGRADE",
            Self::AddonDowngrade => "ADDON_DOWNGRADE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.as_str() == name)
    }

    /// Disable and uninstall are the two user-visible termination reasons.
    pub const fn is_disable_or_uninstall(self) -> bool {
        matches!(self, Self::AddonDisable | Self::AddonUninstall)
    }
}

impl fmt::Display for LifecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Reason exactly as received from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawReason {
    Known(LifecycleReason),
    Unknown(i64),
}

impl RawReason {
    pub const fn from_code(code: i64) -> Self {
        match LifecycleReason::from_code(code) {
            Some(reason) => Self::Known(reason),
            None => Self::Unknown(code),
        }
    }

    pub const fn known(self) -> Option<LifecycleReason> {
        match self {
            Self::Known(reason) => Some(reason),
            Self::Unknown(_) => None,
        }
    }

    pub const fn is(self, reason: LifecycleReason) -> bool {
        match self {
            Self::Known(known) => known as u8 == reason as u8,
            Self::Unknown(_) => false,
        }
    }
}

impl From<LifecycleReason> for RawReason {
    fn from(reason: LifecycleReason) -> Self {
        Self::Known(reason)
    }
}

impl fmt::Display for RawReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(reason) => reason.fmt(f),
            Self::Unknown(code) => write!(f, "{code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_code_and_from_code() {
        for (reason, code) in REASON_TABLE {
            assert_eq!(reason.code(), code);
            assert_eq!(LifecycleReason::from_code(code), Some(reason));
        }
    }

    #[test]
    fn names_resolve_back_to_reasons() {
        for reason in LifecycleReason::ALL {
            assert_eq!(LifecycleReason::from_name(reason.as_str()), Some(reason));
        }
        assert_eq!(LifecycleReason::from_name("ADDON_EXPLODE"), None);
    }

    #[test]
    fn unknown_codes_stay_numeric() {
        let raw = RawReason::from_code(42);
        assert_eq!(raw, RawReason::Unknown(42));
        assert_eq!(raw.known(), None);
        assert_eq!(raw.to_string(), "42");
        assert!(!raw.is(LifecycleReason::AddonInstall));
    }

    #[test]
    fn disable_and_uninstall_are_termination_reasons() {
        let terminating: Vec<_> = LifecycleReason::ALL
            .into_iter()
            .filter(|reason| reason.is_disable_or_uninstall())
            .collect();
        assert_eq!(
            terminating,
            vec![LifecycleReason::AddonDisable, LifecycleReason::AddonUninstall]
        );
    }

    #[test]
    fn reason_serde_uses_host_names() {
        let json = serde_json::to_string(&LifecycleReason::AddonUpgrade).unwrap();
        assert_eq!(json, "\"ADDON_UPGRADE\"");
        let back: LifecycleReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LifecycleReason::AddonUpgrade);
    }
}
