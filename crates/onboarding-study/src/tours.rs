//! Per-variation onboarding tour parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::preferences::PrefValue;
use crate::variation::VariationAssignment;

pub const PREF_NEW_TOUR_ORDER: &str = "browser.onboarding.newtour";
pub const PREF_MAX_PROMPT_COUNT: &str = "browser.onboarding.notification.max-prompt-count-per-tour";
pub const PREF_MAX_LIFETIME_MS: &str = "browser.onboarding.notification.max-life-time-per-tour-ms";
pub const PREF_FIRST_SESSION_MUTE_MS: &str =
    "browser.onboarding.notification.mute-duration-on-first-session-ms";

/// Tour ids that carry a `completed` preference.
pub const COMPLETABLE_TOUR_IDS: [&str; 9] = [
    "onboarding-tour-addons",
    "onboarding-tour-customize",
    "onboarding-tour-default-browser",
    "onboarding-tour-library",
    "onboarding-tour-performance",
    "onboarding-tour-private-browsing",
    "onboarding-tour-search",
    "onboarding-tour-singlesearch",
    "onboarding-tour-sync",
];

/// Short tour id used in the `newtour` order string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TourId {
    Private,
    Addons,
    Customize,
    Search,
    Default,
    Sync,
}

impl TourId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Addons => "addons",
            Self::Customize => "customize",
            Self::Search => "search",
            Self::Default => "default",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for TourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Tour configuration derived from the assigned variation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourPreferenceSet {
    pub tour_order: Vec<TourId>,
    pub max_impressions_per_tour: i32,
    pub max_lifetime_per_tour_ms: i32,
    pub first_session_mute_ms: i32,
}

struct TourRow {
    variation: &'static str,
    order: [TourId; 6],
    impressions: i32,
    expires_ms: i32,
    first_session_mute_ms: i32,
}

use TourId as T;

const TOUR_TABLE: [TourRow; 4] = [
    TourRow {
        variation: "var1",
        order: [T::Private, T::Addons, T::Customize, T::Search, T::Default, T::Sync],
        impressions: 4,
        expires_ms: 43_200_000,
        first_session_mute_ms: 120_000,
    },
    TourRow {
        variation: "var2",
        order: [T::Private, T::Search, T::Addons, T::Customize, T::Default, T::Sync],
        impressions: 4,
        expires_ms: 43_200_000,
        first_session_mute_ms: 120_000,
    },
    TourRow {
        variation: "var3",
        order: [T::Private, T::Default, T::Addons, T::Customize, T::Search, T::Sync],
        impressions: 4,
        expires_ms: 43_200_000,
        first_session_mute_ms: 120_000,
    },
    TourRow {
        variation: "var4",
        order: [T::Private, T::Default, T::Addons, T::Customize, T::Search, T::Sync],
        impressions: 2,
        expires_ms: 21_600_000,
        first_session_mute_ms: 60_000,
    },
];

const DEFAULT_ROW: TourRow = TourRow {
    variation: "default",
    order: [T::Private, T::Addons, T::Customize, T::Search, T::Default, T::Sync],
    impressions: 4,
    expires_ms: 86_400_000,
    first_session_mute_ms: 300_000,
};

impl TourPreferenceSet {
    pub fn for_assignment(assignment: &VariationAssignment) -> Self {
        Self::for_variation(&assignment.name)
    }

    /// Unrecognized names get the default row.
    pub fn for_variation(name: &str) -> Self {
        let row = TOUR_TABLE
            .iter()
            .find(|row| row.variation == name)
            .unwrap_or(&DEFAULT_ROW);
        Self {
            tour_order: row.order.to_vec(),
            max_impressions_per_tour: row.impressions,
            max_lifetime_per_tour_ms: row.expires_ms,
            first_session_mute_ms: row.first_session_mute_ms,
        }
    }

    /// Variations with a dedicated row.
    pub fn known_variations() -> impl Iterator<Item = &'static str> {
        TOUR_TABLE.iter().map(|row| row.variation)
    }

    pub fn tour_order_string(&self) -> String {
        self.tour_order
            .iter()
            .map(|tour| tour.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The four derived preferences in host write order.
    pub fn preference_writes(&self) -> [(&'static str, PrefValue); 4] {
        [
            (
                PREF_FIRST_SESSION_MUTE_MS,
                PrefValue::Int(self.first_session_mute_ms),
            ),
            (
                PREF_MAX_LIFETIME_MS,
                PrefValue::Int(self.max_lifetime_per_tour_ms),
            ),
            (
                PREF_MAX_PROMPT_COUNT,
                PrefValue::Int(self.max_impressions_per_tour),
            ),
            (
                PREF_NEW_TOUR_ORDER,
                PrefValue::String(self.tour_order_string()),
            ),
        ]
    }
}
