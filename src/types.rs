use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::HearthError;

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for discovery, approval, and backfill. Every field has a default,
/// so an empty `{}` config file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub thresholds: SensitivityThresholds,
    /// Age in days after which a pending item is shown as escalated.
    #[serde(default = "default_escalation_days")]
    pub escalation_days: i64,
    /// Window for the "recently dismissed" view.
    #[serde(default = "default_dismissal_recency_days")]
    pub dismissal_recency_days: i64,
    /// How many flagged items per run are retained for human audit sampling.
    #[serde(default = "default_review_sample_cap")]
    pub review_sample_cap: u64,
    /// Maximum messages scored concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Timeout applied to every message fetch, classifier call, and calendar write.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_suggestion_keyword_cap")]
    pub suggestion_keyword_cap: usize,
    #[serde(default = "default_suggestion_sample_cap")]
    pub suggestion_sample_cap: usize,
    /// Max events per backfill invocation when the caller does not specify one.
    #[serde(default = "default_backfill_max_events")]
    pub backfill_default_max_events: u32,
    /// Max messages listed per backfill invocation.
    #[serde(default = "default_backfill_scan_limit")]
    pub backfill_scan_limit: u32,
    /// IANA timezone used to interpret dates found in message text.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Database location. Defaults to `~/.hearth/hearth.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

fn default_escalation_days() -> i64 {
    7
}

fn default_dismissal_recency_days() -> i64 {
    7
}

fn default_review_sample_cap() -> u64 {
    20
}

fn default_concurrency() -> usize {
    4
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_suggestion_keyword_cap() -> usize {
    20
}

fn default_suggestion_sample_cap() -> usize {
    5
}

fn default_backfill_max_events() -> u32 {
    500
}

fn default_backfill_scan_limit() -> u32 {
    2000
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            thresholds: SensitivityThresholds::default(),
            escalation_days: default_escalation_days(),
            dismissal_recency_days: default_dismissal_recency_days(),
            review_sample_cap: default_review_sample_cap(),
            concurrency: default_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
            suggestion_keyword_cap: default_suggestion_keyword_cap(),
            suggestion_sample_cap: default_suggestion_sample_cap(),
            backfill_default_max_events: default_backfill_max_events(),
            backfill_scan_limit: default_backfill_scan_limit(),
            timezone: default_timezone(),
            db_path: None,
        }
    }
}

impl DiscoveryConfig {
    /// Parsed timezone, falling back to America/New_York on a bad identifier.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .unwrap_or(chrono_tz::America::New_York)
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs.max(1))
    }

    /// Reject values that would silently disable a guarantee.
    pub fn validate(&self) -> Result<(), HearthError> {
        self.thresholds.validate()?;
        if self.concurrency == 0 {
            return Err(HearthError::Configuration(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.escalation_days < 0 || self.dismissal_recency_days < 0 {
            return Err(HearthError::Configuration(
                "day windows must not be negative".into(),
            ));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(HearthError::Configuration(format!(
                "unknown timezone: {}",
                self.timezone
            )));
        }
        Ok(())
    }
}

/// Load config from a JSON file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<DiscoveryConfig, HearthError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(DiscoveryConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        HearthError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let config: DiscoveryConfig = serde_json::from_str(&content).map_err(|e| {
        HearthError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}

/// Minimum score for each sensitivity tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityThresholds {
    #[serde(default = "default_conservative")]
    pub conservative: f64,
    #[serde(default = "default_balanced")]
    pub balanced: f64,
    #[serde(default = "default_broad")]
    pub broad: f64,
}

fn default_conservative() -> f64 {
    0.85
}

fn default_balanced() -> f64 {
    0.75
}

fn default_broad() -> f64 {
    0.65
}

impl Default for SensitivityThresholds {
    fn default() -> Self {
        Self {
            conservative: default_conservative(),
            balanced: default_balanced(),
            broad: default_broad(),
        }
    }
}

impl SensitivityThresholds {
    /// Threshold for a tier; `None` means the tier never includes anything.
    pub fn for_tier(&self, tier: SensitivityTier) -> Option<f64> {
        match tier {
            SensitivityTier::Conservative => Some(self.conservative),
            SensitivityTier::Balanced => Some(self.balanced),
            SensitivityTier::Broad => Some(self.broad),
            SensitivityTier::Off => None,
        }
    }

    fn validate(&self) -> Result<(), HearthError> {
        for (name, v) in [
            ("conservative", self.conservative),
            ("balanced", self.balanced),
            ("broad", self.broad),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(HearthError::Configuration(format!(
                    "{} threshold {} is outside [0, 1]",
                    name, v
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Closed enumerations
// =============================================================================

/// Implements `as_str`, `Display`, and `FromStr` over a fixed string table.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($name::$variant),)+
                    other => Err(format!("invalid {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

/// Named confidence-threshold preset applied per pack category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityTier {
    Conservative,
    Balanced,
    Broad,
    Off,
}

string_enum!(SensitivityTier {
    Conservative => "conservative",
    Balanced => "balanced",
    Broad => "broad",
    Off => "off",
});

/// Why a scanned message did not become a new pending item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Domain,
    KeywordNoMatch,
    LowScore,
    Duplicate,
    Other,
}

string_enum!(RejectionReason {
    Domain => "domain",
    KeywordNoMatch => "keyword_no_match",
    LowScore => "low_score",
    Duplicate => "duplicate",
    Other => "other",
});

impl RejectionReason {
    pub fn index(&self) -> usize {
        match self {
            RejectionReason::Domain => 0,
            RejectionReason::KeywordNoMatch => 1,
            RejectionReason::LowScore => 2,
            RejectionReason::Duplicate => 3,
            RejectionReason::Other => 4,
        }
    }
}

/// Disposition of a discovered item. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionState {
    Pending,
    Approved,
    Rejected,
    Dismissed,
}

string_enum!(DispositionState {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Dismissed => "dismissed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
}

string_enum!(SuggestionStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Five equal-width confidence buckets for the run histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

string_enum!(ConfidenceBucket {
    VeryLow => "very_low",
    Low => "low",
    Medium => "medium",
    High => "high",
    VeryHigh => "very_high",
});

impl ConfidenceBucket {
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            ConfidenceBucket::VeryLow
        } else if score < 0.4 {
            ConfidenceBucket::Low
        } else if score < 0.6 {
            ConfidenceBucket::Medium
        } else if score < 0.8 {
            ConfidenceBucket::High
        } else {
            ConfidenceBucket::VeryHigh
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ConfidenceBucket::VeryLow => 0,
            ConfidenceBucket::Low => 1,
            ConfidenceBucket::Medium => 2,
            ConfidenceBucket::High => 3,
            ConfidenceBucket::VeryHigh => 4,
        }
    }
}

// =============================================================================
// Event intent
// =============================================================================

/// A candidate calendar event extracted from a message.
///
/// Immutable once produced: reprocessing a message builds a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIntent {
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub all_day: bool,
    /// IANA timezone the event was expressed in.
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}
