use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::types::{
    ConfidenceBucket, DispositionState, EventIntent, RejectionReason, SuggestionStatus,
};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Failed to encode column {column}: {message}")]
    Encode { column: &'static str, message: String },
}

/// A row from the `approval_items` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbApprovalItem {
    /// Opaque capability token for approve/reject/dismiss links.
    pub token: String,
    pub message_id: String,
    pub pack_id: String,
    pub fingerprint: Fingerprint,
    pub relevance_score: f64,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub snippet: String,
    /// When the source message was received.
    pub message_date: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
    pub primary_category: String,
    pub assigned_person: Option<String>,
    pub event: Option<EventIntent>,
    /// Set when no structured event could be extracted.
    pub needs_manual_completion: bool,
    pub state: DispositionState,
    pub disposed_at: Option<DateTime<Utc>>,
    pub disposed_by: Option<String>,
}

impl DbApprovalItem {
    /// Escalation is display-only: pending and at least `escalation_days` old.
    pub fn is_escalated(&self, now: DateTime<Utc>, escalation_days: i64) -> bool {
        self.state == DispositionState::Pending
            && now - self.discovered_at >= Duration::days(escalation_days)
    }

    /// "event" when a structured event was extracted, otherwise "message".
    pub fn item_type(&self) -> &'static str {
        if self.event.is_some() {
            "event"
        } else {
            "message"
        }
    }
}

/// A row from the `dismissals` table. Write-once audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDismissal {
    pub token: String,
    pub item_type: String,
    pub subject: String,
    pub sender: String,
    pub original_date: DateTime<Utc>,
    pub assigned_person: Option<String>,
    pub pack_id: String,
    pub reason: String,
    pub dismissed_at: DateTime<Utc>,
    pub dismissed_by: Option<String>,
}

/// A row from the `suggested_domains` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSuggestedDomain {
    pub id: String,
    pub domain: String,
    pub pack_id: String,
    pub email_count: i64,
    pub matched_keywords: Vec<String>,
    pub sample_subjects: Vec<String>,
    pub confidence: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: SuggestionStatus,
    pub rejection_reason: Option<String>,
    pub permanent: bool,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Flagged items per confidence bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceHistogram {
    pub very_low: u64,
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub very_high: u64,
}

impl ConfidenceHistogram {
    pub fn from_counts(counts: [u64; 5]) -> Self {
        Self {
            very_low: counts[0],
            low: counts[1],
            medium: counts[2],
            high: counts[3],
            very_high: counts[4],
        }
    }

    pub fn get(&self, bucket: ConfidenceBucket) -> u64 {
        match bucket {
            ConfidenceBucket::VeryLow => self.very_low,
            ConfidenceBucket::Low => self.low,
            ConfidenceBucket::Medium => self.medium,
            ConfidenceBucket::High => self.high,
            ConfidenceBucket::VeryHigh => self.very_high,
        }
    }

    pub fn total(&self) -> u64 {
        self.very_low + self.low + self.medium + self.high + self.very_high
    }
}

/// Scanned-but-not-flagged messages per reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBreakdown {
    pub domain: u64,
    pub keyword_no_match: u64,
    pub low_score: u64,
    pub duplicate: u64,
    pub other: u64,
}

impl RejectionBreakdown {
    pub fn from_counts(counts: [u64; 5]) -> Self {
        Self {
            domain: counts[0],
            keyword_no_match: counts[1],
            low_score: counts[2],
            duplicate: counts[3],
            other: counts[4],
        }
    }

    pub fn get(&self, reason: RejectionReason) -> u64 {
        match reason {
            RejectionReason::Domain => self.domain,
            RejectionReason::KeywordNoMatch => self.keyword_no_match,
            RejectionReason::LowScore => self.low_score,
            RejectionReason::Duplicate => self.duplicate,
            RejectionReason::Other => self.other,
        }
    }

    pub fn total(&self) -> u64 {
        self.domain + self.keyword_no_match + self.low_score + self.duplicate + self.other
    }
}

/// One immutable row per discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRunStats {
    pub run_id: String,
    pub pack_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: u64,
    pub flagged: u64,
    pub histogram: ConfidenceHistogram,
    pub sampled_for_review: u64,
    pub rejections: RejectionBreakdown,
    /// Per-item external failures; already counted under `rejections.other`.
    pub error_count: u64,
}

impl DiscoveryRunStats {
    /// Discovery yield: flagged / scanned, 0 for an empty run.
    pub fn yield_rate(&self) -> f64 {
        if self.scanned == 0 {
            0.0
        } else {
            self.flagged as f64 / self.scanned as f64
        }
    }

    /// Both accounting identities hold.
    pub fn is_consistent(&self) -> bool {
        self.histogram.total() == self.flagged
            && self.scanned == self.flagged + self.rejections.total()
    }
}
