//! Domain suggestions: senders outside a pack's allow-list that keep
//! producing keyword matches are surfaced for a human to add.
//!
//! Observations aggregate per (domain, pack). A permanent rejection silences
//! the pair for good; a plain rejection re-opens the suggestion when the
//! domain shows up again.

use chrono::Utc;
use serde::Serialize;

use crate::db::{DbSuggestedDomain, SharedDb};
use crate::error::HearthError;
use crate::sources::is_personal_domain;
use crate::types::{DiscoveryConfig, SuggestionStatus};

/// What an observation did to the suggestion table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ObserveOutcome {
    Created { id: String },
    Updated { id: String, email_count: i64 },
    Reopened { id: String },
    /// Permanently rejected, already approved, or not a suggestible domain.
    Ignored,
}

#[derive(Clone)]
pub struct DomainSuggestionEngine {
    db: SharedDb,
    keyword_cap: usize,
    sample_cap: usize,
}

impl DomainSuggestionEngine {
    pub fn new(db: SharedDb, config: &DiscoveryConfig) -> Self {
        Self {
            db,
            keyword_cap: config.suggestion_keyword_cap,
            sample_cap: config.suggestion_sample_cap,
        }
    }

    /// Record that `domain` sent a message matching pack keywords.
    pub fn observe(
        &self,
        domain: &str,
        pack_id: &str,
        matched_keywords: &[String],
        subject: &str,
    ) -> Result<ObserveOutcome, HearthError> {
        let domain = domain.trim().trim_start_matches('@').to_lowercase();
        if domain.is_empty() || is_personal_domain(&domain) {
            return Ok(ObserveOutcome::Ignored);
        }

        let now = Utc::now();
        let db = self.db.lock();
        let existing = db.get_suggestion(&domain, pack_id)?;

        let Some(mut s) = existing else {
            let mut s = DbSuggestedDomain {
                id: uuid::Uuid::new_v4().to_string(),
                domain: domain.clone(),
                pack_id: pack_id.to_string(),
                email_count: 1,
                matched_keywords: Vec::new(),
                sample_subjects: Vec::new(),
                confidence: 0.0,
                first_seen_at: now,
                last_seen_at: now,
                status: SuggestionStatus::Pending,
                rejection_reason: None,
                permanent: false,
                decided_at: None,
            };
            self.merge(&mut s, matched_keywords, subject);
            db.upsert_suggestion(&s)?;
            log::info!("New domain suggestion {} for pack '{}'", domain, pack_id);
            return Ok(ObserveOutcome::Created { id: s.id });
        };

        match s.status {
            SuggestionStatus::Approved => return Ok(ObserveOutcome::Ignored),
            SuggestionStatus::Rejected if s.permanent => {
                log::debug!("{} is permanently rejected for pack '{}'", domain, pack_id);
                return Ok(ObserveOutcome::Ignored);
            }
            _ => {}
        }

        let reopened = s.status == SuggestionStatus::Rejected;
        if reopened {
            s.status = SuggestionStatus::Pending;
            s.rejection_reason = None;
            s.decided_at = None;
        }
        s.email_count += 1;
        s.last_seen_at = now;
        self.merge(&mut s, matched_keywords, subject);
        db.upsert_suggestion(&s)?;

        if reopened {
            log::info!("Re-opened domain suggestion {} for pack '{}'", domain, pack_id);
            Ok(ObserveOutcome::Reopened { id: s.id })
        } else {
            Ok(ObserveOutcome::Updated {
                id: s.id,
                email_count: s.email_count,
            })
        }
    }

    pub fn approve(&self, id: &str) -> Result<DbSuggestedDomain, HearthError> {
        self.decide(id, SuggestionStatus::Approved, None, false)
    }

    /// Reject a suggestion. `permanent` suppresses the domain for this pack indefinitely.
    pub fn reject(
        &self,
        id: &str,
        reason: Option<&str>,
        permanent: bool,
    ) -> Result<DbSuggestedDomain, HearthError> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        self.decide(id, SuggestionStatus::Rejected, reason, permanent)
    }

    pub fn suggestions_by_status(
        &self,
        status: SuggestionStatus,
        pack_id: Option<&str>,
    ) -> Result<Vec<DbSuggestedDomain>, HearthError> {
        Ok(self.db.lock().suggestions_by_status(status, pack_id)?)
    }

    fn decide(
        &self,
        id: &str,
        status: SuggestionStatus,
        reason: Option<&str>,
        permanent: bool,
    ) -> Result<DbSuggestedDomain, HearthError> {
        let db = self.db.lock();
        let current = db
            .get_suggestion_by_id(id)?
            .ok_or_else(|| HearthError::NotFound(id.to_string()))?;
        if current.status != SuggestionStatus::Pending {
            return Err(HearthError::AlreadyDisposed(id.to_string()));
        }
        db.set_suggestion_status(id, status, reason, permanent, &Utc::now())?;
        log::info!(
            "Domain suggestion {} for pack '{}' {}",
            current.domain,
            current.pack_id,
            status
        );
        db.get_suggestion_by_id(id)?
            .ok_or_else(|| HearthError::NotFound(id.to_string()))
    }

    /// Union keywords up to the cap, append the subject while below the
    /// sample cap, and recompute confidence.
    fn merge(&self, s: &mut DbSuggestedDomain, keywords: &[String], subject: &str) {
        for kw in keywords {
            let kw = kw.trim().to_lowercase();
            if s.matched_keywords.len() >= self.keyword_cap {
                break;
            }
            if !kw.is_empty() && !s.matched_keywords.contains(&kw) {
                s.matched_keywords.push(kw);
            }
        }
        let subject = subject.trim();
        if !subject.is_empty() && s.sample_subjects.len() < self.sample_cap {
            s.sample_subjects.push(subject.to_string());
        }
        s.confidence = confidence(s.email_count, s.matched_keywords.len());
    }
}

/// Non-decreasing in both observation count and keyword diversity.
pub fn confidence(email_count: i64, keyword_count: usize) -> f64 {
    let repeats = (email_count.max(1) - 1).min(4) as f64;
    let diversity = keyword_count.min(5) as f64;
    (0.3 + 0.1 * repeats + 0.05 * diversity).min(0.95)
}
