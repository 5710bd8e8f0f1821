//! Approval queue: the human review state machine for discovered items.
//!
//! ```text
//! pending ──approve──▶ approved
//!    │ ────reject───▶ rejected
//!    └─────dismiss──▶ dismissed (row removed, audit record written)
//! ```
//!
//! Every disposition is exactly-once. The conditional update runs while the
//! store mutex is held, so of two concurrent calls on one token exactly one
//! succeeds and the other sees `AlreadyDisposed`. Escalation is derived from
//! item age at read time and never stored.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::approvals::ItemFilter;
use crate::db::{DbApprovalItem, DbDismissal, SharedDb};
use crate::discovery::run::RunHandle;
use crate::error::HearthError;
use crate::fingerprint::{self, Fingerprint};
use crate::packs::PackConfig;
use crate::types::{DiscoveryConfig, DispositionState, EventIntent, RejectionReason};

/// Everything needed to queue a discovered message for review.
#[derive(Debug, Clone)]
pub struct NewApprovalItem {
    pub message_id: String,
    pub pack_id: String,
    pub relevance_score: f64,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub snippet: String,
    pub message_date: DateTime<Utc>,
    pub primary_category: String,
    pub assigned_person: Option<String>,
    pub event: Option<EventIntent>,
    pub needs_manual_completion: bool,
}

impl NewApprovalItem {
    /// Event fingerprint when an event was extracted, otherwise the message fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        match &self.event {
            Some(event) => fingerprint::generate(&self.message_id, event),
            None => fingerprint::generate_for_message(&self.message_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// A new pending item was created with this token.
    Inserted(String),
    /// An active item already holds the fingerprint for this pack.
    Duplicate { existing_token: String },
}

/// A queue row as shown to reviewers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(flatten)]
    pub item: DbApprovalItem,
    pub escalated: bool,
}

/// Filter for [`ApprovalQueue::pending_items`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PendingFilter {
    pub pack_id: Option<String>,
    pub person: Option<String>,
    pub category: Option<String>,
}

#[derive(Clone)]
pub struct ApprovalQueue {
    db: SharedDb,
    escalation_days: i64,
    dismissal_recency_days: i64,
}

impl ApprovalQueue {
    pub fn new(db: SharedDb, config: &DiscoveryConfig) -> Self {
        Self {
            db,
            escalation_days: config.escalation_days,
            dismissal_recency_days: config.dismissal_recency_days,
        }
    }

    /// Compare-and-insert on (fingerprint, pack). The winner is counted in the
    /// run histogram; a loser is counted as a `duplicate` rejection.
    pub fn enqueue(
        &self,
        item: NewApprovalItem,
        run: &RunHandle,
    ) -> Result<EnqueueResult, HearthError> {
        let fingerprint = item.fingerprint();
        let row = DbApprovalItem {
            token: uuid::Uuid::new_v4().to_string(),
            message_id: item.message_id,
            pack_id: item.pack_id,
            fingerprint,
            relevance_score: item.relevance_score,
            sender_email: item.sender_email,
            sender_name: item.sender_name,
            subject: item.subject,
            snippet: item.snippet,
            message_date: item.message_date,
            discovered_at: Utc::now(),
            primary_category: item.primary_category,
            assigned_person: item.assigned_person,
            event: item.event,
            needs_manual_completion: item.needs_manual_completion,
            state: DispositionState::Pending,
            disposed_at: None,
            disposed_by: None,
        };

        let db = self.db.lock();
        if db.insert_approval_item(&row)? {
            run.record_included(row.relevance_score);
            log::debug!(
                "Queued {} for pack '{}' (score {:.2})",
                row.message_id,
                row.pack_id,
                row.relevance_score
            );
            return Ok(EnqueueResult::Inserted(row.token));
        }

        let existing = db
            .find_item_by_fingerprint(&row.fingerprint, &row.pack_id)?
            .map(|e| e.token)
            .unwrap_or_default();
        run.record_excluded(RejectionReason::Duplicate);
        log::debug!(
            "Suppressed duplicate {} for pack '{}' (existing {})",
            row.message_id,
            row.pack_id,
            existing
        );
        Ok(EnqueueResult::Duplicate {
            existing_token: existing,
        })
    }

    /// Approve a pending item and hand it to the digest.
    pub fn approve(&self, token: &str, actor: &str) -> Result<DbApprovalItem, HearthError> {
        let db = self.db.lock();
        let now = Utc::now();
        db.with_transaction(|tx| {
            if tx.set_disposition(token, DispositionState::Approved, actor, &now)? == 0 {
                return Err(disposition_failure(tx, token)?);
            }
            tx.enqueue_for_digest(token, &now)?;
            tx.get_approval_item(token)?
                .ok_or_else(|| HearthError::NotFound(token.to_string()))
        })
        .map(|item| {
            log::info!("Approved {} ({}) by {}", token, item.subject, actor);
            item
        })
    }

    pub fn reject(&self, token: &str, actor: &str) -> Result<DbApprovalItem, HearthError> {
        let db = self.db.lock();
        let now = Utc::now();
        db.with_transaction(|tx| {
            if tx.set_disposition(token, DispositionState::Rejected, actor, &now)? == 0 {
                return Err(disposition_failure(tx, token)?);
            }
            tx.get_approval_item(token)?
                .ok_or_else(|| HearthError::NotFound(token.to_string()))
        })
        .map(|item| {
            log::info!("Rejected {} ({}) by {}", token, item.subject, actor);
            item
        })
    }

    /// Dismiss a pending item with a mandatory reason. Writes the audit record
    /// and removes the item in one transaction.
    pub fn dismiss(
        &self,
        token: &str,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<DbDismissal, HearthError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(HearthError::validation("A dismissal reason is required"));
        }

        let db = self.db.lock();
        let now = Utc::now();
        let record = db.with_transaction(|tx| {
            let item = match tx.get_approval_item(token)? {
                Some(item) if item.state == DispositionState::Pending => item,
                Some(_) => return Err(HearthError::AlreadyDisposed(token.to_string())),
                None => return Err(disposition_failure(tx, token)?),
            };
            let record = DbDismissal {
                token: item.token.clone(),
                item_type: item.item_type().to_string(),
                subject: item.subject.clone(),
                sender: item.sender_email.clone(),
                original_date: item.message_date,
                assigned_person: item.assigned_person.clone(),
                pack_id: item.pack_id.clone(),
                reason: reason.to_string(),
                dismissed_at: now,
                dismissed_by: actor.map(str::to_string),
            };
            tx.insert_dismissal(&record)?;
            tx.delete_pending_item(token)?;
            Ok(record)
        })?;

        log::info!("Dismissed {} ({}): {}", token, record.subject, record.reason);
        Ok(record)
    }

    /// Change an item's category without touching its disposition. The new
    /// category must belong to the item's pack.
    pub fn reclassify(
        &self,
        token: &str,
        category: &str,
        pack: &PackConfig,
    ) -> Result<DbApprovalItem, HearthError> {
        if category.trim().is_empty() {
            return Err(HearthError::validation("Category must not be empty"));
        }
        let db = self.db.lock();
        let item = db
            .get_approval_item(token)?
            .ok_or_else(|| HearthError::NotFound(token.to_string()))?;
        if item.pack_id != pack.id {
            return Err(HearthError::validation(format!(
                "Item {} belongs to pack '{}', not '{}'",
                token, item.pack_id, pack.id
            )));
        }
        let category = pack.canonical_category(category).ok_or_else(|| {
            HearthError::validation(format!(
                "Unknown category '{}' for pack '{}'",
                category.trim(),
                pack.id
            ))
        })?;
        if db.set_primary_category(token, category)? == 0 {
            return Err(HearthError::NotFound(token.to_string()));
        }
        log::info!("Reclassified {} as {}", token, category);
        db.get_approval_item(token)?
            .ok_or_else(|| HearthError::NotFound(token.to_string()))
    }

    pub fn get_item(&self, token: &str) -> Result<Option<QueueEntry>, HearthError> {
        let now = Utc::now();
        Ok(self
            .db
            .lock()
            .get_approval_item(token)?
            .map(|item| self.entry(item, now)))
    }

    /// Pending items matching the filter, oldest first, with escalation derived at `now`.
    pub fn pending_items(
        &self,
        filter: &PendingFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, HearthError> {
        let items = self.db.lock().query_approval_items(&ItemFilter {
            pack_id: filter.pack_id.as_deref(),
            person: filter.person.as_deref(),
            category: filter.category.as_deref(),
            state: Some(DispositionState::Pending),
        })?;
        Ok(items.into_iter().map(|i| self.entry(i, now)).collect())
    }

    pub fn escalated_items(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>, HearthError> {
        Ok(self
            .pending_items(&PendingFilter::default(), now)?
            .into_iter()
            .filter(|e| e.escalated)
            .collect())
    }

    pub fn dismissed_since(&self, since: DateTime<Utc>) -> Result<Vec<DbDismissal>, HearthError> {
        Ok(self.db.lock().dismissals_since(&since)?)
    }

    /// Dismissals inside the configured recency window.
    pub fn recently_dismissed(&self, now: DateTime<Utc>) -> Result<Vec<DbDismissal>, HearthError> {
        self.dismissed_since(now - Duration::days(self.dismissal_recency_days))
    }

    /// Approved items not yet included in a digest.
    pub fn digest_items(&self) -> Result<Vec<DbApprovalItem>, HearthError> {
        Ok(self.db.lock().undelivered_digest_items()?)
    }

    pub fn mark_digest_delivered(&self, tokens: &[String]) -> Result<usize, HearthError> {
        Ok(self.db.lock().mark_digest_delivered(tokens, &Utc::now())?)
    }

    fn entry(&self, item: DbApprovalItem, now: DateTime<Utc>) -> QueueEntry {
        let escalated = item.is_escalated(now, self.escalation_days);
        QueueEntry { item, escalated }
    }
}

/// Classify a disposition that updated no row: dismissed or disposed tokens
/// are `AlreadyDisposed`, anything else is `NotFound`.
fn disposition_failure(db: &crate::db::HearthDb, token: &str) -> Result<HearthError, HearthError> {
    if db.get_dismissal(token)?.is_some() {
        return Ok(HearthError::AlreadyDisposed(token.to_string()));
    }
    match db.get_approval_item(token)? {
        Some(_) => Ok(HearthError::AlreadyDisposed(token.to_string())),
        None => Ok(HearthError::NotFound(token.to_string())),
    }
}
