//! Discovery scan: list messages, score them concurrently, queue the keepers.
//!
//! Workers are bounded by a semaphore sized from config. Each message fetch
//! and classifier call has a timeout, and a shared cancel flag turns every
//! message not yet started into a per-item failure. A store error is fatal:
//! remaining work is cancelled and the run is not persisted, but rows that
//! already committed stay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::run::{RunHandle, RunRecorder};
use super::scorer::{RelevanceScorer, ScoreOutcome};
use crate::approval::{ApprovalQueue, EnqueueResult, NewApprovalItem};
use crate::db::{DiscoveryRunStats, SharedDb};
use crate::error::HearthError;
use crate::packs::PackConfig;
use crate::sources::{EmailMessage, MessageSource, SourceError};
use crate::suggestions::DomainSuggestionEngine;
use crate::types::{DiscoveryConfig, RejectionReason};

/// A message that failed for an external reason.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub message_id: String,
    pub error: String,
}

/// Result of one scan over one pack.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub stats: DiscoveryRunStats,
    /// Tokens of items newly queued by this scan.
    pub queued: Vec<String>,
    pub errors: Vec<ItemError>,
}

enum ItemResult {
    Queued(String),
    Skipped,
    Failed(ItemError),
}

/// Fetch a message under the call timeout.
pub(crate) async fn fetch_message(
    source: &dyn MessageSource,
    id: &str,
    timeout: Duration,
) -> Result<EmailMessage, SourceError> {
    tokio::time::timeout(timeout, source.get_message(id))
        .await
        .map_err(|_| SourceError::Timeout(timeout.as_secs()))?
}

/// Build a queue item from a scored message.
pub(crate) fn approval_item(
    message: &EmailMessage,
    pack: &PackConfig,
    scored: super::scorer::ScoredMessage,
) -> NewApprovalItem {
    NewApprovalItem {
        message_id: message.id.clone(),
        pack_id: pack.id.clone(),
        relevance_score: scored.score,
        sender_email: message.sender_email(),
        sender_name: message.sender_name(),
        subject: message.subject().to_string(),
        snippet: message.snippet(),
        message_date: message.internal_date,
        primary_category: scored.category,
        assigned_person: pack.person.clone(),
        event: scored.intent,
        needs_manual_completion: scored.needs_manual_completion,
    }
}

#[derive(Clone)]
pub struct DiscoveryPipeline {
    source: Arc<dyn MessageSource>,
    scorer: Arc<RelevanceScorer>,
    queue: ApprovalQueue,
    suggestions: DomainSuggestionEngine,
    recorder: RunRecorder,
    concurrency: usize,
    timeout: Duration,
}

impl DiscoveryPipeline {
    pub fn new(
        db: SharedDb,
        source: Arc<dyn MessageSource>,
        scorer: Arc<RelevanceScorer>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            source,
            scorer,
            queue: ApprovalQueue::new(db.clone(), config),
            suggestions: DomainSuggestionEngine::new(db.clone(), config),
            recorder: RunRecorder::new(db, config.review_sample_cap),
            concurrency: config.concurrency.max(1),
            timeout: config.call_timeout(),
        }
    }

    pub fn queue(&self) -> &ApprovalQueue {
        &self.queue
    }

    pub fn suggestions(&self) -> &DomainSuggestionEngine {
        &self.suggestions
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// Scan up to `limit` messages matching `query` for one pack.
    pub async fn run_scan(
        &self,
        pack: &PackConfig,
        query: &str,
        limit: u32,
        cancel: Arc<AtomicBool>,
    ) -> Result<ScanSummary, HearthError> {
        let ids = tokio::time::timeout(self.timeout, self.source.list_messages(query, limit))
            .await
            .map_err(|_| SourceError::Timeout(self.timeout.as_secs()))??;

        let run = self.recorder.start_run(&pack.id);
        let outcome = self.scan_ids(pack, ids, &run, cancel).await;

        let (queued, errors) = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                log::warn!("Discovery run {} aborted: {}", run.run_id(), e);
                return Err(e);
            }
        };
        let stats = self.recorder.finalize_run(run)?;
        Ok(ScanSummary {
            stats,
            queued,
            errors,
        })
    }

    /// Score `ids` against `pack`, recording every message on `run`.
    pub(crate) async fn scan_ids(
        &self,
        pack: &PackConfig,
        ids: Vec<String>,
        run: &RunHandle,
        cancel: Arc<AtomicBool>,
    ) -> Result<(Vec<String>, Vec<ItemError>), HearthError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let pack = Arc::new(pack.clone());
        let mut set = JoinSet::new();

        for id in ids {
            let this = self.clone();
            let sem = semaphore.clone();
            let pack = pack.clone();
            let run = run.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    run.record_failure();
                    return Ok(ItemResult::Failed(ItemError {
                        message_id: id,
                        error: SourceError::Cancelled.to_string(),
                    }));
                };
                this.process_one(&id, &pack, &run, &cancel).await
            });
        }

        let mut queued = Vec::new();
        let mut errors = Vec::new();
        let mut fatal: Option<HearthError> = None;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(ItemResult::Queued(token))) => queued.push(token),
                Ok(Ok(ItemResult::Skipped)) => {}
                Ok(Ok(ItemResult::Failed(err))) => errors.push(err),
                Ok(Err(e)) => {
                    cancel.store(true, Ordering::SeqCst);
                    fatal.get_or_insert(e);
                }
                Err(join_err) => {
                    log::warn!("Scan worker panicked: {}", join_err);
                    run.record_failure();
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok((queued, errors)),
        }
    }

    async fn process_one(
        &self,
        id: &str,
        pack: &PackConfig,
        run: &RunHandle,
        cancel: &AtomicBool,
    ) -> Result<ItemResult, HearthError> {
        let failed = |e: SourceError| {
            ItemResult::Failed(ItemError {
                message_id: id.to_string(),
                error: e.to_string(),
            })
        };

        if cancel.load(Ordering::SeqCst) {
            run.record_failure();
            return Ok(failed(SourceError::Cancelled));
        }

        let message = match fetch_message(self.source.as_ref(), id, self.timeout).await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Fetching {} failed: {}", id, e);
                run.record_failure();
                return Ok(failed(e));
            }
        };

        let outcome = match self.scorer.score(&message, pack, run).await {
            Ok(o) => o,
            Err(e) => return Ok(failed(e)),
        };

        match outcome {
            ScoreOutcome::Included(scored) => {
                let item = approval_item(&message, pack, scored);
                match self.queue.enqueue(item, run)? {
                    EnqueueResult::Inserted(token) => Ok(ItemResult::Queued(token)),
                    EnqueueResult::Duplicate { .. } => Ok(ItemResult::Skipped),
                }
            }
            ScoreOutcome::Excluded {
                reason: RejectionReason::Domain,
                matched_keywords,
                ..
            } if !matched_keywords.is_empty() => {
                self.suggestions.observe(
                    &message.sender_domain(),
                    &pack.id,
                    &matched_keywords,
                    message.subject(),
                )?;
                Ok(ItemResult::Skipped)
            }
            ScoreOutcome::Excluded { .. } => Ok(ItemResult::Skipped),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::approval::PendingFilter;
    use crate::db::test_utils::shared_test_db;
    use crate::discovery::classifier::HeuristicClassifier;
    use crate::discovery::scorer::tests::{message, FixedClassifier};
    use crate::packs::load_pack;
    use crate::types::SuggestionStatus;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    /// In-memory mailbox. Ids listed in `failing` error on fetch.
    pub(crate) struct FakeSource {
        pub messages: HashMap<String, EmailMessage>,
        pub order: Vec<String>,
        pub failing: Vec<String>,
    }

    impl FakeSource {
        pub fn new(messages: Vec<EmailMessage>) -> Self {
            let order = messages.iter().map(|m| m.id.clone()).collect();
            Self {
                messages: messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
                order,
                failing: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn list_messages(&self, _query: &str, limit: u32) -> Result<Vec<String>, SourceError> {
            Ok(self.order.iter().take(limit as usize).cloned().collect())
        }

        async fn get_message(&self, id: &str) -> Result<EmailMessage, SourceError> {
            if self.failing.iter().any(|f| f == id) {
                return Err(SourceError::Provider("503 from provider".into()));
            }
            self.messages
                .get(id)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(id.to_string()))
        }
    }

    pub(crate) fn mailbox() -> Vec<EmailMessage> {
        vec![
            message(
                "m1",
                "Lincoln Elementary <office@lincoln.k12.wa.us>",
                "Parent-Teacher Conference",
                "Conferences with your child's teacher are October 24 at 3:30 pm.",
            ),
            // Same event mentioned again in a reply
            message(
                "m1",
                "Lincoln Elementary <office@lincoln.k12.wa.us>",
                "Parent-Teacher Conference",
                "Conferences with your child's teacher are October 24 at 3:30 pm.",
            ),
            message(
                "m2",
                "Coach Dana <dana@riverside-soccer.org>",
                "Field trip to the science center",
                "Bus leaves at 9am on Oct 30. Teacher chaperones needed.",
            ),
            message(
                "m3",
                "office@lincoln.k12.wa.us",
                "Cafeteria menu",
                "Tacos Tuesday.",
            ),
            message(
                "m4",
                "Lincoln PTA <news@pta.org>",
                "PTA newsletter",
                "This week's newsletter and weekly update from the school.",
            ),
        ]
    }

    fn pipeline(
        db: SharedDb,
        source: FakeSource,
        classifier: Arc<dyn crate::discovery::classifier::EventClassifier>,
    ) -> DiscoveryPipeline {
        let config = DiscoveryConfig::default();
        let scorer = Arc::new(RelevanceScorer::new(classifier, &config));
        DiscoveryPipeline::new(db, Arc::new(source), scorer, &config)
    }

    #[tokio::test]
    async fn test_scan_reconciles_counters() {
        let db = shared_test_db();
        let p = pipeline(db.clone(), FakeSource::new(mailbox()), Arc::new(HeuristicClassifier));
        let pack = load_pack("school").unwrap();
        let summary = p
            .run_scan(&pack, "newer_than:7d", 50, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let stats = &summary.stats;
        assert_eq!(stats.scanned, 5);
        assert_eq!(stats.flagged, 1);
        assert_eq!(stats.rejections.duplicate, 1);
        assert_eq!(stats.rejections.domain, 1);
        assert_eq!(stats.rejections.keyword_no_match, 1);
        assert_eq!(stats.rejections.other, 1); // newsletter tier is off
        assert!(stats.is_consistent());
        assert_eq!(summary.queued.len(), 1);

        let pending = p.queue().pending_items(&PendingFilter::default(), Utc::now()).unwrap();
        assert_eq!(pending.len(), 1);
        let event = pending[0].item.event.as_ref().expect("event extracted");
        assert_eq!(event.start.to_rfc3339(), "2025-10-24T15:30:00-04:00");

        // Off-list sender with keyword hits becomes a suggestion
        let suggestions = p
            .suggestions()
            .suggestions_by_status(SuggestionStatus::Pending, Some("school"))
            .unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].domain, "riverside-soccer.org");

        let stored = db.lock().get_run_stats(&stats.run_id).unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_rescan_only_counts_duplicates() {
        let db = shared_test_db();
        let pack = load_pack("school").unwrap();
        let p = pipeline(
            db,
            FakeSource::new(vec![mailbox().remove(0)]),
            Arc::new(FixedClassifier::new(0.9, "school_event")),
        );
        let first = p
            .run_scan(&pack, "q", 10, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        let second = p
            .run_scan(&pack, "q", 10, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(first.stats.flagged, 1);
        assert_eq!(second.stats.flagged, 0);
        assert_eq!(second.stats.rejections.duplicate, 1);
        assert!(second.queued.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_abort_batch() {
        let db = shared_test_db();
        let pack = load_pack("school").unwrap();
        let mut source = FakeSource::new(mailbox());
        source.failing = vec!["m3".into()];
        let p = pipeline(db, source, Arc::new(HeuristicClassifier));
        let summary = p
            .run_scan(&pack, "q", 50, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].message_id, "m3");
        assert_eq!(summary.stats.error_count, 1);
        assert!(summary.stats.is_consistent());
        assert_eq!(summary.stats.flagged, 1);
    }

    #[tokio::test]
    async fn test_cancelled_scan_counts_every_message() {
        let db = shared_test_db();
        let pack = load_pack("school").unwrap();
        let p = pipeline(db, FakeSource::new(mailbox()), Arc::new(HeuristicClassifier));
        let summary = p
            .run_scan(&pack, "q", 50, Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();
        assert_eq!(summary.stats.scanned, 5);
        assert_eq!(summary.stats.flagged, 0);
        assert_eq!(summary.stats.error_count, 5);
        assert_eq!(summary.errors.len(), 5);
    }
}
