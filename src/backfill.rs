//! Historical backfill: scan a past date range and turn confident event
//! mentions into calendar events.
//!
//! [`validate`] is the only way to obtain a [`BackfillPlan`], and a plan is
//! live only when the caller set `confirm`. Every check runs before any
//! message is listed. A dry run computes the same report a live run would,
//! without creating events, queueing items, or persisting run stats.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::approval::{ApprovalQueue, EnqueueResult};
use crate::db::SharedDb;
use crate::discovery::pipeline::{approval_item, fetch_message, ItemError};
use crate::discovery::run::{RunHandle, RunRecorder};
use crate::discovery::scorer::{RelevanceScorer, ScoreOutcome};
use crate::error::HearthError;
use crate::fingerprint;
use crate::packs::PackConfig;
use crate::sources::{CalendarSink, MessageSource, SourceError};
use crate::types::{DiscoveryConfig, RejectionReason};

/// Hard ceiling on events per invocation. Larger requests must be batched.
pub const MAX_EVENTS_LIMIT: u32 = 1000;

/// Longest range a single backfill may cover.
pub const MAX_SPAN_DAYS: i64 = 365;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Caller-supplied backfill request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillOptions {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub confirm: bool,
    pub max_events: Option<u32>,
}

/// Proof that the caller explicitly confirmed a live run. Only [`validate`]
/// can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfirmation(());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillMode {
    DryRun,
    Live(LiveConfirmation),
}

/// A validated backfill request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillPlan {
    from: NaiveDate,
    to: NaiveDate,
    max_events: u32,
    mode: BackfillMode,
}

impl BackfillPlan {
    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn max_events(&self) -> u32 {
        self.max_events
    }

    pub fn mode(&self) -> &BackfillMode {
        &self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self.mode, BackfillMode::DryRun)
    }

    /// Mail-provider search covering `from..=to`.
    pub fn query(&self) -> String {
        let before = self.to.succ_opt().unwrap_or(self.to);
        format!(
            "after:{} before:{}",
            self.from.format("%Y/%m/%d"),
            before.format("%Y/%m/%d")
        )
    }
}

/// Check a backfill request. Nothing is read or written.
///
/// `today` is the caller's local date; `to` may be at most one day past it.
/// When both `dry_run` and `confirm` are set the plan is a dry run.
pub fn validate(
    options: &BackfillOptions,
    today: NaiveDate,
    default_max_events: u32,
) -> Result<BackfillPlan, HearthError> {
    let from = parse_date("from", options.from.as_deref())?;
    let to = parse_date("to", options.to.as_deref())?;

    if from > to {
        return Err(HearthError::validation(format!(
            "from ({}) must not be after to ({})",
            from, to
        )));
    }
    let latest = today.succ_opt().unwrap_or(today);
    if to > latest {
        return Err(HearthError::validation(format!(
            "to ({}) is more than one day in the future",
            to
        )));
    }
    let span = (to - from).num_days();
    if span > MAX_SPAN_DAYS {
        return Err(HearthError::validation(format!(
            "range spans {} days; the limit is {}",
            span, MAX_SPAN_DAYS
        )));
    }

    let mode = if options.dry_run {
        BackfillMode::DryRun
    } else if options.confirm {
        BackfillMode::Live(LiveConfirmation(()))
    } else {
        return Err(HearthError::validation(
            "Live backfill requires confirm=true; run with dryRun=true first",
        ));
    };

    let max_events = options.max_events.unwrap_or(default_max_events);
    if max_events == 0 || max_events > MAX_EVENTS_LIMIT {
        return Err(HearthError::validation(format!(
            "maxEvents must be between 1 and {}; got {}",
            MAX_EVENTS_LIMIT, max_events
        )));
    }

    Ok(BackfillPlan {
        from,
        to,
        max_events,
        mode,
    })
}

fn parse_date(field: &str, value: Option<&str>) -> Result<NaiveDate, HearthError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HearthError::validation(format!("{} is required", field)))?;
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
        HearthError::validation(format!("{} must be YYYY-MM-DD, got '{}'", field, value))
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub dry_run: bool,
    pub messages_scanned: u32,
    pub events_extracted: u32,
    /// At or above the conservative threshold with a structured event.
    pub high_confidence: u32,
    pub low_confidence: u32,
    /// New calendar events within the cap. Same value in dry and live runs.
    pub would_create: u32,
    /// Calendar events actually created. Always 0 for a dry run.
    pub events_created: u32,
    /// High-confidence events left for a later batch because the cap was reached.
    pub deferred: u32,
    /// Lower-confidence items sent (or, dry, that would be sent) to the approval queue.
    pub queued_for_approval: u32,
    pub errors: Vec<ItemError>,
}

pub struct BackfillRunner {
    source: Arc<dyn MessageSource>,
    calendar: Arc<dyn CalendarSink>,
    scorer: Arc<RelevanceScorer>,
    db: SharedDb,
    queue: ApprovalQueue,
    recorder: RunRecorder,
    scan_limit: u32,
    default_max_events: u32,
    review_sample_cap: u64,
    timeout: Duration,
}

impl BackfillRunner {
    pub fn new(
        db: SharedDb,
        source: Arc<dyn MessageSource>,
        calendar: Arc<dyn CalendarSink>,
        scorer: Arc<RelevanceScorer>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            source,
            calendar,
            scorer,
            queue: ApprovalQueue::new(db.clone(), config),
            recorder: RunRecorder::new(db.clone(), config.review_sample_cap),
            db,
            scan_limit: config.backfill_scan_limit,
            default_max_events: config.backfill_default_max_events,
            review_sample_cap: config.review_sample_cap,
            timeout: config.call_timeout(),
        }
    }

    /// Validate `options`, then run. Refused requests never touch the mailbox.
    pub async fn backfill(
        &self,
        options: &BackfillOptions,
        today: NaiveDate,
        packs: &[PackConfig],
    ) -> Result<BackfillReport, HearthError> {
        let plan = validate(options, today, self.default_max_events)?;
        self.run(&plan, packs, Arc::new(AtomicBool::new(false))).await
    }

    /// Execute a validated plan. Per-item failures are collected in the report;
    /// a store failure aborts the run.
    pub async fn run(
        &self,
        plan: &BackfillPlan,
        packs: &[PackConfig],
        cancel: Arc<AtomicBool>,
    ) -> Result<BackfillReport, HearthError> {
        let dry_run = plan.is_dry_run();
        let query = plan.query();
        log::info!(
            "Backfill {} {}..{} (max {} events)",
            if dry_run { "dry run" } else { "live" },
            plan.from(),
            plan.to(),
            plan.max_events()
        );

        let ids = tokio::time::timeout(self.timeout, self.source.list_messages(&query, self.scan_limit))
            .await
            .map_err(|_| SourceError::Timeout(self.timeout.as_secs()))??;

        let runs: HashMap<String, RunHandle> = packs
            .iter()
            .map(|p| {
                let handle = if dry_run {
                    RunHandle::new(&p.id, self.review_sample_cap)
                } else {
                    self.recorder.start_run(&p.id)
                };
                (p.id.clone(), handle)
            })
            .collect();

        let mut report = BackfillReport {
            dry_run,
            ..Default::default()
        };
        let mut planned: HashSet<fingerprint::Fingerprint> = HashSet::new();
        // Dry runs only: items that would be queued, keyed like the approval queue.
        let mut planned_queue: HashSet<(fingerprint::Fingerprint, String)> = HashSet::new();

        for id in ids {
            report.messages_scanned += 1;
            let item_error = |e: &dyn std::fmt::Display| ItemError {
                message_id: id.clone(),
                error: e.to_string(),
            };

            if cancel.load(std::sync::atomic::Ordering::SeqCst) {
                for run in runs.values() {
                    run.record_failure();
                }
                report.errors.push(item_error(&SourceError::Cancelled));
                continue;
            }

            let message = match fetch_message(self.source.as_ref(), &id, self.timeout).await {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("Backfill fetch {} failed: {}", id, e);
                    for run in runs.values() {
                        run.record_failure();
                    }
                    report.errors.push(item_error(&e));
                    continue;
                }
            };

            for pack in packs {
                let Some(run) = runs.get(&pack.id) else {
                    continue;
                };
                let scored = match self.scorer.score(&message, pack, run).await {
                    Ok(ScoreOutcome::Included(scored)) => scored,
                    Ok(ScoreOutcome::Excluded { .. }) => continue,
                    Err(e) => {
                        report.errors.push(item_error(&e));
                        continue;
                    }
                };

                if scored.intent.is_some() {
                    report.events_extracted += 1;
                }

                let high = scored.score >= self.scorer.thresholds().conservative;
                let Some(intent) = scored.intent.clone().filter(|_| high) else {
                    report.low_confidence += 1;
                    let item = approval_item(&message, pack, scored);
                    let queued = if dry_run {
                        let key = (item.fingerprint(), pack.id.clone());
                        let active = self.db.lock().find_item_by_fingerprint(&key.0, &key.1)?;
                        if active.is_some() || !planned_queue.insert(key) {
                            run.record_excluded(RejectionReason::Duplicate);
                            false
                        } else {
                            run.record_included(item.relevance_score);
                            true
                        }
                    } else {
                        matches!(self.queue.enqueue(item, run)?, EnqueueResult::Inserted(_))
                    };
                    if queued {
                        report.queued_for_approval += 1;
                    }
                    continue;
                };
                report.high_confidence += 1;

                let fp = fingerprint::generate(&message.id, &intent);
                let already_written = self.db.lock().get_calendar_write(&fp)?.is_some();
                if already_written || !planned.insert(fp.clone()) {
                    log::debug!("Backfill: event for {} already on the calendar", message.id);
                    run.record_excluded(RejectionReason::Duplicate);
                    continue;
                }
                if report.would_create >= plan.max_events() {
                    report.deferred += 1;
                    run.record_excluded(RejectionReason::Other);
                    continue;
                }
                report.would_create += 1;

                if dry_run {
                    run.record_included(scored.score);
                    continue;
                }
                let created =
                    tokio::time::timeout(self.timeout, self.calendar.create_event(&intent))
                        .await
                        .map_err(|_| SourceError::Timeout(self.timeout.as_secs()))
                        .and_then(|r| r);
                match created {
                    Ok(external_id) => {
                        self.db.lock().insert_calendar_write(
                            &fp,
                            &external_id,
                            &pack.id,
                            &message.id,
                            &chrono::Utc::now(),
                        )?;
                        run.record_included(scored.score);
                        report.events_created += 1;
                    }
                    Err(e) => {
                        log::warn!("Backfill: creating event for {} failed: {}", message.id, e);
                        run.record_failure();
                        report.errors.push(item_error(&e));
                    }
                }
            }
        }

        if !dry_run {
            for (_, run) in runs {
                self.recorder.finalize_run(run)?;
            }
        }

        log::info!(
            "Backfill done: scanned={} extracted={} high={} low={} would_create={} created={} errors={}",
            report.messages_scanned,
            report.events_extracted,
            report.high_confidence,
            report.low_confidence,
            report.would_create,
            report.events_created,
            report.errors.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::PendingFilter;
    use crate::db::test_utils::shared_test_db;
    use crate::discovery::classifier::{Classification, EventClassifier};
    use crate::discovery::pipeline::tests::FakeSource;
    use crate::discovery::scorer::tests::message;
    use crate::packs::load_pack;
    use crate::sources::EmailMessage;
    use crate::types::EventIntent;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn options(from: &str, to: &str, dry_run: bool, confirm: bool) -> BackfillOptions {
        BackfillOptions {
            from: Some(from.into()),
            to: Some(to.into()),
            dry_run,
            confirm,
            max_events: None,
        }
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    #[test]
    fn test_live_without_confirm_refused() {
        let err = validate(&options("2025-01-01", "2025-01-02", false, false), date("2025-06-01"), 500)
            .unwrap_err();
        assert!(matches!(err, HearthError::Validation(_)));
    }

    #[test]
    fn test_span_over_a_year_refused() {
        let err = validate(&options("2024-01-01", "2025-06-01", true, false), date("2025-06-01"), 500)
            .unwrap_err();
        assert!(err.to_string().contains("spans"));
        // Exactly 365 days is allowed
        assert!(validate(&options("2024-06-01", "2025-06-01", true, false), date("2025-06-01"), 500).is_ok());
    }

    #[test]
    fn test_oversized_batch_refused() {
        let mut opts = options("2025-01-01", "2025-01-31", true, false);
        opts.max_events = Some(1500);
        assert!(validate(&opts, date("2025-06-01"), 500).is_err());
        opts.max_events = Some(1000);
        assert_eq!(validate(&opts, date("2025-06-01"), 500).unwrap().max_events(), 1000);
        opts.max_events = Some(0);
        assert!(validate(&opts, date("2025-06-01"), 500).is_err());
    }

    #[test]
    fn test_date_checks() {
        let today = date("2025-06-01");
        let missing = BackfillOptions {
            to: Some("2025-01-02".into()),
            dry_run: true,
            ..Default::default()
        };
        assert!(validate(&missing, today, 500).is_err());
        assert!(validate(&options("2025/01/01", "2025-01-02", true, false), today, 500).is_err());
        assert!(validate(&options("2025-01-03", "2025-01-02", true, false), today, 500).is_err());
        // Tomorrow is allowed, the day after is not
        assert!(validate(&options("2025-05-01", "2025-06-02", true, false), today, 500).is_ok());
        assert!(validate(&options("2025-05-01", "2025-06-03", true, false), today, 500).is_err());
    }

    #[test]
    fn test_plan_mode_and_defaults() {
        let today = date("2025-06-01");
        let live = validate(&options("2025-01-01", "2025-01-31", false, true), today, 500).unwrap();
        assert!(matches!(live.mode(), BackfillMode::Live(_)));
        assert_eq!(live.max_events(), 500);
        assert_eq!(live.query(), "after:2025/01/01 before:2025/02/01");

        let both = validate(&options("2025-01-01", "2025-01-31", true, true), today, 500).unwrap();
        assert!(both.is_dry_run());
    }

    #[test]
    fn test_options_deserialize_camel_case() {
        let opts: BackfillOptions = serde_json::from_str(
            r#"{"from": "2025-01-01", "to": "2025-01-31", "dryRun": true, "maxEvents": 50}"#,
        )
        .unwrap();
        assert!(opts.dry_run);
        assert!(!opts.confirm);
        assert_eq!(opts.max_events, Some(50));
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Scores by the first needle found in the text.
    struct ScriptedClassifier {
        rules: Vec<(&'static str, f64)>,
    }

    #[async_trait]
    impl EventClassifier for ScriptedClassifier {
        async fn classify(&self, text: &str, _pack: &PackConfig) -> Result<Classification, SourceError> {
            let score = self
                .rules
                .iter()
                .find(|(needle, _)| text.contains(needle))
                .map(|(_, s)| *s)
                .unwrap_or(0.0);
            Ok(Classification {
                score,
                category: "school_event".into(),
                intent: None,
            })
        }
    }

    #[derive(Default)]
    struct FakeCalendar {
        created: Mutex<Vec<EventIntent>>,
        fail_titles: Vec<&'static str>,
    }

    #[async_trait]
    impl CalendarSink for FakeCalendar {
        async fn create_event(&self, event: &EventIntent) -> Result<String, SourceError> {
            if self.fail_titles.iter().any(|t| event.title.contains(t)) {
                return Err(SourceError::Provider("calendar quota".into()));
            }
            let mut created = self.created.lock();
            created.push(event.clone());
            Ok(format!("evt-{}", created.len()))
        }
    }

    /// Counts list calls so tests can prove nothing was scanned.
    struct CountingSource {
        inner: FakeSource,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageSource for CountingSource {
        async fn list_messages(&self, query: &str, limit: u32) -> Result<Vec<String>, SourceError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.list_messages(query, limit).await
        }

        async fn get_message(&self, id: &str) -> Result<EmailMessage, SourceError> {
            self.inner.get_message(id).await
        }
    }

    fn school(id: &str, subject: &str, body: &str) -> EmailMessage {
        message(id, "Lincoln Elementary <office@lincoln.k12.wa.us>", subject, body)
    }

    fn mailbox() -> Vec<EmailMessage> {
        vec![
            school("m1", "Field trip to the aquarium", "Field trip is October 20 at 9am. [high]"),
            school("m2", "School concert", "The concert is October 28 at 6pm. [high]"),
            school("m3", "Conference sign-up", "Please pick a conference slot. [medium]"),
            message("m4", "ads@shop.com", "Field trip deals", "field trip gear sale"),
        ]
    }

    struct Harness {
        runner: BackfillRunner,
        db: SharedDb,
        calendar: Arc<FakeCalendar>,
        source: Arc<CountingSource>,
    }

    fn harness(calendar: FakeCalendar) -> Harness {
        let db = shared_test_db();
        let config = DiscoveryConfig::default();
        let classifier = ScriptedClassifier {
            rules: vec![("[high]", 0.92), ("[medium]", 0.78)],
        };
        let scorer = Arc::new(RelevanceScorer::new(Arc::new(classifier), &config));
        let calendar = Arc::new(calendar);
        let source = Arc::new(CountingSource {
            inner: FakeSource::new(mailbox()),
            list_calls: AtomicUsize::new(0),
        });
        let runner = BackfillRunner::new(db.clone(), source.clone(), calendar.clone(), scorer, &config);
        Harness {
            runner,
            db,
            calendar,
            source,
        }
    }

    fn october(dry_run: bool, confirm: bool) -> BackfillOptions {
        options("2025-10-01", "2025-10-31", dry_run, confirm)
    }

    fn today() -> NaiveDate {
        date("2025-11-01")
    }

    #[tokio::test]
    async fn test_refused_request_never_scans() {
        let h = harness(FakeCalendar::default());
        let err = h
            .runner
            .backfill(&october(false, false), today(), &[load_pack("school").unwrap()])
            .await
            .unwrap_err();
        assert!(err.is_caller_error());
        assert_eq!(h.source.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutation() {
        let h = harness(FakeCalendar::default());
        let packs = [load_pack("school").unwrap()];
        let report = h.runner.backfill(&october(true, false), today(), &packs).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.messages_scanned, 4);
        assert_eq!(report.events_extracted, 2);
        assert_eq!(report.high_confidence, 2);
        assert_eq!(report.low_confidence, 1);
        assert_eq!(report.would_create, 2);
        assert_eq!(report.events_created, 0);
        assert!(report.errors.is_empty());

        assert!(h.calendar.created.lock().is_empty());
        let queue = ApprovalQueue::new(h.db.clone(), &DiscoveryConfig::default());
        assert!(queue.pending_items(&PendingFilter::default(), Utc::now()).unwrap().is_empty());
        assert!(h.db.lock().recent_runs(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_run_matches_dry_run_and_dedups() {
        let h = harness(FakeCalendar::default());
        let packs = [load_pack("school").unwrap()];
        let dry = h.runner.backfill(&october(true, false), today(), &packs).await.unwrap();
        let live = h.runner.backfill(&october(false, true), today(), &packs).await.unwrap();

        assert_eq!(live.would_create, dry.would_create);
        assert_eq!(live.high_confidence, dry.high_confidence);
        assert_eq!(live.events_created, 2);
        assert_eq!(h.calendar.created.lock().len(), 2);
        assert_eq!(live.queued_for_approval, 1);

        let runs = h.db.lock().recent_runs(Some("school"), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].scanned, 4);
        assert!(runs[0].is_consistent());

        // A second live pass creates nothing new
        let again = h.runner.backfill(&october(false, true), today(), &packs).await.unwrap();
        assert_eq!(again.events_created, 0);
        assert_eq!(again.would_create, 0);
        assert_eq!(h.calendar.created.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_after_live_sees_queued_items() {
        let h = harness(FakeCalendar::default());
        let packs = [load_pack("school").unwrap()];
        let first = h.runner.backfill(&october(false, true), today(), &packs).await.unwrap();
        assert_eq!(first.queued_for_approval, 1);

        let dry = h.runner.backfill(&october(true, false), today(), &packs).await.unwrap();
        let second = h.runner.backfill(&october(false, true), today(), &packs).await.unwrap();

        assert_eq!(dry.queued_for_approval, 0);
        assert_eq!(dry.queued_for_approval, second.queued_for_approval);
        assert_eq!(dry.low_confidence, second.low_confidence);
        assert_eq!(dry.would_create, second.would_create);

        let runs = h.db.lock().recent_runs(Some("school"), 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.is_consistent()));
        let queue = ApprovalQueue::new(h.db.clone(), &DiscoveryConfig::default());
        assert_eq!(queue.pending_items(&PendingFilter::default(), Utc::now()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cap_defers_remaining_events() {
        let h = harness(FakeCalendar::default());
        let packs = [load_pack("school").unwrap()];
        let mut opts = october(false, true);
        opts.max_events = Some(1);
        let report = h.runner.backfill(&opts, today(), &packs).await.unwrap();
        assert_eq!(report.events_created, 1);
        assert_eq!(report.deferred, 1);
    }

    #[tokio::test]
    async fn test_calendar_failure_does_not_abort() {
        let h = harness(FakeCalendar {
            fail_titles: vec!["aquarium"],
            ..Default::default()
        });
        let packs = [load_pack("school").unwrap()];
        let report = h.runner.backfill(&october(false, true), today(), &packs).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].message_id, "m1");
        assert_eq!(report.events_created, 1);

        let runs = h.db.lock().recent_runs(Some("school"), 1).unwrap();
        assert_eq!(runs[0].error_count, 1);
        assert!(runs[0].is_consistent());
    }
}
