//! Relevance scoring: decides whether a message belongs in a pack's queue.
//!
//! Checks run cheapest first and short-circuit:
//! 1. sender on the pack allow-list, else `domain`
//! 2. a pack keyword in subject or body, else `keyword_no_match`
//! 3. classifier confidence at or above the category's tier, else `low_score`
//!
//! The scorer records exclusions on the run handle. Inclusions are recorded
//! by the approval queue when the item is actually inserted, since only then
//! is it known whether the item is new or a duplicate.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;

use super::classifier::EventClassifier;
use super::extract;
use super::run::RunHandle;
use crate::packs::PackConfig;
use crate::sources::{EmailMessage, SourceError};
use crate::types::{DiscoveryConfig, EventIntent, RejectionReason, SensitivityThresholds};

/// A message that cleared every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMessage {
    pub score: f64,
    pub category: String,
    pub intent: Option<EventIntent>,
    /// No structured event could be extracted; a human must fill it in.
    pub needs_manual_completion: bool,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Included(ScoredMessage),
    Excluded {
        reason: RejectionReason,
        /// Present when the classifier ran.
        score: Option<f64>,
        matched_keywords: Vec<String>,
    },
}

impl ScoreOutcome {
    pub fn is_included(&self) -> bool {
        matches!(self, ScoreOutcome::Included(_))
    }
}

pub struct RelevanceScorer {
    classifier: Arc<dyn EventClassifier>,
    thresholds: SensitivityThresholds,
    tz: Tz,
    timeout: Duration,
}

impl RelevanceScorer {
    pub fn new(classifier: Arc<dyn EventClassifier>, config: &DiscoveryConfig) -> Self {
        Self {
            classifier,
            thresholds: config.thresholds,
            tz: config.tz(),
            timeout: config.call_timeout(),
        }
    }

    pub fn thresholds(&self) -> &SensitivityThresholds {
        &self.thresholds
    }

    /// Score one message and record any exclusion on `run`.
    ///
    /// A classifier failure or timeout is recorded as a per-item failure and
    /// returned as `Err`; the caller moves on to the next message.
    pub async fn score(
        &self,
        message: &EmailMessage,
        pack: &PackConfig,
        run: &RunHandle,
    ) -> Result<ScoreOutcome, SourceError> {
        match self.evaluate(message, pack).await {
            Ok(outcome) => {
                if let ScoreOutcome::Excluded { reason, .. } = &outcome {
                    run.record_excluded(*reason);
                }
                Ok(outcome)
            }
            Err(e) => {
                run.record_failure();
                log::warn!("Scoring {} for pack '{}' failed: {}", message.id, pack.id, e);
                Err(e)
            }
        }
    }

    async fn evaluate(
        &self,
        message: &EmailMessage,
        pack: &PackConfig,
    ) -> Result<ScoreOutcome, SourceError> {
        if !pack.allows_sender(&message.sender_email(), &message.sender_domain()) {
            let matched = pack.matched_keywords(&message.text_for_scoring());
            return Ok(ScoreOutcome::Excluded {
                reason: RejectionReason::Domain,
                score: None,
                matched_keywords: matched,
            });
        }

        let text = message.text_for_scoring();
        let matched = pack.matched_keywords(&text);
        if matched.is_empty() {
            return Ok(ScoreOutcome::Excluded {
                reason: RejectionReason::KeywordNoMatch,
                score: None,
                matched_keywords: matched,
            });
        }

        let classification = tokio::time::timeout(self.timeout, self.classifier.classify(&text, pack))
            .await
            .map_err(|_| SourceError::Timeout(self.timeout.as_secs()))??;

        if !classification.score.is_finite() {
            return Err(SourceError::Malformed(format!(
                "classifier returned non-finite score for {}",
                message.id
            )));
        }
        let score = classification.score.clamp(0.0, 1.0);
        let category = if classification.category.trim().is_empty() {
            pack.default_category.clone()
        } else {
            classification.category
        };

        let Some(threshold) = pack.threshold_for(&category, &self.thresholds) else {
            log::debug!("{}: category '{}' is off for pack '{}'", message.id, category, pack.id);
            return Ok(ScoreOutcome::Excluded {
                reason: RejectionReason::Other,
                score: Some(score),
                matched_keywords: matched,
            });
        };
        if score < threshold {
            return Ok(ScoreOutcome::Excluded {
                reason: RejectionReason::LowScore,
                score: Some(score),
                matched_keywords: matched,
            });
        }

        let intent = classification.intent.or_else(|| {
            extract::extract_event(message.subject(), &message.body, message.internal_date, self.tz)
        });
        let needs_manual_completion = intent.is_none();

        Ok(ScoreOutcome::Included(ScoredMessage {
            score,
            category,
            intent,
            needs_manual_completion,
            matched_keywords: matched,
        }))
    }
}
