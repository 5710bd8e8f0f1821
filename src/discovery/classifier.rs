//! Scoring contract for relevance classifiers, plus the built-in heuristic.
//!
//! An AI-backed classifier lives outside this crate and implements
//! [`EventClassifier`]. The heuristic below needs no provider and is what
//! runs when none is configured.

use async_trait::async_trait;

use super::extract;
use crate::packs::PackConfig;
use crate::sources::SourceError;
use crate::types::EventIntent;

/// Classifier verdict for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Confidence in [0, 1] that the message describes a relevant event or obligation.
    pub score: f64,
    /// One of the pack's category names.
    pub category: String,
    /// Structured event, when the classifier can produce one.
    pub intent: Option<EventIntent>,
}

#[async_trait]
pub trait EventClassifier: Send + Sync {
    async fn classify(&self, text: &str, pack: &PackConfig) -> Result<Classification, SourceError>;
}

const BASE_SCORE: f64 = 0.45;
const PACK_KEYWORD_WEIGHT: f64 = 0.08;
const PACK_KEYWORD_CAP: usize = 4;
const CATEGORY_KEYWORD_WEIGHT: f64 = 0.12;
const CATEGORY_KEYWORD_CAP: usize = 2;
const DATE_MENTION_BONUS: f64 = 0.1;
const MAX_HEURISTIC_SCORE: f64 = 0.98;

/// Keyword-weighted scorer. Picks the category with the most keyword hits
/// (pack order breaks ties, the default category wins when nothing hits) and
/// raises confidence for keyword diversity and an explicit date.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn score_text(text: &str, pack: &PackConfig) -> Classification {
        let matched = pack.matched_keywords(text);

        let mut best: Option<(&str, usize)> = None;
        for category in &pack.categories {
            let hits = category
                .keywords
                .iter()
                .filter(|k| matched.iter().any(|m| m.eq_ignore_ascii_case(k.trim())))
                .count();
            if hits > 0 && best.map_or(true, |(_, n)| hits > n) {
                best = Some((category.name.as_str(), hits));
            }
        }
        let (category, category_hits) = best.unwrap_or((pack.default_category.as_str(), 0));

        let mut score = BASE_SCORE
            + PACK_KEYWORD_WEIGHT * matched.len().min(PACK_KEYWORD_CAP) as f64
            + CATEGORY_KEYWORD_WEIGHT * category_hits.min(CATEGORY_KEYWORD_CAP) as f64;
        if extract::mentions_date(text) {
            score += DATE_MENTION_BONUS;
        }
        if matched.is_empty() {
            score = 0.0;
        }

        Classification {
            score: score.clamp(0.0, MAX_HEURISTIC_SCORE),
            category: category.to_string(),
            intent: None,
        }
    }
}

#[async_trait]
impl EventClassifier for HeuristicClassifier {
    async fn classify(&self, text: &str, pack: &PackConfig) -> Result<Classification, SourceError> {
        Ok(Self::score_text(text, pack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packs::load_pack;

    #[test]
    fn test_conference_scores_as_school_event() {
        let pack = load_pack("school").unwrap();
        let c = HeuristicClassifier::score_text(
            "Parent-teacher conference sign-ups\n\nSchool conferences are October 24.",
            &pack,
        );
        assert_eq!(c.category, "school_event");
        assert!(c.score >= 0.75, "score was {}", c.score);
    }

    #[test]
    fn test_newsletter_category_wins_on_hits() {
        let pack = load_pack("school").unwrap();
        let c = HeuristicClassifier::score_text("School newsletter: weekly update", &pack);
        assert_eq!(c.category, "newsletter");
    }

    #[test]
    fn test_no_keywords_scores_zero() {
        let pack = load_pack("school").unwrap();
        let c = HeuristicClassifier::score_text("Lunch on Tuesday?", &pack);
        assert_eq!(c.score, 0.0);
        assert_eq!(c.category, pack.default_category);
    }

    #[test]
    fn test_more_evidence_scores_higher() {
        let pack = load_pack("school").unwrap();
        let thin = HeuristicClassifier::score_text("A note from the teacher", &pack);
        let rich = HeuristicClassifier::score_text(
            "Field trip permission slip due Friday, Oct 10, from the classroom teacher",
            &pack,
        );
        assert!(rich.score > thin.score);
    }

    #[tokio::test]
    async fn test_trait_impl_delegates() {
        let pack = load_pack("school").unwrap();
        let c = HeuristicClassifier
            .classify("Field trip on 2025-10-10", &pack)
            .await
            .unwrap();
        assert_eq!(c.category, "school_event");
        assert!(c.intent.is_none());
    }
}
