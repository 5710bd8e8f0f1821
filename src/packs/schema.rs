use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{SensitivityThresholds, SensitivityTier};

/// A tracking domain ("pack") such as school or medical: where its mail comes
/// from, which words make a message relevant, and how strict each category is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Household member this pack is about, copied onto discovered items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<String>,
    pub sources: PackSources,
    /// Pack-wide content keywords. Category keywords are also matched.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub default_category: String,
    #[serde(default = "default_sensitivity")]
    pub default_sensitivity: SensitivityTier,
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
    /// Keyword matcher, compiled on first use. Keywords must not change after that.
    #[serde(skip)]
    matcher: OnceLock<Option<Regex>>,
}

fn default_sensitivity() -> SensitivityTier {
    SensitivityTier::Balanced
}

/// Allow-listed senders for a pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackSources {
    /// Sender domains; subdomains match too.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Individual sender addresses allowed regardless of domain.
    #[serde(default)]
    pub senders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub sensitivity: SensitivityTier,
}

impl PackConfig {
    /// True if the sender is on this pack's allow-list.
    pub fn allows_sender(&self, sender_email: &str, sender_domain: &str) -> bool {
        let email = sender_email.trim().to_lowercase();
        if self
            .sources
            .senders
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(&email))
        {
            return true;
        }
        let domain = sender_domain.trim().to_lowercase();
        if domain.is_empty() {
            return false;
        }
        self.sources.domains.iter().any(|d| {
            let d = d.trim().trim_start_matches('@').to_lowercase();
            !d.is_empty() && (domain == d || domain.ends_with(&format!(".{}", d)))
        })
    }

    /// All keywords that gate relevance: pack-wide plus every category's.
    pub fn all_keywords(&self) -> BTreeSet<String> {
        self.keywords
            .iter()
            .chain(self.categories.iter().flat_map(|c| c.keywords.iter()))
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// Case-insensitive, word-bounded matcher over every keyword.
    /// Returns `None` when the pack has no keywords at all.
    pub fn keyword_matcher(&self) -> Option<&Regex> {
        self.matcher.get_or_init(|| self.build_matcher()).as_ref()
    }

    fn build_matcher(&self) -> Option<Regex> {
        let keywords = self.all_keywords();
        if keywords.is_empty() {
            return None;
        }
        // Longest first so "field trip form" wins over "field trip".
        let mut sorted: Vec<&String> = keywords.iter().collect();
        sorted.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let alternation = sorted
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).ok()
    }

    /// The pack's own spelling of `category`, if it names one of the pack's
    /// categories or its default. Matching ignores case and surrounding space.
    pub fn canonical_category(&self, category: &str) -> Option<&str> {
        let category = category.trim();
        if self.default_category.eq_ignore_ascii_case(category) {
            return Some(&self.default_category);
        }
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(category))
            .map(|c| c.name.as_str())
    }

    /// Distinct keywords found in `text`, lower-cased, in first-seen order.
    pub fn matched_keywords(&self, text: &str) -> Vec<String> {
        let Some(re) = self.keyword_matcher() else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for m in re.find_iter(text) {
            let kw = m.as_str().to_lowercase();
            if seen.insert(kw.clone()) {
                out.push(kw);
            }
        }
        out
    }

    /// Sensitivity tier for a category; unknown categories use the pack default.
    pub fn tier_for(&self, category: &str) -> SensitivityTier {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(category))
            .map(|c| c.sensitivity)
            .unwrap_or(self.default_sensitivity)
    }

    /// Minimum score for inclusion in `category`; `None` if the category is off.
    pub fn threshold_for(&self, category: &str, thresholds: &SensitivityThresholds) -> Option<f64> {
        thresholds.for_tier(self.tier_for(category))
    }
}
