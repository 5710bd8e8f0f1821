use std::collections::HashSet;

use super::embedded;
use super::schema::PackConfig;
use crate::error::HearthError;

/// Load an embedded pack by ID.
pub fn load_pack(pack_id: &str) -> Result<PackConfig, HearthError> {
    if let Some(json) = embedded::get_embedded(pack_id) {
        return serde_json::from_str(json).map_err(|e| {
            HearthError::Configuration(format!("Failed to parse embedded pack '{}': {}", pack_id, e))
        });
    }
    Err(HearthError::Configuration(format!("Unknown pack: {}", pack_id)))
}

/// Load a custom pack from a file path.
pub fn load_custom_pack(path: &std::path::Path) -> Result<PackConfig, HearthError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| HearthError::Configuration(format!("Failed to read pack file: {}", e)))?;
    let pack: PackConfig = serde_json::from_str(&content)
        .map_err(|e| HearthError::Configuration(format!("Failed to parse pack: {}", e)))?;
    validate_pack(&pack)?;
    Ok(pack)
}

/// Validate a pack has required fields and a usable keyword set.
pub fn validate_pack(pack: &PackConfig) -> Result<(), HearthError> {
    let invalid = |msg: String| Err(HearthError::Configuration(msg));

    if pack.id.trim().is_empty() {
        return invalid("Pack id is required".into());
    }
    if pack.name.trim().is_empty() {
        return invalid(format!("Pack '{}' needs a name", pack.id));
    }
    if pack.default_category.trim().is_empty() {
        return invalid(format!("Pack '{}' needs a default category", pack.id));
    }
    if pack.sources.domains.is_empty() && pack.sources.senders.is_empty() {
        return invalid(format!("Pack '{}' has an empty source allow-list", pack.id));
    }
    if pack.all_keywords().is_empty() {
        return invalid(format!("Pack '{}' has no keywords", pack.id));
    }
    let mut seen = HashSet::new();
    for category in &pack.categories {
        if category.name.trim().is_empty() {
            return invalid(format!("Pack '{}' has an unnamed category", pack.id));
        }
        if !seen.insert(category.name.to_lowercase()) {
            return invalid(format!(
                "Pack '{}' defines category '{}' twice",
                pack.id, category.name
            ));
        }
    }
    if pack.keyword_matcher().is_none() {
        return invalid(format!("Pack '{}' keywords do not compile", pack.id));
    }
    Ok(())
}

/// List all available embedded packs as (id, name, description).
pub fn get_available_packs() -> Vec<(String, String, String)> {
    embedded::list_embedded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SensitivityThresholds, SensitivityTier};

    #[test]
    fn test_load_pack_school() {
        let pack = load_pack("school").expect("should load school pack");
        assert_eq!(pack.id, "school");
        assert_eq!(pack.name, "School");
    }

    #[test]
    fn test_load_pack_unknown() {
        let result = load_pack("nonexistent");
        assert!(matches!(result, Err(HearthError::Configuration(_))));
    }

    #[test]
    fn test_all_packs_load_and_validate() {
        for (id, _, _) in get_available_packs() {
            let pack = load_pack(&id).unwrap_or_else(|e| panic!("Failed to load '{}': {}", id, e));
            validate_pack(&pack).unwrap_or_else(|e| panic!("Validation failed for '{}': {}", id, e));
            assert!(!pack.description.is_empty(), "pack '{}' should have a description", id);
        }
        assert_eq!(get_available_packs().len(), 3);
    }

    #[test]
    fn test_validate_rejects_empty_allow_list() {
        let mut pack = load_pack("school").unwrap();
        pack.sources.domains.clear();
        pack.sources.senders.clear();
        assert!(validate_pack(&pack).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_category() {
        let mut pack = load_pack("school").unwrap();
        let dup = pack.categories[0].clone();
        pack.categories.push(dup);
        assert!(validate_pack(&pack).is_err());
    }

    #[test]
    fn test_load_custom_pack_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scouts.json");
        std::fs::write(
            &path,
            r#"{
                "id": "scouts",
                "name": "Scouts",
                "person": "Maya",
                "sources": {"domains": ["troop42.org"]},
                "keywords": ["campout", "meeting"],
                "defaultCategory": "troop_event"
            }"#,
        )
        .unwrap();
        let pack = load_custom_pack(&path).unwrap();
        assert_eq!(pack.person.as_deref(), Some("Maya"));
        assert_eq!(pack.default_sensitivity, SensitivityTier::Balanced);
    }

    #[test]
    fn test_sender_allow_list_matches_subdomains() {
        let pack = load_pack("school").unwrap();
        assert!(pack.allows_sender("news@parentsquare.com", "parentsquare.com"));
        assert!(pack.allows_sender("x@mail.parentsquare.com", "mail.parentsquare.com"));
        assert!(!pack.allows_sender("x@notparentsquare.com", "notparentsquare.com"));
        assert!(!pack.allows_sender("x@gmail.com", "gmail.com"));
    }

    #[test]
    fn test_explicit_sender_allowed() {
        let mut pack = load_pack("school").unwrap();
        pack.sources.senders.push("Coach.Dan@Gmail.com".into());
        assert!(pack.allows_sender("coach.dan@gmail.com", "gmail.com"));
    }

    #[test]
    fn test_matched_keywords_word_bounded() {
        let pack = load_pack("school").unwrap();
        let found = pack.matched_keywords("Field Trip permission slip DUE Friday; schoolbus info");
        assert!(found.contains(&"field trip".to_string()));
        assert!(found.contains(&"permission slip".to_string()));
        assert!(found.contains(&"due".to_string()));
        // "school" must not match inside "schoolbus"
        assert!(!found.contains(&"school".to_string()));
    }

    #[test]
    fn test_keyword_matcher_compiled_once() {
        let pack = load_pack("school").unwrap();
        let first = pack.keyword_matcher().unwrap() as *const regex::Regex;
        pack.matched_keywords("field trip");
        pack.matched_keywords("picture day");
        let again = pack.keyword_matcher().unwrap() as *const regex::Regex;
        assert_eq!(first, again);

        // Clones share the compiled pattern's behavior
        let copy = pack.clone();
        assert_eq!(copy.matched_keywords("PTA meeting"), vec!["pta".to_string()]);
    }

    #[test]
    fn test_canonical_category() {
        let pack = load_pack("school").unwrap();
        assert_eq!(pack.canonical_category("deadline"), Some("deadline"));
        assert_eq!(pack.canonical_category(" School_Event "), Some("school_event"));
        assert_eq!(pack.canonical_category("appointment"), None);
    }

    #[test]
    fn test_category_thresholds() {
        let pack = load_pack("school").unwrap();
        let t = SensitivityThresholds::default();
        assert_eq!(pack.threshold_for("school_event", &t), Some(0.75));
        assert_eq!(pack.threshold_for("deadline", &t), Some(0.65));
        assert_eq!(pack.threshold_for("newsletter", &t), None);
        assert_eq!(pack.threshold_for("unknown", &t), Some(0.75));
    }
}
