const SCHOOL_PACK: &str = include_str!("../../packs/school.json");
const ACTIVITIES_PACK: &str = include_str!("../../packs/activities.json");
const MEDICAL_PACK: &str = include_str!("../../packs/medical.json");

/// All embedded packs in display order.
const ALL_PACKS: &[(&str, &str)] = &[
    ("school", SCHOOL_PACK),
    ("activities", ACTIVITIES_PACK),
    ("medical", MEDICAL_PACK),
];

/// Look up an embedded pack by ID.
pub fn get_embedded(pack_id: &str) -> Option<&'static str> {
    ALL_PACKS
        .iter()
        .find(|(id, _)| *id == pack_id)
        .map(|(_, json)| *json)
}

/// List all embedded packs as (id, name, description).
pub fn list_embedded() -> Vec<(String, String, String)> {
    let mut result = Vec::new();
    for (id, json) in ALL_PACKS {
        if let Ok(pack) = serde_json::from_str::<super::schema::PackConfig>(json) {
            result.push((pack.id, pack.name, pack.description));
        } else {
            result.push((id.to_string(), id.to_string(), String::new()));
        }
    }
    result
}
