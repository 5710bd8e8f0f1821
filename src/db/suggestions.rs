use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::SuggestionStatus;

const SUGGESTION_COLUMNS: &str = "id, domain, pack_id, email_count, matched_keywords,
    sample_subjects, confidence, first_seen_at, last_seen_at, status,
    rejection_reason, permanent, decided_at";

fn map_suggestion_row(row: &Row<'_>) -> rusqlite::Result<DbSuggestedDomain> {
    let status: String = row.get(9)?;
    Ok(DbSuggestedDomain {
        id: row.get(0)?,
        domain: row.get(1)?,
        pack_id: row.get(2)?,
        email_count: row.get(3)?,
        matched_keywords: parse_json(4, &row.get::<_, String>(4)?)?,
        sample_subjects: parse_json(5, &row.get::<_, String>(5)?)?,
        confidence: row.get(6)?,
        first_seen_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        last_seen_at: parse_ts(8, &row.get::<_, String>(8)?)?,
        status: parse_enum(9, &status)?,
        rejection_reason: row.get(10)?,
        permanent: row.get::<_, i32>(11)? != 0,
        decided_at: parse_opt_ts(12, row.get(12)?)?,
    })
}

impl HearthDb {
    pub fn get_suggestion(
        &self,
        domain: &str,
        pack_id: &str,
    ) -> Result<Option<DbSuggestedDomain>, DbError> {
        let sql = format!(
            "SELECT {} FROM suggested_domains WHERE domain = ?1 AND pack_id = ?2",
            SUGGESTION_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![domain, pack_id], map_suggestion_row)
            .optional()?)
    }

    pub fn get_suggestion_by_id(&self, id: &str) -> Result<Option<DbSuggestedDomain>, DbError> {
        let sql = format!("SELECT {} FROM suggested_domains WHERE id = ?1", SUGGESTION_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], map_suggestion_row)
            .optional()?)
    }

    /// Insert or fully overwrite a suggestion row keyed by id.
    pub fn upsert_suggestion(&self, s: &DbSuggestedDomain) -> Result<(), DbError> {
        let keywords = to_json("matched_keywords", &s.matched_keywords)?;
        let samples = to_json("sample_subjects", &s.sample_subjects)?;
        self.conn.execute(
            "INSERT INTO suggested_domains (
                id, domain, pack_id, email_count, matched_keywords, sample_subjects,
                confidence, first_seen_at, last_seen_at, status, rejection_reason,
                permanent, decided_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                email_count = excluded.email_count,
                matched_keywords = excluded.matched_keywords,
                sample_subjects = excluded.sample_subjects,
                confidence = excluded.confidence,
                last_seen_at = excluded.last_seen_at,
                status = excluded.status,
                rejection_reason = excluded.rejection_reason,
                permanent = excluded.permanent,
                decided_at = excluded.decided_at",
            params![
                s.id,
                s.domain,
                s.pack_id,
                s.email_count,
                keywords,
                samples,
                s.confidence,
                ts(&s.first_seen_at),
                ts(&s.last_seen_at),
                s.status.as_str(),
                s.rejection_reason,
                s.permanent as i32,
                s.decided_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    /// Record a decision on a suggestion. Returns rows updated.
    pub fn set_suggestion_status(
        &self,
        id: &str,
        status: SuggestionStatus,
        reason: Option<&str>,
        permanent: bool,
        at: &DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let rows = self.conn.execute(
            "UPDATE suggested_domains
             SET status = ?1, rejection_reason = ?2, permanent = ?3, decided_at = ?4
             WHERE id = ?5",
            params![status.as_str(), reason, permanent as i32, ts(at), id],
        )?;
        Ok(rows)
    }

    /// Suggestions in a status, highest confidence first.
    pub fn suggestions_by_status(
        &self,
        status: SuggestionStatus,
        pack_id: Option<&str>,
    ) -> Result<Vec<DbSuggestedDomain>, DbError> {
        let sql = format!(
            "SELECT {} FROM suggested_domains
             WHERE status = ?1 AND (?2 IS NULL OR pack_id = ?2)
             ORDER BY confidence DESC, email_count DESC, domain",
            SUGGESTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status.as_str(), pack_id], map_suggestion_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn suggestion(id: &str, domain: &str, confidence: f64) -> DbSuggestedDomain {
        let now = Utc::now();
        DbSuggestedDomain {
            id: id.into(),
            domain: domain.into(),
            pack_id: "school".into(),
            email_count: 1,
            matched_keywords: vec!["field trip".into()],
            sample_subjects: vec!["Field trip Friday".into()],
            confidence,
            first_seen_at: now,
            last_seen_at: now,
            status: SuggestionStatus::Pending,
            rejection_reason: None,
            permanent: false,
            decided_at: None,
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let db = test_db();
        let mut s = suggestion("s1", "lincoln.org", 0.35);
        db.upsert_suggestion(&s).unwrap();

        s.email_count = 2;
        s.matched_keywords.push("permission slip".into());
        db.upsert_suggestion(&s).unwrap();

        let loaded = db.get_suggestion("lincoln.org", "school").unwrap().unwrap();
        assert_eq!(loaded.email_count, 2);
        assert_eq!(loaded.matched_keywords.len(), 2);
        assert_eq!(db.get_suggestion_by_id("s1").unwrap().unwrap().domain, "lincoln.org");
    }

    #[test]
    fn test_status_listing_ordered_by_confidence() {
        let db = test_db();
        db.upsert_suggestion(&suggestion("s1", "a.org", 0.3)).unwrap();
        db.upsert_suggestion(&suggestion("s2", "b.org", 0.6)).unwrap();
        db.upsert_suggestion(&suggestion("s3", "c.org", 0.5)).unwrap();
        db.set_suggestion_status("s3", SuggestionStatus::Rejected, Some("spam"), true, &Utc::now())
            .unwrap();

        let pending = db.suggestions_by_status(SuggestionStatus::Pending, None).unwrap();
        let domains: Vec<&str> = pending.iter().map(|s| s.domain.as_str()).collect();
        assert_eq!(domains, vec!["b.org", "a.org"]);

        let rejected = db
            .suggestions_by_status(SuggestionStatus::Rejected, Some("school"))
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].permanent);
        assert_eq!(rejected[0].rejection_reason.as_deref(), Some("spam"));
    }
}
