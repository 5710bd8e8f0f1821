use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::fingerprint::Fingerprint;
use crate::types::{DispositionState, EventIntent};

const ITEM_COLUMNS: &str = "token, message_id, pack_id, fingerprint, relevance_score,
    sender_email, sender_name, subject, snippet, message_date, discovered_at,
    primary_category, assigned_person, event_json, needs_manual_completion,
    state, disposed_at, disposed_by";

/// Optional filters for approval-queue listings.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter<'a> {
    pub pack_id: Option<&'a str>,
    pub person: Option<&'a str>,
    pub category: Option<&'a str>,
    pub state: Option<DispositionState>,
}

fn map_item_row(row: &Row<'_>) -> rusqlite::Result<DbApprovalItem> {
    let event_json: Option<String> = row.get(13)?;
    let event: Option<EventIntent> = match event_json {
        Some(json) => Some(parse_json(13, &json)?),
        None => None,
    };
    let state: String = row.get(15)?;
    Ok(DbApprovalItem {
        token: row.get(0)?,
        message_id: row.get(1)?,
        pack_id: row.get(2)?,
        fingerprint: Fingerprint::from_stored(row.get(3)?),
        relevance_score: row.get(4)?,
        sender_email: row.get(5)?,
        sender_name: row.get(6)?,
        subject: row.get(7)?,
        snippet: row.get(8)?,
        message_date: parse_ts(9, &row.get::<_, String>(9)?)?,
        discovered_at: parse_ts(10, &row.get::<_, String>(10)?)?,
        primary_category: row.get(11)?,
        assigned_person: row.get(12)?,
        event,
        needs_manual_completion: row.get::<_, i32>(14)? != 0,
        state: parse_enum(15, &state)?,
        disposed_at: parse_opt_ts(16, row.get(16)?)?,
        disposed_by: row.get(17)?,
    })
}

impl HearthDb {
    // =========================================================================
    // Approval items
    // =========================================================================

    /// Insert an item unless one already exists for its (fingerprint, pack).
    ///
    /// Returns `true` if this call inserted the row. The uniqueness constraint
    /// makes this a compare-and-insert: of concurrent callers, one wins.
    pub fn insert_approval_item(&self, item: &DbApprovalItem) -> Result<bool, DbError> {
        let event_json = item
            .event
            .as_ref()
            .map(|e| to_json("event_json", e))
            .transpose()?;
        let rows = self.conn.execute(
            "INSERT INTO approval_items (
                token, message_id, pack_id, fingerprint, relevance_score,
                sender_email, sender_name, subject, snippet, message_date, discovered_at,
                primary_category, assigned_person, event_json, needs_manual_completion,
                state, disposed_at, disposed_by
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(fingerprint, pack_id) DO NOTHING",
            params![
                item.token,
                item.message_id,
                item.pack_id,
                item.fingerprint.as_str(),
                item.relevance_score,
                item.sender_email,
                item.sender_name,
                item.subject,
                item.snippet,
                ts(&item.message_date),
                ts(&item.discovered_at),
                item.primary_category,
                item.assigned_person,
                event_json,
                item.needs_manual_completion as i32,
                item.state.as_str(),
                item.disposed_at.as_ref().map(ts),
                item.disposed_by,
            ],
        )?;
        Ok(rows == 1)
    }

    pub fn get_approval_item(&self, token: &str) -> Result<Option<DbApprovalItem>, DbError> {
        let sql = format!("SELECT {} FROM approval_items WHERE token = ?1", ITEM_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![token], map_item_row)
            .optional()?)
    }

    /// The active item holding `fingerprint` within `pack_id`, if any.
    pub fn find_item_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
        pack_id: &str,
    ) -> Result<Option<DbApprovalItem>, DbError> {
        let sql = format!(
            "SELECT {} FROM approval_items WHERE fingerprint = ?1 AND pack_id = ?2",
            ITEM_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![fingerprint.as_str(), pack_id], map_item_row)
            .optional()?)
    }

    /// Move a pending item to a terminal state. Conditional on `state = 'pending'`,
    /// so of two racing dispositions only one updates a row.
    ///
    /// Returns the number of rows updated (0 or 1).
    pub fn set_disposition(
        &self,
        token: &str,
        state: DispositionState,
        actor: &str,
        at: &DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let rows = self.conn.execute(
            "UPDATE approval_items
             SET state = ?1, disposed_at = ?2, disposed_by = ?3
             WHERE token = ?4 AND state = 'pending'",
            params![state.as_str(), ts(at), actor, token],
        )?;
        Ok(rows)
    }

    pub fn set_primary_category(&self, token: &str, category: &str) -> Result<usize, DbError> {
        let rows = self.conn.execute(
            "UPDATE approval_items SET primary_category = ?1 WHERE token = ?2",
            params![category, token],
        )?;
        Ok(rows)
    }

    /// Remove a pending item row. Only called alongside a dismissal insert.
    pub fn delete_pending_item(&self, token: &str) -> Result<usize, DbError> {
        let rows = self.conn.execute(
            "DELETE FROM approval_items WHERE token = ?1 AND state = 'pending'",
            params![token],
        )?;
        Ok(rows)
    }

    /// List items matching the filter, oldest discovery first.
    pub fn query_approval_items(
        &self,
        filter: &ItemFilter<'_>,
    ) -> Result<Vec<DbApprovalItem>, DbError> {
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(pack) = filter.pack_id {
            values.push(Box::new(pack.to_string()));
            conditions.push(format!("pack_id = ?{}", values.len()));
        }
        if let Some(person) = filter.person {
            values.push(Box::new(person.to_string()));
            conditions.push(format!("assigned_person = ?{} COLLATE NOCASE", values.len()));
        }
        if let Some(category) = filter.category {
            values.push(Box::new(category.to_string()));
            conditions.push(format!("primary_category = ?{}", values.len()));
        }
        if let Some(state) = filter.state {
            values.push(Box::new(state.as_str().to_string()));
            conditions.push(format!("state = ?{}", values.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM approval_items {} ORDER BY discovered_at, token",
            ITEM_COLUMNS, where_clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), map_item_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // =========================================================================
    // Digest hand-off
    // =========================================================================

    pub fn enqueue_for_digest(&self, token: &str, at: &DateTime<Utc>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO digest_queue (token, queued_at) VALUES (?1, ?2)",
            params![token, ts(at)],
        )?;
        Ok(())
    }

    /// Approved items not yet delivered in a digest, in approval order.
    pub fn undelivered_digest_items(&self) -> Result<Vec<DbApprovalItem>, DbError> {
        let sql = format!(
            "SELECT {} FROM approval_items
             WHERE token IN (SELECT token FROM digest_queue WHERE delivered_at IS NULL)
             ORDER BY disposed_at, token",
            ITEM_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_item_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn mark_digest_delivered(
        &self,
        tokens: &[String],
        at: &DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let mut total = 0;
        let stamp = ts(at);
        for token in tokens {
            total += self.conn.execute(
                "UPDATE digest_queue SET delivered_at = ?1 WHERE token = ?2 AND delivered_at IS NULL",
                params![stamp, token],
            )?;
        }
        Ok(total)
    }
}
