use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;

fn map_dismissal_row(row: &Row<'_>) -> rusqlite::Result<DbDismissal> {
    Ok(DbDismissal {
        token: row.get(0)?,
        item_type: row.get(1)?,
        subject: row.get(2)?,
        sender: row.get(3)?,
        original_date: parse_ts(4, &row.get::<_, String>(4)?)?,
        assigned_person: row.get(5)?,
        pack_id: row.get(6)?,
        reason: row.get(7)?,
        dismissed_at: parse_ts(8, &row.get::<_, String>(8)?)?,
        dismissed_by: row.get(9)?,
    })
}

impl HearthDb {
    /// Append a dismissal record. A token can be dismissed at most once, so a
    /// second insert for the same token fails on the primary key.
    pub fn insert_dismissal(&self, dismissal: &DbDismissal) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO dismissals (
                token, item_type, subject, sender, original_date, assigned_person,
                pack_id, reason, dismissed_at, dismissed_by
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                dismissal.token,
                dismissal.item_type,
                dismissal.subject,
                dismissal.sender,
                ts(&dismissal.original_date),
                dismissal.assigned_person,
                dismissal.pack_id,
                dismissal.reason,
                ts(&dismissal.dismissed_at),
                dismissal.dismissed_by,
            ],
        )?;
        Ok(())
    }

    pub fn get_dismissal(&self, token: &str) -> Result<Option<DbDismissal>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT token, item_type, subject, sender, original_date, assigned_person,
                        pack_id, reason, dismissed_at, dismissed_by
                 FROM dismissals WHERE token = ?1",
                params![token],
                map_dismissal_row,
            )
            .optional()?)
    }

    /// Dismissals at or after `since`, most recent first.
    pub fn dismissals_since(&self, since: &DateTime<Utc>) -> Result<Vec<DbDismissal>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT token, item_type, subject, sender, original_date, assigned_person,
                    pack_id, reason, dismissed_at, dismissed_by
             FROM dismissals
             WHERE dismissed_at >= ?1
             ORDER BY dismissed_at DESC, token",
        )?;
        let rows = stmt.query_map(params![ts(since)], map_dismissal_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
