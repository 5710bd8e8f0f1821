use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::*;
use crate::fingerprint::Fingerprint;

impl HearthDb {
    /// External event id previously created for this fingerprint, if any.
    pub fn get_calendar_write(&self, fingerprint: &Fingerprint) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT external_event_id FROM calendar_writes WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn insert_calendar_write(
        &self,
        fingerprint: &Fingerprint,
        external_event_id: &str,
        pack_id: &str,
        message_id: &str,
        at: &DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO calendar_writes
                (fingerprint, external_event_id, pack_id, message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![fingerprint.as_str(), external_event_id, pack_id, message_id, ts(at)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use crate::fingerprint::generate_for_message;

    #[test]
    fn test_calendar_write_recorded_once() {
        let db = test_db();
        let fp = generate_for_message("m1");
        assert!(db.get_calendar_write(&fp).unwrap().is_none());

        db.insert_calendar_write(&fp, "evt-1", "school", "m1", &Utc::now()).unwrap();
        db.insert_calendar_write(&fp, "evt-2", "school", "m1", &Utc::now()).unwrap();
        assert_eq!(db.get_calendar_write(&fp).unwrap().as_deref(), Some("evt-1"));
    }
}
