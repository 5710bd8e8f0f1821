use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;

const RUN_COLUMNS: &str = "run_id, pack_id, started_at, finished_at, scanned, flagged,
    conf_very_low, conf_low, conf_medium, conf_high, conf_very_high, sampled_for_review,
    rejected_domain, rejected_keyword_no_match, rejected_low_score, rejected_duplicate,
    rejected_other, error_count";

fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn map_run_row(row: &Row<'_>) -> rusqlite::Result<DiscoveryRunStats> {
    Ok(DiscoveryRunStats {
        run_id: row.get(0)?,
        pack_id: row.get(1)?,
        started_at: parse_ts(2, &row.get::<_, String>(2)?)?,
        finished_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        scanned: count(row, 4)?,
        flagged: count(row, 5)?,
        histogram: ConfidenceHistogram::from_counts([
            count(row, 6)?,
            count(row, 7)?,
            count(row, 8)?,
            count(row, 9)?,
            count(row, 10)?,
        ]),
        sampled_for_review: count(row, 11)?,
        rejections: RejectionBreakdown::from_counts([
            count(row, 12)?,
            count(row, 13)?,
            count(row, 14)?,
            count(row, 15)?,
            count(row, 16)?,
        ]),
        error_count: count(row, 17)?,
    })
}

impl HearthDb {
    /// Persist a finalized run. The table's CHECK constraints reject a row
    /// whose counters do not reconcile.
    pub fn insert_run_stats(&self, stats: &DiscoveryRunStats) -> Result<(), DbError> {
        let sql = format!(
            "INSERT INTO discovery_runs ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            RUN_COLUMNS
        );
        let h = &stats.histogram;
        let r = &stats.rejections;
        self.conn.execute(
            &sql,
            params![
                stats.run_id,
                stats.pack_id,
                ts(&stats.started_at),
                ts(&stats.finished_at),
                stats.scanned as i64,
                stats.flagged as i64,
                h.very_low as i64,
                h.low as i64,
                h.medium as i64,
                h.high as i64,
                h.very_high as i64,
                stats.sampled_for_review as i64,
                r.domain as i64,
                r.keyword_no_match as i64,
                r.low_score as i64,
                r.duplicate as i64,
                r.other as i64,
                stats.error_count as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_run_stats(&self, run_id: &str) -> Result<Option<DiscoveryRunStats>, DbError> {
        let sql = format!("SELECT {} FROM discovery_runs WHERE run_id = ?1", RUN_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![run_id], map_run_row)
            .optional()?)
    }

    /// Most recent runs first, optionally for one pack.
    pub fn recent_runs(
        &self,
        pack_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DiscoveryRunStats>, DbError> {
        let sql = format!(
            "SELECT {} FROM discovery_runs
             WHERE (?1 IS NULL OR pack_id = ?1)
             ORDER BY started_at DESC, run_id
             LIMIT ?2",
            RUN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pack_id, limit as i64], map_run_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Rejection counts summed across runs started at or after `since`.
    pub fn rejection_totals(
        &self,
        pack_id: Option<&str>,
        since: &DateTime<Utc>,
    ) -> Result<RejectionBreakdown, DbError> {
        let totals = self.conn.query_row(
            "SELECT COALESCE(SUM(rejected_domain), 0),
                    COALESCE(SUM(rejected_keyword_no_match), 0),
                    COALESCE(SUM(rejected_low_score), 0),
                    COALESCE(SUM(rejected_duplicate), 0),
                    COALESCE(SUM(rejected_other), 0)
             FROM discovery_runs
             WHERE started_at >= ?1 AND (?2 IS NULL OR pack_id = ?2)",
            params![ts(since), pack_id],
            |row| {
                Ok(RejectionBreakdown::from_counts([
                    count(row, 0)?,
                    count(row, 1)?,
                    count(row, 2)?,
                    count(row, 3)?,
                    count(row, 4)?,
                ]))
            },
        )?;
        Ok(totals)
    }
}
