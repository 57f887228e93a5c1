use rusqlite::{params, OptionalExtension, Row};

use super::{parse_json, parse_ts, ts, Store};
use crate::flakiness::TestFlakiness;

const FLAKINESS_COLUMNS: &str = "scenario_id, flakiness_score, total_runs, pass_count, \
     fail_count, transition_count, pattern, last_analyzed_at, ai_diagnosis, suggested_fix";

impl Store {
    /// Insert or replace the flakiness record of a scenario.
    pub fn upsert_flakiness(&self, record: &TestFlakiness) -> anyhow::Result<()> {
        let pattern = serde_json::to_string(&record.pattern)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO test_flakiness (scenario_id, flakiness_score, total_runs, pass_count,
                                         fail_count, transition_count, pattern, last_analyzed_at,
                                         ai_diagnosis, suggested_fix)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(scenario_id) DO UPDATE SET
                flakiness_score = excluded.flakiness_score,
                total_runs = excluded.total_runs,
                pass_count = excluded.pass_count,
                fail_count = excluded.fail_count,
                transition_count = excluded.transition_count,
                pattern = excluded.pattern,
                last_analyzed_at = excluded.last_analyzed_at,
                ai_diagnosis = excluded.ai_diagnosis,
                suggested_fix = excluded.suggested_fix",
            params![
                record.scenario_id,
                record.flakiness_score,
                record.total_runs,
                record.pass_count,
                record.fail_count,
                record.transition_count,
                pattern,
                ts(&record.last_analyzed_at),
                record.ai_diagnosis,
                record.suggested_fix,
            ],
        )?;
        Ok(())
    }

    pub fn get_flakiness(&self, scenario_id: i64) -> anyhow::Result<Option<TestFlakiness>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM test_flakiness WHERE scenario_id = ?1",
                    FLAKINESS_COLUMNS
                ),
                params![scenario_id],
                row_to_flakiness,
            )
            .optional()?;
        Ok(record)
    }

    /// Records scoring strictly above `threshold`, most flaky first.
    pub fn list_flaky(&self, threshold: u8) -> anyhow::Result<Vec<TestFlakiness>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM test_flakiness WHERE flakiness_score > ?1
             ORDER BY flakiness_score DESC, scenario_id",
            FLAKINESS_COLUMNS
        ))?;
        let rows = stmt.query_map(params![threshold], row_to_flakiness)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn row_to_flakiness(row: &Row) -> rusqlite::Result<TestFlakiness> {
    let pattern: String = row.get(6)?;
    let analyzed: String = row.get(7)?;
    Ok(TestFlakiness {
        scenario_id: row.get(0)?,
        flakiness_score: row.get(1)?,
        total_runs: row.get(2)?,
        pass_count: row.get(3)?,
        fail_count: row.get(4)?,
        transition_count: row.get(5)?,
        pattern: parse_json(6, &pattern)?,
        last_analyzed_at: parse_ts(7, &analyzed)?,
        ai_diagnosis: row.get(8)?,
        suggested_fix: row.get(9)?,
    })
}
