use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_json, parse_opt_ts, parse_ts, ts, Store};
use crate::model::{Run, RunResult, RunStatus};

const RUN_COLUMNS: &str = "id, project_id, agent_id, scenario_id, status, severity, result, \
     logs, created_at, started_at, completed_at";

impl Store {
    /// Persist a run record as given and return its new id.
    pub fn insert_run(&self, run: &Run) -> anyhow::Result<i64> {
        let result = run.result.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (project_id, agent_id, scenario_id, status, severity, result, logs,
                               created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.project_id,
                run.agent_id,
                run.scenario_id,
                run.status.as_str(),
                run.severity,
                result,
                run.logs,
                ts(&run.created_at),
                run.started_at.as_ref().map(ts),
                run.completed_at.as_ref().map(ts),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Create a run in `queued` state.
    pub fn create_run(
        &self,
        project_id: i64,
        agent_id: Option<i64>,
        scenario_id: Option<i64>,
    ) -> anyhow::Result<Run> {
        let mut run = Run::queued(project_id, agent_id, scenario_id);
        run.id = self.insert_run(&run)?;
        Ok(run)
    }

    pub fn get_run(&self, id: i64) -> anyhow::Result<Option<Run>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Move a run into `processing`. Returns false when the run is missing
    /// or already terminal; a redelivered task keeps its original start time.
    pub fn mark_processing(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE runs SET status = 'processing', started_at = COALESCE(started_at, ?1)
             WHERE id = ?2 AND status IN ('queued', 'processing')",
            params![ts(&at), id],
        )?;
        Ok(changed == 1)
    }

    /// Record a terminal outcome. Returns false when the run was already
    /// terminal, leaving the stored outcome untouched.
    pub fn complete_run(
        &self,
        id: i64,
        status: RunStatus,
        result: Option<&RunResult>,
        logs: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        if !status.is_terminal() {
            anyhow::bail!("complete_run called with non-terminal status {}", status.as_str());
        }
        let result = result.map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE runs SET status = ?1, result = ?2, logs = ?3, completed_at = ?4
             WHERE id = ?5 AND status NOT IN ('completed', 'failed')",
            params![status.as_str(), result, logs, ts(&at), id],
        )?;
        Ok(changed == 1)
    }

    /// Attach the visual-analysis verdict to a run.
    pub fn set_run_severity(
        &self,
        id: i64,
        severity: &str,
        analysis: Option<&str>,
    ) -> anyhow::Result<()> {
        let run = self
            .get_run(id)?
            .ok_or_else(|| anyhow::anyhow!("Run #{} not found", id))?;
        let result = match (run.result, analysis) {
            (Some(mut result), Some(text)) => {
                result.ai_analysis = Some(text.to_string());
                Some(serde_json::to_string(&result)?)
            }
            (result, _) => result.as_ref().map(serde_json::to_string).transpose()?,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET severity = ?1, result = ?2 WHERE id = ?3",
            params![severity, result, id],
        )?;
        Ok(())
    }

    /// Most recent runs of a scenario, newest first.
    pub fn recent_runs(&self, scenario_id: i64, limit: usize) -> anyhow::Result<Vec<Run>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs WHERE scenario_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![scenario_id, limit as i64], row_to_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    pub fn count_runs_by_status(&self, status: RunStatus) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_run(row: &Row) -> rusqlite::Result<Run> {
    let status: String = row.get(4)?;
    let result: Option<String> = row.get(6)?;
    let created_at: String = row.get(8)?;
    Ok(Run {
        id: row.get(0)?,
        project_id: row.get(1)?,
        agent_id: row.get(2)?,
        scenario_id: row.get(3)?,
        status: RunStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown run status '{}'", status).into(),
            )
        })?,
        severity: row.get(5)?,
        result: result.map(|r| parse_json(6, &r)).transpose()?,
        logs: row.get(7)?,
        created_at: parse_ts(8, &created_at)?,
        started_at: parse_opt_ts(9, row.get(9)?)?,
        completed_at: parse_opt_ts(10, row.get(10)?)?,
    })
}
