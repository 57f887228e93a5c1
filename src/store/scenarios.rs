use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_json, parse_opt_ts, ts, Store};
use crate::model::{Agent, Frequency, NewScenario, Project, Scenario};

const SCENARIO_COLUMNS: &str = "id, project_id, title, steps, network_mocks, is_active, \
     frequency, last_run_at, next_run_at";

impl Store {
    // ========================================================================
    // Projects & agents
    // ========================================================================

    pub fn insert_project(&self, name: &str, base_url: &str) -> anyhow::Result<Project> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO projects (name, base_url) VALUES (?1, ?2)",
            params![name, base_url],
        )?;
        Ok(Project {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            base_url: base_url.to_string(),
        })
    }

    pub fn get_project(&self, id: i64) -> anyhow::Result<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        let project = conn
            .query_row(
                "SELECT id, name, base_url FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        base_url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    pub fn insert_agent(&self, project_id: i64, name: &str) -> anyhow::Result<Agent> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agents (project_id, name, is_active) VALUES (?1, ?2, 1)",
            params![project_id, name],
        )?;
        Ok(Agent {
            id: conn.last_insert_rowid(),
            project_id,
            name: name.to_string(),
            is_active: true,
        })
    }

    pub fn get_agent(&self, id: i64) -> anyhow::Result<Option<Agent>> {
        let conn = self.conn.lock().unwrap();
        let agent = conn
            .query_row(
                "SELECT id, project_id, name, is_active FROM agents WHERE id = ?1",
                params![id],
                row_to_agent,
            )
            .optional()?;
        Ok(agent)
    }

    /// Lowest-id agent of the project; scheduled runs go there.
    pub fn first_agent(&self, project_id: i64) -> anyhow::Result<Option<Agent>> {
        let conn = self.conn.lock().unwrap();
        let agent = conn
            .query_row(
                "SELECT id, project_id, name, is_active FROM agents
                 WHERE project_id = ?1 ORDER BY id LIMIT 1",
                params![project_id],
                row_to_agent,
            )
            .optional()?;
        Ok(agent)
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    pub fn insert_scenario(&self, new: &NewScenario) -> anyhow::Result<Scenario> {
        let steps = serde_json::to_string(&new.steps)?;
        let mocks = serde_json::to_string(&new.network_mocks)?;
        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO scenarios (project_id, title, steps, network_mocks, is_active, frequency)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.project_id,
                    new.title,
                    steps,
                    mocks,
                    new.is_active as i64,
                    new.frequency.as_str(),
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get_scenario(id)?
            .ok_or_else(|| anyhow::anyhow!("Scenario #{} vanished after insert", id))
    }

    pub fn get_scenario(&self, id: i64) -> anyhow::Result<Option<Scenario>> {
        let conn = self.conn.lock().unwrap();
        let scenario = conn
            .query_row(
                &format!("SELECT {} FROM scenarios WHERE id = ?1", SCENARIO_COLUMNS),
                params![id],
                row_to_scenario,
            )
            .optional()?;
        Ok(scenario)
    }

    /// Active scenarios with a periodic frequency, the scheduler's candidates.
    pub fn list_schedulable_scenarios(&self) -> anyhow::Result<Vec<Scenario>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scenarios WHERE is_active = 1 AND frequency != 'manual' ORDER BY id",
            SCENARIO_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_scenario)?;
        let mut scenarios = Vec::new();
        for row in rows {
            scenarios.push(row?);
        }
        Ok(scenarios)
    }

    pub fn record_dispatch(
        &self,
        scenario_id: i64,
        at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scenarios SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
            params![ts(&at), next_run_at.as_ref().map(ts), scenario_id],
        )?;
        Ok(())
    }

    pub fn set_scenario_active(&self, scenario_id: i64, active: bool) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scenarios SET is_active = ?1 WHERE id = ?2",
            params![active as i64, scenario_id],
        )?;
        Ok(())
    }
}

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get::<_, i64>(3)? != 0,
    })
}

fn row_to_scenario(row: &Row) -> rusqlite::Result<Scenario> {
    let steps: String = row.get(3)?;
    let mocks: String = row.get(4)?;
    let frequency: String = row.get(6)?;
    Ok(Scenario {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        steps: parse_json(3, &steps)?,
        network_mocks: parse_json(4, &mocks)?,
        is_active: row.get::<_, i64>(5)? != 0,
        frequency: Frequency::parse(&frequency).unwrap_or_default(),
        last_run_at: parse_opt_ts(7, row.get(7)?)?,
        next_run_at: parse_opt_ts(8, row.get(8)?)?,
    })
}
