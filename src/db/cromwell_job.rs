use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, OptionalExtension, Row, ToSql};

use crate::db::{from_millis, placeholders, to_millis, Store};
use crate::engine::JobStatus;

const COLUMNS: &str = "id, project, type, input_size, status, updated";

/// Handle to one execution submitted to the engine
///
/// The `project` column is unique: a project never has more than one job record.
#[derive(Debug, Clone, PartialEq)]
pub struct CromwellJob {
    /// Engine-assigned workflow id
    pub id: String,
    pub project: String,
    pub job_type: String,
    /// Declared input size in bytes, counted against the pool ceiling while in flight
    pub input_size: u64,
    pub status: JobStatus,
    pub updated: DateTime<Utc>,
}

impl CromwellJob {
    fn from_row(row: &Row) -> rusqlite::Result<CromwellJob> {
        let input_size: i64 = row.get("input_size")?;
        Ok(CromwellJob {
            id: row.get("id")?,
            project: row.get("project")?,
            job_type: row.get("type")?,
            input_size: input_size.max(0) as u64,
            status: row.get("status")?,
            updated: from_millis(row.get("updated")?),
        })
    }
}

impl Store {
    pub fn insert_job(&self, job: &CromwellJob) -> Result<()> {
        info!("Recording engine job {} for project {}", job.id, job.project);
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO cromwell_job ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                job.id,
                job.project,
                job.job_type,
                job.input_size as i64,
                job.status,
                to_millis(&job.updated),
            ],
        )
        .with_context(|| format!("Insert job {} for project {}", job.id, job.project))?;
        Ok(())
    }

    /// In-flight jobs, optionally restricted to some project types
    pub fn in_flight_jobs(&self, types: Option<&[String]>) -> Result<Vec<CromwellJob>> {
        let conn = self.conn()?;
        let (submitted, running) = (JobStatus::Submitted, JobStatus::Running);
        let mut args: Vec<&dyn ToSql> = vec![&submitted, &running];
        let mut sql = format!("SELECT {COLUMNS} FROM cromwell_job WHERE status IN (?, ?)");
        if let Some(types) = types {
            if types.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND type IN ({})", placeholders(types.len())));
            args.extend(types.iter().map(|t| t as &dyn ToSql));
        }
        sql.push_str(" ORDER BY updated ASC, rowid ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args.as_slice(), CromwellJob::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The in-flight job polled longest ago
    pub fn oldest_in_flight(&self) -> Result<Option<CromwellJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM cromwell_job WHERE status IN (?1, ?2) ORDER BY updated ASC, rowid ASC LIMIT 1"
                ),
                params![JobStatus::Submitted, JobStatus::Running],
                CromwellJob::from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn job_for_project(&self, project: &str) -> Result<Option<CromwellJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM cromwell_job WHERE project = ?1"),
                [project],
                CromwellJob::from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Set a job's status and refresh `updated`
    pub fn set_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        info!("Updating engine job {id} with status {status}");
        let conn = self.conn()?;
        conn.execute(
            "UPDATE cromwell_job SET status = ?1, updated = ?2 WHERE id = ?3",
            params![status, to_millis(&Utc::now()), id],
        )?;
        Ok(())
    }

    /// Refresh `updated` only, which moves the job to the back of the polling queue
    pub fn touch_job(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE cromwell_job SET updated = ?1 WHERE id = ?2",
            params![to_millis(&Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn delete_job(&self, id: &str) -> Result<()> {
        info!("Deleting engine job record {id}");
        let conn = self.conn()?;
        conn.execute("DELETE FROM cromwell_job WHERE id = ?1", [id])?;
        Ok(())
    }
}
