use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, OptionalExtension, Row, ToSql};

use crate::db::project::{self, Project};
use crate::db::state::ProjectStatus;
use crate::db::{from_millis, placeholders, to_millis, Store};

const COLUMNS: &str = "code, name, type, owner, status, projects, created, updated";

/// A batch of projects created from one spreadsheet upload
#[derive(Debug, Clone, PartialEq)]
pub struct BulkSubmission {
    pub code: String,
    pub name: String,
    pub bulk_type: String,
    pub owner: String,
    pub status: ProjectStatus,
    /// Codes of the child projects, empty until the sheet has been expanded
    pub projects: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl BulkSubmission {
    pub fn new(code: &str, name: &str, bulk_type: &str, owner: &str) -> BulkSubmission {
        let now = Utc::now();
        BulkSubmission {
            code: code.to_string(),
            name: name.to_string(),
            bulk_type: bulk_type.to_string(),
            owner: owner.to_string(),
            status: ProjectStatus::InQueue,
            projects: Vec::new(),
            created: now,
            updated: now,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<BulkSubmission> {
        let projects: String = row.get("projects")?;
        let projects: Vec<String> = serde_json::from_str(&projects)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;
        Ok(BulkSubmission {
            code: row.get("code")?,
            name: row.get("name")?,
            bulk_type: row.get("type")?,
            owner: row.get("owner")?,
            status: row.get("status")?,
            projects,
            created: from_millis(row.get("created")?),
            updated: from_millis(row.get("updated")?),
        })
    }
}

impl Store {
    pub fn insert_bulk(&self, bulk: &BulkSubmission) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO bulk_submission ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                bulk.code,
                bulk.name,
                bulk.bulk_type,
                bulk.owner,
                bulk.status,
                serde_json::to_string(&bulk.projects)?,
                to_millis(&bulk.created),
                to_millis(&bulk.updated),
            ],
        )
        .with_context(|| format!("Insert bulk submission {}", bulk.code))?;
        Ok(())
    }

    pub fn get_bulk(&self, code: &str) -> Result<Option<BulkSubmission>> {
        let conn = self.conn()?;
        let bulk = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM bulk_submission WHERE code = ?1"),
                [code],
                BulkSubmission::from_row,
            )
            .optional()?;
        Ok(bulk)
    }

    pub fn next_queued_bulk(&self) -> Result<Option<BulkSubmission>> {
        let conn = self.conn()?;
        let bulk = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM bulk_submission WHERE status = ?1 ORDER BY updated ASC, rowid ASC LIMIT 1"
                ),
                [ProjectStatus::InQueue],
                BulkSubmission::from_row,
            )
            .optional()?;
        Ok(bulk)
    }

    pub fn bulks_with_status(&self, statuses: &[ProjectStatus]) -> Result<Vec<BulkSubmission>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM bulk_submission WHERE status IN ({}) ORDER BY updated ASC",
            placeholders(statuses.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let args: Vec<&dyn ToSql> = statuses.iter().map(|s| s as &dyn ToSql).collect();
        let rows = stmt.query_map(args.as_slice(), BulkSubmission::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Compare-and-set of a bulk's status, false when another writer got there first
    pub fn transition_bulk(&self, code: &str, from: ProjectStatus, to: ProjectStatus) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE bulk_submission SET status = ?1, updated = ?2 WHERE code = ?3 AND status = ?4",
            params![to, to_millis(&Utc::now()), code, from],
        )?;
        if changed == 1 {
            info!("Updated bulk submission {code} with status {to}");
        }
        Ok(changed == 1)
    }

    /// Insert a child project and append it to the bulk's project list in one transaction
    pub fn insert_bulk_child(&self, code: &str, child: &Project) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        project::insert(&tx, child)?;
        let changed = tx.execute(
            "UPDATE bulk_submission SET projects = json_insert(projects, '$[#]', ?1), updated = ?2 WHERE code = ?3",
            params![child.code, to_millis(&Utc::now()), code],
        )?;
        if changed != 1 {
            bail!("Bulk submission {code} is gone");
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projects_round_trip_through_json_column() {
        let store = Store::open_in_memory().unwrap();
        store.insert_bulk(&BulkSubmission::new("b1", "batch", "ReadsQC", "owner")).unwrap();
        assert_eq!(store.next_queued_bulk().unwrap().unwrap().code, "b1");

        assert!(store.transition_bulk("b1", ProjectStatus::InQueue, ProjectStatus::Processing).unwrap());
        assert!(!store.transition_bulk("b1", ProjectStatus::InQueue, ProjectStatus::Processing).unwrap());
        for code in ["p1", "p2"] {
            store.insert_bulk_child("b1", &Project::new(code, code, "ReadsQC", "owner")).unwrap();
        }

        let bulk = store.get_bulk("b1").unwrap().unwrap();
        assert_eq!(bulk.projects, vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(bulk.status, ProjectStatus::Processing);
        assert!(store.get_project("p2").unwrap().is_some());
        assert!(store.next_queued_bulk().unwrap().is_none());
        assert_eq!(store.bulks_with_status(&[ProjectStatus::Processing]).unwrap().len(), 1);
    }

    #[test]
    fn test_child_of_missing_bulk_is_rolled_back() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_bulk_child("nope", &Project::new("p1", "p1", "ReadsQC", "owner")).is_err());
        assert!(store.get_project("p1").unwrap().is_none());
    }
}
