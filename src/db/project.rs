use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use crate::db::state::ProjectStatus;
use crate::db::{from_millis, placeholders, to_millis, Store};

const COLUMNS: &str = "code, name, description, type, owner, status, public, notified, bulk, created, updated";

/// One user-submitted unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub code: String,
    pub name: String,
    pub description: String,
    /// Category name, see [crate::registry::Category]
    pub project_type: String,
    pub owner: String,
    pub status: ProjectStatus,
    pub public: bool,
    pub notified: bool,
    /// Parent bulk submission
    pub bulk: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Project {
    /// A freshly queued project
    pub fn new(code: &str, name: &str, project_type: &str, owner: &str) -> Project {
        let now = Utc::now();
        Project {
            code: code.to_string(),
            name: name.to_string(),
            description: String::new(),
            project_type: project_type.to_string(),
            owner: owner.to_string(),
            status: ProjectStatus::InQueue,
            public: false,
            notified: false,
            bulk: None,
            created: now,
            updated: now,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Project> {
        Ok(Project {
            code: row.get("code")?,
            name: row.get("name")?,
            description: row.get("description")?,
            project_type: row.get("type")?,
            owner: row.get("owner")?,
            status: row.get("status")?,
            public: row.get("public")?,
            notified: row.get("notified")?,
            bulk: row.get("bulk")?,
            created: from_millis(row.get("created")?),
            updated: from_millis(row.get("updated")?),
        })
    }
}

impl Store {
    pub fn insert_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn()?;
        insert(&conn, project)
    }

    pub fn get_project(&self, code: &str) -> Result<Option<Project>> {
        let conn = self.conn()?;
        let project = conn
            .query_row(&format!("SELECT {COLUMNS} FROM project WHERE code = ?1"), [code], Project::from_row)
            .optional()?;
        Ok(project)
    }

    /// Oldest queued project among the given types (FIFO by `updated`, then insertion order)
    pub fn next_queued(&self, types: &[String]) -> Result<Option<Project>> {
        if types.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM project WHERE status = ? AND type IN ({}) ORDER BY updated ASC, rowid ASC LIMIT 1",
            placeholders(types.len())
        );
        let status = ProjectStatus::InQueue;
        let mut args: Vec<&dyn ToSql> = vec![&status];
        args.extend(types.iter().map(|t| t as &dyn ToSql));
        let project = conn.query_row(&sql, args.as_slice(), Project::from_row).optional()?;
        Ok(project)
    }

    /// Move a project to `to` only if its status is still one of `from`, refreshing `updated`
    ///
    /// The web app writes to the same database, so every monitor write is a compare-and-set.
    /// Returns false when the project is gone or another writer changed its status first.
    pub fn transition_project(&self, code: &str, from: &[ProjectStatus], to: ProjectStatus) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE project SET status = ?, updated = ? WHERE code = ? AND status IN ({})",
            placeholders(from.len())
        );
        let now = to_millis(&Utc::now());
        let mut args: Vec<&dyn ToSql> = vec![&to, &now, &code];
        args.extend(from.iter().map(|s| s as &dyn ToSql));
        let changed = conn.execute(&sql, args.as_slice())?;
        match changed {
            1 => info!("Updated project {code} with status {to}"),
            _ => info!("Project {code} is no longer {}, not moved to {to}", join(from)),
        }
        Ok(changed == 1)
    }

    /// Finished projects whose owner has not been told yet
    pub fn unnotified_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM project WHERE notified = 0 AND status IN (?1, ?2) ORDER BY updated ASC"
        ))?;
        let rows = stmt.query_map(params![ProjectStatus::Complete, ProjectStatus::Failed], Project::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_notified(&self, code: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("UPDATE project SET notified = 1 WHERE code = ?1", [code])?;
        Ok(())
    }

    /// Soft-deleted projects untouched since `cutoff`
    pub fn deleted_projects_before(&self, cutoff: &DateTime<Utc>) -> Result<Vec<Project>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM project WHERE status = ?1 AND updated < ?2 ORDER BY updated ASC"
        ))?;
        let rows = stmt.query_map(params![ProjectStatus::Delete, to_millis(cutoff)], Project::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_project(&self, code: &str) -> Result<()> {
        info!("Deleting project record {code}");
        let conn = self.conn()?;
        conn.execute("DELETE FROM project WHERE code = ?1", [code])?;
        Ok(())
    }
}

/// Insert on an open connection or transaction
pub(crate) fn insert(conn: &Connection, project: &Project) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO project ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
        params![
            project.code,
            project.name,
            project.description,
            project.project_type,
            project.owner,
            project.status,
            project.public,
            project.notified,
            project.bulk,
            to_millis(&project.created),
            to_millis(&project.updated),
        ],
    )
    .with_context(|| format!("Insert project {}", project.code))?;
    Ok(())
}

fn join(statuses: &[ProjectStatus]) -> String {
    statuses.iter().map(ProjectStatus::as_str).collect::<Vec<_>>().join("/")
}
