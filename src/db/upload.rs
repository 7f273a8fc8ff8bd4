use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::state::UploadStatus;
use crate::db::{from_millis, to_millis, Store};

const COLUMNS: &str = "code, name, owner, size, status, created, updated";

/// A user-owned file in the shared upload area
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    /// File name of the blob inside the upload area
    pub code: String,
    /// Original file name, used when the upload is linked into a project
    pub name: String,
    pub owner: String,
    pub size: u64,
    pub status: UploadStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Upload {
    pub fn new(code: &str, name: &str, owner: &str, size: u64) -> Upload {
        let now = Utc::now();
        Upload {
            code: code.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            size,
            status: UploadStatus::Live,
            created: now,
            updated: now,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Upload> {
        let size: i64 = row.get("size")?;
        Ok(Upload {
            code: row.get("code")?,
            name: row.get("name")?,
            owner: row.get("owner")?,
            size: size.max(0) as u64,
            status: row.get("status")?,
            created: from_millis(row.get("created")?),
            updated: from_millis(row.get("updated")?),
        })
    }
}

impl Store {
    pub fn insert_upload(&self, upload: &Upload) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO upload ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                upload.code,
                upload.name,
                upload.owner,
                upload.size as i64,
                upload.status,
                to_millis(&upload.created),
                to_millis(&upload.updated),
            ],
        )
        .with_context(|| format!("Insert upload {}", upload.code))?;
        Ok(())
    }

    pub fn get_upload(&self, code: &str) -> Result<Option<Upload>> {
        let conn = self.conn()?;
        let upload = conn
            .query_row(&format!("SELECT {COLUMNS} FROM upload WHERE code = ?1"), [code], Upload::from_row)
            .optional()?;
        Ok(upload)
    }

    /// Soft-delete live uploads created before `cutoff`, returning the affected records
    pub fn expire_uploads(&self, cutoff: &DateTime<Utc>) -> Result<Vec<Upload>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM upload WHERE status = ?1 AND created < ?2 ORDER BY created ASC"
        ))?;
        let expired = stmt
            .query_map(params![UploadStatus::Live, to_millis(cutoff)], Upload::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let now = to_millis(&Utc::now());
        for upload in &expired {
            info!("Upload {} ({}) expired", upload.code, upload.name);
            // the status guard keeps a concurrent change from being overwritten
            conn.execute(
                "UPDATE upload SET status = ?1, updated = ?2 WHERE code = ?3 AND status = ?4",
                params![UploadStatus::Delete, now, upload.code, UploadStatus::Live],
            )?;
        }
        Ok(expired)
    }

    /// Soft-deleted uploads untouched since `cutoff`
    pub fn deleted_uploads_before(&self, cutoff: &DateTime<Utc>) -> Result<Vec<Upload>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM upload WHERE status = ?1 AND updated < ?2 ORDER BY updated ASC"
        ))?;
        let rows = stmt.query_map(params![UploadStatus::Delete, to_millis(cutoff)], Upload::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_upload(&self, code: &str) -> Result<()> {
        info!("Deleting upload record {code}");
        let conn = self.conn()?;
        conn.execute("DELETE FROM upload WHERE code = ?1", [code])?;
        Ok(())
    }
}
