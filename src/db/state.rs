use std::error::Error;
use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;

use crate::engine::JobStatus;

/// Project (and bulk submission) lifecycle
///
/// `in queue` -> `processing` -> `submitted` -> `running` -> `complete` | `failed`. Users may move a
/// project to `delete` at any point, an engine-side abort moves it back to `in queue`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProjectStatus {
    InQueue,
    Processing,
    Submitted,
    Running,
    Complete,
    Failed,
    Delete,
}

impl ProjectStatus {
    /// db values are shared with the web application
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::InQueue => "in queue",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Submitted => "submitted",
            ProjectStatus::Running => "running",
            ProjectStatus::Complete => "complete",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Delete => "delete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Complete | ProjectStatus::Failed | ProjectStatus::Delete)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in queue" => Ok(ProjectStatus::InQueue),
            "processing" => Ok(ProjectStatus::Processing),
            "submitted" => Ok(ProjectStatus::Submitted),
            "running" => Ok(ProjectStatus::Running),
            "complete" => Ok(ProjectStatus::Complete),
            "failed" => Ok(ProjectStatus::Failed),
            "delete" => Ok(ProjectStatus::Delete),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    Live,
    Delete,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Live => "live",
            UploadStatus::Delete => "delete",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(UploadStatus::Live),
            "delete" => Ok(UploadStatus::Delete),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// A status column holds a value outside the known vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown state '{}'", self.0)
    }
}

impl Error for UnknownState {}

macro_rules! text_column {
    ($state:ty) => {
        impl ToSql for $state {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $state {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_column!(ProjectStatus);
text_column!(UploadStatus);
text_column!(JobStatus);
