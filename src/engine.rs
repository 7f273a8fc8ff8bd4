//! Workflow engine (Cromwell) interface
//!
//! Monitors only talk to the engine through the [Engine] trait. [client::CromwellClient] is the
//! HTTP implementation used in production.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::state::UnknownState;

/// HTTP client for the Cromwell REST API
pub mod client;
/// Typed view of the job metadata document
pub mod metadata;

/// Engine status vocabulary
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::Running => "Running",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
            JobStatus::Aborted => "Aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Aborted)
    }

    /// Statuses only move forward: `Submitted` -> `Running` -> terminal
    pub fn is_behind(&self, recorded: JobStatus) -> bool {
        let step = |status: JobStatus| match status {
            JobStatus::Submitted => 0,
            JobStatus::Running => 1,
            _ => 2,
        };
        step(*self) < step(recorded)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Submitted" => Ok(JobStatus::Submitted),
            "Running" => Ok(JobStatus::Running),
            "Succeeded" => Ok(JobStatus::Succeeded),
            "Failed" => Ok(JobStatus::Failed),
            "Aborted" => Ok(JobStatus::Aborted),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// 5xx from the engine
    Server { status: u16, message: String },
    /// Any other non-2xx, the engine refused the request
    Rejected { status: u16, message: String },
    /// Connection, timeout or body read failure
    Transport(String),
    /// 2xx with a body we can't understand
    Decode(String),
}

impl EngineError {
    /// Transient errors leave state untouched and are retried on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Server { .. } | EngineError::Transport(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::Server { status, message } => write!(f, "engine server error {status}: {message}"),
            EngineError::Rejected { status, message } => write!(f, "engine rejected request ({status}): {message}"),
            EngineError::Transport(message) => write!(f, "engine unreachable: {message}"),
            EngineError::Decode(message) => write!(f, "unexpected engine response: {message}"),
        }
    }
}

impl Error for EngineError {}

/// Result of an abort request that did not fail transiently
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The engine accepted the abort
    Confirmed,
    /// The engine refused because the job is not running (already finished or unknown)
    NotRunning(String),
}

/// Contents of one rendered job, read from the project directory
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub workflow_source: Vec<u8>,
    pub inputs: Vec<u8>,
    pub options: Option<Vec<u8>>,
    /// Zipped imports
    pub dependencies: Option<Vec<u8>>,
    pub workflow_type: String,
    pub workflow_type_version: String,
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Submit a job, returning the engine's workflow id
    async fn submit(&self, submission: &Submission) -> Result<String, EngineError>;
    async fn status(&self, id: &str) -> Result<JobStatus, EngineError>;
    async fn metadata(&self, id: &str) -> Result<Value, EngineError>;
    async fn logs(&self, id: &str) -> Result<Value, EngineError>;
    async fn abort(&self, id: &str) -> Result<AbortOutcome, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let status: JobStatus = serde_json::from_str("\"Succeeded\"").unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        assert!(status.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!("Aborting".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_statuses_only_move_forward() {
        assert!(JobStatus::Submitted.is_behind(JobStatus::Running));
        assert!(JobStatus::Running.is_behind(JobStatus::Failed));
        assert!(!JobStatus::Running.is_behind(JobStatus::Submitted));
        assert!(!JobStatus::Succeeded.is_behind(JobStatus::Running));
    }

    #[test]
    fn test_transient_errors() {
        assert!(EngineError::Server { status: 503, message: String::new() }.is_transient());
        assert!(EngineError::Transport("timeout".to_string()).is_transient());
        assert!(!EngineError::Rejected { status: 400, message: String::new() }.is_transient());
        assert!(!EngineError::Decode("bad".to_string()).is_transient());
    }
}
