//! Service configuration, read from a TOML file
//!
//! Every key has a default so a minimal file (or an empty one) is valid.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

use crate::monitor::MonitorKind;
use crate::registry::Pool;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One directory per project, named by project code
    pub projects_dir: PathBuf,
    /// Shared upload area, blobs are named by upload code
    pub uploads_dir: PathBuf,
    /// One directory per bulk submission, named by bulk code
    pub bulk_dir: PathBuf,
    /// Installed workflow descriptions and import bundles
    pub workflows_dir: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Category registry, the embedded registry is used when unset
    pub registry: Option<PathBuf>,
    pub engine: EngineConfig,
    pub pools: Pools,
    pub schedule: Schedule,
    pub lifecycle: Lifecycle,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("/data/projects"),
            uploads_dir: PathBuf::from("/data/uploads"),
            bulk_dir: PathBuf::from("/data/bulk"),
            workflows_dir: PathBuf::from("/opt/workflows"),
            database: PathBuf::from("/data/edgewatch.db"),
            registry: None,
            engine: EngineConfig::default(),
            pools: Pools::default(),
            schedule: Schedule::default(),
            lifecycle: Lifecycle::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        info!("Reading configuration {}", path.display());
        let content = fs::read_to_string(path)
            .with_context(|| format!("Can't read configuration {}", path.display()))?;
        Config::parse(&content).with_context(|| format!("Invalid configuration {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }
}

/// Workflow engine connection and submission defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub url: String,
    /// Engine-wide ceiling on in-flight jobs, checked by every scheduler
    pub max_jobs: usize,
    pub timeout_secs: u64,
    pub workflow_type: String,
    pub options: OptionsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            max_jobs: 10,
            timeout_secs: 60,
            workflow_type: "WDL".to_string(),
            options: OptionsConfig::default(),
        }
    }
}

/// Values copied into every job's options document
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub workflow_failure_mode: String,
    pub use_relative_output_paths: bool,
    pub write_to_cache: bool,
    pub read_from_cache: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            workflow_failure_mode: "ContinueWhilePossible".to_string(),
            use_relative_output_paths: true,
            write_to_cache: false,
            read_from_cache: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolLimits {
    /// Ceiling on in-flight jobs of the pool
    pub max_jobs: usize,
    /// Ceiling on a single job's input size and on the pool's in-flight total
    pub max_input_bytes: u64,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self { max_jobs: 2, max_input_bytes: 150 * 1024 * 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Pools {
    pub pipeline: PoolLimits,
    pub workflow: PoolLimits,
    pub bigmem: PoolLimits,
}

impl Pools {
    pub fn get(&self, pool: Pool) -> PoolLimits {
        match pool {
            Pool::Pipeline => self.pipeline,
            Pool::Workflow => self.workflow,
            Pool::BigMem => self.bigmem,
        }
    }
}

/// Tick period of every monitor, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub pipeline: u64,
    pub workflow: u64,
    pub bigmem: u64,
    pub cromwell: u64,
    pub bulk: u64,
    pub project: u64,
    pub upload: u64,
    pub status: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            pipeline: 120,
            workflow: 60,
            bigmem: 180,
            cromwell: 60,
            bulk: 120,
            project: 3600,
            upload: 3600,
            status: 300,
        }
    }
}

impl Schedule {
    pub fn period(&self, kind: MonitorKind) -> Duration {
        let secs = match kind {
            MonitorKind::Pipeline => self.pipeline,
            MonitorKind::Workflow => self.workflow,
            MonitorKind::BigMem => self.bigmem,
            MonitorKind::Cromwell => self.cromwell,
            MonitorKind::Bulk => self.bulk,
            MonitorKind::Project => self.project,
            MonitorKind::Upload => self.upload,
            MonitorKind::Status => self.status,
        };
        // tokio intervals panic on a zero period
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Lifecycle {
    pub project_delete_grace_days: i64,
    pub upload_ttl_days: i64,
    pub upload_delete_grace_days: i64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self { project_delete_grace_days: 7, upload_ttl_days: 90, upload_delete_grace_days: 7 }
    }
}
