//! Periodic single-tick routines that move projects through their lifecycle

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::ValueEnum;

use crate::conf::read::ConfReader;
use crate::config::Config;
use crate::db::Store;
use crate::engine::Engine;
use crate::registry::Registry;

/// Capacity-aware submission, one instance per pool
pub mod scheduler;
/// Engine status polling
pub mod reconciler;
/// Hard deletion of soft-deleted projects
pub mod project;
/// Upload expiry
pub mod upload;
/// Owner notification of finished projects
pub mod status;
/// Bulk submission expansion and roll-up
pub mod bulk;
/// Drive monitors on their schedules
pub mod runner;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum MonitorKind {
    Pipeline,
    Workflow,
    #[value(name = "bigmem")]
    BigMem,
    Cromwell,
    Bulk,
    Project,
    Upload,
    Status,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 8] = [
        MonitorKind::Pipeline,
        MonitorKind::Workflow,
        MonitorKind::BigMem,
        MonitorKind::Cromwell,
        MonitorKind::Bulk,
        MonitorKind::Project,
        MonitorKind::Upload,
        MonitorKind::Status,
    ];
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MonitorKind::Pipeline => write!(f, "pipeline"),
            MonitorKind::Workflow => write!(f, "workflow"),
            MonitorKind::BigMem => write!(f, "bigmem"),
            MonitorKind::Cromwell => write!(f, "cromwell"),
            MonitorKind::Bulk => write!(f, "bulk"),
            MonitorKind::Project => write!(f, "project"),
            MonitorKind::Upload => write!(f, "upload"),
            MonitorKind::Status => write!(f, "status"),
        }
    }
}

/// A routine the runner invokes on a fixed period
///
/// A tick does a bounded amount of work and returns. An error is logged by the runner and the
/// next tick runs on schedule.
#[async_trait]
pub trait Monitor: Send + Sync {
    fn kind(&self) -> MonitorKind;

    async fn tick(&self) -> Result<()>;
}

/// Shared, immutable (apart from the store) state every monitor works with
pub struct Context {
    pub config: Config,
    pub registry: Registry,
    pub store: Store,
    pub engine: Arc<dyn Engine>,
    pub conf_reader: ConfReader,
    /// Used for HEAD requests that size remote inputs
    pub http: reqwest::Client,
}

impl Context {
    pub fn new(config: Config, registry: Registry, store: Store, engine: Arc<dyn Engine>) -> Result<Context> {
        let conf_reader = ConfReader::new()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.engine.timeout_secs))
            .build()
            .context("Can't build HTTP client")?;
        Ok(Context { config, registry, store, engine, conf_reader, http })
    }
}
