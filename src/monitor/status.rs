use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};

use crate::db::project::Project;
use crate::monitor::{Context, Monitor, MonitorKind};

/// Tells a project owner that their project finished
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, project: &Project) -> Result<()>;
}

/// Writes one structured log line per finished project
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, project: &Project) -> Result<()> {
        info!(
            "notify owner={} project={} name={:?} type={} status={}",
            project.owner, project.code, project.name, project.project_type, project.status
        );
        Ok(())
    }
}

/// Notifies owners of `complete` and `failed` projects, once per project
pub struct StatusMonitor {
    ctx: Arc<Context>,
    notifier: Box<dyn Notifier>,
}

impl StatusMonitor {
    pub fn new(ctx: Arc<Context>, notifier: Box<dyn Notifier>) -> StatusMonitor {
        StatusMonitor { ctx, notifier }
    }
}

#[async_trait]
impl Monitor for StatusMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Status
    }

    async fn tick(&self) -> Result<()> {
        for project in self.ctx.store.unnotified_projects()? {
            match self.notifier.notify(&project).await {
                Ok(()) => self.ctx.store.set_notified(&project.code)?,
                Err(err) => warn!("Can't notify owner of project {}: {err:#}", project.code),
            }
        }
        Ok(())
    }
}
