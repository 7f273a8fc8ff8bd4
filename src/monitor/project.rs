use std::fs;
use std::io;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::{debug, info};

use crate::monitor::{Context, Monitor, MonitorKind};
use crate::workdir::WorkingDirectory;

/// Hard-deletes projects that have been in `delete` for longer than the grace period
pub struct ProjectMonitor {
    ctx: Arc<Context>,
}

impl ProjectMonitor {
    pub fn new(ctx: Arc<Context>) -> ProjectMonitor {
        ProjectMonitor { ctx }
    }
}

#[async_trait]
impl Monitor for ProjectMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Project
    }

    async fn tick(&self) -> Result<()> {
        let ctx = &self.ctx;
        let cutoff = Utc::now() - Duration::days(ctx.config.lifecycle.project_delete_grace_days);

        for project in ctx.store.deleted_projects_before(&cutoff)? {
            // the reconciler aborts the job first
            if ctx.store.job_for_project(&project.code)?.is_some() {
                debug!("Project {} still has an engine job", project.code);
                continue;
            }
            let wd = WorkingDirectory::new(&ctx.config.projects_dir, &project.code);
            info!("Removing project {} and {}", project.code, wd.path.display());
            match fs::remove_dir_all(&wd.path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    return Err(err).with_context(|| format!("Can't remove {}", wd.path.display()));
                }
                _ => {}
            }
            ctx.store.delete_project(&project.code)?;
        }
        Ok(())
    }
}
