use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::conf::ProjectConf;
use crate::db::cromwell_job::CromwellJob;
use crate::db::project::Project;
use crate::db::state::ProjectStatus;
use crate::engine::metadata::Metadata;
use crate::engine::{AbortOutcome, JobStatus};
use crate::monitor::{Context, Monitor, MonitorKind};
use crate::result::{write_result, write_run_stats};
use crate::workdir::{WorkingDirectory, CONF, FAILED_LOGS, METADATA};

/// Polls the engine for the in-flight job checked longest ago and applies what it reports
pub struct Reconciler {
    ctx: Arc<Context>,
}

impl Reconciler {
    pub fn new(ctx: Arc<Context>) -> Reconciler {
        Reconciler { ctx }
    }

    async fn abort(&self, job: &CromwellJob, wd: &WorkingDirectory) -> Result<()> {
        info!("Project {} was deleted, aborting engine job {}", job.project, job.id);
        let message = match self.ctx.engine.abort(&job.id).await {
            Ok(AbortOutcome::Confirmed) => format!("Engine job {} aborted", job.id),
            Ok(AbortOutcome::NotRunning(reason)) => {
                format!("Engine job {} was not running, nothing to abort: {reason}", job.id)
            }
            Err(err) => {
                warn!("Abort of engine job {} failed, retrying next tick: {err}", job.id);
                return Ok(());
            }
        };
        wd.log(&message);
        self.ctx.store.set_job_status(&job.id, JobStatus::Aborted)?;
        self.ctx.store.delete_job(&job.id)
    }

    /// Fetch and save the metadata document, plus the logs of failed calls
    async fn save_metadata(&self, job: &CromwellJob, wd: &WorkingDirectory) -> Option<Metadata> {
        let value = match self.ctx.engine.metadata(&job.id).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Can't fetch metadata of engine job {}: {err}", job.id);
                return None;
            }
        };
        if let Err(err) = wd.write_json(METADATA, &value) {
            warn!("{err:#}");
        }
        let metadata = match Metadata::from_value(&value) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Unexpected metadata of engine job {}: {err}", job.id);
                return None;
            }
        };

        let failed = metadata.failed_calls();
        if !failed.is_empty() {
            let mut logs = BTreeMap::new();
            for (call, attempt) in failed {
                let log = match (&attempt.sub_workflow_id, &attempt.stderr) {
                    (Some(sub_id), _) => match self.ctx.engine.logs(sub_id).await {
                        Ok(log) => log,
                        Err(err) => Value::from(format!("Can't fetch logs of {sub_id}: {err}")),
                    },
                    (None, Some(stderr)) => Value::from(stderr.clone()),
                    (None, None) => Value::Null,
                };
                logs.insert(call.to_string(), log);
            }
            if let Err(err) = wd.write_json(FAILED_LOGS, &logs) {
                warn!("{err:#}");
            }
        }
        Some(metadata)
    }

    /// Build results of a job the engine reports successful. Returns the status the job is
    /// recorded with.
    fn finish(&self, project: &Project, metadata: Option<&Metadata>, wd: &WorkingDirectory) -> Result<JobStatus> {
        let ctx = &self.ctx;
        let conf: ProjectConf = match ctx.conf_reader.read(&wd.file(CONF)) {
            Ok(conf) => conf,
            Err(err) => {
                wd.log(&format!("Can't read configuration for results: {err}"));
                self.advance_project(project, ProjectStatus::Failed)?;
                return Ok(JobStatus::Failed);
            }
        };

        if let Some(metadata) = metadata {
            if let Err(err) = write_run_stats(&ctx.registry, &conf, metadata, wd) {
                warn!("Run statistics of project {} not written: {err:#}", project.code);
            }
        }

        match write_result(&ctx.registry, &conf, wd) {
            Ok(_) => {
                self.advance_project(project, ProjectStatus::Complete)?;
                Ok(JobStatus::Succeeded)
            }
            Err(err) => {
                error!("Result generation of project {} failed: {err:#}", project.code);
                wd.log(&format!("Result generation failed: {err:#}"));
                wd.log("Engine job recorded as Failed");
                self.advance_project(project, ProjectStatus::Failed)?;
                Ok(JobStatus::Failed)
            }
        }
    }

    /// Move a project whose job is in flight; a project the user deleted meanwhile stays deleted
    fn advance_project(&self, project: &Project, to: ProjectStatus) -> Result<()> {
        let from = [ProjectStatus::Processing, ProjectStatus::Submitted, ProjectStatus::Running];
        if !self.ctx.store.transition_project(&project.code, &from, to)? {
            info!("Project {} changed meanwhile, not moved to {to}", project.code);
        }
        Ok(())
    }
}

#[async_trait]
impl Monitor for Reconciler {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Cromwell
    }

    async fn tick(&self) -> Result<()> {
        let ctx = &self.ctx;
        let job = match ctx.store.oldest_in_flight()? {
            Some(job) => job,
            None => {
                debug!("No engine jobs in flight");
                return Ok(());
            }
        };
        let project = match ctx.store.get_project(&job.project)? {
            Some(project) => project,
            None => {
                info!("Engine job {} belongs to no project", job.id);
                return ctx.store.delete_job(&job.id);
            }
        };
        let wd = WorkingDirectory::new(&ctx.config.projects_dir, &project.code);

        if project.status == ProjectStatus::Delete {
            return self.abort(&job, &wd).await;
        }

        let status = match ctx.engine.status(&job.id).await {
            Ok(status) => status,
            Err(err) => {
                warn!("Status check of engine job {} failed: {err}", job.id);
                wd.log(&format!("Can't check engine job status: {err}"));
                if !err.is_transient() {
                    // let the other jobs be polled
                    ctx.store.touch_job(&job.id)?;
                }
                return Ok(());
            }
        };
        if status == job.status || status.is_behind(job.status) {
            debug!("Engine job {} still {} (reported {status})", job.id, job.status);
            ctx.store.touch_job(&job.id)?;
            self.save_metadata(&job, &wd).await;
            return Ok(());
        }

        info!("Engine job {} of project {} is {status}", job.id, project.code);
        wd.log(&format!("Engine job {} is {status}", job.id));
        let metadata = self.save_metadata(&job, &wd).await;

        let recorded = match status {
            JobStatus::Submitted => status,
            JobStatus::Running => {
                self.advance_project(&project, ProjectStatus::Running)?;
                status
            }
            JobStatus::Succeeded => self.finish(&project, metadata.as_ref(), &wd)?,
            JobStatus::Failed => {
                self.advance_project(&project, ProjectStatus::Failed)?;
                status
            }
            JobStatus::Aborted => {
                wd.log("Project queued again");
                self.advance_project(&project, ProjectStatus::InQueue)?;
                status
            }
        };
        ctx.store.set_job_status(&job.id, recorded)?;
        if recorded.is_terminal() {
            ctx.store.delete_job(&job.id)?;
        }
        Ok(())
    }
}
