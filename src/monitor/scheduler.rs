use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::conf::ProjectConf;
use crate::db::cromwell_job::CromwellJob;
use crate::db::project::Project;
use crate::db::state::ProjectStatus;
use crate::engine::JobStatus;
use crate::monitor::{Context, Monitor, MonitorKind};
use crate::registry::Pool;
use crate::workdir::{WorkingDirectory, CONF};
use crate::workflow::input_size::total_input_size;
use crate::workflow::job::Generator;

/// Submits at most one queued project of a pool per tick, within the engine-wide and pool
/// ceilings
pub struct Scheduler {
    ctx: Arc<Context>,
    pool: Pool,
}

impl Scheduler {
    pub fn new(ctx: Arc<Context>, pool: Pool) -> Scheduler {
        Scheduler { ctx, pool }
    }

    /// Terminal failure of a project still in `from`, every line goes to the project log
    fn fail(&self, project: &Project, wd: &WorkingDirectory, from: ProjectStatus, lines: &[String]) -> Result<()> {
        for line in lines {
            warn!("Project {}: {}", project.code, line);
            wd.log(line);
        }
        if self.ctx.store.transition_project(&project.code, &[from], ProjectStatus::Failed)? {
            wd.log("Project failed");
        }
        Ok(())
    }

    fn read_conf(&self, project: &Project, wd: &WorkingDirectory) -> Result<ProjectConf, String> {
        if self.ctx.registry.lookup(&project.project_type).is_none() {
            return Err(format!("Unknown project type {}", project.project_type));
        }
        let conf = self
            .ctx
            .conf_reader
            .read(&wd.file(CONF))
            .map_err(|err| format!("Invalid configuration: {err}"))?;
        if conf.category().as_str() != project.project_type {
            return Err(format!(
                "Configuration is for {} but the project type is {}",
                conf.category(),
                project.project_type
            ));
        }
        Ok(conf)
    }
}

#[async_trait]
impl Monitor for Scheduler {
    fn kind(&self) -> MonitorKind {
        match self.pool {
            Pool::Pipeline => MonitorKind::Pipeline,
            Pool::Workflow => MonitorKind::Workflow,
            Pool::BigMem => MonitorKind::BigMem,
        }
    }

    async fn tick(&self) -> Result<()> {
        let ctx = &self.ctx;
        let limits = ctx.config.pools.get(self.pool);

        let in_flight = ctx.store.in_flight_jobs(None)?.len();
        if in_flight >= ctx.config.engine.max_jobs {
            debug!("Engine busy with {in_flight} jobs, {} scheduler waits", self.pool);
            return Ok(());
        }
        let types = ctx.registry.names_in(self.pool);
        let pool_jobs = ctx.store.in_flight_jobs(Some(types.as_slice()))?;
        if pool_jobs.len() >= limits.max_jobs {
            debug!("Pool {} is full with {} jobs", self.pool, pool_jobs.len());
            return Ok(());
        }
        let job_input_size: u64 = pool_jobs.iter().map(|job| job.input_size).sum();

        let project = match ctx.store.next_queued(&types)? {
            Some(project) => project,
            None => {
                debug!("No queued {} projects", self.pool);
                return Ok(());
            }
        };
        let wd = WorkingDirectory::new(&ctx.config.projects_dir, &project.code);
        info!("Scheduling {} project {}", project.project_type, project.code);

        let conf = match self.read_conf(&project, &wd) {
            Ok(conf) => conf,
            Err(message) => return self.fail(&project, &wd, ProjectStatus::InQueue, &[message]),
        };

        let input_size = total_input_size(&ctx.http, &conf.input_paths()).await;
        if input_size > limits.max_input_bytes {
            let message = format!(
                "Input size {} bytes exceeds the {} pool limit of {} bytes",
                input_size, self.pool, limits.max_input_bytes
            );
            return self.fail(&project, &wd, ProjectStatus::InQueue, &[message]);
        }
        if job_input_size + input_size > limits.max_input_bytes {
            debug!(
                "Pool {} busy: {} bytes in flight, project {} needs {}",
                self.pool, job_input_size, project.code, input_size
            );
            return Ok(());
        }

        // claim; a concurrent run or the user may have moved the project meanwhile
        if !ctx.store.transition_project(&project.code, &[ProjectStatus::InQueue], ProjectStatus::Processing)? {
            debug!("Project {} was claimed elsewhere", project.code);
            return Ok(());
        }
        wd.log("Generating job files");
        let generator = Generator { registry: &ctx.registry, store: &ctx.store, config: &ctx.config };
        let files = match generator.create(&project, &conf, &wd) {
            Ok(files) => files,
            Err(err) => return self.fail(&project, &wd, ProjectStatus::Processing, &err.log_lines()),
        };
        let submission = match files.submission(&ctx.config.engine.workflow_type) {
            Ok(submission) => submission,
            Err(err) => return self.fail(&project, &wd, ProjectStatus::Processing, &[format!("{err:#}")]),
        };

        let id = match ctx.engine.submit(&submission).await {
            Ok(id) => id,
            Err(err) => {
                return self.fail(&project, &wd, ProjectStatus::Processing, &[format!("Submission failed: {err}")])
            }
        };
        let job = CromwellJob {
            id: id.clone(),
            project: project.code.clone(),
            job_type: project.project_type.clone(),
            input_size,
            status: JobStatus::Submitted,
            updated: Utc::now(),
        };
        // the job is recorded first so a project deleted meanwhile still gets its job aborted
        if let Err(err) = ctx.store.insert_job(&job) {
            error!("Can't record job {id} of project {}: {err:#}", project.code);
            return self.fail(&project, &wd, ProjectStatus::Processing, &[format!("Can't record engine job {id}")]);
        }
        wd.log(&format!("Submitted engine job {id}"));
        if !ctx.store.transition_project(&project.code, &[ProjectStatus::Processing], ProjectStatus::Submitted)? {
            info!("Project {} changed during submission, engine job {id} is left to the reconciler", project.code);
        }
        Ok(())
    }
}
