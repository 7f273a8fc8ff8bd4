use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Schedule;
use crate::monitor::bulk::BulkMonitor;
use crate::monitor::project::ProjectMonitor;
use crate::monitor::reconciler::Reconciler;
use crate::monitor::scheduler::Scheduler;
use crate::monitor::status::{LogNotifier, StatusMonitor};
use crate::monitor::upload::UploadMonitor;
use crate::monitor::{Context, Monitor, MonitorKind};
use crate::registry::Pool;

/// Build the monitors of the selected kinds, in the order given
pub fn build(ctx: &Arc<Context>, kinds: &[MonitorKind]) -> Vec<Arc<dyn Monitor>> {
    kinds
        .iter()
        .map(|kind| -> Arc<dyn Monitor> {
            match kind {
                MonitorKind::Pipeline => Arc::new(Scheduler::new(ctx.clone(), Pool::Pipeline)),
                MonitorKind::Workflow => Arc::new(Scheduler::new(ctx.clone(), Pool::Workflow)),
                MonitorKind::BigMem => Arc::new(Scheduler::new(ctx.clone(), Pool::BigMem)),
                MonitorKind::Cromwell => Arc::new(Reconciler::new(ctx.clone())),
                MonitorKind::Bulk => Arc::new(BulkMonitor::new(ctx.clone())),
                MonitorKind::Project => Arc::new(ProjectMonitor::new(ctx.clone())),
                MonitorKind::Upload => Arc::new(UploadMonitor::new(ctx.clone())),
                MonitorKind::Status => Arc::new(StatusMonitor::new(ctx.clone(), Box::new(LogNotifier))),
            }
        })
        .collect()
}

/// Run one tick, logging instead of propagating failures
///
/// A failed tick is retried by the next scheduled tick, without backoff.
async fn run_tick(monitor: &dyn Monitor) -> bool {
    match monitor.tick().await {
        Ok(()) => true,
        Err(err) => {
            error!("{} monitor tick failed: {err:#}", monitor.kind());
            false
        }
    }
}

/// Tick every monitor once, in order. Returns false if any tick failed.
pub async fn run_once(monitors: &[Arc<dyn Monitor>]) -> bool {
    let mut ok = true;
    for monitor in monitors {
        info!("Running {} monitor once", monitor.kind());
        ok &= run_tick(monitor.as_ref()).await;
    }
    ok
}

/// Drive each monitor on its own schedule until ctrl-c
///
/// Every monitor gets its own task and interval. A slow tick delays that monitor's next tick
/// instead of overlapping it.
pub async fn run(monitors: Vec<Arc<dyn Monitor>>, schedule: &Schedule) -> Result<()> {
    let mut tasks = JoinSet::new();
    for monitor in monitors {
        let period = schedule.period(monitor.kind());
        info!("Scheduling {} monitor every {}s", monitor.kind(), period.as_secs());
        tasks.spawn(drive(monitor, period));
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("Interrupted, stopping monitors");
        }
        Some(joined) = tasks.join_next() => {
            // monitor tasks loop forever, so this only happens on a panic
            if let Err(err) = joined {
                error!("Monitor task ended: {err}");
            }
        }
    }
    tasks.shutdown().await;
    Ok(())
}

async fn drive(monitor: Arc<dyn Monitor>, period: Duration) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        debug!("{} monitor tick", monitor.kind());
        run_tick(monitor.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use async_trait::async_trait;

    use super::*;
    use crate::testing::TestContext;

    struct Failing;

    #[async_trait]
    impl Monitor for Failing {
        fn kind(&self) -> MonitorKind {
            MonitorKind::Status
        }

        async fn tick(&self) -> Result<()> {
            bail!("store unavailable")
        }
    }

    #[test]
    fn test_build_selected_monitors() {
        let tc = TestContext::new();
        let monitors = build(&tc.ctx, &MonitorKind::ALL);
        let kinds: Vec<MonitorKind> = monitors.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, MonitorKind::ALL.to_vec());

        let only = build(&tc.ctx, &[MonitorKind::Cromwell]);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].kind(), MonitorKind::Cromwell);
    }

    #[tokio::test]
    async fn test_run_once_reports_failures() {
        let tc = TestContext::new();
        assert!(run_once(&build(&tc.ctx, &MonitorKind::ALL)).await);

        let monitors: Vec<Arc<dyn Monitor>> = vec![Arc::new(Failing), build(&tc.ctx, &[MonitorKind::Upload]).remove(0)];
        assert!(!run_once(&monitors).await);
    }
}
