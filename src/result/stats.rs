use anyhow::{Context, Result};
use chrono::DateTime;
use log::info;
use serde::Serialize;

use crate::conf::{ProjectConf, WorkflowConf};
use crate::engine::metadata::{CallAttempt, Metadata};
use crate::registry::{CategorySpec, Registry};
use crate::workdir::{WorkingDirectory, RUN_STATS};

/// One row of `run_stats.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStat {
    pub call: String,
    pub status: String,
    pub start: String,
    pub end: String,
    /// `HH:MM:SS`, empty until the call has both timestamps
    pub running_time: String,
}

impl RunStat {
    fn new(call: &str, attempt: Option<&CallAttempt>) -> RunStat {
        let start = attempt.and_then(|a| a.start.clone()).unwrap_or_default();
        let end = attempt.and_then(|a| a.end.clone()).unwrap_or_default();
        RunStat {
            call: call.to_string(),
            status: attempt
                .and_then(|a| a.execution_status.clone())
                .unwrap_or_else(|| "NotStarted".to_string()),
            running_time: running_time(&start, &end).unwrap_or_default(),
            start,
            end,
        }
    }
}

fn running_time(start: &str, end: &str) -> Option<String> {
    let start = DateTime::parse_from_rfc3339(start).ok()?;
    let end = DateTime::parse_from_rfc3339(end).ok()?;
    let seconds = (end - start).num_seconds().max(0);
    Some(format!("{:02}:{:02}:{:02}", seconds / 3600, seconds % 3600 / 60, seconds % 60))
}

fn watched_calls(spec: &CategorySpec, metadata: &Metadata) -> Vec<RunStat> {
    spec.calls
        .iter()
        .map(|call| RunStat::new(call, metadata.last_attempt(call)))
        .collect()
}

/// One synthetic row per selected profiler, timed by its `profile_<tool>` call when the engine
/// reports one and by the first watched call otherwise
fn profiler_rows(spec: &CategorySpec, metadata: &Metadata, tools: &[&str]) -> Vec<RunStat> {
    let fallback = spec.calls.first().and_then(|call| metadata.last_attempt(call));
    tools
        .iter()
        .map(|tool| {
            let call = format!("{}.profile_{tool}", spec.workflow);
            RunStat::new(&call, metadata.last_attempt(&call).or(fallback))
        })
        .collect()
}

/// Rows for every watched call of the project's category
pub fn run_stats(registry: &Registry, conf: &ProjectConf, metadata: &Metadata) -> Result<Vec<RunStat>> {
    let category = conf.category();
    let spec = registry.get(category).with_context(|| format!("Category {category} is not registered"))?;

    let rows = match conf {
        ProjectConf::Workflow(WorkflowConf::ReadbasedAnalysis(c)) => {
            let mut rows = watched_calls(spec, metadata);
            rows.extend(profiler_rows(spec, metadata, &c.tools.enabled()));
            rows
        }
        ProjectConf::Workflow(_) => watched_calls(spec, metadata),
        // steps run as sub-workflows, one call each
        ProjectConf::Pipeline(pipeline) => spec
            .steps
            .iter()
            .filter(|step| pipeline.is_on(**step))
            .map(|step| {
                let call = format!("{}.{}", spec.workflow, step.as_str());
                RunStat::new(&call, metadata.last_attempt(&call))
            })
            .collect(),
    };
    Ok(rows)
}

pub fn write_run_stats(registry: &Registry, conf: &ProjectConf, metadata: &Metadata, wd: &WorkingDirectory) -> Result<()> {
    let rows = run_stats(registry, conf, metadata)?;
    info!("Writing {} run statistics to {}", rows.len(), wd.file(RUN_STATS).display());
    wd.write_json(RUN_STATS, &rows)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("2024-01-01T00:00:00.000Z", "2024-01-01T01:02:03.500Z", Some("01:02:03"))]
    #[case("2024-01-01T00:00:00Z", "2024-01-03T00:00:10Z", Some("48:00:10"))]
    #[case("2024-01-01T00:00:00Z", "", None)]
    fn test_running_time(#[case] start: &str, #[case] end: &str, #[case] expected: Option<&str>) {
        assert_eq!(running_time(start, end).as_deref(), expected);
    }

    #[test]
    fn test_readbased_tool_rows() {
        let registry = Registry::load(None, Path::new("/opt")).unwrap();
        let conf: ProjectConf = serde_json::from_value(json!({"workflow": {
            "name": "ReadbasedAnalysis",
            "input_fastq": {"interleaved": true, "fastqs": ["r.fq"]},
            "tools": {"centrifuge": false}
        }}))
        .unwrap();
        let metadata = Metadata::from_value(&json!({"calls": {
            "ReadbasedAnalysis.stage": [
                {"executionStatus": "Done", "start": "2024-01-01T00:00:00Z", "end": "2024-01-01T00:00:30Z"}
            ],
            "ReadbasedAnalysis.profile_kraken2": [
                {"executionStatus": "Failed", "start": "2024-01-01T00:01:00Z", "end": "2024-01-01T00:03:00Z"},
                {"executionStatus": "Done", "start": "2024-01-01T00:04:00Z", "end": "2024-01-01T00:05:00Z"}
            ]
        }}))
        .unwrap();

        let rows = run_stats(&registry, &conf, &metadata).unwrap();
        let calls: Vec<&str> = rows.iter().map(|r| r.call.as_str()).collect();
        assert_eq!(
            calls,
            vec![
                "ReadbasedAnalysis.stage",
                "ReadbasedAnalysis.make_info_file",
                "ReadbasedAnalysis.profile_gottcha2",
                "ReadbasedAnalysis.profile_kraken2",
            ]
        );
        assert_eq!(rows[1].status, "NotStarted");
        // gottcha2 has no call of its own and borrows the stage timing
        assert_eq!(rows[2].running_time, "00:00:30");
        assert_eq!(rows[3].status, "Done");
        assert_eq!(rows[3].running_time, "00:01:00");
    }
}
