use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::conf::workflow::FastqPair;
use crate::conf::{FastqInput, ProjectConf};
use crate::db::bulk::BulkSubmission;
use crate::db::project::Project;
use crate::db::state::ProjectStatus;
use crate::monitor::{Context, Monitor, MonitorKind};
use crate::tsv;
use crate::workdir::{WorkingDirectory, CONF};
use crate::workflow::materialize::is_remote;

/// Sample sheet of a bulk submission, next to the template `conf.json`
pub const SHEET: &str = "sheet.tsv";

/// One sheet row, validated
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub name: String,
    pub description: String,
    pub input: FastqInput,
}

fn cell<'a>(row: &'a tsv::Row, column: &str) -> &'a str {
    row.get(column).map(String::as_str).unwrap_or("")
}

/// Comma separated list cell
fn list(row: &tsv::Row, column: &str) -> Vec<String> {
    cell(row, column)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Validate every row, collecting all errors
pub fn parse_sheet(rows: &[tsv::Row]) -> Result<Vec<SheetRow>, Vec<String>> {
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    if rows.is_empty() {
        errors.push("Sheet has no rows".to_string());
    }

    for (i, row) in rows.iter().enumerate() {
        // header is line 1
        let line = i + 2;
        let mut row_errors = Vec::new();

        let name = cell(row, "name");
        if name.is_empty() {
            row_errors.push(format!("Row {line}: name is required"));
        }
        let interleaved = match parse_flag(cell(row, "interleaved")) {
            Some(flag) => flag,
            None => {
                row_errors.push(format!("Row {line}: interleaved must be true or false"));
                true
            }
        };

        let input = if interleaved {
            let fastqs = list(row, "fastqs");
            if fastqs.is_empty() {
                row_errors.push(format!("Row {line}: fastqs is required for interleaved reads"));
            }
            FastqInput { interleaved, fastqs, pairs: vec![] }
        } else {
            let (fq1, fq2) = (list(row, "fq1"), list(row, "fq2"));
            if fq1.is_empty() || fq1.len() != fq2.len() {
                row_errors.push(format!("Row {line}: fq1 and fq2 must list the same number of files"));
            }
            let pairs = fq1.into_iter().zip(fq2).map(|(fq1, fq2)| FastqPair { fq1, fq2 }).collect();
            FastqInput { interleaved, fastqs: vec![], pairs }
        };
        for path in input.paths() {
            if !is_remote(path) && !Path::new(path).exists() {
                row_errors.push(format!("Row {line}: file not found: {path}"));
            }
        }

        match row_errors.is_empty() {
            true => parsed.push(SheetRow {
                name: name.to_string(),
                description: cell(row, "description").to_string(),
                input,
            }),
            false => errors.extend(row_errors),
        }
    }

    match errors.is_empty() {
        true => Ok(parsed),
        false => Err(errors),
    }
}

/// Bulk status derived from its children, `None` when it doesn't change
pub fn roll_up(children: &[ProjectStatus]) -> Option<ProjectStatus> {
    if children.is_empty() {
        return None;
    }
    if children.iter().all(|s| *s == ProjectStatus::Complete) {
        return Some(ProjectStatus::Complete);
    }
    if children.iter().all(ProjectStatus::is_terminal) {
        return Some(ProjectStatus::Failed);
    }
    if children.iter().any(|s| matches!(s, ProjectStatus::Submitted | ProjectStatus::Running)) {
        return Some(ProjectStatus::Running);
    }
    None
}

/// Expands queued bulk submissions into projects and rolls their status up
pub struct BulkMonitor {
    ctx: Arc<Context>,
}

impl BulkMonitor {
    pub fn new(ctx: Arc<Context>) -> BulkMonitor {
        BulkMonitor { ctx }
    }

    /// Template configuration and sheet rows, or every problem found
    fn load(&self, bulk: &BulkSubmission, wd: &WorkingDirectory) -> Result<(ProjectConf, Vec<SheetRow>), Vec<String>> {
        let mut errors = Vec::new();

        let template = match self.ctx.conf_reader.read(&wd.file(CONF)) {
            Ok(conf) if conf.category().as_str() != bulk.bulk_type => {
                errors.push(format!("Template is for {} but the bulk type is {}", conf.category(), bulk.bulk_type));
                None
            }
            Ok(conf) => Some(conf),
            Err(err) => {
                errors.push(format!("Invalid template configuration: {err}"));
                None
            }
        };
        if self.ctx.registry.lookup(&bulk.bulk_type).is_none() {
            errors.push(format!("Unknown project type {}", bulk.bulk_type));
        }
        if let Some(conf) = &template {
            let empty = FastqInput { interleaved: true, fastqs: vec![], pairs: vec![] };
            if conf.with_fastq_input(empty).is_none() {
                errors.push(format!("{} projects can't be bulk submitted", bulk.bulk_type));
            }
        }

        let rows = match tsv::read(&wd.file(SHEET)) {
            Ok(rows) => parse_sheet(&rows).unwrap_or_else(|row_errors| {
                errors.extend(row_errors);
                Vec::new()
            }),
            Err(err) => {
                errors.push(format!("{err:#}"));
                Vec::new()
            }
        };

        match template {
            Some(template) if errors.is_empty() => Ok((template, rows)),
            _ => Err(errors),
        }
    }

    fn expand(&self) -> Result<()> {
        let ctx = &self.ctx;
        let bulk = match ctx.store.next_queued_bulk()? {
            Some(bulk) => bulk,
            None => {
                debug!("No queued bulk submissions");
                return Ok(());
            }
        };
        if !ctx.store.transition_bulk(&bulk.code, ProjectStatus::InQueue, ProjectStatus::Processing)? {
            debug!("Bulk submission {} was claimed elsewhere", bulk.code);
            return Ok(());
        }
        let wd = WorkingDirectory::new(&ctx.config.bulk_dir, &bulk.code);
        info!("Expanding bulk submission {}", bulk.code);

        let (template, rows) = match self.load(&bulk, &wd) {
            Ok(loaded) => loaded,
            Err(errors) => {
                for error in &errors {
                    warn!("Bulk submission {}: {error}", bulk.code);
                    wd.log(error);
                }
                ctx.store.transition_bulk(&bulk.code, ProjectStatus::Processing, ProjectStatus::Failed)?;
                return Ok(());
            }
        };

        match self.create_children(&bulk, &template, rows) {
            Ok(created) => wd.log(&format!("Created {created} projects")),
            Err(err) => {
                let message = format!("Expansion failed: {err:#}");
                warn!("Bulk submission {}: {message}", bulk.code);
                wd.log(&message);
                self.abandon(&bulk.code)?;
            }
        }
        Ok(())
    }

    /// One queued project per row, each recorded on the bulk as it is created
    fn create_children(&self, bulk: &BulkSubmission, template: &ProjectConf, rows: Vec<SheetRow>) -> Result<usize> {
        let ctx = &self.ctx;
        let mut created = 0;
        for row in rows {
            let conf = match template.with_fastq_input(row.input) {
                Some(conf) => conf,
                None => continue,
            };
            let code = Uuid::new_v4().to_string();
            let mut project = Project::new(&code, &row.name, &bulk.bulk_type, &bulk.owner);
            project.description = row.description;
            project.bulk = Some(bulk.code.clone());

            let project_wd = WorkingDirectory::new(&ctx.config.projects_dir, &code);
            fs::create_dir_all(&project_wd.path)
                .with_context(|| format!("Can't create {}", project_wd.path.display()))?;
            project_wd.write_json(CONF, &conf)?;
            ctx.store.insert_bulk_child(&bulk.code, &project)?;
            project_wd.log(&format!("Created from bulk submission {}", bulk.code));
            created += 1;
        }
        Ok(created)
    }

    /// Fail a partly expanded bulk. Children created so far are deleted, so a bulk is never
    /// expanded twice and no child runs outside it.
    fn abandon(&self, code: &str) -> Result<()> {
        let ctx = &self.ctx;
        if let Some(bulk) = ctx.store.get_bulk(code)? {
            for child in &bulk.projects {
                ctx.store.transition_project(child, &[ProjectStatus::InQueue], ProjectStatus::Delete)?;
            }
        }
        ctx.store.transition_bulk(code, ProjectStatus::Processing, ProjectStatus::Failed)?;
        Ok(())
    }

    fn update(&self) -> Result<()> {
        let ctx = &self.ctx;
        for bulk in ctx.store.bulks_with_status(&[ProjectStatus::Processing, ProjectStatus::Running])? {
            let mut children = Vec::new();
            for code in &bulk.projects {
                // a removed child counts as deleted
                let status = ctx.store.get_project(code)?.map(|p| p.status).unwrap_or(ProjectStatus::Delete);
                children.push(status);
            }
            match roll_up(&children) {
                Some(status) if status != bulk.status => {
                    if ctx.store.transition_bulk(&bulk.code, bulk.status, status)? {
                        WorkingDirectory::new(&ctx.config.bulk_dir, &bulk.code)
                            .log(&format!("Bulk submission {status}"));
                    }
                }
                _ => debug!("Bulk submission {} unchanged", bulk.code),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Monitor for BulkMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Bulk
    }

    async fn tick(&self) -> Result<()> {
        self.expand()?;
        self.update()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::testing::{reads_qc, TestContext};
    use ProjectStatus::*;

    #[rstest]
    #[case(&[Complete, Complete], Some(Complete))]
    #[case(&[Complete, Failed], Some(Failed))]
    #[case(&[Delete, Complete], Some(Failed))]
    #[case(&[Running, InQueue], Some(Running))]
    #[case(&[Complete, Submitted], Some(Running))]
    #[case(&[InQueue, Processing], None)]
    #[case(&[], None)]
    fn test_roll_up(#[case] children: &[ProjectStatus], #[case] expected: Option<ProjectStatus>) {
        assert_eq!(roll_up(children), expected);
    }

    fn bulk(tc: &TestContext, code: &str, bulk_type: &str, template: &serde_json::Value, sheet: &str) {
        let wd = WorkingDirectory::new(&tc.ctx.config.bulk_dir, code);
        fs::create_dir_all(&wd.path).unwrap();
        wd.write_json(CONF, template).unwrap();
        wd.write(SHEET, sheet.as_bytes()).unwrap();
        tc.store().insert_bulk(&BulkSubmission::new(code, code, bulk_type, "owner")).unwrap();
    }

    #[tokio::test]
    async fn test_sheet_expands_into_projects() {
        let tc = TestContext::new();
        let a = tc.file("a.fq", 1);
        let r1 = tc.file("b_R1.fq", 1);
        let r2 = tc.file("b_R2.fq", 1);
        let sheet = format!(
            "name\tdescription\tinterleaved\tfastqs\tfq1\tfq2\n\
             a\tfirst\ttrue\t{}\t\t\n\
             b\t\tfalse\t\t{}\t{}\n",
            a.display(),
            r1.display(),
            r2.display()
        );
        bulk(&tc, "b1", "ReadsQC", &reads_qc(&["template.fq"]), &sheet);

        BulkMonitor::new(tc.ctx.clone()).tick().await.unwrap();

        let b1 = tc.store().get_bulk("b1").unwrap().unwrap();
        assert_eq!(b1.status, ProjectStatus::Processing);
        assert_eq!(b1.projects.len(), 2);

        let first = tc.store().get_project(&b1.projects[0]).unwrap().unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(first.description, "first");
        assert_eq!(first.bulk.as_deref(), Some("b1"));
        assert_eq!(first.status, ProjectStatus::InQueue);
        let conf = tc.ctx.conf_reader.read(&tc.wd(&first.code).file(CONF)).unwrap();
        assert_eq!(conf.input_paths(), vec![a.to_str().unwrap()]);

        let second = tc.store().get_project(&b1.projects[1]).unwrap().unwrap();
        let conf = tc.ctx.conf_reader.read(&tc.wd(&second.code).file(CONF)).unwrap();
        assert_eq!(conf.input_paths(), vec![r1.to_str().unwrap(), r2.to_str().unwrap()]);
    }

    #[tokio::test]
    async fn test_all_row_errors_are_reported() {
        let tc = TestContext::new();
        let sheet = "name\tinterleaved\tfastqs\tfq1\tfq2\n\
                     \ttrue\t/missing/a.fq\t\t\n\
                     b\tmaybe\t\t\t\n\
                     c\tfalse\t\t/x_R1.fq\t\n";
        bulk(&tc, "b1", "ReadsQC", &reads_qc(&["template.fq"]), sheet);

        BulkMonitor::new(tc.ctx.clone()).tick().await.unwrap();

        assert_eq!(tc.store().get_bulk("b1").unwrap().unwrap().status, ProjectStatus::Failed);
        let log = WorkingDirectory::new(&tc.ctx.config.bulk_dir, "b1").read_to_string(crate::workdir::LOG).unwrap();
        assert!(log.contains("Row 2: name is required"));
        assert!(log.contains("Row 2: file not found: /missing/a.fq"));
        assert!(log.contains("Row 3: interleaved must be true or false"));
        assert!(log.contains("Row 4: fq1 and fq2 must list the same number of files"));
        assert!(tc.store().next_queued(&["ReadsQC".to_string()]).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_read_categories_can_be_bulk_submitted() {
        let tc = TestContext::new();
        let template = json!({"workflow": {"name": "MetaAnnotation", "input_fasta": "/x/contigs.fna"}});
        let a = tc.file("a.fq", 1);
        let sheet = format!("name\tinterleaved\tfastqs\na\ttrue\t{}\n", a.display());
        bulk(&tc, "b1", "MetaAnnotation", &template, &sheet);

        BulkMonitor::new(tc.ctx.clone()).tick().await.unwrap();
        assert_eq!(tc.store().get_bulk("b1").unwrap().unwrap().status, ProjectStatus::Failed);
    }

    #[tokio::test]
    async fn test_status_rolls_up_from_children() {
        let tc = TestContext::new();
        let a = tc.file("a.fq", 1);
        let sheet = format!("name\tinterleaved\tfastqs\na\ttrue\t{}\nb\ttrue\t{}\n", a.display(), a.display());
        bulk(&tc, "b1", "ReadsQC", &reads_qc(&["template.fq"]), &sheet);
        let monitor = BulkMonitor::new(tc.ctx.clone());
        monitor.tick().await.unwrap();
        let children = tc.store().get_bulk("b1").unwrap().unwrap().projects;

        tc.store().transition_project(&children[0], &[InQueue], Running).unwrap();
        monitor.tick().await.unwrap();
        assert_eq!(tc.store().get_bulk("b1").unwrap().unwrap().status, ProjectStatus::Running);

        tc.store().transition_project(&children[0], &[Running], Complete).unwrap();
        tc.store().transition_project(&children[1], &[InQueue], Complete).unwrap();
        monitor.tick().await.unwrap();
        assert_eq!(tc.store().get_bulk("b1").unwrap().unwrap().status, ProjectStatus::Complete);
    }

    #[tokio::test]
    async fn test_failed_expansion_is_not_repeated() {
        let tc = TestContext::new();
        let a = tc.file("a.fq", 1);
        let sheet = format!("name\tinterleaved\tfastqs\na\ttrue\t{}\nb\ttrue\t{}\n", a.display(), a.display());
        bulk(&tc, "b1", "ReadsQC", &reads_qc(&["template.fq"]), &sheet);
        // the second child insert fails, as a full disk would
        let db = rusqlite::Connection::open(&tc.ctx.config.database).unwrap();
        db.execute_batch(
            "CREATE TRIGGER second_child BEFORE INSERT ON project
             WHEN (SELECT count(*) FROM project WHERE bulk = NEW.bulk) >= 1
             BEGIN SELECT RAISE(ABORT, 'database or disk is full'); END;",
        )
        .unwrap();
        let monitor = BulkMonitor::new(tc.ctx.clone());

        monitor.tick().await.unwrap();
        monitor.tick().await.unwrap();

        let b1 = tc.store().get_bulk("b1").unwrap().unwrap();
        assert_eq!(b1.status, ProjectStatus::Failed);
        assert_eq!(b1.projects.len(), 1);
        assert_eq!(tc.status_of(&b1.projects[0]), ProjectStatus::Delete);
        let count: i64 = db.query_row("SELECT count(*) FROM project", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
        let log = WorkingDirectory::new(&tc.ctx.config.bulk_dir, "b1").read_to_string(crate::workdir::LOG).unwrap();
        assert!(log.contains("Expansion failed"));
    }
}
