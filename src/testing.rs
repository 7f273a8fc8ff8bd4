//! Fixtures shared by monitor tests

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use crate::config::Config;
use crate::db::project::Project;
use crate::db::Store;
use crate::engine::{AbortOutcome, Engine, EngineError, JobStatus, Submission};
use crate::monitor::Context;
use crate::registry::Registry;
use crate::workdir::{WorkingDirectory, CONF};

/// In-process engine answering from a script
#[derive(Default)]
pub struct FakeEngine {
    next_id: AtomicUsize,
    pub submissions: Mutex<Vec<Submission>>,
    pub submit_error: Mutex<Option<EngineError>>,
    pub statuses: Mutex<HashMap<String, Result<JobStatus, EngineError>>>,
    pub metadata: Mutex<HashMap<String, Value>>,
    pub logs: Mutex<HashMap<String, Value>>,
    pub abort_result: Mutex<Option<Result<AbortOutcome, EngineError>>>,
    pub aborted: Mutex<Vec<String>>,
    /// Runs once inside the next `submit`, before it answers
    pub on_submit: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeEngine {
    pub fn set_status(&self, id: &str, status: JobStatus) {
        self.statuses.lock().unwrap().insert(id.to_string(), Ok(status));
    }

    pub fn fail_status(&self, id: &str, err: EngineError) {
        self.statuses.lock().unwrap().insert(id.to_string(), Err(err));
    }

    pub fn set_metadata(&self, id: &str, metadata: Value) {
        self.metadata.lock().unwrap().insert(id.to_string(), metadata);
    }

    pub fn submitted(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn submit(&self, submission: &Submission) -> Result<String, EngineError> {
        let hook = self.on_submit.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if let Some(err) = self.submit_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.submissions.lock().unwrap().push(submission.clone());
        Ok(format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn status(&self, id: &str) -> Result<JobStatus, EngineError> {
        self.statuses
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or(Ok(JobStatus::Submitted))
    }

    async fn metadata(&self, id: &str) -> Result<Value, EngineError> {
        Ok(self.metadata.lock().unwrap().get(id).cloned().unwrap_or_else(|| serde_json::json!({})))
    }

    async fn logs(&self, id: &str) -> Result<Value, EngineError> {
        Ok(self.logs.lock().unwrap().get(id).cloned().unwrap_or_else(|| serde_json::json!({"calls": {}})))
    }

    async fn abort(&self, id: &str) -> Result<AbortOutcome, EngineError> {
        self.aborted.lock().unwrap().push(id.to_string());
        self.abort_result.lock().unwrap().clone().unwrap_or(Ok(AbortOutcome::Confirmed))
    }
}

/// A complete context over a temporary directory, a store file inside it and a [FakeEngine]
///
/// The store is a real file so a test can open a second connection, the way the web app does.
pub struct TestContext {
    pub tmp: TempDir,
    pub ctx: Arc<Context>,
    pub engine: Arc<FakeEngine>,
}

const WORKFLOWS: [(&str, &str); 8] = [
    ("ReadsQC", "rqcfilter.wdl"),
    ("ReadbasedAnalysis", "ReadbasedAnalysis.wdl"),
    ("MetaAssembly", "jgi_assembly.wdl"),
    ("MetaAnnotation", "annotation_full.wdl"),
    ("MetaMAGs", "mbin_nmdc.wdl"),
    ("Metatranscriptome", "metaT.wdl"),
    ("Metaproteomics", "metapro_main.wdl"),
    ("pipeline", ""),
];

impl TestContext {
    pub fn new() -> TestContext {
        TestContext::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> TestContext {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let workflows = root.join("workflows");
        for (dir, wdl) in WORKFLOWS {
            fs::create_dir_all(workflows.join(dir)).unwrap();
            fs::write(workflows.join(dir).join("imports.zip"), b"PK").unwrap();
            if !wdl.is_empty() {
                fs::write(workflows.join(dir).join(wdl), "version 1.0\n").unwrap();
            }
        }

        let mut config = Config {
            projects_dir: root.join("projects"),
            uploads_dir: root.join("uploads"),
            bulk_dir: root.join("bulk"),
            workflows_dir: workflows.clone(),
            database: root.join("edgewatch.db"),
            ..Config::default()
        };
        adjust(&mut config);
        for dir in [&config.projects_dir, &config.uploads_dir, &config.bulk_dir] {
            fs::create_dir_all(dir).unwrap();
        }

        let registry = Registry::load(None, &workflows).unwrap();
        let engine = Arc::new(FakeEngine::default());
        let store = Store::open(&config.database).unwrap();
        let ctx = Context::new(config, registry, store, engine.clone()).unwrap();
        TestContext { tmp, ctx: Arc::new(ctx), engine }
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    pub fn wd(&self, code: &str) -> WorkingDirectory {
        WorkingDirectory::new(&self.ctx.config.projects_dir, code)
    }

    /// Queue a project with its configuration document
    pub fn project(&self, project: Project, conf: &Value) -> Project {
        let wd = self.wd(&project.code);
        fs::create_dir_all(&wd.path).unwrap();
        wd.write_json(CONF, conf).unwrap();
        self.store().insert_project(&project).unwrap();
        project
    }

    /// A local file of `size` bytes
    pub fn file(&self, name: &str, size: usize) -> PathBuf {
        let path = self.tmp.path().join("data").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![b'A'; size]).unwrap();
        path
    }

    pub fn status_of(&self, code: &str) -> crate::db::state::ProjectStatus {
        self.store().get_project(code).unwrap().unwrap().status
    }

    pub fn log_of(&self, code: &str) -> String {
        self.wd(code).read_to_string(crate::workdir::LOG).unwrap_or_default()
    }
}

/// A ReadsQC configuration over interleaved files
pub fn reads_qc(paths: &[&str]) -> Value {
    serde_json::json!({"workflow": {
        "name": "ReadsQC",
        "input_fastq": {"interleaved": true, "fastqs": paths}
    }})
}
