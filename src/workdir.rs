//! On-disk companion directory of a project (or bulk submission)

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use serde::Serialize;

pub const CONF: &str = "conf.json";
pub const LOG: &str = "log.txt";
pub const WDL: &str = "pipeline.wdl";
pub const INPUTS: &str = "pipeline_inputs.json";
pub const OPTIONS: &str = "pipeline_options.json";
pub const METADATA: &str = "cromwell_job_metadata.json";
pub const FAILED_LOGS: &str = "cromwell_job_failed_logs.json";
pub const RESULT: &str = "result.json";
pub const RUN_STATS: &str = "run_stats.json";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkingDirectory {
    pub path: PathBuf,
}

impl WorkingDirectory {
    pub fn new(parent: &Path, code: &str) -> WorkingDirectory {
        WorkingDirectory { path: parent.join(code) }
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Root of the engine's final outputs
    pub fn output_dir(&self) -> PathBuf {
        self.path.join("output")
    }

    /// Uploaded inputs linked under their display names
    pub fn input_dir(&self) -> PathBuf {
        self.path.join("input")
    }

    /// Append a timestamped line to the user-visible log
    ///
    /// The log is best effort: a write failure is reported to the application log only.
    pub fn log(&self, message: &str) {
        if let Err(err) = self.append_log(message) {
            warn!("Can't write to {}: {}", self.file(LOG).display(), err);
        }
    }

    fn append_log(&self, message: &str) -> io::Result<()> {
        fs::create_dir_all(&self.path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.file(LOG))?;
        let line = format!("[{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"), message);
        file.write_all(line.as_bytes())
    }

    pub fn read_to_string(&self, name: &str) -> Result<String> {
        let path = self.file(name);
        fs::read_to_string(&path).with_context(|| format!("Can't read {}", path.display()))
    }

    pub fn write(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.file(name);
        fs::write(&path, content).with_context(|| format!("Can't write {}", path.display()))?;
        Ok(path)
    }

    /// Pretty-printed JSON, serialization order is the value's field (or sorted key) order
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let content = serde_json::to_string_pretty(value)?;
        self.write(name, content.as_bytes())
    }
}
