//! Typed project configuration documents (`conf.json`)
//!
//! The web application stores one configuration document per project. It is validated against a
//! JSON schema and then deserialised into [ProjectConf], a sum type with one strongly typed
//! parameter record per category.

use serde::{Deserialize, Serialize};

use crate::registry::Category;

/// Validate and deserialise configuration documents
pub mod read;
/// Parameter records of single workflows
pub mod workflow;
/// Parameter records of multi-step pipelines
pub mod pipeline;

pub use pipeline::PipelineConf;
pub use workflow::{FastqInput, WorkflowConf};

/// serde default for switches that are on unless turned off
pub(crate) fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectConf {
    Workflow(WorkflowConf),
    Pipeline(PipelineConf),
}

impl ProjectConf {
    pub fn category(&self) -> Category {
        match self {
            ProjectConf::Workflow(conf) => conf.category(),
            ProjectConf::Pipeline(conf) => conf.category(),
        }
    }

    /// Sample prefix used in output file names
    pub fn prefix(&self) -> Option<&str> {
        match self {
            ProjectConf::Workflow(conf) => conf.prefix(),
            ProjectConf::Pipeline(conf) => conf.prefix(),
        }
    }

    /// Every input file the configuration references, side inputs included
    pub fn input_paths(&self) -> Vec<&str> {
        match self {
            ProjectConf::Workflow(conf) => conf.input_paths(),
            ProjectConf::Pipeline(conf) => conf.input_paths(),
        }
    }

    /// Copy of this configuration reading `input` instead, for categories whose input is a set of
    /// fastq files. Used to fan a bulk submission template out to one configuration per row.
    pub fn with_fastq_input(&self, input: FastqInput) -> Option<ProjectConf> {
        match self {
            ProjectConf::Workflow(conf) => conf.with_fastq_input(input).map(ProjectConf::Workflow),
            ProjectConf::Pipeline(conf) => Some(ProjectConf::Pipeline(conf.with_fastq_input(input))),
        }
    }
}
