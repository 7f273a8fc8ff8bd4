use serde::{Deserialize, Serialize};

use crate::conf::workflow::{default_min_contig_size, FastqInput, ProfilerTools};
use crate::registry::Category;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StepToggle {
    #[serde(default = "crate::conf::yes")]
    pub on: bool,
}

impl Default for StepToggle {
    fn default() -> Self {
        StepToggle { on: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReadbasedStep {
    #[serde(default = "crate::conf::yes")]
    pub on: bool,
    #[serde(default)]
    pub tools: ProfilerTools,
}

impl Default for ReadbasedStep {
    fn default() -> Self {
        ReadbasedStep { on: true, tools: ProfilerTools::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AssemblyStep {
    #[serde(default = "crate::conf::yes")]
    pub on: bool,
    #[serde(default = "default_min_contig_size")]
    pub min_contig_size: u32,
}

impl Default for AssemblyStep {
    fn default() -> Self {
        AssemblyStep { on: true, min_contig_size: default_min_contig_size() }
    }
}

/// Step switches of the metagenome pipeline, every step defaults to on
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetagenomeSteps {
    #[serde(rename = "ReadsQC", default)]
    pub reads_qc: StepToggle,
    #[serde(rename = "ReadbasedAnalysis", default)]
    pub readbased_analysis: ReadbasedStep,
    #[serde(rename = "MetaAssembly", default)]
    pub meta_assembly: AssemblyStep,
    #[serde(rename = "MetaAnnotation", default)]
    pub meta_annotation: StepToggle,
    #[serde(rename = "MetaMAGs", default)]
    pub meta_mags: StepToggle,
}

impl MetagenomeSteps {
    pub fn is_on(&self, step: Category) -> bool {
        match step {
            Category::ReadsQc => self.reads_qc.on,
            Category::ReadbasedAnalysis => self.readbased_analysis.on,
            Category::MetaAssembly => self.meta_assembly.on,
            Category::MetaAnnotation => self.meta_annotation.on,
            Category::MetaMags => self.meta_mags.on,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetagenomePipelineConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub input_fastq: FastqInput,
    #[serde(default)]
    pub steps: MetagenomeSteps,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "name")]
pub enum PipelineConf {
    #[serde(rename = "Metagenome Pipeline")]
    Metagenome(MetagenomePipelineConf),
}

impl PipelineConf {
    pub fn category(&self) -> Category {
        match self {
            PipelineConf::Metagenome(_) => Category::MetagenomePipeline,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            PipelineConf::Metagenome(c) => c.prefix.as_deref(),
        }
    }

    pub fn input_paths(&self) -> Vec<&str> {
        match self {
            PipelineConf::Metagenome(c) => c.input_fastq.paths(),
        }
    }

    pub fn is_on(&self, step: Category) -> bool {
        match self {
            PipelineConf::Metagenome(c) => c.steps.is_on(step),
        }
    }

    pub fn with_fastq_input(&self, input: FastqInput) -> PipelineConf {
        match self {
            PipelineConf::Metagenome(c) => {
                PipelineConf::Metagenome(MetagenomePipelineConf { input_fastq: input, ..c.clone() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_steps_default_on() {
        let conf: PipelineConf = serde_json::from_value(json!({
            "name": "Metagenome Pipeline",
            "input_fastq": {"interleaved": true, "fastqs": ["reads.fq.gz"]},
            "steps": {"MetaMAGs": {"on": false}}
        }))
        .unwrap();
        assert!(conf.is_on(Category::ReadsQc));
        assert!(conf.is_on(Category::MetaAnnotation));
        assert!(!conf.is_on(Category::MetaMags));
        assert!(!conf.is_on(Category::Metaproteomics));
        let PipelineConf::Metagenome(inner) = &conf;
        assert_eq!(inner.steps.meta_assembly.min_contig_size, default_min_contig_size());
        assert_eq!(conf.input_paths(), vec!["reads.fq.gz"]);
    }
}
