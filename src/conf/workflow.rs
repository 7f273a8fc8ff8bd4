use serde::{Deserialize, Serialize};

use crate::registry::Category;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FastqPair {
    pub fq1: String,
    pub fq2: String,
}

/// Sequencing reads, either interleaved files or R1/R2 pairs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FastqInput {
    pub interleaved: bool,
    #[serde(default)]
    pub fastqs: Vec<String>,
    #[serde(default)]
    pub pairs: Vec<FastqPair>,
}

impl FastqInput {
    /// The files actually read, which depends on `interleaved`
    pub fn paths(&self) -> Vec<&str> {
        if self.interleaved {
            self.fastqs.iter().map(String::as_str).collect()
        } else {
            self.pairs.iter().flat_map(|p| [p.fq1.as_str(), p.fq2.as_str()]).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfilerTools {
    #[serde(default = "crate::conf::yes")]
    pub gottcha2: bool,
    #[serde(default = "crate::conf::yes")]
    pub kraken2: bool,
    #[serde(default = "crate::conf::yes")]
    pub centrifuge: bool,
}

impl Default for ProfilerTools {
    fn default() -> Self {
        ProfilerTools { gottcha2: true, kraken2: true, centrifuge: true }
    }
}

impl ProfilerTools {
    pub fn enabled(&self) -> Vec<&'static str> {
        [("gottcha2", self.gottcha2), ("kraken2", self.kraken2), ("centrifuge", self.centrifuge)]
            .into_iter()
            .filter(|(_, on)| *on)
            .map(|(tool, _)| tool)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReadsQcConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub input_fastq: FastqInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReadbasedConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub input_fastq: FastqInput,
    #[serde(default)]
    pub tools: ProfilerTools,
}

pub(crate) fn default_min_contig_size() -> u32 {
    200
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AssemblyConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub input_fastq: FastqInput,
    #[serde(default = "default_min_contig_size")]
    pub min_contig_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnnotationConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub input_fasta: String,
}

/// Optional annotation outputs MAG binning can use
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MagsSideInputs {
    pub proteins_file: Option<String>,
    pub cog_file: Option<String>,
    pub ec_file: Option<String>,
    pub ko_file: Option<String>,
    pub pfam_file: Option<String>,
    pub tigrfam_file: Option<String>,
    pub crispr_file: Option<String>,
    pub product_names_file: Option<String>,
    pub gene_phylogeny_file: Option<String>,
    pub lineage_file: Option<String>,
}

impl MagsSideInputs {
    /// Declared side inputs as (parameter name, path)
    pub fn declared(&self) -> Vec<(&'static str, &str)> {
        [
            ("proteins_file", &self.proteins_file),
            ("cog_file", &self.cog_file),
            ("ec_file", &self.ec_file),
            ("ko_file", &self.ko_file),
            ("pfam_file", &self.pfam_file),
            ("tigrfam_file", &self.tigrfam_file),
            ("crispr_file", &self.crispr_file),
            ("product_names_file", &self.product_names_file),
            ("gene_phylogeny_file", &self.gene_phylogeny_file),
            ("lineage_file", &self.lineage_file),
        ]
        .into_iter()
        .filter_map(|(name, path)| path.as_deref().map(|p| (name, p)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MagsConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub contig_file: String,
    pub sam_file: String,
    pub gff_file: String,
    #[serde(default)]
    pub map_file: Option<String>,
    #[serde(default)]
    pub side_inputs: MagsSideInputs,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetatConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub input_fastq: FastqInput,
}

fn default_qvalue_threshold() -> f64 {
    0.05
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetaproConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub input_raw: String,
    pub input_fasta: String,
    pub input_gff: String,
    #[serde(default)]
    pub thermo_raw: bool,
    #[serde(default = "default_qvalue_threshold")]
    pub qvalue_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "name")]
pub enum WorkflowConf {
    #[serde(rename = "ReadsQC")]
    ReadsQc(ReadsQcConf),
    #[serde(rename = "ReadbasedAnalysis")]
    ReadbasedAnalysis(ReadbasedConf),
    #[serde(rename = "MetaAssembly")]
    MetaAssembly(AssemblyConf),
    #[serde(rename = "MetaAnnotation")]
    MetaAnnotation(AnnotationConf),
    #[serde(rename = "MetaMAGs")]
    MetaMags(MagsConf),
    #[serde(rename = "Metatranscriptome")]
    Metatranscriptome(MetatConf),
    #[serde(rename = "Metaproteomics")]
    Metaproteomics(MetaproConf),
}

impl WorkflowConf {
    pub fn category(&self) -> Category {
        match self {
            WorkflowConf::ReadsQc(_) => Category::ReadsQc,
            WorkflowConf::ReadbasedAnalysis(_) => Category::ReadbasedAnalysis,
            WorkflowConf::MetaAssembly(_) => Category::MetaAssembly,
            WorkflowConf::MetaAnnotation(_) => Category::MetaAnnotation,
            WorkflowConf::MetaMags(_) => Category::MetaMags,
            WorkflowConf::Metatranscriptome(_) => Category::Metatranscriptome,
            WorkflowConf::Metaproteomics(_) => Category::Metaproteomics,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        let prefix = match self {
            WorkflowConf::ReadsQc(c) => &c.prefix,
            WorkflowConf::ReadbasedAnalysis(c) => &c.prefix,
            WorkflowConf::MetaAssembly(c) => &c.prefix,
            WorkflowConf::MetaAnnotation(c) => &c.prefix,
            WorkflowConf::MetaMags(c) => &c.prefix,
            WorkflowConf::Metatranscriptome(c) => &c.prefix,
            WorkflowConf::Metaproteomics(c) => &c.prefix,
        };
        prefix.as_deref()
    }

    pub fn input_paths(&self) -> Vec<&str> {
        match self {
            WorkflowConf::ReadsQc(c) => c.input_fastq.paths(),
            WorkflowConf::ReadbasedAnalysis(c) => c.input_fastq.paths(),
            WorkflowConf::MetaAssembly(c) => c.input_fastq.paths(),
            WorkflowConf::MetaAnnotation(c) => vec![c.input_fasta.as_str()],
            WorkflowConf::MetaMags(c) => {
                let mut paths = vec![c.contig_file.as_str(), c.sam_file.as_str(), c.gff_file.as_str()];
                paths.extend(c.map_file.as_deref());
                paths.extend(c.side_inputs.declared().into_iter().map(|(_, p)| p));
                paths
            }
            WorkflowConf::Metatranscriptome(c) => c.input_fastq.paths(),
            WorkflowConf::Metaproteomics(c) => {
                vec![c.input_raw.as_str(), c.input_fasta.as_str(), c.input_gff.as_str()]
            }
        }
    }

    pub fn with_fastq_input(&self, input: FastqInput) -> Option<WorkflowConf> {
        let mut conf = self.clone();
        match &mut conf {
            WorkflowConf::ReadsQc(c) => c.input_fastq = input,
            WorkflowConf::ReadbasedAnalysis(c) => c.input_fastq = input,
            WorkflowConf::MetaAssembly(c) => c.input_fastq = input,
            WorkflowConf::Metatranscriptome(c) => c.input_fastq = input,
            WorkflowConf::MetaAnnotation(_) | WorkflowConf::MetaMags(_) | WorkflowConf::Metaproteomics(_) => {
                return None
            }
        }
        Some(conf)
    }
}
