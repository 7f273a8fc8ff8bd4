use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::conf::pipeline::MetagenomePipelineConf;
use crate::conf::workflow::{FastqInput, ProfilerTools};
use crate::conf::{PipelineConf, WorkflowConf};
use crate::registry::{Category, CategorySpec, Registry};
use crate::workflow::GenerationError;

/// Parameters of one workflow, keyed by field name without the workflow prefix
pub type Fields = BTreeMap<&'static str, Value>;

/// What every builder needs besides the configuration itself
pub struct InputContext {
    /// The project's `output/` directory
    pub output_dir: PathBuf,
    pub prefix: String,
    /// Configuration path to the path the engine should read
    pub resolved: HashMap<String, String>,
}

impl InputContext {
    fn path(&self, path: &str) -> String {
        self.resolved.get(path).cloned().unwrap_or_else(|| path.to_string())
    }

    fn paths<'a>(&self, paths: impl IntoIterator<Item = &'a String>) -> Value {
        Value::from(paths.into_iter().map(|p| self.path(p)).collect::<Vec<_>>())
    }

    /// Output directory of a category, under `output/`
    pub fn outdir(&self, spec: &CategorySpec) -> PathBuf {
        self.output_dir.join(&spec.outdir)
    }

    /// Conventional output of an upstream step, `<outdir>/<prefix>_<suffix>`
    fn upstream(&self, spec: &CategorySpec, suffix: &str) -> String {
        path_string(&self.outdir(spec).join(format!("{}_{suffix}", self.prefix)))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn fastq_fields(fields: &mut Fields, input: &FastqInput, ctx: &InputContext) {
    let (fastqs, fq1, fq2): (Vec<&String>, Vec<&String>, Vec<&String>) = if input.interleaved {
        (input.fastqs.iter().collect(), vec![], vec![])
    } else {
        (vec![], input.pairs.iter().map(|p| &p.fq1).collect(), input.pairs.iter().map(|p| &p.fq2).collect())
    };
    fields.insert("interleaved", json!(input.interleaved));
    fields.insert("input_files", ctx.paths(fastqs));
    fields.insert("input_fq1", ctx.paths(fq1));
    fields.insert("input_fq2", ctx.paths(fq2));
}

fn common_fields(spec: &CategorySpec, ctx: &InputContext) -> Fields {
    let mut fields = Fields::new();
    fields.insert("prefix", json!(ctx.prefix));
    fields.insert("outdir", json!(path_string(&ctx.outdir(spec))));
    fields
}

fn tool_switches(tools: &ProfilerTools) -> Value {
    json!({
        "centrifuge": tools.centrifuge,
        "gottcha2": tools.gottcha2,
        "kraken2": tools.kraken2,
    })
}

/// Fields of a single workflow run
pub fn workflow_fields(spec: &CategorySpec, conf: &WorkflowConf, ctx: &InputContext) -> Fields {
    let mut fields = common_fields(spec, ctx);
    match conf {
        WorkflowConf::ReadsQc(c) => fastq_fields(&mut fields, &c.input_fastq, ctx),
        WorkflowConf::ReadbasedAnalysis(c) => {
            fastq_fields(&mut fields, &c.input_fastq, ctx);
            fields.insert("enabled_tools", tool_switches(&c.tools));
        }
        WorkflowConf::MetaAssembly(c) => {
            fastq_fields(&mut fields, &c.input_fastq, ctx);
            fields.insert("min_contig_size", json!(c.min_contig_size));
        }
        WorkflowConf::MetaAnnotation(c) => {
            fields.insert("input_file", json!(ctx.path(&c.input_fasta)));
        }
        WorkflowConf::MetaMags(c) => {
            fields.insert("contig_file", json!(ctx.path(&c.contig_file)));
            fields.insert("sam_file", json!(ctx.path(&c.sam_file)));
            fields.insert("gff_file", json!(ctx.path(&c.gff_file)));
            if let Some(map_file) = &c.map_file {
                fields.insert("map_file", json!(ctx.path(map_file)));
            }
            for (name, path) in c.side_inputs.declared() {
                fields.insert(name, json!(ctx.path(path)));
            }
        }
        WorkflowConf::Metatranscriptome(c) => fastq_fields(&mut fields, &c.input_fastq, ctx),
        WorkflowConf::Metaproteomics(c) => {
            fields.insert("input_raw", json!(ctx.path(&c.input_raw)));
            fields.insert("input_fasta", json!(ctx.path(&c.input_fasta)));
            fields.insert("input_gff", json!(ctx.path(&c.input_gff)));
            fields.insert("thermo_raw", json!(c.thermo_raw));
            fields.insert("qvalue_threshold", json!(c.qvalue_threshold));
        }
    }
    fields
}

/// Parameter document of a single workflow, keyed `<workflow>.<field>`
pub fn workflow_inputs(spec: &CategorySpec, conf: &WorkflowConf, ctx: &InputContext) -> BTreeMap<String, Value> {
    workflow_fields(spec, conf, ctx)
        .into_iter()
        .map(|(field, value)| (format!("{}.{field}", spec.workflow), value))
        .collect()
}

/// One enabled step of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct StepInputs {
    pub step: Category,
    /// Import alias and parameter prefix inside the pipeline workflow
    pub alias: String,
    /// Workflow name inside the step's description
    pub workflow: String,
    /// Import path inside the dependencies bundle
    pub wdl: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInputs {
    pub steps: Vec<StepInputs>,
}

impl PipelineInputs {
    /// Parameter document keyed `<pipeline workflow>.<alias>_<field>`
    pub fn document(&self, pipeline: &CategorySpec) -> BTreeMap<String, Value> {
        self.steps
            .iter()
            .flat_map(|step| {
                step.fields
                    .iter()
                    .map(move |(field, value)| (format!("{}.{}_{field}", pipeline.workflow, step.alias), value.clone()))
            })
            .collect()
    }
}

fn step_spec<'r>(registry: &'r Registry, step: Category) -> Result<&'r CategorySpec, GenerationError> {
    registry
        .get(step)
        .ok_or_else(|| GenerationError::Invalid(format!("Pipeline step {step} is not registered")))
}

fn require_upstream(conf: &PipelineConf, step: Category, upstream: Category) -> Result<(), GenerationError> {
    match conf.is_on(upstream) {
        true => Ok(()),
        false => Err(GenerationError::Invalid(format!("{step} needs {upstream}, which is switched off"))),
    }
}

fn metagenome_fields(
    registry: &Registry,
    conf: &PipelineConf,
    pipeline: &MetagenomePipelineConf,
    step: Category,
    ctx: &InputContext,
) -> Result<Fields, GenerationError> {
    let spec = step_spec(registry, step)?;
    let mut fields = common_fields(spec, ctx);

    match step {
        Category::ReadsQc => fastq_fields(&mut fields, &pipeline.input_fastq, ctx),
        Category::ReadbasedAnalysis => {
            fastq_fields(&mut fields, &pipeline.input_fastq, ctx);
            fields.insert("enabled_tools", tool_switches(&pipeline.steps.readbased_analysis.tools));
        }
        Category::MetaAssembly => {
            require_upstream(conf, step, Category::ReadsQc)?;
            let qc = step_spec(registry, Category::ReadsQc)?;
            fields.insert("interleaved", json!(true));
            fields.insert("input_files", json!([ctx.upstream(qc, "filtered.fastq.gz")]));
            fields.insert("input_fq1", json!([]));
            fields.insert("input_fq2", json!([]));
            fields.insert("min_contig_size", json!(pipeline.steps.meta_assembly.min_contig_size));
        }
        Category::MetaAnnotation => {
            require_upstream(conf, step, Category::MetaAssembly)?;
            let assembly = step_spec(registry, Category::MetaAssembly)?;
            fields.insert("input_file", json!(ctx.upstream(assembly, "contigs.fna")));
        }
        Category::MetaMags => {
            require_upstream(conf, step, Category::MetaAssembly)?;
            require_upstream(conf, step, Category::MetaAnnotation)?;
            let assembly = step_spec(registry, Category::MetaAssembly)?;
            let annotation = step_spec(registry, Category::MetaAnnotation)?;
            fields.insert("contig_file", json!(ctx.upstream(assembly, "contigs.fna")));
            fields.insert("sam_file", json!(ctx.upstream(assembly, "pairedMapped_sorted.sam")));
            fields.insert("gff_file", json!(ctx.upstream(annotation, "functional_annotation.gff")));
            for (name, suffix) in ANNOTATION_SIDE_OUTPUTS {
                fields.insert(name, json!(ctx.upstream(annotation, suffix)));
            }
        }
        other => {
            return Err(GenerationError::Invalid(format!("{other} can't run as a metagenome pipeline step")));
        }
    }
    Ok(fields)
}

/// MAG side inputs and the annotation outputs providing them
const ANNOTATION_SIDE_OUTPUTS: [(&str, &str); 9] = [
    ("proteins_file", "proteins.faa"),
    ("cog_file", "cog.gff"),
    ("ec_file", "ec.tsv"),
    ("ko_file", "ko.tsv"),
    ("pfam_file", "pfam.gff"),
    ("tigrfam_file", "tigrfam.gff"),
    ("crispr_file", "crt.crisprs"),
    ("product_names_file", "product_names.tsv"),
    ("gene_phylogeny_file", "gene_phylogeny.tsv"),
];

/// Inputs of every enabled step, in registry step order
pub fn pipeline_inputs(
    registry: &Registry,
    spec: &CategorySpec,
    conf: &PipelineConf,
    ctx: &InputContext,
) -> Result<PipelineInputs, GenerationError> {
    let mut steps = Vec::new();
    for step in spec.steps.iter().copied().filter(|s| conf.is_on(*s)) {
        let step_spec = step_spec(registry, step)?;
        let fields = match conf {
            PipelineConf::Metagenome(pipeline) => metagenome_fields(registry, conf, pipeline, step, ctx)?,
        };
        let wdl = step_spec
            .wdl
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| GenerationError::Invalid(format!("Pipeline step {step} has no workflow description")))?;
        steps.push(StepInputs {
            step,
            alias: step.as_str().to_string(),
            workflow: step_spec.workflow.clone(),
            wdl,
            fields,
        });
    }
    if steps.is_empty() {
        return Err(GenerationError::Invalid(format!("No {} step is switched on", conf.category())));
    }
    Ok(PipelineInputs { steps })
}
