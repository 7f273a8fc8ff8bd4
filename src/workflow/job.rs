use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::info;
use serde::Serialize;
use serde_json::Value;
use tinytemplate::TinyTemplate;

use crate::conf::ProjectConf;
use crate::config::Config;
use crate::db::project::Project;
use crate::db::Store;
use crate::engine::Submission;
use crate::registry::{CategorySpec, Registry};
use crate::workdir::{WorkingDirectory, INPUTS, OPTIONS, WDL};
use crate::workflow::inputs::{pipeline_inputs, workflow_inputs, InputContext, PipelineInputs};
use crate::workflow::materialize::Materializer;
use crate::workflow::GenerationError;

/// included pipeline workflow template
static PIPELINE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/main_workflow.wdl"));

/// Paths of a rendered job inside the project directory
///
/// The dependencies bundle is shared by every job of a category and stays in `workflows_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFiles {
    pub wdl: PathBuf,
    pub inputs: PathBuf,
    pub options: PathBuf,
    pub imports: Option<PathBuf>,
    pub wdl_version: String,
}

impl JobFiles {
    /// Load everything the engine's submit endpoint takes
    pub fn submission(&self, workflow_type: &str) -> Result<Submission> {
        let read = |path: &Path| fs::read(path).with_context(|| format!("Can't read {}", path.display()));
        Ok(Submission {
            workflow_source: read(&self.wdl)?,
            inputs: read(&self.inputs)?,
            options: Some(read(&self.options)?),
            dependencies: self.imports.as_deref().map(read).transpose()?,
            workflow_type: workflow_type.to_string(),
            workflow_type_version: self.wdl_version.clone(),
        })
    }
}

/// Engine options document
#[derive(Debug, Serialize)]
pub struct WorkflowOptions {
    pub final_workflow_outputs_dir: String,
    pub use_relative_output_paths: bool,
    pub workflow_failure_mode: String,
    pub write_to_cache: bool,
    pub read_from_cache: bool,
}

pub struct Generator<'a> {
    pub registry: &'a Registry,
    pub store: &'a Store,
    pub config: &'a Config,
}

impl Generator<'_> {
    /// Write `pipeline.wdl`, `pipeline_inputs.json` and `pipeline_options.json` for a project
    pub fn create(&self, project: &Project, conf: &ProjectConf, wd: &WorkingDirectory) -> Result<JobFiles, GenerationError> {
        let category = conf.category();
        let spec = self
            .registry
            .get(category)
            .ok_or_else(|| GenerationError::Invalid(format!("Category {category} is not registered")))?;
        info!("Creating {} job for project {} in {}", category, project.code, wd.path.display());

        fs::create_dir_all(wd.output_dir())
            .with_context(|| format!("Can't create {}", wd.output_dir().display()))?;
        if let Some(imports) = &spec.imports {
            if !imports.exists() {
                return Err(GenerationError::Invalid(format!("Import bundle {} not found", imports.display())));
            }
        }

        let materializer = Materializer {
            store: self.store,
            uploads_dir: &self.config.uploads_dir,
            input_dir: wd.input_dir(),
        };
        let resolved = materializer.resolve_all(&conf.input_paths())?;
        let ctx = InputContext {
            output_dir: wd.output_dir(),
            prefix: conf.prefix().unwrap_or(&project.code).to_string(),
            resolved,
        };

        let (wdl, inputs) = match conf {
            ProjectConf::Workflow(workflow) => {
                let source = spec
                    .wdl
                    .as_deref()
                    .ok_or_else(|| GenerationError::Invalid(format!("{category} has no workflow description")))?;
                let wdl = fs::read(source).with_context(|| format!("Can't read {}", source.display()))?;
                (wdl, workflow_inputs(spec, workflow, &ctx))
            }
            ProjectConf::Pipeline(pipeline) => {
                let steps = pipeline_inputs(self.registry, spec, pipeline, &ctx)?;
                let wdl = render_pipeline(spec, &steps)?;
                (wdl.into_bytes(), steps.document(spec))
            }
        };

        let options = WorkflowOptions {
            final_workflow_outputs_dir: wd.output_dir().to_string_lossy().into_owned(),
            use_relative_output_paths: self.config.engine.options.use_relative_output_paths,
            workflow_failure_mode: self.config.engine.options.workflow_failure_mode.clone(),
            write_to_cache: self.config.engine.options.write_to_cache,
            read_from_cache: self.config.engine.options.read_from_cache,
        };

        Ok(JobFiles {
            wdl: wd.write(WDL, &wdl)?,
            inputs: wd.write_json(INPUTS, &inputs)?,
            options: wd.write_json(OPTIONS, &options)?,
            imports: spec.imports.clone(),
            wdl_version: spec.wdl_version.clone(),
        })
    }
}

#[derive(Serialize)]
struct PipelineContext {
    version: String,
    workflow: String,
    imports: Vec<ImportContext>,
    decls: Vec<DeclContext>,
    calls: Vec<CallContext>,
}

#[derive(Serialize)]
struct ImportContext {
    path: String,
    alias: String,
}

#[derive(Serialize)]
struct DeclContext {
    wdl_type: &'static str,
    name: String,
}

#[derive(Serialize)]
struct CallContext {
    alias: String,
    workflow: String,
    bindings: Vec<BindingContext>,
}

#[derive(Serialize)]
struct BindingContext {
    field: String,
    source: String,
}

/// WDL type of a parameter value as the builders produce them
fn wdl_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_f64() => "Float",
        Value::Number(_) => "Int",
        Value::Array(_) => "Array[String]",
        Value::Object(_) => "Map[String, Boolean]",
        Value::String(_) | Value::Null => "String",
    }
}

/// Render the pipeline description importing every enabled step
fn render_pipeline(spec: &CategorySpec, inputs: &PipelineInputs) -> Result<String> {
    let template = match &spec.wdl_template {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Can't read {}", path.display()))?,
        None => PIPELINE.to_string(),
    };
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("pipeline", &template)
        .map_err(|err| anyhow!("Invalid pipeline template: {err}"))?;

    let mut decls = Vec::new();
    let mut calls = Vec::new();
    for step in &inputs.steps {
        let mut bindings = Vec::new();
        for (field, value) in &step.fields {
            let name = format!("{}_{field}", step.alias);
            decls.push(DeclContext { wdl_type: wdl_type(value), name: name.clone() });
            bindings.push(BindingContext { field: field.to_string(), source: name });
        }
        calls.push(CallContext { alias: step.alias.clone(), workflow: step.workflow.clone(), bindings });
    }

    let context = PipelineContext {
        version: spec.wdl_version.clone(),
        workflow: spec.workflow.clone(),
        imports: inputs
            .steps
            .iter()
            .map(|s| ImportContext { path: s.wdl.clone(), alias: s.alias.clone() })
            .collect(),
        decls,
        calls,
    };
    tt.render("pipeline", &context).map_err(|err| anyhow!("Can't render pipeline: {err}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::conf::read::ConfReader;

    struct Fixture {
        tmp: TempDir,
        store: Store,
        config: Config,
        registry: Registry,
    }

    impl Fixture {
        fn new() -> Fixture {
            let tmp = TempDir::new().unwrap();
            let workflows = tmp.path().join("workflows");
            for (dir, wdl) in [
                ("ReadsQC", "rqcfilter.wdl"),
                ("ReadbasedAnalysis", "ReadbasedAnalysis.wdl"),
                ("MetaAssembly", "jgi_assembly.wdl"),
                ("MetaAnnotation", "annotation_full.wdl"),
                ("MetaMAGs", "mbin_nmdc.wdl"),
                ("pipeline", ""),
            ] {
                fs::create_dir_all(workflows.join(dir)).unwrap();
                fs::write(workflows.join(dir).join("imports.zip"), b"PK").unwrap();
                if !wdl.is_empty() {
                    fs::write(workflows.join(dir).join(wdl), format!("version 1.0\nworkflow {dir} {{}}\n")).unwrap();
                }
            }
            let config = Config {
                uploads_dir: tmp.path().join("uploads"),
                workflows_dir: workflows.clone(),
                ..Config::default()
            };
            let registry = Registry::load(None, &workflows).unwrap();
            Fixture { tmp, store: Store::open_in_memory().unwrap(), config, registry }
        }

        fn generator(&self) -> Generator<'_> {
            Generator { registry: &self.registry, store: &self.store, config: &self.config }
        }

        fn reads(&self) -> String {
            let path = self.tmp.path().join("reads.fq.gz");
            fs::write(&path, b"@r\nACGT\n+\nIIII\n").unwrap();
            path.to_string_lossy().into_owned()
        }
    }

    fn conf(value: Value) -> ProjectConf {
        ConfReader::new().unwrap().parse(&value.to_string()).unwrap()
    }

    #[test]
    fn test_workflow_job_files() {
        let fx = Fixture::new();
        let reads = fx.reads();
        let conf = conf(json!({"workflow": {
            "name": "ReadsQC", "input_fastq": {"interleaved": true, "fastqs": [reads]}
        }}));
        let project = Project::new("p1", "qc", "ReadsQC", "owner");
        let wd = WorkingDirectory::new(fx.tmp.path(), "p1");

        let files = fx.generator().create(&project, &conf, &wd).unwrap();
        assert_eq!(fs::read_to_string(&files.wdl).unwrap(), "version 1.0\nworkflow ReadsQC {}\n");

        let inputs: Value = serde_json::from_slice(&fs::read(&files.inputs).unwrap()).unwrap();
        assert_eq!(inputs["nmdc_rqcfilter.input_files"], json!([reads]));
        assert_eq!(inputs["nmdc_rqcfilter.prefix"], json!("p1"));

        let options: Value = serde_json::from_slice(&fs::read(&files.options).unwrap()).unwrap();
        assert_eq!(options["final_workflow_outputs_dir"], json!(wd.output_dir().to_string_lossy()));
        assert_eq!(options["workflow_failure_mode"], json!("ContinueWhilePossible"));

        let submission = files.submission("WDL").unwrap();
        assert_eq!(submission.dependencies.as_deref(), Some(&b"PK"[..]));
        assert_eq!(submission.workflow_type_version, "1.0");
    }

    #[test]
    fn test_missing_inputs_fail_generation() {
        let fx = Fixture::new();
        let conf = conf(json!({"workflow": {
            "name": "MetaMAGs",
            "contig_file": "/nope/contigs.fna", "sam_file": "/nope/m.sam", "gff_file": "/nope/f.gff",
            "side_inputs": {"ko_file": "/nope/ko.tsv"}
        }}));
        let project = Project::new("p1", "mags", "MetaMAGs", "owner");
        let wd = WorkingDirectory::new(fx.tmp.path(), "p1");

        match fx.generator().create(&project, &conf, &wd) {
            Err(err @ GenerationError::MissingInputs(_)) => {
                let lines = err.log_lines();
                assert_eq!(lines.len(), 4);
                assert_eq!(lines[3], "file not found: /nope/ko.tsv");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!wd.file(INPUTS).exists());
    }

    #[test]
    fn test_pipeline_description_is_rendered() {
        let fx = Fixture::new();
        let reads = fx.reads();
        let conf = conf(json!({"pipeline": {
            "name": "Metagenome Pipeline",
            "prefix": "s1",
            "input_fastq": {"interleaved": true, "fastqs": [reads]},
            "steps": {"ReadbasedAnalysis": {"on": false}, "MetaMAGs": {"on": false}}
        }}));
        let project = Project::new("p2", "mg", "Metagenome Pipeline", "owner");
        let wd = WorkingDirectory::new(fx.tmp.path(), "p2");

        let files = fx.generator().create(&project, &conf, &wd).unwrap();
        let wdl = fs::read_to_string(&files.wdl).unwrap();
        assert!(wdl.starts_with("version 1.0\n"));
        assert!(wdl.contains("import \"rqcfilter.wdl\" as ReadsQC\n"));
        assert!(wdl.contains("import \"annotation_full.wdl\" as MetaAnnotation\n"));
        assert!(!wdl.contains("MetaMAGs"));
        assert!(wdl.contains("workflow main_workflow {"));
        assert!(wdl.contains("        Array[String] ReadsQC_input_files\n"));
        assert!(wdl.contains("        Boolean ReadsQC_interleaved\n"));
        assert!(wdl.contains("        Int MetaAssembly_min_contig_size\n"));
        assert!(wdl.contains("    call ReadsQC.nmdc_rqcfilter as ReadsQC {"));
        assert!(wdl.contains("            input_files = ReadsQC_input_files,\n"));
        assert!(wdl.contains("            prefix = MetaAnnotation_prefix\n"));

        let inputs: Value = serde_json::from_slice(&fs::read(&files.inputs).unwrap()).unwrap();
        assert_eq!(inputs["main_workflow.ReadsQC_prefix"], json!("s1"));
        assert_eq!(
            inputs["main_workflow.MetaAssembly_input_files"],
            json!([wd.output_dir().join("ReadsQC/s1_filtered.fastq.gz").to_string_lossy()])
        );
    }

    #[test]
    fn test_wdl_types() {
        assert_eq!(wdl_type(&json!(0.05)), "Float");
        assert_eq!(wdl_type(&json!(200)), "Int");
        assert_eq!(wdl_type(&json!({"kraken2": true})), "Map[String, Boolean]");
        assert_eq!(wdl_type(&json!("x")), "String");
    }
}
