use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::conf::ProjectConf;
use crate::registry::{Category, Registry};
use crate::tsv;
use crate::workdir::{WorkingDirectory, RESULT};

/// Rows kept from a top features table
const TOP_FEATURES: usize = 100;

/// Files under `dir` whose name ends with `suffix`, in path order
fn find(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    found
}

fn require(dir: &Path, suffix: &str) -> Result<PathBuf> {
    match find(dir, suffix).into_iter().next() {
        Some(path) => Ok(path),
        None => bail!("No *{suffix} found in {}", dir.display()),
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Can't read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn read_rows(path: &Path, limit: Option<usize>) -> Result<Value> {
    let rows = tsv::read(path)?;
    let rows = match limit {
        Some(limit) => rows.into_iter().take(limit).collect(),
        None => rows,
    };
    Ok(serde_json::to_value(rows)?)
}

fn single(key: &str, value: Value) -> Value {
    let mut result = Map::new();
    result.insert(key.to_string(), value);
    Value::Object(result)
}

/// Reports of the read-based profilers, one subdirectory per tool
fn readbased_result(dir: &Path, project_dir: &Path) -> Result<Value> {
    let mut html = Map::new();
    for report in find(dir, ".html") {
        let tool = report
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative = report.strip_prefix(project_dir).unwrap_or(&report);
        html.insert(tool, Value::from(relative.to_string_lossy().into_owned()));
    }
    if html.is_empty() {
        bail!("No profiler report found in {}", dir.display());
    }

    let mut summary = Map::new();
    for path in find(dir, "_summary.json") {
        let tool = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        summary.insert(tool, read_json(&path)?);
    }

    let mut result = Map::new();
    result.insert("html".to_string(), Value::Object(html));
    result.insert("summary".to_string(), Value::Object(summary));
    Ok(Value::Object(result))
}

/// Result document of one workflow whose outputs are in `dir`
pub fn workflow_result(category: Category, dir: &Path, project_dir: &Path) -> Result<Value> {
    let result = match category {
        Category::ReadsQc | Category::MetaAssembly => single("stats", read_json(&require(dir, "_stats.json")?)?),
        Category::ReadbasedAnalysis => readbased_result(dir, project_dir)?,
        Category::MetaAnnotation => single("stats", read_rows(&require(dir, "_stats.tsv")?, None)?),
        Category::MetaMags => {
            let mut result = Map::new();
            result.insert("stats".to_string(), read_json(&require(dir, "_mags_stats.json")?)?);
            if let Some(bins) = find(dir, "_bins.tsv").first() {
                result.insert("bins".to_string(), read_rows(bins, None)?);
            }
            Value::Object(result)
        }
        Category::Metatranscriptome => {
            single("top_features", read_rows(&require(dir, "_top_features.tsv")?, Some(TOP_FEATURES))?)
        }
        Category::Metaproteomics => single("quality_summary", read_rows(&require(dir, "_QC_metrics.tsv")?, None)?),
        Category::MetagenomePipeline => bail!("{category} is not a single workflow"),
    };
    Ok(result)
}

/// Build the project's result document and write it to `result.json`
///
/// An error means the engine reported success but the outputs are unusable.
pub fn write_result(registry: &Registry, conf: &ProjectConf, wd: &WorkingDirectory) -> Result<Value> {
    let category = conf.category();
    let spec = registry.get(category).with_context(|| format!("Category {category} is not registered"))?;
    let output = wd.output_dir();

    let result = match (conf, spec.is_pipeline()) {
        (ProjectConf::Workflow(_), false) => workflow_result(category, &output.join(&spec.outdir), &wd.path)?,
        (ProjectConf::Pipeline(pipeline), true) => {
            let mut steps = Map::new();
            for step in spec.steps.iter().copied().filter(|s| pipeline.is_on(*s)) {
                let step_spec = registry.get(step).with_context(|| format!("Step {step} is not registered"))?;
                let step_result = workflow_result(step, &output.join(&step_spec.outdir), &wd.path)
                    .with_context(|| format!("{step} step"))?;
                steps.insert(step.as_str().to_string(), step_result);
            }
            Value::Object(steps)
        }
        _ => bail!("Configuration of {category} doesn't match its registered kind"),
    };

    info!("Writing result of {} to {}", category, wd.file(RESULT).display());
    wd.write_json(RESULT, &result)?;
    Ok(result)
}
