//! Static registry of workflow and pipeline categories
//!
//! The registry is the single source of truth the schedulers, the input generator and the result
//! generator consult by category. It is loaded once at start up and never mutated.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use serde::Deserialize;

/// included default registry
static REGISTRY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/registry.toml"));

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    ReadsQc,
    ReadbasedAnalysis,
    MetaAssembly,
    MetaAnnotation,
    MetaMags,
    Metatranscriptome,
    Metaproteomics,
    MetagenomePipeline,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::ReadsQc,
        Category::ReadbasedAnalysis,
        Category::MetaAssembly,
        Category::MetaAnnotation,
        Category::MetaMags,
        Category::Metatranscriptome,
        Category::Metaproteomics,
        Category::MetagenomePipeline,
    ];

    /// Name used in project records, configuration documents and the registry file
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ReadsQc => "ReadsQC",
            Category::ReadbasedAnalysis => "ReadbasedAnalysis",
            Category::MetaAssembly => "MetaAssembly",
            Category::MetaAnnotation => "MetaAnnotation",
            Category::MetaMags => "MetaMAGs",
            Category::Metatranscriptome => "Metatranscriptome",
            Category::Metaproteomics => "Metaproteomics",
            Category::MetagenomePipeline => "Metagenome Pipeline",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown category {s}"))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Workflow,
    Pipeline,
}

/// Scheduling pool. Each category belongs to exactly one pool, so the schedulers never compete
/// for the same project.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Pool {
    #[serde(rename = "pipeline")]
    Pipeline,
    #[serde(rename = "workflow")]
    Workflow,
    #[serde(rename = "bigmem")]
    BigMem,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Pool::Pipeline => write!(f, "pipeline"),
            Pool::Workflow => write!(f, "workflow"),
            Pool::BigMem => write!(f, "bigmem"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    categories: BTreeMap<String, RawSpec>,
}

#[derive(Debug, Deserialize)]
struct RawSpec {
    kind: CategoryKind,
    pool: Pool,
    wdl: Option<PathBuf>,
    wdl_template: Option<PathBuf>,
    imports: Option<PathBuf>,
    workflow: String,
    outdir: String,
    #[serde(default = "default_wdl_version")]
    wdl_version: String,
    #[serde(default)]
    calls: Vec<String>,
    #[serde(default)]
    steps: Vec<String>,
}

fn default_wdl_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone)]
pub struct CategorySpec {
    pub category: Category,
    pub kind: CategoryKind,
    pub pool: Pool,
    /// Workflow description, relative to `workflows_dir` in the registry file
    pub wdl: Option<PathBuf>,
    /// Pipeline template overriding the embedded one
    pub wdl_template: Option<PathBuf>,
    /// Zip bundle sent as `workflowDependencies`
    pub imports: Option<PathBuf>,
    /// Workflow name inside the description, prefixes every parameter
    pub workflow: String,
    /// Output subdirectory under the project's `output/`
    pub outdir: String,
    pub wdl_version: String,
    /// Engine call names reported in run statistics
    pub calls: Vec<String>,
    /// Ordered constituent workflows of a pipeline
    pub steps: Vec<Category>,
}

impl CategorySpec {
    pub fn is_pipeline(&self) -> bool {
        self.kind == CategoryKind::Pipeline
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    categories: BTreeMap<Category, CategorySpec>,
}

impl Registry {
    /// Load a registry file, or the embedded registry when no path is configured
    pub fn load(path: Option<&Path>, workflows_dir: &Path) -> Result<Registry> {
        match path {
            Some(path) => {
                info!("Loading category registry {}", path.display());
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Can't read registry {}", path.display()))?;
                Registry::parse(&content, workflows_dir)
            }
            None => {
                info!("Loading embedded category registry");
                Registry::parse(REGISTRY, workflows_dir)
            }
        }
    }

    pub fn parse(content: &str, workflows_dir: &Path) -> Result<Registry> {
        let file: RegistryFile = toml::from_str(content).context("Invalid registry")?;
        let mut categories = BTreeMap::new();

        for (name, raw) in file.categories {
            let category: Category = name.parse()?;
            let steps = raw
                .steps
                .iter()
                .map(|s| s.parse::<Category>())
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid steps of {name}"))?;
            let spec = CategorySpec {
                category,
                kind: raw.kind,
                pool: raw.pool,
                wdl: raw.wdl.map(|p| workflows_dir.join(p)),
                wdl_template: raw.wdl_template.map(|p| workflows_dir.join(p)),
                imports: raw.imports.map(|p| workflows_dir.join(p)),
                workflow: raw.workflow,
                outdir: raw.outdir,
                wdl_version: raw.wdl_version,
                calls: raw.calls,
                steps,
            };
            categories.insert(category, spec);
        }

        let registry = Registry { categories };
        registry.check()?;
        Ok(registry)
    }

    fn check(&self) -> Result<()> {
        for spec in self.categories.values() {
            match spec.kind {
                CategoryKind::Workflow => {
                    if spec.wdl.is_none() {
                        bail!("Workflow {} has no wdl", spec.category);
                    }
                    if !spec.steps.is_empty() {
                        bail!("Workflow {} can't have steps", spec.category);
                    }
                }
                CategoryKind::Pipeline => {
                    if spec.steps.is_empty() {
                        bail!("Pipeline {} has no steps", spec.category);
                    }
                    for step in &spec.steps {
                        match self.categories.get(step) {
                            Some(s) if s.kind == CategoryKind::Workflow => {}
                            _ => bail!("Pipeline {} step {} is not a registered workflow", spec.category, step),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, category: Category) -> Option<&CategorySpec> {
        self.categories.get(&category)
    }

    /// Look up a category by the name stored in a project record
    pub fn lookup(&self, name: &str) -> Option<&CategorySpec> {
        name.parse::<Category>().ok().and_then(|c| self.get(c))
    }

    /// Names of every category scheduled by `pool`
    pub fn names_in(&self, pool: Pool) -> Vec<String> {
        self.categories
            .values()
            .filter(|spec| spec.pool == pool)
            .map(|spec| spec.category.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_registry_loads() {
        let registry = Registry::load(None, Path::new("/opt/workflows")).unwrap();
        let qc = registry.get(Category::ReadsQc).unwrap();
        assert_eq!(qc.wdl, Some(PathBuf::from("/opt/workflows/ReadsQC/rqcfilter.wdl")));
        assert_eq!(qc.pool, Pool::Workflow);

        let pipeline = registry.lookup("Metagenome Pipeline").unwrap();
        assert!(pipeline.is_pipeline());
        assert_eq!(pipeline.steps.first(), Some(&Category::ReadsQc));
        assert_eq!(pipeline.steps.last(), Some(&Category::MetaMags));
    }

    #[test]
    fn test_pools_are_disjoint() {
        let registry = Registry::load(None, Path::new("/opt")).unwrap();
        let pools = [Pool::Pipeline, Pool::Workflow, Pool::BigMem];
        let mut seen: Vec<String> = Vec::new();
        for pool in pools {
            for name in registry.names_in(pool) {
                assert!(!seen.contains(&name), "{name} scheduled twice");
                seen.push(name);
            }
        }
        assert_eq!(seen.len(), Category::ALL.len());
        assert!(registry.names_in(Pool::BigMem).contains(&"MetaMAGs".to_string()));
    }

    #[test]
    fn test_pipeline_step_must_be_registered() {
        let toml = r#"
            [categories."Metagenome Pipeline"]
            kind = "pipeline"
            pool = "pipeline"
            workflow = "main_workflow"
            outdir = "pipeline"
            steps = ["ReadsQC"]
        "#;
        let err = Registry::parse(toml, Path::new("/opt")).unwrap_err();
        assert!(err.to_string().contains("not a registered workflow"));
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let toml = r#"
            [categories.Bogus]
            kind = "workflow"
            pool = "workflow"
            wdl = "bogus.wdl"
            workflow = "bogus"
            outdir = "bogus"
        "#;
        assert!(Registry::parse(toml, Path::new("/opt")).is_err());
    }

    #[test]
    fn test_lookup_unknown_type() {
        let registry = Registry::load(None, Path::new("/opt")).unwrap();
        assert!(registry.lookup("Retrieve SRA Data").is_none());
    }
}
