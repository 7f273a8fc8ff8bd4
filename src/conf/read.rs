use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::anyhow;
use jsonschema::JSONSchema;
use log::{debug, warn};
use serde_json::Value;

use crate::conf::ProjectConf;

/// included configuration schema
static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/conf.json"));

#[derive(Debug, Clone, PartialEq)]
pub enum ConfError {
    Read(String),
    Decode(String),
    Validation(Vec<String>),
    Deserialise(String),
}

impl fmt::Display for ConfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfError::Read(err) => write!(f, "can't read configuration: {err}"),
            ConfError::Decode(err) => write!(f, "configuration is not valid JSON: {err}"),
            ConfError::Validation(errors) => write!(f, "configuration fails validation: {}", errors.join("; ")),
            ConfError::Deserialise(err) => write!(f, "configuration doesn't match its category: {err}"),
        }
    }
}

impl Error for ConfError {}

/// Reads `conf.json` documents: parse untyped, validate against the schema, then deserialise
pub struct ConfReader {
    compiled_schema: JSONSchema,
}

impl ConfReader {
    pub fn new() -> anyhow::Result<ConfReader> {
        let schema: Value = serde_json::from_str(SCHEMA)?;
        let compiled_schema = JSONSchema::compile(&schema)
            .map_err(|err| anyhow!("Invalid configuration schema: {err}"))?;
        Ok(ConfReader { compiled_schema })
    }

    pub fn read(&self, path: &Path) -> Result<ProjectConf, ConfError> {
        debug!("Reading configuration {}", path.display());
        let json_string = fs::read_to_string(path).map_err(|err| {
            warn!("Can't read configuration at path {}: {}", path.display(), err);
            ConfError::Read(format!("{}: {}", path.display(), err))
        })?;
        self.parse(&json_string)
    }

    pub fn parse(&self, json_string: &str) -> Result<ProjectConf, ConfError> {
        let json: Value = serde_json::from_str(json_string).map_err(|err| ConfError::Decode(err.to_string()))?;
        self.validate(&json)?;
        // from_value is a generic function, so request ProjectConf specifically
        serde_json::from_value::<ProjectConf>(json).map_err(|err| ConfError::Deserialise(err.to_string()))
    }

    fn validate(&self, json: &Value) -> Result<(), ConfError> {
        match self.compiled_schema.validate(json) {
            Ok(_) => Ok(()),
            Err(errors) => {
                let errors: Vec<String> = errors.map(|e| format!("{} at '{}'", e, e.instance_path)).collect();
                warn!("Configuration fails validation");
                Err(ConfError::Validation(errors))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::conf::WorkflowConf;
    use crate::registry::Category;

    #[test]
    fn test_valid_workflow() {
        let reader = ConfReader::new().unwrap();
        let conf = reader
            .parse(r#"{"workflow": {"name": "ReadsQC", "input_fastq": {"interleaved": true, "fastqs": ["a.fq.gz"]}}}"#)
            .unwrap();
        assert_eq!(conf.category(), Category::ReadsQc);
        assert!(matches!(conf, ProjectConf::Workflow(WorkflowConf::ReadsQc(_))));
    }

    #[test]
    fn test_schema_rejects_both_sections() {
        let reader = ConfReader::new().unwrap();
        let err = reader
            .parse(r#"{"workflow": {"name": "ReadsQC"}, "pipeline": {"name": "Metagenome Pipeline"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfError::Validation(_)));
    }

    #[test]
    fn test_schema_rejects_bad_prefix() {
        let reader = ConfReader::new().unwrap();
        let err = reader.parse(r#"{"workflow": {"name": "MetaAnnotation", "prefix": "a b", "input_fasta": "x"}}"#);
        assert!(matches!(err, Err(ConfError::Validation(_))));
    }

    #[test]
    fn test_valid_shape_wrong_fields() {
        let reader = ConfReader::new().unwrap();
        let err = reader.parse(r#"{"workflow": {"name": "MetaAnnotation"}}"#).unwrap_err();
        assert!(matches!(err, ConfError::Deserialise(_)));
    }

    #[test]
    fn test_missing_file() {
        let tmp = TempDir::new().unwrap();
        let reader = ConfReader::new().unwrap();
        let err = reader.read(&tmp.path().join("conf.json")).unwrap_err();
        assert!(matches!(err, ConfError::Read(_)));
    }
}
