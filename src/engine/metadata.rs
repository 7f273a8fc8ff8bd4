use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// The parts of `GET /{id}/metadata` the monitors read. Everything else is kept on disk untouched.
#[derive(Debug, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Call name to attempts (and scatter shards), in engine order
    #[serde(default)]
    pub calls: BTreeMap<String, Vec<CallAttempt>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAttempt {
    pub execution_status: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub sub_workflow_id: Option<String>,
    pub stderr: Option<String>,
    pub attempt: Option<u32>,
}

impl Metadata {
    pub fn from_value(value: &Value) -> serde_json::Result<Metadata> {
        Metadata::deserialize(value)
    }

    /// Latest attempt of a call
    pub fn last_attempt(&self, call: &str) -> Option<&CallAttempt> {
        self.calls.get(call).and_then(|attempts| attempts.last())
    }

    /// Every attempt that ended in `Failed`, with its call name
    pub fn failed_calls(&self) -> Vec<(&str, &CallAttempt)> {
        self.calls
            .iter()
            .flat_map(|(name, attempts)| attempts.iter().map(move |a| (name.as_str(), a)))
            .filter(|(_, a)| a.execution_status.as_deref() == Some("Failed"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_failed_calls_and_last_attempt() {
        let value = json!({
            "status": "Failed",
            "calls": {
                "main_workflow.ReadsQC": [
                    {"executionStatus": "Failed", "subWorkflowId": "sub-1", "attempt": 1},
                ],
                "main_workflow.MetaAssembly": [
                    {"executionStatus": "Failed", "stderr": "/cromwell/stderr", "attempt": 1},
                    {"executionStatus": "Done", "start": "2024-01-01T00:00:00Z", "attempt": 2}
                ]
            },
            "inputs": {"ignored": true}
        });
        let metadata = Metadata::from_value(&value).unwrap();

        let failed = metadata.failed_calls();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].0, "main_workflow.MetaAssembly");
        assert_eq!(failed[0].1.stderr.as_deref(), Some("/cromwell/stderr"));
        assert_eq!(failed[1].1.sub_workflow_id.as_deref(), Some("sub-1"));

        let last = metadata.last_attempt("main_workflow.MetaAssembly").unwrap();
        assert_eq!(last.attempt, Some(2));
        assert!(metadata.last_attempt("missing").is_none());
    }

    #[test]
    fn test_empty_document() {
        let metadata = Metadata::from_value(&json!({})).unwrap();
        assert!(metadata.calls.is_empty());
    }
}
