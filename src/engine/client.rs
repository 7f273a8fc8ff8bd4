use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::EngineConfig;
use crate::engine::{AbortOutcome, Engine, EngineError, JobStatus, Submission};

pub struct CromwellClient {
    http: reqwest::Client,
    /// `<engine url>/api/workflows/v1`, without a trailing slash
    base: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: JobStatus,
}

/// Cromwell reports failures as `{"status": "fail", "message": "..."}`
#[derive(Deserialize)]
struct FailureResponse {
    message: Option<String>,
}

impl CromwellClient {
    pub fn new(config: &EngineConfig) -> Result<CromwellClient> {
        let url = Url::parse(&config.url).with_context(|| format!("Invalid engine url {}", config.url))?;
        let base = format!("{}/api/workflows/v1", url.as_str().trim_end_matches('/'));
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        info!("Using workflow engine at {base}");
        Ok(CromwellClient { http, base })
    }

    fn url(&self, id: &str, action: &str) -> String {
        format!("{}/{}/{}", self.base, id, action)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

/// Turn a non-2xx response into an [EngineError]
async fn check(response: Response) -> Result<Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<FailureResponse>(&body)
        .ok()
        .and_then(|f| f.message)
        .unwrap_or(body);
    let status = status.as_u16();
    if (500..600).contains(&status) {
        Err(EngineError::Server { status, message })
    } else {
        Err(EngineError::Rejected { status, message })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, EngineError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| EngineError::Decode(format!("{e}: {body}")))
}

#[async_trait]
impl Engine for CromwellClient {
    async fn submit(&self, submission: &Submission) -> Result<String, EngineError> {
        let mut form = Form::new()
            .part("workflowSource", Part::bytes(submission.workflow_source.clone()).file_name("pipeline.wdl"))
            .part("workflowInputs", Part::bytes(submission.inputs.clone()).file_name("pipeline_inputs.json"))
            .text("workflowType", submission.workflow_type.clone())
            .text("workflowTypeVersion", submission.workflow_type_version.clone());
        if let Some(options) = &submission.options {
            form = form.part("workflowOptions", Part::bytes(options.clone()).file_name("pipeline_options.json"));
        }
        if let Some(dependencies) = &submission.dependencies {
            form = form.part("workflowDependencies", Part::bytes(dependencies.clone()).file_name("imports.zip"));
        }

        debug!("POST {}", self.base);
        let response = self.http.post(&self.base).multipart(form).send().await?;
        let created: IdResponse = decode(check(response).await?).await?;
        Ok(created.id)
    }

    async fn status(&self, id: &str) -> Result<JobStatus, EngineError> {
        let response = self.http.get(self.url(id, "status")).send().await?;
        let status: StatusResponse = decode(check(response).await?).await?;
        Ok(status.status)
    }

    async fn metadata(&self, id: &str) -> Result<Value, EngineError> {
        let response = self.http.get(self.url(id, "metadata")).send().await?;
        decode(check(response).await?).await
    }

    async fn logs(&self, id: &str) -> Result<Value, EngineError> {
        let response = self.http.get(self.url(id, "logs")).send().await?;
        decode(check(response).await?).await
    }

    async fn abort(&self, id: &str) -> Result<AbortOutcome, EngineError> {
        let response = self.http.post(self.url(id, "abort")).send().await?;
        match check(response).await {
            Ok(_) => Ok(AbortOutcome::Confirmed),
            Err(EngineError::Rejected { message, .. }) => Ok(AbortOutcome::NotRunning(message)),
            Err(err) => Err(err),
        }
    }
}
