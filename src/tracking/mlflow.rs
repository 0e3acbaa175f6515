//! MLflow REST API client
//!
//! Talks to the public tracking API (`/api/2.0/mlflow/...`) and uploads
//! artifacts through the server's artifact proxy
//! (`/api/2.0/mlflow-artifacts/artifacts/...`). The server must run with
//! artifact serving enabled for `log_artifact` to work.

use super::{
    ArtifactRecord, DatasetInput, ExperimentRecord, MetricRecord, ParamRecord, RunRecord,
    RunStatus, TrackingBackend, RUN_NAME_TAG,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Params per `runs/log-batch` request (server limit).
const MAX_PARAMS_PER_BATCH: usize = 100;
/// Metrics per `runs/log-batch` request (server limit).
const MAX_METRICS_PER_BATCH: usize = 1000;
/// Default HTTP timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

/// Client for an MLflow tracking server.
///
/// # Example
///
/// ```rust,no_run
/// use forest_sweep::tracking::{MlflowClient, TrackingBackend};
///
/// # async fn example() -> forest_sweep::Result<()> {
/// let client = MlflowClient::new("http://localhost:5000")?;
/// let experiment = client.set_experiment("example-experiment").await?;
/// println!("experiment id: {}", experiment.experiment_id());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MlflowClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExperimentPayload {
    experiment_id: String,
    name: String,
    #[serde(default)]
    artifact_location: Option<String>,
    #[serde(default)]
    creation_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentPayload,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunInfoPayload {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    run_name: Option<String>,
    #[serde(default)]
    artifact_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    info: RunInfoPayload,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: RunPayload,
}

#[derive(Debug, Serialize)]
struct DatasetPayload<'a> {
    name: &'a str,
    digest: &'a str,
    source_type: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<&'a str>,
}

impl MlflowClient {
    /// Create a client for the server at `tracking_uri`.
    ///
    /// # Errors
    /// Returns error if the URI is not http(s) or the HTTP client cannot be built
    pub fn new(tracking_uri: &str) -> Result<Self> {
        Self::with_timeout(tracking_uri, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    ///
    /// # Errors
    /// Returns error if the URI is not http(s) or the HTTP client cannot be built
    pub fn with_timeout(tracking_uri: &str, timeout: Duration) -> Result<Self> {
        if !(tracking_uri.starts_with("http://") || tracking_uri.starts_with("https://")) {
            return Err(Error::Config(format!(
                "tracking URI '{tracking_uri}' must be an http(s) URL"
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("forest-sweep/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: tracking_uri.trim_end_matches('/').to_string(),
        })
    }

    /// Server base URL.
    #[must_use]
    pub fn tracking_uri(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{endpoint}", self.base_url)
    }

    /// Proxy URL for `path` under a run's `artifact_uri`.
    ///
    /// Accepts `mlflow-artifacts:/<root>` and
    /// `mlflow-artifacts://<host>/<root>`; uploads always go to the
    /// configured server.
    ///
    /// # Errors
    /// Returns error if the artifact root is not served by the tracking server
    pub fn artifact_url(&self, artifact_uri: &str, path: &str) -> Result<String> {
        let Some(rest) = artifact_uri.strip_prefix(ARTIFACT_SCHEME) else {
            return Err(Error::InvalidInput(format!(
                "artifact root '{artifact_uri}' is not served by the tracking server (start it with --serve-artifacts)"
            )));
        };
        let root = match rest.strip_prefix("//") {
            Some(with_authority) => with_authority
                .find('/')
                .map_or("", |slash| &with_authority[slash..]),
            None => rest,
        };
        Ok(format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}",
            self.base_url,
            root.trim_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) if !err.error_code.is_empty() => (err.error_code, err.message),
            _ => ("UNKNOWN".to_string(), body),
        };
        Err(Error::Tracking {
            status: status.as_u16(),
            code,
            message,
        })
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &serde_json::Value) -> Result<T> {
        tracing::debug!(endpoint, "mlflow POST");
        let response = self.client.post(self.api_url(endpoint)).json(body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_unit(&self, endpoint: &str, body: &serde_json::Value) -> Result<()> {
        tracing::debug!(endpoint, "mlflow POST");
        let response = self.client.post(self.api_url(endpoint)).json(body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        tracing::debug!(endpoint, "mlflow GET");
        let response = self
            .client
            .get(self.api_url(endpoint))
            .query(query)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        match self
            .get::<GetExperimentResponse>("experiments/get-by-name", &[("experiment_name", name)])
            .await
        {
            Ok(resp) => Ok(Some(experiment_record(resp.experiment))),
            Err(Error::Tracking { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn log_batch(
        &self,
        run_id: &str,
        params: &[ParamRecord],
        metrics: &[MetricRecord],
    ) -> Result<()> {
        for chunk in params.chunks(MAX_PARAMS_PER_BATCH) {
            let params: Vec<_> = chunk
                .iter()
                .map(|p| json!({ "key": p.key(), "value": p.value() }))
                .collect();
            self.post_unit("runs/log-batch", &json!({ "run_id": run_id, "params": params }))
                .await?;
        }
        for chunk in metrics.chunks(MAX_METRICS_PER_BATCH) {
            let metrics: Vec<_> = chunk
                .iter()
                .map(|m| {
                    json!({
                        "key": m.key(),
                        "value": m.value(),
                        "timestamp": m.timestamp_millis(),
                        "step": m.step(),
                    })
                })
                .collect();
            self.post_unit("runs/log-batch", &json!({ "run_id": run_id, "metrics": metrics }))
                .await?;
        }
        Ok(())
    }
}

fn experiment_record(payload: ExperimentPayload) -> ExperimentRecord {
    let mut builder = ExperimentRecord::builder(payload.experiment_id, payload.name);
    if let Some(location) = payload.artifact_location {
        builder = builder.artifact_location(location);
    }
    if let Some(created) = payload.creation_time.and_then(DateTime::<Utc>::from_timestamp_millis) {
        builder = builder.created_at(created);
    }
    builder.build()
}

impl TrackingBackend for MlflowClient {
    async fn set_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        if let Some(existing) = self.get_experiment_by_name(name).await? {
            return Ok(existing);
        }
        let created: CreateExperimentResponse = self
            .post("experiments/create", &json!({ "name": name }))
            .await?;
        tracing::info!(experiment_id = %created.experiment_id, name, "created experiment");
        Ok(self
            .get_experiment_by_name(name)
            .await?
            .unwrap_or_else(|| ExperimentRecord::new(created.experiment_id, name)))
    }

    async fn create_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunRecord> {
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": Utc::now().timestamp_millis(),
        });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
            body["tags"] = json!([{ "key": RUN_NAME_TAG, "value": name }]);
        }
        let resp: CreateRunResponse = self.post("runs/create", &body).await?;
        let info = resp.run.info;

        let mut builder = RunRecord::builder(info.run_id, info.experiment_id);
        if let Some(name) = info.run_name.or_else(|| run_name.map(str::to_string)) {
            builder = builder.run_name(name);
        }
        if let Some(uri) = info.artifact_uri {
            builder = builder.artifact_uri(uri);
        }
        let mut record = builder.build();
        record.start();
        Ok(record)
    }

    async fn log_params(&self, run_id: &str, params: &[ParamRecord]) -> Result<()> {
        self.log_batch(run_id, params, &[]).await
    }

    async fn log_metrics(&self, run_id: &str, metrics: &[MetricRecord]) -> Result<()> {
        self.log_batch(run_id, &[], metrics).await
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.post_unit(
            "runs/set-tag",
            &json!({ "run_id": run_id, "key": key, "value": value }),
        )
        .await
    }

    async fn log_input(&self, run_id: &str, input: &DatasetInput) -> Result<()> {
        let dataset = DatasetPayload {
            name: &input.name,
            digest: &input.digest,
            source_type: &input.source_type,
            source: &input.source,
            schema: input.schema.as_deref(),
            profile: input.profile.as_deref(),
        };
        let body = json!({
            "run_id": run_id,
            "datasets": [{
                "tags": [{ "key": DatasetInput::CONTEXT_TAG, "value": input.context }],
                "dataset": dataset,
            }],
        });
        self.post_unit("runs/log-inputs", &body).await
    }

    async fn log_artifact(&self, run: &RunRecord, path: &str, contents: Vec<u8>) -> Result<ArtifactRecord> {
        let artifact_uri = run.artifact_uri().ok_or_else(|| {
            Error::InvalidInput(format!("run {} has no artifact root", run.run_id()))
        })?;
        let url = self.artifact_url(artifact_uri, path)?;
        let record = ArtifactRecord::from_contents(run.run_id(), path, &contents);

        tracing::debug!(path, size = contents.len(), "mlflow artifact PUT");
        let response = self.client.put(url).body(contents).send().await?;
        Self::check(response).await?;
        Ok(record)
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.post_unit(
            "runs/update",
            &json!({
                "run_id": run_id,
                "status": status.as_mlflow(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MlflowClient {
        MlflowClient::new("http://mlflow:5000/").unwrap()
    }

    #[test]
    fn test_rejects_non_http_uri() {
        assert!(matches!(MlflowClient::new("mlruns"), Err(Error::Config(_))));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(client().tracking_uri(), "http://mlflow:5000");
        assert_eq!(
            client().api_url("runs/create"),
            "http://mlflow:5000/api/2.0/mlflow/runs/create"
        );
    }

    #[test]
    fn test_artifact_url_from_proxy_root() {
        let url = client()
            .artifact_url("mlflow-artifacts:/1/abc/artifacts", "model/MLmodel")
            .unwrap();
        assert_eq!(
            url,
            "http://mlflow:5000/api/2.0/mlflow-artifacts/artifacts/1/abc/artifacts/model/MLmodel"
        );
    }

    #[test]
    fn test_artifact_url_with_authority() {
        let url = client()
            .artifact_url("mlflow-artifacts://other:5000/1/abc/artifacts", "x.json")
            .unwrap();
        assert_eq!(
            url,
            "http://mlflow:5000/api/2.0/mlflow-artifacts/artifacts/1/abc/artifacts/x.json"
        );
    }

    #[test]
    fn test_artifact_url_rejects_direct_store() {
        assert!(client().artifact_url("s3://bucket/1/abc", "x").is_err());
    }

    #[test]
    fn test_experiment_record_from_payload() {
        let payload: ExperimentPayload = serde_json::from_str(
            r#"{"experiment_id":"3","name":"e","artifact_location":"mlflow-artifacts:/3","creation_time":1700000000000}"#,
        )
        .unwrap();
        let record = experiment_record(payload);
        assert_eq!(record.experiment_id(), "3");
        assert_eq!(record.artifact_location(), Some("mlflow-artifacts:/3"));
        assert_eq!(record.created_at().timestamp(), 1_700_000_000);
    }
}
