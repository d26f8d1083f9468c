//! MLflow model registry client (REST API 2.0)

use crate::error::{QaBotError, Result};
use crate::registry::{ModelRegistry, ModelVersion, Stage};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

const ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";

/// Registry backed by an MLflow tracking server
pub struct MlflowRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawModelVersion {
    name: String,
    version: String,
    #[serde(default)]
    current_stage: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    creation_timestamp: Option<i64>,
}

impl RawModelVersion {
    fn into_version(self) -> Result<ModelVersion> {
        let version = self.version.parse::<u32>().map_err(|_| {
            QaBotError::Registry(format!("Unexpected version number '{}'", self.version))
        })?;
        let stage = match self.current_stage.as_deref() {
            None | Some("") => Stage::None,
            Some(stage) => stage.parse()?,
        };
        let created_at: DateTime<Utc> = self
            .creation_timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(ModelVersion {
            name: self.name,
            version,
            stage,
            source: self.source.unwrap_or_default(),
            created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ModelVersionResponse {
    model_version: RawModelVersion,
}

#[derive(Debug, Deserialize)]
struct LatestVersionsResponse {
    #[serde(default)]
    model_versions: Vec<RawModelVersion>,
}

impl MlflowRegistry {
    pub fn new(tracking_uri: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/api/2.0/mlflow", tracking_uri.trim_end_matches('/')),
            token,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Value,
    ) -> Result<std::result::Result<T, ApiError>> {
        let mut request = self.client.request(method.clone(), self.url(endpoint));
        request = if method == reqwest::Method::GET {
            request.query(&body_as_query(&body))
        } else {
            request.json(&body)
        };
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        log::debug!("MLflow {} {}", method, endpoint);
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(Ok(serde_json::from_str(&text)?));
        }
        match serde_json::from_str::<ApiError>(&text) {
            Ok(error) => Ok(Err(error)),
            Err(_) => Err(QaBotError::Registry(format!(
                "MLflow {} failed with status {}: {}",
                endpoint, status, text
            ))),
        }
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> Result<T> {
        self.call(reqwest::Method::POST, endpoint, body)
            .await?
            .map_err(|e| api_error(endpoint, e))
    }

    async fn ensure_registered_model(&self, name: &str) -> Result<()> {
        let created = self
            .call::<Value>(
                reqwest::Method::POST,
                "registered-models/create",
                json!({ "name": name }),
            )
            .await?;
        match created {
            Ok(_) => {
                log::info!("Created registered model {}", name);
                Ok(())
            }
            Err(e) if e.error_code == ALREADY_EXISTS => Ok(()),
            Err(e) => Err(api_error("registered-models/create", e)),
        }
    }
}

fn body_as_query(body: &Value) -> Vec<(String, String)> {
    body.as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn api_error(endpoint: &str, error: ApiError) -> QaBotError {
    QaBotError::Registry(format!(
        "MLflow {} failed: {} {}",
        endpoint, error.error_code, error.message
    ))
}

#[async_trait]
impl ModelRegistry for MlflowRegistry {
    async fn register(&self, name: &str, source: &str) -> Result<ModelVersion> {
        self.ensure_registered_model(name).await?;
        let response: ModelVersionResponse = self
            .post("model-versions/create", json!({ "name": name, "source": source }))
            .await?;
        let version = response.model_version.into_version()?;
        log::info!("Registered {} version {}", name, version.version);
        Ok(version)
    }

    async fn latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        let stages: Vec<&str> = stages.iter().map(Stage::as_str).collect();
        let response: LatestVersionsResponse = self
            .post(
                "registered-models/get-latest-versions",
                json!({ "name": name, "stages": stages }),
            )
            .await?;
        response
            .model_versions
            .into_iter()
            .map(RawModelVersion::into_version)
            .collect()
    }

    async fn transition_stage(
        &self,
        name: &str,
        version: u32,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        let response: ModelVersionResponse = self
            .post(
                "model-versions/transition-stage",
                json!({
                    "name": name,
                    "version": version.to_string(),
                    "stage": stage.as_str(),
                    "archive_existing_versions": archive_existing,
                }),
            )
            .await?;
        response.model_version.into_version()
    }

    async fn get_version(&self, name: &str, version: u32) -> Result<ModelVersion> {
        let endpoint = "model-versions/get";
        let response: ModelVersionResponse = self
            .call(
                reqwest::Method::GET,
                endpoint,
                json!({ "name": name, "version": version.to_string() }),
            )
            .await?
            .map_err(|e| api_error(endpoint, e))?;
        response.model_version.into_version()
    }
}
