use super::{Engine, EngineModel, EngineType};
use crate::error::GatewayError;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug)]
pub struct Ollama;

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
    size: Option<i64>,
    modified_at: Option<String>,
    details: Option<TagDetails>,
}

#[derive(Deserialize)]
struct TagDetails {
    parameter_size: Option<String>,
}

#[async_trait]
impl Engine for Ollama {
    fn engine_type(&self) -> EngineType {
        EngineType::Ollama
    }

    fn default_base_url(&self) -> &'static str {
        "http://localhost:11434"
    }

    fn binary_name(&self) -> &'static str {
        "ollama"
    }

    fn health_path(&self) -> &'static str {
        "/api/version"
    }

    async fn probe_version(&self, client: &reqwest::Client, base_url: &str) -> Option<String> {
        let url = format!("{}/api/version", base_url.trim_end_matches('/'));
        let body: serde_json::Value = client.get(&url).send().await.ok()?.json().await.ok()?;
        body.get("version")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    async fn list_models(
        &self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<Vec<EngineModel>, GatewayError> {
        let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
        let resp = client.get(&url).send().await.map_err(|e| {
            GatewayError::EngineUnavailable(format!("Ollama not reachable at {}: {}", base_url, e))
        })?;

        let tags: TagsResponse = resp.json().await.map_err(|e| {
            GatewayError::EngineUnavailable(format!("Unexpected Ollama response: {}", e))
        })?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| EngineModel {
                name: m.name,
                size: m.size,
                modified_at: m.modified_at,
                parameter_size: m.details.and_then(|d| d.parameter_size),
            })
            .collect())
    }
}
