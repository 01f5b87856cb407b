use super::{Engine, EngineModel, EngineType};
use crate::error::GatewayError;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Vllm;

#[async_trait]
impl Engine for Vllm {
    fn engine_type(&self) -> EngineType {
        EngineType::Vllm
    }

    fn default_base_url(&self) -> &'static str {
        "http://localhost:8000"
    }

    fn binary_name(&self) -> &'static str {
        "vllm"
    }

    fn health_path(&self) -> &'static str {
        "/health"
    }

    async fn probe_version(&self, client: &reqwest::Client, base_url: &str) -> Option<String> {
        let url = format!("{}/version", base_url.trim_end_matches('/'));
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
        super::list_openai_models(client, base_url, "vLLM").await
    }
}
