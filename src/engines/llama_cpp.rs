use super::{Engine, EngineModel, EngineType};
use crate::error::GatewayError;
use async_trait::async_trait;

#[derive(Debug)]
pub struct LlamaCpp;

#[async_trait]
impl Engine for LlamaCpp {
    fn engine_type(&self) -> EngineType {
        EngineType::LlamaCpp
    }

    fn default_base_url(&self) -> &'static str {
        "http://localhost:8080"
    }

    fn binary_name(&self) -> &'static str {
        "llama-server"
    }

    fn health_path(&self) -> &'static str {
        "/health"
    }

    async fn list_models(
        &self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<Vec<EngineModel>, GatewayError> {
        super::list_openai_models(client, base_url, "llama.cpp").await
    }
}
