use super::{Engine, EngineModel, EngineType};
use crate::error::GatewayError;
use async_trait::async_trait;

#[derive(Debug)]
pub struct LmStudio;

#[async_trait]
impl Engine for LmStudio {
    fn engine_type(&self) -> EngineType {
        EngineType::LmStudio
    }

    fn default_base_url(&self) -> &'static str {
        "http://localhost:1234"
    }

    fn binary_name(&self) -> &'static str {
        "lms"
    }

    fn health_path(&self) -> &'static str {
        "/v1/models"
    }

    async fn list_models(
        &self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<Vec<EngineModel>, GatewayError> {
        super::list_openai_models(client, base_url, "LM Studio").await
    }
}
