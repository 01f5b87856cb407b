use crate::db::models::EngineConfig;
use crate::engines::{self, EngineModel, EngineStatus, EngineType};
use crate::error::GatewayError;
use crate::AppState;
use serde::Deserialize;

/// Statically known engine types plus any configured custom entries.
pub async fn get_available_engines(
    state: &AppState,
) -> Result<Vec<serde_json::Value>, GatewayError> {
    let configs = engines::get_engine_configs(&state.db).await?;

    Ok(EngineType::ALL
        .iter()
        .map(|t| {
            let configured: Vec<&EngineConfig> = configs
                .iter()
                .filter(|c| c.engine_type == t.as_str())
                .collect();
            serde_json::json!({
                "engine_type": t.as_str(),
                "default_base_url": engines::adapter(*t).default_base_url(),
                "configs": configured,
            })
        })
        .collect())
}

pub async fn detect_engine(
    state: &AppState,
    engine_type: String,
) -> Result<EngineStatus, GatewayError> {
    let engine = engines::adapter_for(&engine_type)?;
    let base_url = engines::resolve_base_url(&state.db, engine.engine_type()).await?;
    Ok(engine.detect(&state.http_client, &base_url).await)
}

pub async fn detect_all_engines(state: &AppState) -> Result<Vec<EngineStatus>, GatewayError> {
    let mut statuses = Vec::with_capacity(EngineType::ALL.len());
    for engine_type in EngineType::ALL {
        let engine = engines::adapter(engine_type);
        let base_url = engines::resolve_base_url(&state.db, engine_type).await?;
        statuses.push(engine.detect(&state.http_client, &base_url).await);
    }
    Ok(statuses)
}

pub async fn get_engine_models(
    state: &AppState,
    engine_type: String,
) -> Result<Vec<EngineModel>, GatewayError> {
    let engine = engines::adapter_for(&engine_type)?;
    let base_url = engines::resolve_base_url(&state.db, engine.engine_type()).await?;
    engine.list_models(&state.http_client, &base_url).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveEngineConfigRequest {
    pub engine_type: String,
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_auto_detect")]
    pub auto_detect: bool,
    #[serde(default)]
    pub executable_path: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

fn default_auto_detect() -> bool {
    true
}

pub async fn save_engine_config(
    state: &AppState,
    request: SaveEngineConfigRequest,
) -> Result<EngineConfig, GatewayError> {
    engines::save_engine_config(
        &state.db,
        &request.engine_type,
        request.name,
        request.base_url,
        request.auto_detect,
        request.executable_path,
        request.is_default,
    )
    .await
}

pub async fn get_engine_configs(state: &AppState) -> Result<Vec<EngineConfig>, GatewayError> {
    engines::get_engine_configs(&state.db).await
}

pub async fn delete_engine_config(state: &AppState, id: String) -> Result<(), GatewayError> {
    engines::delete_engine_config(&state.db, &id).await
}
