pub mod llama_cpp;
pub mod lm_studio;
pub mod ollama;
pub mod vllm;

use crate::db::models::EngineConfig;
use crate::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    Ollama,
    LmStudio,
    Vllm,
    LlamaCpp,
}

impl EngineType {
    pub const ALL: [EngineType; 4] = [
        EngineType::Ollama,
        EngineType::LmStudio,
        EngineType::Vllm,
        EngineType::LlamaCpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Ollama => "ollama",
            EngineType::LmStudio => "lm_studio",
            EngineType::Vllm => "vllm",
            EngineType::LlamaCpp => "llama_cpp",
        }
    }

    /// Parse a stored/user-supplied tag, tolerating common variants.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Some(EngineType::Ollama),
            "lm_studio" | "lmstudio" | "lm-studio" => Some(EngineType::LmStudio),
            "vllm" => Some(EngineType::Vllm),
            "llama_cpp" | "llamacpp" | "llama-cpp" | "llama.cpp" => Some(EngineType::LlamaCpp),
            _ => None,
        }
    }
}

/// Detection outcome. Absence is a normal, reportable state, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub engine_type: EngineType,
    pub installed: bool,
    pub running: bool,
    pub version: Option<String>,
    pub path: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineModel {
    pub name: String,
    pub size: Option<i64>,
    pub modified_at: Option<String>,
    pub parameter_size: Option<String>,
}

/// Capability set one local engine exposes to the gateway. Each engine type
/// contributes one implementation; dispatch is by the `engine_type` tag.
#[async_trait]
pub trait Engine: Send + Sync + std::fmt::Debug {
    fn engine_type(&self) -> EngineType;

    /// Base URL the engine serves on when started with defaults.
    fn default_base_url(&self) -> &'static str;

    /// Binary probed on PATH for the `installed` half of detection.
    fn binary_name(&self) -> &'static str;

    /// Cheap GET used to decide whether the engine is reachable.
    fn health_path(&self) -> &'static str;

    /// Rewrite an incoming OpenAI-surface path to what the engine expects.
    /// All four engines speak `/v1/*` natively, so the default is identity;
    /// adapters with extra native surfaces extend the pass-through set.
    fn map_path(&self, path: &str) -> String {
        path.to_string()
    }

    /// Engine version, when it is cheaply discoverable.
    async fn probe_version(&self, _client: &reqwest::Client, _base_url: &str) -> Option<String> {
        None
    }

    /// Query the engine's native model listing and normalize it.
    async fn list_models(
        &self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<Vec<EngineModel>, GatewayError>;

    /// Probe installation and reachability without erroring on absence.
    async fn detect(&self, client: &reqwest::Client, base_url: &str) -> EngineStatus {
        let path = which::which(self.binary_name())
            .ok()
            .map(|p| p.display().to_string());
        let installed = path.is_some();

        let health_url = format!("{}{}", base_url.trim_end_matches('/'), self.health_path());
        let running = match client.get(&health_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        };

        let version = if running {
            self.probe_version(client, base_url).await
        } else {
            None
        };

        let message = match (installed, running) {
            (false, false) => Some(format!("{} is not installed", self.engine_type().as_str())),
            (true, false) => Some(format!(
                "{} is installed but not reachable at {}",
                self.engine_type().as_str(),
                base_url
            )),
            _ => None,
        };

        EngineStatus {
            engine_type: self.engine_type(),
            installed,
            running,
            version,
            path,
            message,
        }
    }
}

/// Shared listing for engines that only expose the OpenAI `/v1/models`
/// surface (LM Studio, vLLM, llama.cpp).
pub(crate) async fn list_openai_models(
    client: &reqwest::Client,
    base_url: &str,
    engine_label: &str,
) -> Result<Vec<EngineModel>, GatewayError> {
    #[derive(serde::Deserialize)]
    struct ModelsResponse {
        #[serde(default)]
        data: Vec<ModelObject>,
    }

    #[derive(serde::Deserialize)]
    struct ModelObject {
        id: String,
        created: Option<i64>,
    }

    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
    let resp = client.get(&url).send().await.map_err(|e| {
        GatewayError::EngineUnavailable(format!(
            "{} not reachable at {}: {}",
            engine_label, base_url, e
        ))
    })?;

    let models: ModelsResponse = resp.json().await.map_err(|e| {
        GatewayError::EngineUnavailable(format!("Unexpected {} response: {}", engine_label, e))
    })?;

    Ok(models
        .data
        .into_iter()
        .map(|m| EngineModel {
            name: m.id,
            size: None,
            modified_at: m
                .created
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                .map(|dt| dt.to_rfc3339()),
            parameter_size: None,
        })
        .collect())
}

pub fn adapter(engine_type: EngineType) -> &'static dyn Engine {
    match engine_type {
        EngineType::Ollama => &ollama::Ollama,
        EngineType::LmStudio => &lm_studio::LmStudio,
        EngineType::Vllm => &vllm::Vllm,
        EngineType::LlamaCpp => &llama_cpp::LlamaCpp,
    }
}

/// Adapter lookup for a stored tag, with the typed unknown-engine error.
pub fn adapter_for(tag: &str) -> Result<&'static dyn Engine, GatewayError> {
    EngineType::from_str_loose(tag)
        .map(adapter)
        .ok_or_else(|| GatewayError::NotFound(format!("Unknown engine type: {}", tag)))
}

/// Resolve the base URL for an instance: the newest default engine config
/// for the type wins, otherwise the adapter's built-in default.
pub async fn resolve_base_url(
    pool: &SqlitePool,
    engine_type: EngineType,
) -> Result<String, GatewayError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT base_url FROM engine_configs WHERE engine_type = ?
         ORDER BY is_default DESC, created_at DESC LIMIT 1",
    )
    .bind(engine_type.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row
        .map(|(url,)| url)
        .unwrap_or_else(|| adapter(engine_type).default_base_url().to_string()))
}

pub async fn save_engine_config(
    pool: &SqlitePool,
    engine_type: &str,
    name: String,
    base_url: String,
    auto_detect: bool,
    executable_path: Option<String>,
    is_default: bool,
) -> Result<EngineConfig, GatewayError> {
    let engine = EngineType::from_str_loose(engine_type)
        .ok_or_else(|| GatewayError::NotFound(format!("Unknown engine type: {}", engine_type)))?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO engine_configs (id, engine_type, name, base_url, auto_detect, executable_path, is_default, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(engine.as_str())
    .bind(&name)
    .bind(&base_url)
    .bind(auto_detect)
    .bind(&executable_path)
    .bind(is_default)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(sqlx::query_as::<_, EngineConfig>("SELECT * FROM engine_configs WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await?)
}

pub async fn get_engine_configs(pool: &SqlitePool) -> Result<Vec<EngineConfig>, GatewayError> {
    Ok(sqlx::query_as::<_, EngineConfig>(
        "SELECT * FROM engine_configs ORDER BY is_default DESC, created_at DESC",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn delete_engine_config(pool: &SqlitePool, id: &str) -> Result<(), GatewayError> {
    let result = sqlx::query("DELETE FROM engine_configs WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(GatewayError::NotFound(format!("Engine config {} not found", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loose_engine_tags() {
        assert_eq!(EngineType::from_str_loose("ollama"), Some(EngineType::Ollama));
        assert_eq!(EngineType::from_str_loose("LM-Studio"), Some(EngineType::LmStudio));
        assert_eq!(EngineType::from_str_loose("llama.cpp"), Some(EngineType::LlamaCpp));
        assert_eq!(EngineType::from_str_loose("triton"), None);
    }

    #[test]
    fn adapter_dispatch_covers_all_types() {
        for t in EngineType::ALL {
            assert_eq!(adapter(t).engine_type(), t);
        }
    }

    #[test]
    fn unknown_engine_is_typed_not_found() {
        let err = adapter_for("triton").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn detect_reports_unreachable_without_error() {
        // Bind-and-drop to get a port nothing listens on.
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let base_url = format!("http://127.0.0.1:{}", port);
        let client = reqwest::Client::new();

        for t in EngineType::ALL {
            let status = adapter(t).detect(&client, &base_url).await;
            assert_eq!(status.engine_type, t);
            assert!(!status.running);
            assert!(status.version.is_none());
            let message = status.message.expect("absence is reported, not silent");
            assert!(message.contains(t.as_str()));
        }
    }

    #[tokio::test]
    async fn engine_config_crud() {
        let pool = crate::db::init_memory_pool().await.unwrap();

        let cfg = save_engine_config(
            &pool,
            "ollama",
            "Local Ollama".into(),
            "http://localhost:11434".into(),
            true,
            None,
            true,
        )
        .await
        .unwrap();

        let all = get_engine_configs(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, cfg.id);
        assert!(all[0].is_default);

        assert_eq!(
            resolve_base_url(&pool, EngineType::Ollama).await.unwrap(),
            "http://localhost:11434"
        );

        delete_engine_config(&pool, &cfg.id).await.unwrap();
        let err = delete_engine_config(&pool, &cfg.id).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn resolve_base_url_falls_back_to_builtin() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        assert_eq!(
            resolve_base_url(&pool, EngineType::Vllm).await.unwrap(),
            "http://localhost:8000"
        );
    }
}
