use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiInstance {
    pub id: String,
    pub name: String,
    pub model_name: String,
    pub engine_type: String,
    pub engine_config: Option<String>,
    pub port: i64,
    pub enable_auth: bool,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ApiInstance {
    /// Plaintext endpoint advertised to callers; TLS is served on `port + 1`.
    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn tls_endpoint(&self) -> String {
        format!("https://localhost:{}", self.port + 1)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
    pub api_id: String,
    pub secret_enc: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EngineConfig {
    pub id: String,
    pub engine_type: String,
    pub name: String,
    pub base_url: String,
    pub auto_detect: bool,
    pub executable_path: Option<String>,
    pub is_default: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestLog {
    pub id: String,
    pub api_id: String,
    pub method: String,
    pub path: String,
    pub request_body: Option<String>,
    pub response_status: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetricSample {
    pub id: String,
    pub api_id: String,
    pub metric_type: String,
    pub value: f64,
    pub timestamp: String,
}
