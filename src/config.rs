use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Capacity of the telemetry queue; events beyond this are dropped.
    pub telemetry_buffer: usize,
    /// Interval between telemetry batch flushes, in milliseconds.
    pub telemetry_flush_ms: u64,
    /// How long `stop` waits for in-flight requests before force-closing.
    pub shutdown_grace_ms: u64,
    /// Bound on a single upstream engine call.
    pub upstream_timeout_ms: u64,
    /// Request bodies are truncated to this many bytes before logging.
    pub log_body_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telemetry_buffer: 1024,
            telemetry_flush_ms: 1000,
            shutdown_grace_ms: 5000,
            upstream_timeout_ms: 120_000,
            log_body_limit: 4096,
        }
    }
}

impl AppConfig {
    pub async fn load_from_db(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM app_config")
            .fetch_all(pool)
            .await?;

        let mut config = Self::default();

        for (key, value) in &rows {
            match key.as_str() {
                "telemetry_buffer" => {
                    if let Ok(v) = value.parse::<usize>() {
                        config.telemetry_buffer = v;
                    }
                }
                "telemetry_flush_ms" => {
                    if let Ok(v) = value.parse::<u64>() {
                        config.telemetry_flush_ms = v;
                    }
                }
                "shutdown_grace_ms" => {
                    if let Ok(v) = value.parse::<u64>() {
                        config.shutdown_grace_ms = v;
                    }
                }
                "upstream_timeout_ms" => {
                    if let Ok(v) = value.parse::<u64>() {
                        config.upstream_timeout_ms = v;
                    }
                }
                "log_body_limit" => {
                    if let Ok(v) = value.parse::<usize>() {
                        config.log_body_limit = v;
                    }
                }
                _ => {}
            }
        }

        Ok(config)
    }
}

/// Per-platform application data directory for the gateway.
/// Certificates and the credential key file live beneath it.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modelgate")
}
