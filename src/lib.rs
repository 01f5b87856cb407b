pub mod certs;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod db;
pub mod engines;
pub mod error;
pub mod logs;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod telemetry;

use crate::certs::CertificateManager;
use crate::config::AppConfig;
use crate::credentials::CredentialManager;
use crate::error::GatewayError;
use crate::registry::ApiLocks;
use crate::server::ListenerTable;
use crate::telemetry::TelemetryHandle;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

/// Everything the command boundary operates on. Built once at startup and
/// shared by reference; listener tasks take clones of the pieces they need.
pub struct AppState {
    pub db: SqlitePool,
    pub config: AppConfig,
    pub http_client: reqwest::Client,
    pub certificates: CertificateManager,
    pub credentials: Arc<CredentialManager>,
    pub listeners: ListenerTable,
    pub telemetry: TelemetryHandle,
    pub(crate) locks: ApiLocks,
}

/// Initialize the gateway under `data_dir`: open (and migrate) the SQLite
/// store, load config, set up certificate/credential material and start
/// the telemetry writer.
pub async fn init(data_dir: &Path) -> Result<AppState, GatewayError> {
    let pool = db::init_pool(&data_dir.join("modelgate.db")).await?;
    let config = AppConfig::load_from_db(&pool).await?;

    let certificates = CertificateManager::new(data_dir);
    let credentials = Arc::new(CredentialManager::init(data_dir)?);
    let telemetry = telemetry::spawn_writer(pool.clone(), &config);

    Ok(AppState {
        db: pool,
        config,
        http_client: reqwest::Client::new(),
        certificates,
        credentials,
        listeners: ListenerTable::default(),
        telemetry,
        locks: ApiLocks::default(),
    })
}

/// Opt-in env_logger setup for binaries and tests embedding the gateway.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
