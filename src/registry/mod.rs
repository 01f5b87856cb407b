use crate::db::models::ApiInstance;
use crate::error::GatewayError;
use crate::server::proxy::ProxyState;
use crate::{engines, server, AppState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const STATUS_STOPPED: &str = "stopped";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_ERROR: &str = "error";

/// Per-id mutexes so lifecycle mutations for one instance serialize while
/// different instances proceed in parallel.
#[derive(Default)]
pub struct ApiLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ApiLocks {
    pub async fn acquire(&self, api_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(api_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the entry for a deleted instance so the map tracks live ids.
    /// Holding the guard past eviction is fine; the Arc keeps it alive.
    async fn evict(&self, api_id: &str) {
        self.inner.lock().await.remove(api_id);
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiRequest {
    pub name: String,
    pub model_name: String,
    #[serde(default)]
    pub engine_type: Option<String>,
    #[serde(default)]
    pub engine_config: Option<serde_json::Value>,
    pub port: i64,
    #[serde(default)]
    pub enable_auth: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiRequest {
    pub name: Option<String>,
    pub model_name: Option<String>,
    pub engine_type: Option<String>,
    pub engine_config: Option<serde_json::Value>,
    pub port: Option<i64>,
    pub enable_auth: Option<bool>,
}

/// Creation/update result. `api_key` carries the plaintext secret exactly
/// once, when a credential was just created; it is never re-displayed.
#[derive(Debug, Clone, Serialize)]
pub struct ApiDetails {
    #[serde(flatten)]
    pub instance: ApiInstance,
    pub endpoint: String,
    pub tls_endpoint: String,
    pub api_key: Option<String>,
}

impl ApiDetails {
    fn new(instance: ApiInstance, api_key: Option<String>) -> Self {
        Self {
            endpoint: instance.endpoint(),
            tls_endpoint: instance.tls_endpoint(),
            instance,
            api_key,
        }
    }
}

fn validate_name(name: &str) -> Result<(), GatewayError> {
    let len = name.chars().count();
    if len == 0 || len > 100 {
        return Err(GatewayError::Validation(
            "Name must be between 1 and 100 characters".into(),
        ));
    }
    Ok(())
}

fn validate_port(port: i64) -> Result<(), GatewayError> {
    if !(1024..=65535).contains(&port) {
        return Err(GatewayError::Validation(
            "Port must be between 1024 and 65535".into(),
        ));
    }
    // The TLS listener binds port + 1.
    if port == 65535 {
        return Err(GatewayError::Validation(
            "Port 65535 leaves no room for the TLS listener".into(),
        ));
    }
    Ok(())
}

fn validate_model_name(model_name: &str) -> Result<(), GatewayError> {
    if model_name.trim().is_empty() {
        return Err(GatewayError::Validation("Model name must not be empty".into()));
    }
    Ok(())
}

fn validate_engine_type(tag: &str) -> Result<&'static str, GatewayError> {
    engines::EngineType::from_str_loose(tag)
        .map(|t| t.as_str())
        .ok_or_else(|| GatewayError::Validation(format!("Unknown engine type: {}", tag)))
}

async fn fetch(state: &AppState, api_id: &str) -> Result<ApiInstance, GatewayError> {
    sqlx::query_as::<_, ApiInstance>("SELECT * FROM api_instances WHERE id = ?")
        .bind(api_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("API {} not found", api_id)))
}

async fn set_status(state: &AppState, api_id: &str, status: &str) -> Result<(), GatewayError> {
    sqlx::query("UPDATE api_instances SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(api_id)
        .execute(&state.db)
        .await?;
    Ok(())
}

/// Validate and persist a new instance in `Stopped`. A credential is
/// created (and its plaintext returned once) iff `enable_auth`; the
/// certificate bundle stays lazy until the first start.
pub async fn create_api(
    state: &AppState,
    req: CreateApiRequest,
) -> Result<ApiDetails, GatewayError> {
    validate_name(&req.name)?;
    validate_port(req.port)?;
    validate_model_name(&req.model_name)?;
    let engine_type = validate_engine_type(req.engine_type.as_deref().unwrap_or("ollama"))?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let engine_config = req
        .engine_config
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO api_instances (id, name, model_name, engine_type, engine_config, port, enable_auth, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.name)
    .bind(&req.model_name)
    .bind(engine_type)
    .bind(&engine_config)
    .bind(req.port)
    .bind(req.enable_auth)
    .bind(STATUS_STOPPED)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let api_key = if req.enable_auth {
        match state.credentials.create(&state.db, &id).await {
            Ok(secret) => Some(secret),
            Err(e) => {
                // No half-created instances: roll the insert back.
                let _ = sqlx::query("DELETE FROM api_instances WHERE id = ?")
                    .bind(&id)
                    .execute(&state.db)
                    .await;
                return Err(e);
            }
        }
    } else {
        None
    };

    let instance = fetch(state, &id).await?;
    log::info!("Created api {} ({}) on port {}", instance.name, id, instance.port);
    Ok(ApiDetails::new(instance, api_key))
}

pub async fn list_apis(state: &AppState) -> Result<Vec<ApiInstance>, GatewayError> {
    Ok(sqlx::query_as::<_, ApiInstance>(
        "SELECT * FROM api_instances ORDER BY created_at DESC",
    )
    .fetch_all(&state.db)
    .await?)
}

pub async fn get_api_details(state: &AppState, api_id: &str) -> Result<ApiDetails, GatewayError> {
    let instance = fetch(state, api_id).await?;
    Ok(ApiDetails::new(instance, None))
}

/// Apply a partial update. Toggling `enable_auth` rotates the credential
/// existence; a port change while Running only updates the record, the
/// listener keeps its old binding until an explicit stop/start.
pub async fn update_api(
    state: &AppState,
    api_id: &str,
    req: UpdateApiRequest,
) -> Result<ApiDetails, GatewayError> {
    let _guard = state.locks.acquire(api_id).await;
    let current = fetch(state, api_id).await?;

    if let Some(name) = &req.name {
        validate_name(name)?;
    }
    if let Some(port) = req.port {
        validate_port(port)?;
    }
    if let Some(model_name) = &req.model_name {
        validate_model_name(model_name)?;
    }
    let engine_type = match &req.engine_type {
        Some(tag) => validate_engine_type(tag)?.to_string(),
        None => current.engine_type.clone(),
    };

    let engine_config = match &req.engine_config {
        Some(value) => Some(serde_json::to_string(value)?),
        None => current.engine_config.clone(),
    };

    let name = req.name.unwrap_or_else(|| current.name.clone());
    let model_name = req.model_name.unwrap_or_else(|| current.model_name.clone());
    let port = req.port.unwrap_or(current.port);
    let enable_auth = req.enable_auth.unwrap_or(current.enable_auth);
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE api_instances SET name = ?, model_name = ?, engine_type = ?, engine_config = ?, port = ?, enable_auth = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&name)
    .bind(&model_name)
    .bind(&engine_type)
    .bind(&engine_config)
    .bind(port)
    .bind(enable_auth)
    .bind(&now)
    .bind(api_id)
    .execute(&state.db)
    .await?;

    let api_key = if enable_auth && !current.enable_auth {
        Some(state.credentials.create(&state.db, api_id).await?)
    } else {
        if !enable_auth && current.enable_auth {
            state.credentials.remove(&state.db, api_id).await?;
        }
        None
    };

    let instance = fetch(state, api_id).await?;
    Ok(ApiDetails::new(instance, api_key))
}

/// Idempotent start: ensure TLS material, bind the listener pair and mark
/// Running. Certificate failure leaves the instance Stopped; a bind
/// failure marks it Error with any partially bound socket released.
pub async fn start_api(state: &AppState, api_id: &str) -> Result<ApiDetails, GatewayError> {
    let _guard = state.locks.acquire(api_id).await;
    let instance = fetch(state, api_id).await?;

    if state.listeners.contains(api_id).await {
        if instance.status != STATUS_RUNNING {
            set_status(state, api_id, STATUS_RUNNING).await?;
        }
        return get_api_details(state, api_id).await;
    }

    if instance.enable_auth {
        // Repair a missing credential rather than starting an instance
        // nobody can authenticate against.
        if state.credentials.fetch(&state.db, api_id).await?.is_none() {
            state.credentials.create(&state.db, api_id).await?;
        }
    }

    let bundle = state.certificates.ensure(api_id)?;

    let proxy_state = ProxyState {
        db: state.db.clone(),
        http_client: state.http_client.clone(),
        api_id: api_id.to_string(),
        credentials: Arc::clone(&state.credentials),
        telemetry: state.telemetry.clone(),
        log_body_limit: state.config.log_body_limit,
        upstream_timeout: Duration::from_millis(state.config.upstream_timeout_ms),
    };

    match server::spawn_listeners(&instance, &bundle, proxy_state).await {
        Ok(running) => {
            state.listeners.insert(api_id.to_string(), running).await;
            set_status(state, api_id, STATUS_RUNNING).await?;
            get_api_details(state, api_id).await
        }
        Err(e) => {
            set_status(state, api_id, STATUS_ERROR).await?;
            log::error!("Failed to start api {}: {}", api_id, e);
            Err(e)
        }
    }
}

/// Idempotent stop with a bounded graceful drain.
pub async fn stop_api(state: &AppState, api_id: &str) -> Result<ApiDetails, GatewayError> {
    let _guard = state.locks.acquire(api_id).await;
    fetch(state, api_id).await?;

    if let Some(running) = state.listeners.remove(api_id).await {
        running
            .shutdown(Duration::from_millis(state.config.shutdown_grace_ms))
            .await;
        log::info!("Stopped api {}", api_id);
    }

    set_status(state, api_id, STATUS_STOPPED).await?;
    get_api_details(state, api_id).await
}

/// Stop if needed, then remove the instance. The credential, logs and
/// metrics go with it via cascade; certificate files are deleted here.
pub async fn delete_api(state: &AppState, api_id: &str) -> Result<(), GatewayError> {
    let _guard = state.locks.acquire(api_id).await;
    fetch(state, api_id).await?;

    if let Some(running) = state.listeners.remove(api_id).await {
        running
            .shutdown(Duration::from_millis(state.config.shutdown_grace_ms))
            .await;
    }

    sqlx::query("DELETE FROM api_instances WHERE id = ?")
        .bind(api_id)
        .execute(&state.db)
        .await?;
    state.certificates.remove(api_id)?;
    state.locks.evict(api_id).await;

    log::info!("Deleted api {}", api_id);
    Ok(())
}

/// Current plaintext key, or None when auth is disabled.
pub async fn get_api_key(state: &AppState, api_id: &str) -> Result<Option<String>, GatewayError> {
    let instance = fetch(state, api_id).await?;
    if !instance.enable_auth {
        return Ok(None);
    }
    state.credentials.fetch(&state.db, api_id).await
}

/// Replace the secret atomically; the old key stops working on the next
/// proxied request. Fails when auth is disabled.
pub async fn regenerate_api_key(state: &AppState, api_id: &str) -> Result<String, GatewayError> {
    let _guard = state.locks.acquire(api_id).await;
    let instance = fetch(state, api_id).await?;
    if !instance.enable_auth {
        return Err(GatewayError::Auth(
            "Authentication is disabled for this API".into(),
        ));
    }
    state.credentials.rotate(&state.db, api_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let state = crate::init(dir.path()).await.unwrap();
        (dir, state)
    }

    fn valid_request() -> CreateApiRequest {
        CreateApiRequest {
            name: "Test API".into(),
            model_name: "llama3:8b".into(),
            engine_type: None,
            engine_config: None,
            port: 18080,
            enable_auth: true,
        }
    }

    #[tokio::test]
    async fn create_returns_key_once_and_details_match() {
        let (_dir, state) = test_state().await;

        let created = create_api(&state, valid_request()).await.unwrap();
        let key = created.api_key.expect("auth enabled yields a key");
        assert!(key.len() >= 32);
        assert_eq!(created.endpoint, "http://localhost:18080");
        assert_eq!(created.tls_endpoint, "https://localhost:18081");

        let details = get_api_details(&state, &created.instance.id).await.unwrap();
        assert_eq!(details.instance.name, "Test API");
        assert_eq!(details.instance.model_name, "llama3:8b");
        assert_eq!(details.instance.engine_type, "ollama");
        assert_eq!(details.instance.port, 18080);
        assert_eq!(details.instance.status, STATUS_STOPPED);
        assert!(details.api_key.is_none());
    }

    #[tokio::test]
    async fn create_without_auth_has_no_key() {
        let (_dir, state) = test_state().await;
        let created = create_api(
            &state,
            CreateApiRequest {
                enable_auth: false,
                ..valid_request()
            },
        )
        .await
        .unwrap();
        assert!(created.api_key.is_none());
        assert_eq!(
            get_api_key(&state, &created.instance.id).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (_dir, state) = test_state().await;

        let err = create_api(&state, CreateApiRequest { name: "".into(), ..valid_request() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = create_api(
            &state,
            CreateApiRequest { name: "x".repeat(101), ..valid_request() },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = create_api(&state, CreateApiRequest { port: 80, ..valid_request() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = create_api(&state, CreateApiRequest { port: 65535, ..valid_request() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = create_api(
            &state,
            CreateApiRequest { model_name: "  ".into(), ..valid_request() },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = create_api(
            &state,
            CreateApiRequest { engine_type: Some("triton".into()), ..valid_request() },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation");

        assert!(list_apis(&state).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn key_lifecycle() {
        let (_dir, state) = test_state().await;
        let created = create_api(&state, valid_request()).await.unwrap();
        let id = created.instance.id.clone();
        let first = created.api_key.unwrap();

        assert_eq!(get_api_key(&state, &id).await.unwrap().unwrap(), first);

        let second = regenerate_api_key(&state, &id).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(get_api_key(&state, &id).await.unwrap().unwrap(), second);

        // Toggle auth off: key becomes null, regeneration is a typed error.
        let updated = update_api(
            &state,
            &id,
            UpdateApiRequest { enable_auth: Some(false), ..Default::default() },
        )
        .await
        .unwrap();
        assert!(updated.api_key.is_none());
        assert_eq!(get_api_key(&state, &id).await.unwrap(), None);
        let err = regenerate_api_key(&state, &id).await.unwrap_err();
        assert_eq!(err.kind(), "auth");

        // Toggle back on: a fresh key is returned once.
        let updated = update_api(
            &state,
            &id,
            UpdateApiRequest { enable_auth: Some(true), ..Default::default() },
        )
        .await
        .unwrap();
        let third = updated.api_key.expect("fresh key on enable");
        assert_ne!(third, second);
        assert!(third.len() >= 32);
    }

    #[tokio::test]
    async fn update_partial_fields_and_port_while_stopped() {
        let (_dir, state) = test_state().await;
        let created = create_api(&state, valid_request()).await.unwrap();
        let id = created.instance.id.clone();

        let updated = update_api(
            &state,
            &id,
            UpdateApiRequest {
                name: Some("Renamed".into()),
                port: Some(18090),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.instance.name, "Renamed");
        assert_eq!(updated.instance.port, 18090);
        assert_eq!(updated.instance.model_name, "llama3:8b");
        // No auth change, no key in the response.
        assert!(updated.api_key.is_none());
    }

    #[tokio::test]
    async fn delete_removes_instance_and_lookups_fail() {
        let (_dir, state) = test_state().await;
        let created = create_api(&state, valid_request()).await.unwrap();
        let id = created.instance.id.clone();

        delete_api(&state, &id).await.unwrap();
        // The per-id lock goes with the instance.
        assert_eq!(state.locks.tracked().await, 0);
        assert!(list_apis(&state).await.unwrap().is_empty());
        let err = get_api_details(&state, &id).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let err = delete_api(&state, &id).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn unknown_id_is_typed_not_found() {
        let (_dir, state) = test_state().await;
        for result in [
            get_api_details(&state, "missing").await.err(),
            stop_api(&state, "missing").await.err(),
            start_api(&state, "missing").await.err(),
        ] {
            assert_eq!(result.unwrap().kind(), "not_found");
        }
    }
}
