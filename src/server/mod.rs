pub mod middleware;
pub mod proxy;
pub mod router;

use crate::certs::CertificateBundle;
use crate::db::models::ApiInstance;
use crate::error::GatewayError;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use proxy::ProxyState;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shutdown handles and tasks for one Running instance's listener pair.
pub struct RunningApi {
    handles: Vec<Handle>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl RunningApi {
    /// Graceful drain: in-flight requests get `grace` to finish, then the
    /// remaining connections are force-closed.
    pub async fn shutdown(self, grace: Duration) {
        for handle in &self.handles {
            handle.graceful_shutdown(Some(grace));
        }
        for task in self.tasks {
            if tokio::time::timeout(grace + Duration::from_secs(1), task)
                .await
                .is_err()
            {
                log::warn!("Listener task did not stop within the grace period");
            }
        }
    }
}

/// In-process registry of live listener pairs, keyed by api_id. Injected
/// through `AppState` rather than living in a global.
#[derive(Clone, Default)]
pub struct ListenerTable {
    inner: Arc<RwLock<HashMap<String, RunningApi>>>,
}

impl ListenerTable {
    pub async fn contains(&self, api_id: &str) -> bool {
        self.inner.read().await.contains_key(api_id)
    }

    pub async fn insert(&self, api_id: String, running: RunningApi) {
        self.inner.write().await.insert(api_id, running);
    }

    pub async fn remove(&self, api_id: &str) -> Option<RunningApi> {
        self.inner.write().await.remove(api_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

fn bind(port: u16) -> Result<TcpListener, GatewayError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).map_err(|e| match e.kind() {
        std::io::ErrorKind::AddrInUse => {
            GatewayError::Conflict(format!("Port {} is already in use", port))
        }
        std::io::ErrorKind::PermissionDenied => {
            GatewayError::Conflict(format!("Permission denied binding port {}", port))
        }
        _ => GatewayError::Internal(format!("Failed to bind port {}: {}", port, e)),
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| GatewayError::Internal(format!("Failed to configure listener: {}", e)))?;
    Ok(listener)
}

/// Bind `port` (plaintext) and `port + 1` (TLS) and serve the proxy router
/// on both. Returns once both listeners are accepting.
pub async fn spawn_listeners(
    instance: &ApiInstance,
    bundle: &CertificateBundle,
    state: ProxyState,
) -> Result<RunningApi, GatewayError> {
    let port = instance.port as u16;

    // Bind both up front so a failure on either leaves nothing serving;
    // the first socket is released when the early return drops it.
    let http_listener = bind(port)?;
    let https_listener = bind(port + 1)?;

    let tls_config = RustlsConfig::from_pem(
        bundle.certificate.clone().into_bytes(),
        bundle.private_key.clone().into_bytes(),
    )
    .await
    .map_err(|e| GatewayError::Certificate(format!("Invalid TLS material: {}", e)))?;

    let app = router::create_router(state);
    let api_id = instance.id.clone();

    let http_handle = Handle::new();
    let https_handle = Handle::new();

    let http_task = {
        let handle = http_handle.clone();
        let app = app.clone();
        let api_id = api_id.clone();
        tokio::spawn(async move {
            if let Err(e) = axum_server::from_tcp(http_listener)
                .handle(handle)
                .serve(app.into_make_service())
                .await
            {
                log::error!("HTTP listener for api {} exited: {}", api_id, e);
            }
        })
    };

    let https_task = {
        let handle = https_handle.clone();
        let api_id = api_id.clone();
        tokio::spawn(async move {
            if let Err(e) = axum_server::from_tcp_rustls(https_listener, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
            {
                log::error!("HTTPS listener for api {} exited: {}", api_id, e);
            }
        })
    };

    let running = RunningApi {
        handles: vec![http_handle.clone(), https_handle.clone()],
        tasks: vec![http_task, https_task],
    };

    // One-shot readiness: wait until both servers report their bound addr
    // instead of sleeping and polling.
    let ready = tokio::time::timeout(READY_TIMEOUT, async {
        let (http, https) =
            futures_util::future::join(http_handle.listening(), https_handle.listening()).await;
        http.is_some() && https.is_some()
    })
    .await;

    match ready {
        Ok(true) => {
            log::info!(
                "api {} listening on http://localhost:{} and https://localhost:{}",
                api_id,
                port,
                port + 1
            );
            Ok(running)
        }
        _ => {
            running.shutdown(Duration::from_millis(100)).await;
            Err(GatewayError::Internal(format!(
                "Listeners for api {} failed to start",
                api_id
            )))
        }
    }
}
