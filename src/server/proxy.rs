use crate::credentials::CredentialManager;
use crate::db::models::ApiInstance;
use crate::engines;
use crate::error::GatewayError;
use crate::server::middleware;
use crate::telemetry::{LogEvent, MetricEvent, TelemetryHandle};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state for one instance's listener pair.
#[derive(Clone)]
pub struct ProxyState {
    pub db: SqlitePool,
    pub http_client: reqwest::Client,
    pub api_id: String,
    pub credentials: Arc<CredentialManager>,
    pub telemetry: TelemetryHandle,
    pub log_body_limit: usize,
    pub upstream_timeout: Duration,
}

const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "authorization",
];

/// Paths where the engine requires explicit model selection in the body.
const MODEL_BEARING_PATHS: &[&str] = &["/v1/chat/completions", "/v1/completions", "/v1/embeddings"];

fn truncated(body: &[u8], limit: usize) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(body);
    let mut end = text.len().min(limit);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

/// Overwrite the `model` field so callers talk to whatever alias they like
/// while the engine sees the configured model.
fn substitute_model(path: &str, body: &[u8], model_name: &str) -> Option<Vec<u8>> {
    if !MODEL_BEARING_PATHS.iter().any(|p| path == *p) {
        return None;
    }
    let mut value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let obj = value.as_object_mut()?;
    obj.insert("model".to_string(), json!(model_name));
    serde_json::to_vec(&value).ok()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": {
            "message": message,
            "type": if status == StatusCode::UNAUTHORIZED { "auth" } else { "upstream" },
        }
    });
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Single handler for every path on the instance's listener pair.
/// Auth, path mapping, forwarding and telemetry happen here; errors become
/// HTTP responses and log entries, never panics.
pub async fn handle(State(state): State<ProxyState>, req: Request) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let (parts, body) = req.into_parts();
    let headers = parts.headers;

    let body_bytes: Bytes = match axum::body::to_bytes(body, 32 * 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };
    let logged_body = truncated(&body_bytes, state.log_body_limit);

    // The instance row is re-read per request so auth toggles and key
    // rotation apply to in-flight listeners immediately.
    let instance = match sqlx::query_as::<_, ApiInstance>(
        "SELECT * FROM api_instances WHERE id = ?",
    )
    .bind(&state.api_id)
    .fetch_optional(&state.db)
    .await
    {
        Ok(Some(instance)) => instance,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "API instance no longer exists");
        }
        Err(e) => {
            log::error!("Instance lookup failed for {}: {}", state.api_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };

    if instance.enable_auth {
        if let Err(reason) = authenticate(&state, &headers).await {
            emit(
                &state,
                &method,
                &path,
                logged_body,
                Some(401),
                Some(start.elapsed().as_millis() as i64),
                Some(&reason),
            );
            return error_response(StatusCode::UNAUTHORIZED, &reason);
        }
    }

    match forward(&state, &instance, &method, &path, query.as_deref(), &headers, &body_bytes).await
    {
        Ok(response) => {
            let elapsed = start.elapsed().as_millis() as i64;
            emit(
                &state,
                &method,
                &path,
                logged_body,
                Some(response.status().as_u16() as i64),
                Some(elapsed),
                None,
            );
            response
        }
        Err(err) => {
            let elapsed = start.elapsed().as_millis() as i64;
            let (status, message) = match &err {
                GatewayError::HttpClient(e) if e.is_timeout() => (
                    StatusCode::GATEWAY_TIMEOUT,
                    format!("Engine timed out: {}", e),
                ),
                GatewayError::HttpClient(e) => {
                    (StatusCode::BAD_GATEWAY, format!("Engine unreachable: {}", e))
                }
                GatewayError::EngineUnavailable(m) => (StatusCode::BAD_GATEWAY, m.clone()),
                other => (StatusCode::BAD_GATEWAY, other.to_string()),
            };
            log::warn!("Proxy error for api {} {} {}: {}", state.api_id, method, path, message);
            emit(
                &state,
                &method,
                &path,
                logged_body,
                Some(status.as_u16() as i64),
                Some(elapsed),
                Some(&message),
            );
            error_response(status, &message)
        }
    }
}

async fn authenticate(state: &ProxyState, headers: &HeaderMap) -> Result<(), String> {
    let token = match middleware::extract_bearer_token(headers) {
        Ok(token) => token,
        Err(e) => return Err(e.to_string()),
    };

    match state.credentials.fetch(&state.db, &state.api_id).await {
        Ok(Some(secret)) if secret == token => Ok(()),
        Ok(_) => Err("Invalid API key".to_string()),
        Err(e) => {
            log::error!("Credential lookup failed for {}: {}", state.api_id, e);
            Err("Invalid API key".to_string())
        }
    }
}

async fn forward(
    state: &ProxyState,
    instance: &ApiInstance,
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body_bytes: &[u8],
) -> Result<Response, GatewayError> {
    let engine = engines::adapter_for(&instance.engine_type)?;

    // engine_config may pin a base_url; otherwise the newest default engine
    // config for the type wins, then the adapter's builtin.
    let base_url = instance
        .engine_config
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|v| v.get("base_url").and_then(|u| u.as_str()).map(String::from));
    let base_url = match base_url {
        Some(url) => url,
        None => {
            let engine_type = engines::EngineType::from_str_loose(&instance.engine_type)
                .ok_or_else(|| {
                    GatewayError::NotFound(format!("Unknown engine type: {}", instance.engine_type))
                })?;
            engines::resolve_base_url(&state.db, engine_type).await?
        }
    };

    let mapped = engine.map_path(path);
    let base = base_url.trim_end_matches('/');
    let target_url = match query {
        Some(q) => format!("{}{}?{}", base, mapped, q),
        None => format!("{}{}", base, mapped),
    };

    let reqwest_method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| GatewayError::Validation(format!("Unsupported method: {}", method)))?;

    let mut req_builder = state
        .http_client
        .request(reqwest_method, &target_url)
        .timeout(state.upstream_timeout);

    for (name, value) in headers.iter() {
        let name_lower = name.as_str().to_lowercase();
        if HOP_BY_HOP.contains(&name_lower.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            req_builder = req_builder.header(name.as_str(), v);
        }
    }

    if !body_bytes.is_empty() {
        let outgoing = substitute_model(path, body_bytes, &instance.model_name)
            .unwrap_or_else(|| body_bytes.to_vec());
        req_builder = req_builder.body(outgoing);
    }

    let upstream_resp = req_builder.send().await.map_err(GatewayError::HttpClient)?;

    let status = upstream_resp.status();
    let resp_headers = upstream_resp.headers().clone();

    let content_type = resp_headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let is_streaming = content_type.contains("text/event-stream");

    let mut resp = Response::builder().status(status);
    for (name, value) in resp_headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()) {
            continue;
        }
        if let (Ok(hn), Ok(hv)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            resp = resp.header(hn, hv);
        }
    }

    // Engine statuses and SSE bodies pass through untranslated.
    if is_streaming {
        let byte_stream = upstream_resp.bytes_stream();
        return Ok(resp
            .body(Body::from_stream(byte_stream))
            .map_err(|e| GatewayError::Internal(e.to_string()))?);
    }

    let resp_bytes = upstream_resp.bytes().await.unwrap_or_default();
    Ok(resp
        .body(Body::from(resp_bytes))
        .map_err(|e| GatewayError::Internal(e.to_string()))?)
}

#[allow(clippy::too_many_arguments)]
fn emit(
    state: &ProxyState,
    method: &str,
    path: &str,
    request_body: Option<String>,
    response_status: Option<i64>,
    response_time_ms: Option<i64>,
    error_message: Option<&str>,
) {
    let now = chrono::Utc::now().to_rfc3339();
    state.telemetry.record_log(LogEvent {
        api_id: state.api_id.clone(),
        method: method.to_string(),
        path: path.to_string(),
        request_body,
        response_status,
        response_time_ms,
        error_message: error_message.map(String::from),
        created_at: now.clone(),
    });
    if let Some(ms) = response_time_ms {
        state.telemetry.record_metric(MetricEvent {
            api_id: state.api_id.clone(),
            metric_type: "avg_response_time".to_string(),
            value: ms as f64,
            timestamp: now.clone(),
        });
    }
    state.telemetry.record_metric(MetricEvent {
        api_id: state.api_id.clone(),
        metric_type: "request_count".to_string(),
        value: 1.0,
        timestamp: now,
    });
}
