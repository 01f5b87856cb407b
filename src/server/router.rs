use super::proxy::{self, ProxyState};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Router served on both listeners of one instance. The OpenAI surface and
/// any engine-specific paths all flow through the same proxy handler, which
/// owns auth, path mapping and telemetry.
pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        // OpenAI-compatible surface
        .route("/v1/models", get(proxy::handle))
        .route("/v1/chat/completions", post(proxy::handle))
        // Engine-specific passthrough paths
        .fallback(proxy::handle)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
