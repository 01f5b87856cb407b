use crate::db::models::ApiInstance;
use crate::error::GatewayError;
use crate::registry::{self, ApiDetails, CreateApiRequest, UpdateApiRequest};
use crate::AppState;

pub async fn create_api(
    state: &AppState,
    request: CreateApiRequest,
) -> Result<ApiDetails, GatewayError> {
    registry::create_api(state, request).await
}

pub async fn list_apis(state: &AppState) -> Result<Vec<ApiInstance>, GatewayError> {
    registry::list_apis(state).await
}

pub async fn get_api_details(state: &AppState, id: String) -> Result<ApiDetails, GatewayError> {
    registry::get_api_details(state, &id).await
}

pub async fn update_api(
    state: &AppState,
    id: String,
    request: UpdateApiRequest,
) -> Result<ApiDetails, GatewayError> {
    registry::update_api(state, &id, request).await
}

pub async fn start_api(state: &AppState, id: String) -> Result<ApiDetails, GatewayError> {
    registry::start_api(state, &id).await
}

pub async fn stop_api(state: &AppState, id: String) -> Result<ApiDetails, GatewayError> {
    registry::stop_api(state, &id).await
}

pub async fn delete_api(state: &AppState, id: String) -> Result<(), GatewayError> {
    registry::delete_api(state, &id).await
}

pub async fn get_api_key(state: &AppState, id: String) -> Result<Option<String>, GatewayError> {
    registry::get_api_key(state, &id).await
}

pub async fn regenerate_api_key(state: &AppState, id: String) -> Result<String, GatewayError> {
    registry::regenerate_api_key(state, &id).await
}
