use crate::db::models::RequestLog;
use crate::error::GatewayError;
use crate::logs::{self, ExportFormat, LogFilter, LogStatistics};
use crate::AppState;

use super::PaginatedResult;

pub async fn get_request_logs(
    state: &AppState,
    filter: LogFilter,
) -> Result<PaginatedResult<RequestLog>, GatewayError> {
    let items = logs::get_request_logs(&state.db, &filter).await?;

    let (total,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM request_logs WHERE api_id = ?")
            .bind(&filter.api_id)
            .fetch_one(&state.db)
            .await?;

    Ok(PaginatedResult { items, total })
}

pub async fn get_log_statistics(
    state: &AppState,
    api_id: String,
    start_date: Option<String>,
    end_date: Option<String>,
) -> Result<LogStatistics, GatewayError> {
    logs::get_log_statistics(&state.db, &api_id, start_date.as_deref(), end_date.as_deref()).await
}

pub async fn export_logs(
    state: &AppState,
    filter: LogFilter,
    format: ExportFormat,
) -> Result<String, GatewayError> {
    logs::export_logs(&state.db, &filter, format).await
}

pub async fn delete_logs(
    state: &AppState,
    api_id: String,
    before_date: String,
) -> Result<u64, GatewayError> {
    logs::delete_logs(&state.db, &api_id, &before_date).await
}
