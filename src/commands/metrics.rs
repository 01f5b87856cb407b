use crate::db::models::MetricSample;
use crate::error::GatewayError;
use crate::metrics::{self, PerformanceSummary};
use crate::AppState;

pub async fn record_performance_metric(
    state: &AppState,
    api_id: String,
    metric_type: String,
    value: f64,
    timestamp: Option<String>,
) -> Result<MetricSample, GatewayError> {
    metrics::record_performance_metric(&state.db, &api_id, &metric_type, value, timestamp).await
}

pub async fn get_performance_metrics(
    state: &AppState,
    api_id: String,
    metric_type: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
) -> Result<Vec<MetricSample>, GatewayError> {
    metrics::get_performance_metrics(
        &state.db,
        &api_id,
        metric_type.as_deref(),
        start_date.as_deref(),
        end_date.as_deref(),
    )
    .await
}

pub async fn get_performance_summary(
    state: &AppState,
    api_id: String,
    period: String,
) -> Result<PerformanceSummary, GatewayError> {
    metrics::get_performance_summary(&state.db, &api_id, &period).await
}
