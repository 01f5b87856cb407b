use crate::db::models::MetricSample;
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    AvgResponseTime,
    RequestCount,
    ErrorRate,
    CpuUsage,
    MemoryUsage,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::AvgResponseTime => "avg_response_time",
            MetricType::RequestCount => "request_count",
            MetricType::ErrorRate => "error_rate",
            MetricType::CpuUsage => "cpu_usage",
            MetricType::MemoryUsage => "memory_usage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "avg_response_time" => Some(MetricType::AvgResponseTime),
            "request_count" => Some(MetricType::RequestCount),
            "error_rate" => Some(MetricType::ErrorRate),
            "cpu_usage" => Some(MetricType::CpuUsage),
            "memory_usage" => Some(MetricType::MemoryUsage),
            _ => None,
        }
    }
}

/// Summary window accepted by `get_performance_summary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryPeriod {
    Hour,
    Day,
    Week,
}

impl SummaryPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(SummaryPeriod::Hour),
            "24h" => Some(SummaryPeriod::Day),
            "7d" => Some(SummaryPeriod::Week),
            _ => None,
        }
    }

    fn duration(&self) -> chrono::Duration {
        match self {
            SummaryPeriod::Hour => chrono::Duration::hours(1),
            SummaryPeriod::Day => chrono::Duration::hours(24),
            SummaryPeriod::Week => chrono::Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub avg_response_time: f64,
    pub max_response_time: f64,
    pub min_response_time: f64,
    pub total_requests: f64,
    pub error_rate: f64,
    pub avg_cpu_usage: f64,
    pub avg_memory_usage: f64,
}

impl PerformanceSummary {
    fn zero() -> Self {
        Self {
            avg_response_time: 0.0,
            max_response_time: 0.0,
            min_response_time: 0.0,
            total_requests: 0.0,
            error_rate: 0.0,
            avg_cpu_usage: 0.0,
            avg_memory_usage: 0.0,
        }
    }
}

/// Append one timestamped sample. The metric type and api_id are validated
/// up front; `timestamp` lets callers backfill, otherwise the server clock
/// is used.
pub async fn record_performance_metric(
    pool: &SqlitePool,
    api_id: &str,
    metric_type: &str,
    value: f64,
    timestamp: Option<String>,
) -> Result<MetricSample, GatewayError> {
    let metric = MetricType::parse(metric_type)
        .ok_or_else(|| GatewayError::Validation(format!("Unknown metric type: {}", metric_type)))?;

    let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM api_instances WHERE id = ?")
        .bind(api_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(GatewayError::NotFound(format!("API {} not found", api_id)));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let ts = timestamp.unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    sqlx::query(
        "INSERT INTO performance_metrics (id, api_id, metric_type, value, timestamp)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(api_id)
    .bind(metric.as_str())
    .bind(value)
    .bind(&ts)
    .execute(pool)
    .await?;

    Ok(sqlx::query_as::<_, MetricSample>("SELECT * FROM performance_metrics WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await?)
}

/// Samples matching the filter, oldest first. An inverted date range
/// yields an empty set, not an error.
pub async fn get_performance_metrics(
    pool: &SqlitePool,
    api_id: &str,
    metric_type: Option<&str>,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<Vec<MetricSample>, GatewayError> {
    let mut clauses = vec!["api_id = ?".to_string()];
    let mut binds = vec![api_id.to_string()];

    if let Some(metric_type) = metric_type {
        let metric = MetricType::parse(metric_type).ok_or_else(|| {
            GatewayError::Validation(format!("Unknown metric type: {}", metric_type))
        })?;
        clauses.push("metric_type = ?".into());
        binds.push(metric.as_str().to_string());
    }
    if let Some(start) = start_date {
        clauses.push("timestamp >= ?".into());
        binds.push(start.to_string());
    }
    if let Some(end) = end_date {
        clauses.push("timestamp <= ?".into());
        binds.push(end.to_string());
    }

    let sql = format!(
        "SELECT * FROM performance_metrics WHERE {} ORDER BY timestamp ASC",
        clauses.join(" AND ")
    );
    let mut query = sqlx::query_as::<_, MetricSample>(&sql);
    for bind in &binds {
        query = query.bind(bind);
    }

    Ok(query.fetch_all(pool).await?)
}

/// Windowed aggregation for the dashboard. An API with no samples in the
/// window returns an all-zero summary, never null or NaN.
pub async fn get_performance_summary(
    pool: &SqlitePool,
    api_id: &str,
    period: &str,
) -> Result<PerformanceSummary, GatewayError> {
    let period = SummaryPeriod::parse(period)
        .ok_or_else(|| GatewayError::Validation(format!("Unknown period: {}", period)))?;
    let since = (chrono::Utc::now() - period.duration()).to_rfc3339();

    let row: SqliteRow = sqlx::query(
        "SELECT
            COALESCE(AVG(CASE WHEN metric_type = 'avg_response_time' THEN value END), 0.0) AS avg_rt,
            COALESCE(MAX(CASE WHEN metric_type = 'avg_response_time' THEN value END), 0.0) AS max_rt,
            COALESCE(MIN(CASE WHEN metric_type = 'avg_response_time' THEN value END), 0.0) AS min_rt,
            COALESCE(SUM(CASE WHEN metric_type = 'request_count' THEN value END), 0.0) AS total_req,
            COALESCE(AVG(CASE WHEN metric_type = 'error_rate' THEN value END), 0.0) AS err_rate,
            COALESCE(AVG(CASE WHEN metric_type = 'cpu_usage' THEN value END), 0.0) AS cpu,
            COALESCE(AVG(CASE WHEN metric_type = 'memory_usage' THEN value END), 0.0) AS mem
         FROM performance_metrics WHERE api_id = ? AND timestamp >= ?",
    )
    .bind(api_id)
    .bind(&since)
    .fetch_one(pool)
    .await?;

    let summary = PerformanceSummary {
        avg_response_time: row.get("avg_rt"),
        max_response_time: row.get("max_rt"),
        min_response_time: row.get("min_rt"),
        total_requests: row.get("total_req"),
        error_rate: row.get::<f64, _>("err_rate").clamp(0.0, 100.0),
        avg_cpu_usage: row.get("cpu"),
        avg_memory_usage: row.get("mem"),
    };

    // COALESCE already zeroes empty windows; keep the shape explicit for
    // the no-rows case on some SQLite builds.
    if summary.avg_response_time.is_nan() {
        return Ok(PerformanceSummary::zero());
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn seed(pool: &SqlitePool, id: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO api_instances (id, name, model_name, engine_type, port, enable_auth, status, created_at, updated_at)
             VALUES (?, 'Test', 'llama3:8b', 'ollama', 8080, 0, 'stopped', ?, ?)",
        )
        .bind(id)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rejects_unknown_type_and_api() {
        let pool = db::init_memory_pool().await.unwrap();
        seed(&pool, "a1").await;

        let err = record_performance_metric(&pool, "a1", "disk_usage", 1.0, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = record_performance_metric(&pool, "missing", "cpu_usage", 1.0, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn inverted_range_is_empty_not_error() {
        let pool = db::init_memory_pool().await.unwrap();
        seed(&pool, "a1").await;
        record_performance_metric(&pool, "a1", "cpu_usage", 42.0, None)
            .await
            .unwrap();

        let now = chrono::Utc::now();
        let samples = get_performance_metrics(
            &pool,
            "a1",
            None,
            Some(&(now + chrono::Duration::hours(1)).to_rfc3339()),
            Some(&(now - chrono::Duration::hours(1)).to_rfc3339()),
        )
        .await
        .unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn summary_aggregates_in_window() {
        let pool = db::init_memory_pool().await.unwrap();
        seed(&pool, "a1").await;

        for v in [10.0, 20.0, 30.0] {
            record_performance_metric(&pool, "a1", "avg_response_time", v, None)
                .await
                .unwrap();
        }
        record_performance_metric(&pool, "a1", "request_count", 5.0, None)
            .await
            .unwrap();
        record_performance_metric(&pool, "a1", "request_count", 7.0, None)
            .await
            .unwrap();
        record_performance_metric(&pool, "a1", "error_rate", 25.0, None)
            .await
            .unwrap();

        // Backfilled sample outside every window.
        let old = (chrono::Utc::now() - chrono::Duration::days(30)).to_rfc3339();
        record_performance_metric(&pool, "a1", "request_count", 100.0, Some(old))
            .await
            .unwrap();

        let summary = get_performance_summary(&pool, "a1", "1h").await.unwrap();
        assert_eq!(summary.avg_response_time, 20.0);
        assert_eq!(summary.max_response_time, 30.0);
        assert_eq!(summary.min_response_time, 10.0);
        assert_eq!(summary.total_requests, 12.0);
        assert_eq!(summary.error_rate, 25.0);
    }

    #[tokio::test]
    async fn summary_is_zero_for_empty_window_and_rejects_bad_period() {
        let pool = db::init_memory_pool().await.unwrap();
        seed(&pool, "a1").await;

        let summary = get_performance_summary(&pool, "a1", "24h").await.unwrap();
        assert_eq!(summary.avg_response_time, 0.0);
        assert_eq!(summary.total_requests, 0.0);
        assert_eq!(summary.error_rate, 0.0);

        // Nonexistent api behaves the same.
        let summary = get_performance_summary(&pool, "missing", "7d").await.unwrap();
        assert_eq!(summary.total_requests, 0.0);

        let err = get_performance_summary(&pool, "a1", "30d").await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
