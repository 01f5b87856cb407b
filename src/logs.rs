use crate::db::models::RequestLog;
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub api_id: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Inclusive RFC 3339 bounds.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status_codes: Option<Vec<i64>>,
    /// Substring match on the request path.
    pub path_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogStatistics {
    pub total_requests: i64,
    pub avg_response_time_ms: f64,
    pub error_rate: f64,
    pub status_code_distribution: Vec<StatusCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Direct append, for callers outside the proxy's telemetry path.
#[allow(clippy::too_many_arguments)]
pub async fn save_request_log(
    pool: &SqlitePool,
    api_id: &str,
    method: &str,
    path: &str,
    request_body: Option<&str>,
    response_status: Option<i64>,
    response_time_ms: Option<i64>,
    error_message: Option<&str>,
) -> Result<RequestLog, GatewayError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO request_logs (id, api_id, method, path, request_body, response_status, response_time_ms, error_message, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(api_id)
    .bind(method)
    .bind(path)
    .bind(request_body)
    .bind(response_status)
    .bind(response_time_ms)
    .bind(error_message)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(sqlx::query_as::<_, RequestLog>("SELECT * FROM request_logs WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await?)
}

fn build_where(filter: &LogFilter) -> (String, Vec<String>) {
    let mut clauses = vec!["api_id = ?".to_string()];
    let mut binds = vec![filter.api_id.clone()];

    if let Some(start) = &filter.start_date {
        clauses.push("created_at >= ?".into());
        binds.push(start.clone());
    }
    if let Some(end) = &filter.end_date {
        clauses.push("created_at <= ?".into());
        binds.push(end.clone());
    }
    if let Some(codes) = &filter.status_codes {
        if !codes.is_empty() {
            let placeholders = vec!["?"; codes.len()].join(", ");
            clauses.push(format!("response_status IN ({})", placeholders));
            for code in codes {
                binds.push(code.to_string());
            }
        }
    }
    if let Some(path) = &filter.path_filter {
        clauses.push("path LIKE ? ESCAPE '\\'".into());
        binds.push(format!("%{}%", escape_like(path)));
    }

    (clauses.join(" AND "), binds)
}

fn escape_like(s: &str) -> String {
    s.replace('%', "\\%").replace('_', "\\_")
}

/// Filtered query, newest first. An unknown api_id yields an empty list.
pub async fn get_request_logs(
    pool: &SqlitePool,
    filter: &LogFilter,
) -> Result<Vec<RequestLog>, GatewayError> {
    let (where_sql, binds) = build_where(filter);
    let sql = format!(
        "SELECT * FROM request_logs WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        where_sql
    );

    let mut query = sqlx::query_as::<_, RequestLog>(&sql);
    for bind in &binds {
        query = query.bind(bind);
    }
    query = query
        .bind(filter.limit.unwrap_or(100))
        .bind(filter.offset.unwrap_or(0));

    Ok(query.fetch_all(pool).await?)
}

/// Aggregates over the matching window; all-zero for an API with no logs.
pub async fn get_log_statistics(
    pool: &SqlitePool,
    api_id: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<LogStatistics, GatewayError> {
    let filter = LogFilter {
        api_id: api_id.to_string(),
        start_date: start_date.map(String::from),
        end_date: end_date.map(String::from),
        ..LogFilter::default()
    };
    let (where_sql, binds) = build_where(&filter);

    let sql = format!(
        "SELECT COUNT(*) as total,
                COALESCE(AVG(response_time_ms), 0.0) as avg_ms,
                COALESCE(SUM(CASE WHEN response_status >= 400 THEN 1 ELSE 0 END), 0) as errors
         FROM request_logs WHERE {}",
        where_sql
    );
    let mut query = sqlx::query(&sql);
    for bind in &binds {
        query = query.bind(bind);
    }
    let row: SqliteRow = query.fetch_one(pool).await?;
    let total: i64 = row.get("total");
    let avg_ms: f64 = row.get("avg_ms");
    let errors: i64 = row.get("errors");

    let dist_sql = format!(
        "SELECT response_status as status, COUNT(*) as count FROM request_logs
         WHERE {} AND response_status IS NOT NULL
         GROUP BY response_status ORDER BY response_status",
        where_sql
    );
    let mut dist_query = sqlx::query(&dist_sql);
    for bind in &binds {
        dist_query = dist_query.bind(bind);
    }
    let status_code_distribution = dist_query
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row: SqliteRow| StatusCount {
            status: row.get("status"),
            count: row.get("count"),
        })
        .collect();

    let error_rate = if total > 0 {
        ((errors as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Ok(LogStatistics {
        total_requests: total,
        avg_response_time_ms: avg_ms,
        error_rate,
        status_code_distribution,
    })
}

/// Render the filtered set as CSV or JSON.
pub async fn export_logs(
    pool: &SqlitePool,
    filter: &LogFilter,
    format: ExportFormat,
) -> Result<String, GatewayError> {
    let logs = get_request_logs(pool, filter).await?;

    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&logs)?),
        ExportFormat::Csv => {
            let mut out = String::from(
                "id,api_id,method,path,response_status,response_time_ms,error_message,created_at\n",
            );
            for log in &logs {
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{}\n",
                    csv_field(&log.id),
                    csv_field(&log.api_id),
                    csv_field(&log.method),
                    csv_field(&log.path),
                    log.response_status.map(|s| s.to_string()).unwrap_or_default(),
                    log.response_time_ms.map(|s| s.to_string()).unwrap_or_default(),
                    csv_field(log.error_message.as_deref().unwrap_or("")),
                    csv_field(&log.created_at),
                ));
            }
            Ok(out)
        }
    }
}

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Irreversible bulk delete of entries older than `before_date`.
/// Returns the number of rows removed.
pub async fn delete_logs(
    pool: &SqlitePool,
    api_id: &str,
    before_date: &str,
) -> Result<u64, GatewayError> {
    let result = sqlx::query("DELETE FROM request_logs WHERE api_id = ? AND created_at < ?")
        .bind(api_id)
        .bind(before_date)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
