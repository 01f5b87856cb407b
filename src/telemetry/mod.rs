use crate::config::AppConfig;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::mpsc;

/// One record emitted from the request path.
#[derive(Debug)]
pub enum TelemetryEvent {
    Log(LogEvent),
    Metric(MetricEvent),
}

#[derive(Debug)]
pub struct LogEvent {
    pub api_id: String,
    pub method: String,
    pub path: String,
    pub request_body: Option<String>,
    pub response_status: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug)]
pub struct MetricEvent {
    pub api_id: String,
    pub metric_type: String,
    pub value: f64,
    pub timestamp: String,
}

/// Fire-and-forget sender side of the telemetry pipeline. The queue is
/// bounded; when it is full, new events are dropped rather than blocking
/// a proxied request.
#[derive(Clone)]
pub struct TelemetryHandle {
    tx: mpsc::Sender<TelemetryEvent>,
}

impl TelemetryHandle {
    pub fn record_log(&self, event: LogEvent) {
        if self.tx.try_send(TelemetryEvent::Log(event)).is_err() {
            log::warn!("Telemetry queue full, dropping request log entry");
        }
    }

    pub fn record_metric(&self, event: MetricEvent) {
        if self.tx.try_send(TelemetryEvent::Metric(event)).is_err() {
            log::warn!("Telemetry queue full, dropping metric sample");
        }
    }
}

const BATCH_LIMIT: usize = 128;

/// Spawn the writer task draining the queue into SQLite. Events are
/// buffered and flushed on an interval or when the buffer fills; the final
/// buffer is flushed when the last handle drops.
pub fn spawn_writer(pool: SqlitePool, config: &AppConfig) -> TelemetryHandle {
    let (tx, mut rx) = mpsc::channel::<TelemetryEvent>(config.telemetry_buffer);
    let flush_every = Duration::from_millis(config.telemetry_flush_ms.max(10));

    tokio::spawn(async move {
        let mut buffer: Vec<TelemetryEvent> = Vec::with_capacity(BATCH_LIMIT);
        let mut ticker = tokio::time::interval(flush_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            buffer.push(event);
                            if buffer.len() >= BATCH_LIMIT {
                                flush(&pool, &mut buffer).await;
                            }
                        }
                        None => {
                            flush(&pool, &mut buffer).await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    flush(&pool, &mut buffer).await;
                }
            }
        }
    });

    TelemetryHandle { tx }
}

async fn flush(pool: &SqlitePool, buffer: &mut Vec<TelemetryEvent>) {
    if buffer.is_empty() {
        return;
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            log::error!("Telemetry flush failed to open transaction: {}", e);
            buffer.clear();
            return;
        }
    };

    for event in buffer.drain(..) {
        let result = match event {
            TelemetryEvent::Log(ev) => {
                sqlx::query(
                    "INSERT INTO request_logs (id, api_id, method, path, request_body, response_status, response_time_ms, error_message, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&ev.api_id)
                .bind(&ev.method)
                .bind(&ev.path)
                .bind(&ev.request_body)
                .bind(ev.response_status)
                .bind(ev.response_time_ms)
                .bind(&ev.error_message)
                .bind(&ev.created_at)
                .execute(&mut *tx)
                .await
            }
            TelemetryEvent::Metric(ev) => {
                sqlx::query(
                    "INSERT INTO performance_metrics (id, api_id, metric_type, value, timestamp)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&ev.api_id)
                .bind(&ev.metric_type)
                .bind(ev.value)
                .bind(&ev.timestamp)
                .execute(&mut *tx)
                .await
            }
        };

        // A cascade-deleted instance can race its own in-flight telemetry.
        if let Err(e) = result {
            log::warn!("Telemetry write skipped: {}", e);
        }
    }

    if let Err(e) = tx.commit().await {
        log::error!("Telemetry flush commit failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn seed_instance(pool: &SqlitePool, id: &str) {
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
    async fn writer_persists_logs_and_metrics() {
        let pool = db::init_memory_pool().await.unwrap();
        seed_instance(&pool, "a1").await;

        let config = AppConfig {
            telemetry_flush_ms: 20,
            ..AppConfig::default()
        };
        let handle = spawn_writer(pool.clone(), &config);

        let now = chrono::Utc::now().to_rfc3339();
        handle.record_log(LogEvent {
            api_id: "a1".into(),
            method: "POST".into(),
            path: "/v1/chat/completions".into(),
            request_body: Some("{}".into()),
            response_status: Some(200),
            response_time_ms: Some(12),
            error_message: None,
            created_at: now.clone(),
        });
        handle.record_metric(MetricEvent {
            api_id: "a1".into(),
            metric_type: "avg_response_time".into(),
            value: 12.0,
            timestamp: now,
        });

        // Wait past a flush interval.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let (logs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM request_logs")
                .fetch_one(&pool)
                .await
                .unwrap();
            let (metrics,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM performance_metrics")
                .fetch_one(&pool)
                .await
                .unwrap();
            if logs == 1 && metrics == 1 {
                return;
            }
        }
        panic!("telemetry writer never flushed");
    }
}
