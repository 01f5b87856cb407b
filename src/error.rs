use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable kind for the command boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Auth(_) => "auth",
            GatewayError::EngineUnavailable(_) => "engine_unavailable",
            GatewayError::Certificate(_) => "certificate",
            GatewayError::Database(_) => "persistence",
            GatewayError::HttpClient(_) => "upstream",
            GatewayError::Json(_) => "validation",
            GatewayError::Internal(_) => "internal",
        }
    }
}

impl Serialize for GatewayError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("GatewayError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GatewayError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            GatewayError::Auth(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            GatewayError::EngineUnavailable(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            GatewayError::Certificate(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            GatewayError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".into())
            }
            GatewayError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            GatewayError::Json(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.kind(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(GatewayError::Validation("x".into()).kind(), "validation");
        assert_eq!(GatewayError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(GatewayError::Auth("x".into()).kind(), "auth");
    }

    #[test]
    fn serializes_kind_and_message() {
        let v = serde_json::to_value(GatewayError::Conflict("port 8080 in use".into())).unwrap();
        assert_eq!(v["kind"], "conflict");
        assert_eq!(v["message"], "Conflict: port 8080 in use");
    }
}
