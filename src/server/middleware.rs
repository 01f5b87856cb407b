use crate::error::GatewayError;
use axum::http::HeaderMap;

/// Extract the Bearer token from request headers.
/// Returns the raw token string (without "Bearer " prefix).
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, GatewayError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Auth("Missing Authorization header".into()))?;

    if !auth.starts_with("Bearer ") {
        return Err(GatewayError::Auth("Invalid Authorization format".into()));
    }

    Ok(auth[7..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc123");
    }

    #[test]
    fn rejects_missing_and_malformed() {
        let headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert!(extract_bearer_token(&headers).is_err());
    }
}
