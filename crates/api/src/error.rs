//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use settlement::{ErrorKind, SettlementError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Settlement pipeline error, mapped by its kind.
    Settlement(SettlementError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Settlement(err) => settlement_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn settlement_error_to_response(err: SettlementError) -> (StatusCode, String) {
    let status = status_for(err.kind());
    if status.is_server_error() {
        tracing::error!(error = %err, kind = err.kind_label(), "request failed");
    } else {
        tracing::debug!(error = %err, kind = err.kind_label(), "request rejected");
    }
    (status, err.to_string())
}

/// Maps an error kind to its HTTP status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::ExternalProvider { .. } => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        ApiError::Settlement(err)
    }
}

/// Parses an identifier from a path or body field.
pub fn parse_id<T, E: std::fmt::Display>(
    field: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ApiError> {
    parse(raw).map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use domain::OrderError;

    #[test]
    fn test_kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(ErrorKind::ExternalProvider { transient: true }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_settlement_errors_map_by_kind() {
        let response =
            ApiError::from(SettlementError::Order(OrderError::NotOrderSeller)).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = ApiError::from(SettlementError::OrderNotFound(OrderId::new())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        let result = parse_id("order_id", "not-a-uuid", OrderId::parse);
        assert!(matches!(result, Err(ApiError::BadRequest(msg)) if msg.starts_with("Invalid order_id")));
    }
}
