use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::connection_manager::ManagerError;
use crate::pool::PoolError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    PoolExhausted(String),

    #[error("{0}")]
    BackendUnavailable(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ManagerError> for AppError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Pool(e @ PoolError::PoolExhausted { .. }) => {
                AppError::PoolExhausted(e.to_string())
            }
            ManagerError::Pool(e @ PoolError::BackendUnavailable { .. }) => {
                AppError::BackendUnavailable(e.to_string())
            }
            ManagerError::Pool(e @ PoolError::DoubleRelease { .. }) => {
                AppError::Internal(e.to_string())
            }
            ManagerError::NotConfigured(kind) => {
                AppError::NotConfigured(format!("{kind} backend is not configured"))
            }
            ManagerError::Config(msg) => AppError::Config(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::PoolExhausted(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "POOL_EXHAUSTED",
                msg.clone(),
                msg.clone(),
            ),
            AppError::BackendUnavailable(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Database temporarily unavailable".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE", client_msg, log_msg)
            }
            AppError::NotConfigured(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_CONFIGURED",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
        };

        // Always log the detailed error server-side
        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::debug!(code = %code, status = %status.as_u16(), message = %log_message, "API error");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, AppError::PoolExhausted(_)) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
