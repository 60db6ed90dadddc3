use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::blockchain::tamper::TamperError;
use crate::blockchain::{LedgerError, MiningError, TransactionError};

/// Errors returned by the HTTP handlers, rendered as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::BadRequest(format!("Failed to add transaction: {}", err))
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        ApiError::BadRequest(format!("Failed to sign transaction: {}", err))
    }
}

impl From<MiningError> for ApiError {
    fn from(err: MiningError) -> Self {
        match err {
            MiningError::Cancelled { .. } => ApiError::Timeout(err.to_string()),
            MiningError::Stale { .. } => ApiError::Conflict(err.to_string()),
            MiningError::Unsealed { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TamperError> for ApiError {
    fn from(err: TamperError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<BlockingError> for ApiError {
    fn from(err: BlockingError) -> Self {
        ApiError::Internal(format!("Mining worker failed: {}", err))
    }
}
