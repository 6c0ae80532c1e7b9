use analytics::ValuationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use core_types::CoreError;
use database::DbError;
use executor::TradeError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Trade(#[from] TradeError),
    #[error(transparent)]
    Valuation(#[from] ValuationError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Invalid input: {0}")]
    Invalid(#[from] CoreError),
    #[error("Missing or malformed user identity: {0}")]
    Unauthorized(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// The HTTP status and the stable machine-readable code clients branch on.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Trade(err) => match err {
                TradeError::InvalidOrder(_) => (StatusCode::BAD_REQUEST, "invalid_order"),
                TradeError::UserNotFound(_) => (StatusCode::NOT_FOUND, "user_not_found"),
                TradeError::CoinNotFound(_) => (StatusCode::NOT_FOUND, "coin_not_found"),
                TradeError::InsufficientBalance { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_balance")
                }
                TradeError::InsufficientHolding { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_holding")
                }
                TradeError::ExecutionFailed(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "execution_failed")
                }
            },
            AppError::Valuation(ValuationError::UserNotFound(_)) => {
                (StatusCode::NOT_FOUND, "user_not_found")
            }
            AppError::Valuation(ValuationError::Storage(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            AppError::Database(DbError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            AppError::Database(DbError::NotFound) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Database(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
            AppError::Invalid(_) | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        }
    }
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Storage details stay in the logs.
        let message = if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, code, "Request failed on storage.");
            "The ledger is temporarily unavailable. The request was not applied and can be retried."
                .to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({ "error": message, "code": code }));
        (status, body).into_response()
    }
}
