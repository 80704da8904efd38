use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::entitlements::EngineError;
use crate::payments::PaymentError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("payment required: {0}")]
    PaymentRequired(String),
    #[error("{0}")]
    Message(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidPrincipalData(reason) => AppError::BadRequest(reason),
            err @ EngineError::InsufficientCredit { .. } => {
                AppError::PaymentRequired(err.to_string())
            }
            EngineError::Forbidden => AppError::Forbidden,
            EngineError::Store(err) => AppError::Store(err),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::MissingSignature | PaymentError::InvalidSignature => {
                AppError::Unauthorized
            }
            PaymentError::MalformedPayload(reason) => AppError::BadRequest(reason),
            PaymentError::Json(err) => AppError::BadRequest(err.to_string()),
            PaymentError::Store(err) => AppError::Store(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::Store(_) | AppError::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
