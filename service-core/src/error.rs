use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(anyhow::Error),

    #[error("Payment over-applied: {0}")]
    OverApplied(anyhow::Error),

    #[error("Invoice mismatch: {0}")]
    InvoiceMismatch(anyhow::Error),

    #[error("Invalid state: {0}")]
    InvalidState(anyhow::Error),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    /// Only lock/version contention may be retried; nothing was committed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict(_))
    }

    /// Business-rule and input failures that are reported to the user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::ValidationError(_)
                | AppError::BadRequest(_)
                | AppError::NotFound(_)
                | AppError::InsufficientStock(_)
                | AppError::OverApplied(_)
                | AppError::InvoiceMismatch(_)
                | AppError::InvalidState(_)
        )
    }

    /// Stable, low-cardinality label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::InsufficientStock(_) => "insufficient_stock",
            AppError::OverApplied(_) => "over_applied",
            AppError::InvoiceMismatch(_) => "invoice_mismatch",
            AppError::InvalidState(_) => "invalid_state",
            AppError::ConcurrencyConflict(_) => "concurrency_conflict",
            AppError::InternalError(_) => "internal_error",
            AppError::DatabaseError(_) => "db_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// HTTP status the controller layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientStock(_)
            | AppError::OverApplied(_)
            | AppError::InvoiceMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidState(_) | AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
