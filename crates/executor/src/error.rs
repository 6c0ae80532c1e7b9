use core_types::CoreError;
use database::DbError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Why the holding accountant refused a transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountingError {
    #[error("Quantity must be greater than zero, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("Price must be greater than zero, got {0}")]
    NonPositivePrice(Decimal),

    #[error("Not enough units held to sell. Requested: {requested}, Available: {available}")]
    InsufficientHolding {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Position arithmetic is out of range: {0}")]
    Overflow(String),

    #[error("Position arithmetic would lose precision: {0}")]
    Imprecise(String),
}

/// Every way a trade can fail. Only `ExecutionFailed` is worth retrying; all
/// other kinds are detected before anything is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Coin {0} not found")]
    CoinNotFound(i64),

    #[error("Insufficient balance. Required: {required}, Available: {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Insufficient holding. Requested: {requested}, Available: {available}")]
    InsufficientHolding {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Trade execution failed: {0}")]
    ExecutionFailed(String),
}

impl TradeError {
    /// True when the trade is known not to have happened and may be resubmitted unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradeError::ExecutionFailed(_))
    }
}

impl From<AccountingError> for TradeError {
    fn from(err: AccountingError) -> Self {
        match err {
            AccountingError::InsufficientHolding {
                requested,
                available,
            } => TradeError::InsufficientHolding {
                requested,
                available,
            },
            other => TradeError::InvalidOrder(other.to_string()),
        }
    }
}

impl From<CoreError> for TradeError {
    fn from(err: CoreError) -> Self {
        TradeError::InvalidOrder(err.to_string())
    }
}

impl From<DbError> for TradeError {
    fn from(err: DbError) -> Self {
        TradeError::ExecutionFailed(err.to_string())
    }
}
