use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Ingestion failed with: {0}")]
    Ingestion(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("caller {caller} is not the {role} for this record")]
    Unauthorized { caller: String, role: &'static str },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("gateway error (retryable: {retryable}): {message}")]
    Gateway { message: String, retryable: bool },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn gateway(message: impl Into<String>, retryable: bool) -> Self {
        Self::Gateway {
            message: message.into(),
            retryable,
        }
    }

    /// Whether re-attempting the failed call with the same reference is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway { retryable: true, .. })
    }
}
