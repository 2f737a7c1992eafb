use crate::models::MarketType;

/// Error taxonomy for everything that crosses a port boundary.
///
/// External failures (exchange, database, cache) are normalized into one of
/// these variants before a step ever sees them; inside a pipeline they only
/// surface as `StepResult::Fail` / `StepResult::Stop` messages.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Upstream API rejected or failed the call.
    #[error("api error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// No market-data provider is wired for this market type.
    #[error("no provider for market {0}")]
    NoProvider(MarketType),

    /// Anything that escaped the taxonomy above.
    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            status_code: None,
        }
    }

    /// Error surfaced when a cancellation token fires mid-operation.
    pub fn cancelled() -> Self {
        Self::api("operation cancelled")
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            other => Self::Unexpected(other.into()),
        }
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unexpected(err.into())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unexpected(err.into())
    }
}
