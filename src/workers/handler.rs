use crate::job_store::{JobFailure, JobKey};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

/// Context provided to handlers during execution.
#[derive(Clone, Debug)]
pub struct JobContext {
    /// Cancelled on shutdown or when the handler exceeds its timeout.
    pub cancellation_token: CancellationToken,

    pub key: JobKey,

    /// 1-based number of this attempt.
    pub attempt: u32,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, key: JobKey, attempt: u32) -> Self {
        Self {
            cancellation_token,
            key,
            attempt,
        }
    }

    /// Check if cancellation has been requested.
    ///
    /// Long-running handlers should check this between phases and return
    /// `HandlerError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Errors a handler can return. The variant decides whether the job retries.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Worth retrying: timeouts, connection errors, busy databases.
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help: bad payload, missing data.
    #[error("{0}")]
    Permanent(String),

    #[error("cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn transient(msg: impl std::fmt::Display) -> Self {
        HandlerError::Transient(msg.to_string())
    }

    pub fn permanent(msg: impl std::fmt::Display) -> Self {
        HandlerError::Permanent(msg.to_string())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }

    pub fn to_failure(&self) -> JobFailure {
        match self {
            HandlerError::Transient(msg) => JobFailure::transient(msg.clone()),
            HandlerError::Permanent(msg) => JobFailure::permanent(msg.clone()),
            HandlerError::Cancelled => JobFailure::transient("cancelled before completion"),
        }
    }
}

/// Infrastructure errors (store, I/O) are retried.
impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Transient(format!("{:#}", err))
    }
}

/// Decode a job payload. A payload that does not match is permanent.
pub fn parse_payload<T: DeserializeOwned>(payload: JsonValue) -> Result<T, HandlerError> {
    serde_json::from_value(payload)
        .map_err(|e| HandlerError::permanent(format!("malformed payload: {}", e)))
}

/// Executes jobs of one type.
///
/// Delivery is at-least-once: a handler may see the same job again after a
/// crash or timeout, so side effects must be safe to repeat.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt. `Ok(Some(value))` is stored as the job result.
    async fn handle(
        &self,
        ctx: &JobContext,
        payload: JsonValue,
    ) -> Result<Option<JsonValue>, HandlerError>;
}
