//! Shared error types for decoding the job-sync wire protocol.

use thiserror::Error;

/// Why an inbound frame could not be turned into a message.
///
/// Every variant is recoverable: the frame is dropped and the stream continues.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has neither `type` nor `event_type`")]
    MissingDiscriminator,

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("unknown event type `{0}`")]
    UnknownEventType(String),

    #[error("payload is missing a string `job_id`")]
    MissingJobId,

    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl CodecError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        CodecError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
