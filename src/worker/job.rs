//! Job decoding and reply construction.

use serde_json::{Map, Value};

use crate::broker::Message;

/// Status field added to every reply.
pub const STATUS_FIELD: &str = "status";
pub const STATUS_SUCCESS: &str = "success";

/// A job taken off the work queue, ready to be answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub correlation_id: String,
    pub reply_to: String,
    pub payload: Map<String, Value>,
}

/// Reasons a delivery cannot be processed. All of them discard the message.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Message is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing reply queue")]
    MissingReplyTo,

    #[error("Missing correlation id")]
    MissingCorrelationId,
}

/// Decode a delivered message into a job.
pub fn parse_job(message: &Message) -> Result<Job, JobError> {
    let Value::Object(payload) = serde_json::from_slice(&message.payload)? else {
        return Err(JobError::NotAnObject);
    };

    let properties = &message.properties;
    let reply_to = properties
        .reply_to
        .clone()
        .filter(|q| !q.is_empty())
        .ok_or(JobError::MissingReplyTo)?;
    let correlation_id = properties
        .correlation_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(JobError::MissingCorrelationId)?;

    Ok(Job {
        correlation_id,
        reply_to,
        payload,
    })
}

/// Copy every input field and mark the job successful.
pub fn build_reply(mut payload: Map<String, Value>) -> Value {
    payload.insert(
        STATUS_FIELD.to_string(),
        Value::String(STATUS_SUCCESS.to_string()),
    );
    Value::Object(payload)
}
