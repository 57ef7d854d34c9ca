//! Job-sync wire protocol: message envelopes and the JSON codec.
//!
//! Inbound frames come in two shapes:
//!
//! - control messages, discriminated by `type`
//!   (`ping`, `auth_success`, `auth_error`, `subscribe_jobs_success`, `job_state`)
//! - domain events, discriminated by `event_type` and carrying `timestamp` + `payload`
//!   (`job_started`, `job_progress`, `job_completed`, `job_failed`, `job_cancelled`, `job_timeout`)
//!
//! Outbound frames are always control messages.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::models::{
    JobEvent, JobFinished, JobMetadata, JobProgress, JobStarted, JobState, JobStatus,
    JobSubscription,
};

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sent immediately after the transport opens.
    Auth { token: String },
    /// Keepalive reply to a server `ping`.
    Pong,
    /// `null` axes are serialized explicitly and mean "no filter".
    SubscribeJobs {
        job_types: Option<Vec<String>>,
        job_ids: Option<Vec<String>>,
        include_active_state: bool,
    },
}

impl ClientMessage {
    pub fn subscribe(subscription: &JobSubscription) -> Self {
        ClientMessage::SubscribeJobs {
            job_types: subscription.job_types.clone(),
            job_ids: subscription.job_ids.clone(),
            include_active_state: subscription.include_active_state,
        }
    }

    /// Wire name of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::Pong => "pong",
            ClientMessage::SubscribeJobs { .. } => "subscribe_jobs",
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Ping,
    AuthSuccess,
    AuthError { message: String },
    SubscribeJobsSuccess,
    /// Snapshots and deltas alike; see [`JobEvent`].
    Job(JobEvent),
}

impl ServerMessage {
    /// Decode a text frame, using the current time wherever the frame omits a timestamp.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        Self::decode_at(text, Utc::now())
    }

    /// Decode a text frame with an explicit fallback clock.
    pub fn decode_at(text: &str, now: DateTime<Utc>) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(obj) = value else {
            return Err(CodecError::NotAnObject);
        };

        if let Some(kind) = obj.get("type").and_then(Value::as_str) {
            return decode_control(kind, &obj, now);
        }
        if let Some(kind) = obj.get("event_type").and_then(Value::as_str) {
            return decode_event(kind, &obj, now).map(ServerMessage::Job);
        }
        Err(CodecError::MissingDiscriminator)
    }
}

const DEFAULT_AUTH_ERROR: &str = "Authentication failed";

fn decode_control(
    kind: &str,
    obj: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<ServerMessage, CodecError> {
    match kind {
        "ping" => Ok(ServerMessage::Ping),
        "auth_success" => Ok(ServerMessage::AuthSuccess),
        "auth_error" => {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(DEFAULT_AUTH_ERROR)
                .to_string();
            Ok(ServerMessage::AuthError { message })
        }
        "subscribe_jobs_success" => Ok(ServerMessage::SubscribeJobsSuccess),
        "job_state" => {
            let jobs = match obj.get("jobs") {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => return Ok(ServerMessage::Job(JobEvent::Snapshot(Vec::new()))),
                Some(_) => return Err(CodecError::invalid_field("jobs", "expected an array")),
            };
            // Entries without a usable job_id are skipped, not fatal to the snapshot.
            let jobs = jobs
                .iter()
                .filter_map(|item| decode_snapshot_job(item, now).ok())
                .collect();
            Ok(ServerMessage::Job(JobEvent::Snapshot(jobs)))
        }
        other => Err(CodecError::UnknownType(other.to_string())),
    }
}

/// Decode one job of a `job_state` snapshot.
///
/// Only a string `job_id` is required. Any other field that is missing, null
/// or of the wrong type falls back to its default, and an unusable
/// `created_at` becomes `now`.
pub fn decode_snapshot_job(item: &Value, now: DateTime<Utc>) -> Result<JobState, CodecError> {
    let Value::Object(fields) = item else {
        return Err(CodecError::NotAnObject);
    };
    let job_id = require_job_id(fields)?;
    let created_at = timestamp_field(fields, "created_at").unwrap_or(now);

    let mut job = JobState::new(
        job_id,
        string_field(fields, "job_type").unwrap_or_default(),
        created_at,
    );
    job.status = status_field(fields).unwrap_or_default();
    job.progress = number_field(fields, "progress")
        .map(clamp_progress)
        .unwrap_or(0.0);
    job.current_step = string_field(fields, "current_step");
    job.processed_items = count_field(fields, "processed_items");
    job.total_items = count_field(fields, "total_items");
    job.started_at = timestamp_field(fields, "started_at");
    job.completed_at = timestamp_field(fields, "completed_at");
    job.metadata = metadata_field(fields);
    job.error = string_field(fields, "error");
    job.result = fields.get("result").filter(|v| !v.is_null()).cloned();
    job.download_speed = number_field(fields, "download_speed");
    job.eta_seconds = number_field(fields, "eta_seconds");
    Ok(job)
}

fn decode_event(
    kind: &str,
    obj: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<JobEvent, CodecError> {
    let timestamp = match obj.get("timestamp") {
        Some(Value::String(s)) => parse_timestamp(s).unwrap_or_else(|| {
            tracing::debug!("Unparseable event timestamp {:?}; using the local clock", s);
            now
        }),
        _ => now,
    };
    let payload = match obj.get("payload") {
        Some(Value::Object(p)) => p,
        _ => return Err(CodecError::invalid_field("payload", "expected an object")),
    };
    let job_id = require_job_id(payload)?;

    let terminal = match kind {
        "job_started" => {
            return Ok(JobEvent::Started {
                timestamp,
                job: JobStarted {
                    job_id,
                    job_type: string_field(payload, "job_type"),
                    status: status_field(payload),
                    created_at: timestamp_field(payload, "created_at"),
                    progress: number_field(payload, "progress"),
                    current_step: string_field(payload, "current_step"),
                    processed_items: count_field(payload, "processed_items"),
                    total_items: count_field(payload, "total_items"),
                    download_speed: number_field(payload, "download_speed"),
                    eta_seconds: number_field(payload, "eta_seconds"),
                    metadata: metadata_field(payload),
                },
            })
        }
        "job_progress" => {
            return Ok(JobEvent::Progress {
                timestamp,
                update: JobProgress {
                    job_id,
                    status: status_field(payload),
                    progress: number_field(payload, "progress"),
                    current_step: string_field(payload, "current_step"),
                    processed_items: count_field(payload, "processed_items"),
                    total_items: count_field(payload, "total_items"),
                    download_speed: number_field(payload, "download_speed"),
                    eta_seconds: number_field(payload, "eta_seconds"),
                },
            })
        }
        "job_completed" => JobStatus::Completed,
        "job_failed" => JobStatus::Failed,
        "job_cancelled" => JobStatus::Cancelled,
        "job_timeout" => JobStatus::Timeout,
        other => return Err(CodecError::UnknownEventType(other.to_string())),
    };

    let error = match payload.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    let result = payload.get("result").filter(|v| !v.is_null()).cloned();

    Ok(JobEvent::Finished {
        timestamp,
        status: terminal,
        outcome: JobFinished {
            job_id,
            error,
            result,
        },
    })
}

fn require_job_id(fields: &Map<String, Value>) -> Result<String, CodecError> {
    match fields.get("job_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        _ => Err(CodecError::MissingJobId),
    }
}

/// RFC 3339, or a naive ISO 8601 date-time read as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

fn timestamp_field(fields: &Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    fields.get(name).and_then(Value::as_str).and_then(parse_timestamp)
}

fn metadata_field(fields: &Map<String, Value>) -> JobMetadata {
    match fields.get("metadata") {
        Some(Value::Object(m)) => m.clone(),
        _ => JobMetadata::new(),
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_string)
}

fn number_field(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    fields.get(name).and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn count_field(fields: &Map<String, Value>, name: &str) -> Option<u64> {
    let value = fields.get(name)?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
            .map(|n| n as u64)
    })
}

fn status_field(fields: &Map<String, Value>) -> Option<JobStatus> {
    fields
        .get("status")
        .and_then(Value::as_str)
        .and_then(JobStatus::parse)
}

/// Clamp a progress fraction into `[0, 1]`.
pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}
