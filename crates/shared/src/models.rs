//! Shared data models for background jobs tracked by the sync client.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Jobs ---

/// Lifecycle status of a server-side job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Waiting,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "waiting" => Some(JobStatus::Waiting),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "timeout" => Some(JobStatus::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Job-type specific auxiliary fields (e.g. a video title). Never validated.
pub type JobMetadata = serde_json::Map<String, serde_json::Value>;

/// The authoritative client-side view of one background job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobState {
    pub job_id: String,
    #[serde(default)]
    pub job_type: String,
    #[serde(default)]
    pub status: JobStatus,
    /// Fraction in `[0, 1]`.
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: JobMetadata,
    /// Only present when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only present when `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Bytes per second, download jobs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}

impl JobState {
    /// A freshly created pending job with no progress.
    pub fn new(job_id: impl Into<String>, job_type: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            current_step: None,
            processed_items: None,
            total_items: None,
            created_at,
            started_at: None,
            completed_at: None,
            metadata: JobMetadata::new(),
            error: None,
            result: None,
            download_speed: None,
            eta_seconds: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Current truth for every tracked job, keyed by `job_id`.
///
/// Unordered; consumers derive their own ordering (usually by `created_at`).
pub type JobMap = HashMap<String, JobState>;

// --- Events ---

/// Fields carried by a `job_started` event.
///
/// Everything except `job_id` is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobStarted {
    pub job_id: String,
    pub job_type: Option<String>,
    pub status: Option<JobStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub progress: Option<f64>,
    pub current_step: Option<String>,
    pub processed_items: Option<u64>,
    pub total_items: Option<u64>,
    pub download_speed: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub metadata: JobMetadata,
}

/// The subset of job fields a `job_progress` event may update.
///
/// `None` means the field was absent (or had the wrong type) and must be left untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobProgress {
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub current_step: Option<String>,
    pub processed_items: Option<u64>,
    pub total_items: Option<u64>,
    pub download_speed: Option<f64>,
    pub eta_seconds: Option<f64>,
}

/// Payload of any terminal event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobFinished {
    pub job_id: String,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// A decoded job event, ready for the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Bulk replay of all jobs matching the subscription.
    Snapshot(Vec<JobState>),
    Started {
        timestamp: DateTime<Utc>,
        job: JobStarted,
    },
    Progress {
        timestamp: DateTime<Utc>,
        update: JobProgress,
    },
    Finished {
        timestamp: DateTime<Utc>,
        status: JobStatus,
        outcome: JobFinished,
    },
}

impl JobEvent {
    /// The job this event targets, `None` for snapshots.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::Snapshot(_) => None,
            JobEvent::Started { job, .. } => Some(&job.job_id),
            JobEvent::Progress { update, .. } => Some(&update.job_id),
            JobEvent::Finished { outcome, .. } => Some(&outcome.job_id),
        }
    }
}

// --- Subscription ---

/// Which jobs a client wants to observe.
///
/// `None` on an axis means "no filter on this axis", not "nothing".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSubscription {
    pub job_types: Option<Vec<String>>,
    pub job_ids: Option<Vec<String>>,
    pub include_active_state: bool,
}

impl JobSubscription {
    /// Every active job, with an initial snapshot.
    pub fn all_active() -> Self {
        Self {
            job_types: None,
            job_ids: None,
            include_active_state: true,
        }
    }

    pub fn with_job_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_job_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }
}

impl Default for JobSubscription {
    fn default() -> Self {
        Self::all_active()
    }
}
