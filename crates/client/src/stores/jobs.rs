//! Job store: folds job events into the [`JobMap`].
//!
//! Everything here is pure. The connection manager owns the map and calls
//! [`apply`] once per decoded event; the returned [`Applied`] tells it whether
//! anything changed and why an event was dropped.

use chrono::{DateTime, Utc};
use jobsync_shared::{
    clamp_progress, JobEvent, JobFinished, JobMap, JobProgress, JobStarted, JobState, JobStatus,
};

/// Why an event left the map untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// Delta for a job we never saw created. A benign subscription race.
    UnknownJob,
    /// The job already reached a terminal status.
    AlreadyTerminal,
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The whole map was replaced by a snapshot of `count` jobs.
    Replaced { count: usize },
    /// A job was created, or replaced by a restart.
    Started,
    /// Progress fields were merged. `progress_clamped` is set when a lower
    /// progress value than the recorded one was refused.
    Updated { progress_clamped: bool },
    /// A job reached its terminal status.
    Finished(JobStatus),
    Ignored(Ignored),
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Ignored(_))
    }
}

/// Pure fold: `(map, event) -> map`.
pub fn reduce(mut jobs: JobMap, event: JobEvent) -> JobMap {
    apply(&mut jobs, event);
    jobs
}

/// Apply one event to the map in place.
pub fn apply(jobs: &mut JobMap, event: JobEvent) -> Applied {
    match event {
        JobEvent::Snapshot(snapshot) => {
            jobs.clear();
            jobs.extend(snapshot.into_iter().map(|job| (job.job_id.clone(), job)));
            Applied::Replaced { count: jobs.len() }
        }
        JobEvent::Started { timestamp, job } => apply_started(jobs, timestamp, job),
        JobEvent::Progress { update, .. } => apply_progress(jobs, update),
        JobEvent::Finished {
            timestamp,
            status,
            outcome,
        } => apply_finished(jobs, timestamp, status, outcome),
    }
}

fn apply_started(jobs: &mut JobMap, timestamp: DateTime<Utc>, started: JobStarted) -> Applied {
    if jobs.get(&started.job_id).is_some_and(JobState::is_terminal) {
        return Applied::Ignored(Ignored::AlreadyTerminal);
    }

    // A (re)start replaces whatever was recorded for this job.
    let mut job = JobState::new(
        started.job_id,
        started.job_type.unwrap_or_default(),
        started.created_at.unwrap_or(timestamp),
    );
    job.status = match started.status {
        Some(status) if !status.is_terminal() => status,
        _ => JobStatus::Running,
    };
    job.started_at = Some(timestamp);
    job.progress = started.progress.map(clamp_progress).unwrap_or(0.0);
    job.current_step = started.current_step;
    job.processed_items = started.processed_items;
    job.total_items = started.total_items;
    job.download_speed = started.download_speed;
    job.eta_seconds = started.eta_seconds;
    job.metadata = started.metadata;

    jobs.insert(job.job_id.clone(), job);
    Applied::Started
}

fn apply_progress(jobs: &mut JobMap, update: JobProgress) -> Applied {
    let Some(job) = jobs.get_mut(&update.job_id) else {
        return Applied::Ignored(Ignored::UnknownJob);
    };
    if job.is_terminal() {
        return Applied::Ignored(Ignored::AlreadyTerminal);
    }

    if let Some(status) = update.status.filter(|s| !s.is_terminal()) {
        job.status = status;
    }

    let mut progress_clamped = false;
    if let Some(progress) = update.progress.map(clamp_progress) {
        if progress < job.progress {
            progress_clamped = true;
        } else {
            job.progress = progress;
        }
    }

    if let Some(step) = update.current_step {
        job.current_step = Some(step);
    }
    if let Some(processed) = update.processed_items {
        job.processed_items = Some(processed);
    }
    if let Some(total) = update.total_items {
        job.total_items = Some(total);
    }
    if let Some(speed) = update.download_speed {
        job.download_speed = Some(speed);
    }
    if let Some(eta) = update.eta_seconds {
        job.eta_seconds = Some(eta);
    }

    Applied::Updated { progress_clamped }
}

fn apply_finished(
    jobs: &mut JobMap,
    timestamp: DateTime<Utc>,
    status: JobStatus,
    outcome: JobFinished,
) -> Applied {
    let Some(job) = jobs.get_mut(&outcome.job_id) else {
        return Applied::Ignored(Ignored::UnknownJob);
    };
    if job.is_terminal() {
        return Applied::Ignored(Ignored::AlreadyTerminal);
    }

    job.status = status;
    job.completed_at = Some(timestamp);
    // `error` only lives on failed jobs and `result` only on completed ones.
    match status {
        JobStatus::Completed => {
            job.result = outcome.result;
            job.error = None;
        }
        JobStatus::Failed => {
            job.error = outcome.error;
            job.result = None;
        }
        _ => {
            job.error = None;
            job.result = None;
        }
    }

    Applied::Finished(status)
}

/// Look up one job.
pub fn job<'a>(jobs: &'a JobMap, job_id: &str) -> Option<&'a JobState> {
    jobs.get(job_id)
}

/// All jobs, oldest first. Ties break on `job_id` so the order is stable.
pub fn jobs_sorted(jobs: &JobMap) -> Vec<&JobState> {
    let mut sorted: Vec<&JobState> = jobs.values().collect();
    sorted.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.job_id.cmp(&b.job_id))
    });
    sorted
}

/// Non-terminal jobs, oldest first.
pub fn active_jobs(jobs: &JobMap) -> Vec<&JobState> {
    jobs_sorted(jobs)
        .into_iter()
        .filter(|job| !job.is_terminal())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use jobsync_shared::JobMetadata;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn running_job(id: &str, job_type: &str, created: i64) -> JobState {
        let mut job = JobState::new(id, job_type, t(created));
        job.status = JobStatus::Running;
        job
    }

    fn started(id: &str, at: i64) -> JobEvent {
        let mut metadata = JobMetadata::new();
        metadata.insert("title".to_string(), json!("Big Buck Bunny"));
        JobEvent::Started {
            timestamp: t(at),
            job: JobStarted {
                job_id: id.to_string(),
                job_type: Some("download".to_string()),
                metadata,
                ..JobStarted::default()
            },
        }
    }

    fn progress(id: &str, value: f64) -> JobEvent {
        JobEvent::Progress {
            timestamp: t(0),
            update: JobProgress {
                job_id: id.to_string(),
                progress: Some(value),
                ..JobProgress::default()
            },
        }
    }

    fn finished(id: &str, status: JobStatus, at: i64) -> JobEvent {
        JobEvent::Finished {
            timestamp: t(at),
            status,
            outcome: JobFinished {
                job_id: id.to_string(),
                error: Some("boom".to_string()),
                result: Some(json!({"items": 12})),
            },
        }
    }

    #[test]
    fn snapshot_replaces_map() {
        let jobs = reduce(JobMap::new(), JobEvent::Snapshot(vec![running_job("old", "scan", 0)]));
        let jobs = reduce(
            jobs,
            JobEvent::Snapshot(vec![running_job("a", "import", 1), running_job("b", "scan", 2)]),
        );
        assert_eq!(jobs.len(), 2);
        assert!(jobs.contains_key("a"));
        assert!(jobs.contains_key("b"));
        assert!(!jobs.contains_key("old"));
    }

    #[test]
    fn snapshot_then_progress_touches_one_job() {
        let jobs = reduce(
            JobMap::new(),
            JobEvent::Snapshot(vec![running_job("a", "import", 1), running_job("b", "scan", 2)]),
        );
        let b_before = jobs["b"].clone();
        let jobs = reduce(jobs, progress("a", 0.5));

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs["a"].progress, 0.5);
        assert_eq!(jobs["b"], b_before);
    }

    #[test]
    fn started_defaults_timestamps() {
        let jobs = reduce(JobMap::new(), started("x", 7));
        let x = &jobs["x"];
        assert_eq!(x.status, JobStatus::Running);
        assert_eq!(x.created_at, t(7));
        assert_eq!(x.started_at, Some(t(7)));
        assert_eq!(x.job_type, "download");
        assert_eq!(x.metadata["title"], json!("Big Buck Bunny"));
    }

    #[test]
    fn started_keeps_payload_created_at() {
        let event = JobEvent::Started {
            timestamp: t(30),
            job: JobStarted {
                job_id: "x".to_string(),
                created_at: Some(t(10)),
                status: Some(JobStatus::Waiting),
                ..JobStarted::default()
            },
        };
        let jobs = reduce(JobMap::new(), event);
        assert_eq!(jobs["x"].created_at, t(10));
        assert_eq!(jobs["x"].started_at, Some(t(30)));
        assert_eq!(jobs["x"].status, JobStatus::Waiting);
    }

    #[test]
    fn progress_preserves_other_fields() {
        let mut jobs = reduce(JobMap::new(), started("x", 1));
        let before = jobs["x"].clone();

        for (i, value) in [0.1, 0.4, 0.9].into_iter().enumerate() {
            let outcome = apply(
                &mut jobs,
                JobEvent::Progress {
                    timestamp: t(10 + i as i64),
                    update: JobProgress {
                        job_id: "x".to_string(),
                        progress: Some(value),
                        current_step: Some(format!("step {i}")),
                        download_speed: Some(1024.0),
                        eta_seconds: Some(5.0),
                        ..JobProgress::default()
                    },
                },
            );
            assert_eq!(outcome, Applied::Updated { progress_clamped: false });
        }

        let x = &jobs["x"];
        assert_eq!(x.progress, 0.9);
        assert_eq!(x.current_step.as_deref(), Some("step 2"));
        assert_eq!(x.download_speed, Some(1024.0));
        assert_eq!(x.metadata, before.metadata);
        assert_eq!(x.created_at, before.created_at);
        assert_eq!(x.started_at, before.started_at);
        assert_eq!(x.job_type, before.job_type);
    }

    #[test]
    fn progress_for_unknown_job_is_dropped() {
        let mut jobs = reduce(JobMap::new(), started("x", 1));
        let outcome = apply(&mut jobs, progress("ghost", 0.3));
        assert_eq!(outcome, Applied::Ignored(Ignored::UnknownJob));
        assert_eq!(jobs.len(), 1);
        assert!(!jobs.contains_key("ghost"));
    }

    #[test]
    fn lower_progress_is_clamped_to_recorded_value() {
        let mut jobs = reduce(JobMap::new(), started("x", 1));
        apply(&mut jobs, progress("x", 0.6));

        let outcome = apply(
            &mut jobs,
            JobEvent::Progress {
                timestamp: t(2),
                update: JobProgress {
                    job_id: "x".to_string(),
                    progress: Some(0.4),
                    current_step: Some("Muxing".to_string()),
                    ..JobProgress::default()
                },
            },
        );

        assert_eq!(outcome, Applied::Updated { progress_clamped: true });
        assert_eq!(jobs["x"].progress, 0.6);
        // The rest of the event still applies.
        assert_eq!(jobs["x"].current_step.as_deref(), Some("Muxing"));
    }

    #[test]
    fn out_of_range_progress_is_bounded() {
        let jobs = reduce(reduce(JobMap::new(), started("x", 1)), progress("x", 3.0));
        assert_eq!(jobs["x"].progress, 1.0);
    }

    #[test]
    fn progress_cannot_smuggle_a_terminal_status() {
        let mut jobs = reduce(JobMap::new(), started("x", 1));
        apply(
            &mut jobs,
            JobEvent::Progress {
                timestamp: t(2),
                update: JobProgress {
                    job_id: "x".to_string(),
                    status: Some(JobStatus::Completed),
                    ..JobProgress::default()
                },
            },
        );
        assert_eq!(jobs["x"].status, JobStatus::Running);
    }

    #[test]
    fn started_then_completed() {
        let jobs = reduce(JobMap::new(), started("x", 1));
        let jobs = reduce(jobs, finished("x", JobStatus::Completed, 9));
        let x = &jobs["x"];
        assert_eq!(x.status, JobStatus::Completed);
        assert_eq!(x.completed_at, Some(t(9)));
        assert_eq!(x.result, Some(json!({"items": 12})));
        assert_eq!(x.error, None);
    }

    #[test]
    fn each_terminal_event_sets_its_status() {
        for status in [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Timeout,
        ] {
            let jobs = reduce(reduce(JobMap::new(), started("x", 1)), finished("x", status, 5));
            assert_eq!(jobs["x"].status, status);
            assert_eq!(jobs["x"].completed_at, Some(t(5)));
            assert_eq!(jobs["x"].error.is_some(), status == JobStatus::Failed);
            assert_eq!(jobs["x"].result.is_some(), status == JobStatus::Completed);
        }
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut jobs = reduce(JobMap::new(), started("x", 1));
        apply(&mut jobs, finished("x", JobStatus::Failed, 5));
        let settled = jobs["x"].clone();

        assert_eq!(
            apply(&mut jobs, progress("x", 0.9)),
            Applied::Ignored(Ignored::AlreadyTerminal)
        );
        assert_eq!(
            apply(&mut jobs, started("x", 6)),
            Applied::Ignored(Ignored::AlreadyTerminal)
        );
        assert_eq!(
            apply(&mut jobs, finished("x", JobStatus::Completed, 7)),
            Applied::Ignored(Ignored::AlreadyTerminal)
        );
        assert_eq!(jobs["x"], settled);
    }

    #[test]
    fn terminal_event_for_unknown_job_is_dropped() {
        let mut jobs = JobMap::new();
        assert_eq!(
            apply(&mut jobs, finished("ghost", JobStatus::Completed, 1)),
            Applied::Ignored(Ignored::UnknownJob)
        );
        assert!(jobs.is_empty());
    }

    #[test]
    fn restart_replaces_existing_entry() {
        let mut jobs = reduce(JobMap::new(), started("x", 1));
        apply(
            &mut jobs,
            JobEvent::Progress {
                timestamp: t(10),
                update: JobProgress {
                    job_id: "x".to_string(),
                    progress: Some(0.8),
                    processed_items: Some(8),
                    download_speed: Some(4096.0),
                    ..JobProgress::default()
                },
            },
        );

        let restart = JobEvent::Started {
            timestamp: t(30),
            job: JobStarted {
                job_id: "x".to_string(),
                job_type: Some("download".to_string()),
                current_step: Some("Retrying".to_string()),
                ..JobStarted::default()
            },
        };
        assert_eq!(apply(&mut jobs, restart), Applied::Started);

        let x = &jobs["x"];
        assert_eq!(x.created_at, t(30));
        assert_eq!(x.started_at, Some(t(30)));
        assert_eq!(x.progress, 0.0);
        assert_eq!(x.processed_items, None);
        assert_eq!(x.download_speed, None);
        assert!(x.metadata.is_empty());
        assert_eq!(x.current_step.as_deref(), Some("Retrying"));
    }

    #[test]
    fn started_takes_initial_progress_from_payload() {
        let event = JobEvent::Started {
            timestamp: t(5),
            job: JobStarted {
                job_id: "x".to_string(),
                progress: Some(0.25),
                processed_items: Some(3),
                total_items: Some(12),
                eta_seconds: Some(90.0),
                ..JobStarted::default()
            },
        };
        let jobs = reduce(JobMap::new(), event);
        let x = &jobs["x"];
        assert_eq!(x.progress, 0.25);
        assert_eq!(x.processed_items, Some(3));
        assert_eq!(x.total_items, Some(12));
        assert_eq!(x.eta_seconds, Some(90.0));
    }

    #[test]
    fn derived_views_order_by_creation() {
        let mut jobs = reduce(
            JobMap::new(),
            JobEvent::Snapshot(vec![running_job("c", "scan", 3), running_job("a", "scan", 1), running_job("b", "scan", 2)]),
        );
        apply(&mut jobs, finished("b", JobStatus::Cancelled, 4));

        let all: Vec<&str> = jobs_sorted(&jobs).iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(all, vec!["a", "b", "c"]);
        let active: Vec<&str> = active_jobs(&jobs).iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(active, vec!["a", "c"]);
        assert!(job(&jobs, "b").is_some_and(JobState::is_terminal));
        assert!(job(&jobs, "zzz").is_none());
    }
}
