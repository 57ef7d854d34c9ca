//! Client-side state stores.

pub mod jobs;
pub mod snapshot;

pub use jobs::{active_jobs, apply, jobs_sorted, reduce, Applied, Ignored};
pub use snapshot::{ClientSnapshot, SnapshotPublisher};
