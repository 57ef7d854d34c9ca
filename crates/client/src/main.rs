//! Jobsync Watch - tails the job map from the command line
//!
//! Reads its configuration from `JOBSYNC_*` environment variables and the
//! token from `JOBSYNC_TOKEN`, then prints every change until Ctrl-C.

use anyhow::Context;
use jobsync_client::stores::jobs_sorted;
use jobsync_client::{ClientConfig, ClientSnapshot, JobSyncClient};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobsync_client::logging::init("jobsync=debug");

    let config = ClientConfig::from_env();
    let token = std::env::var("JOBSYNC_TOKEN").ok().filter(|t| !t.is_empty());
    if token.is_none() {
        jobsync_client::log_warn!("JOBSYNC_TOKEN is not set; the client will stay idle");
    }

    let client = JobSyncClient::connect(config, token).context("failed to start job sync")?;
    jobsync_client::log_info!("Watching jobs via {}", client.endpoint());
    let mut changes = client.changes();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(snapshot) => print_snapshot(&snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    jobsync_client::log_warn!("Skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

fn print_snapshot(snapshot: &ClientSnapshot) {
    println!(
        "#{} [{}] {} job(s){}",
        snapshot.revision,
        snapshot.state,
        snapshot.jobs.len(),
        snapshot
            .last_error
            .as_ref()
            .map(|e| format!(" error: {e}"))
            .unwrap_or_default()
    );
    for job in jobs_sorted(&snapshot.jobs) {
        let items = match (job.processed_items, job.total_items) {
            (Some(done), Some(total)) => format!(" {done}/{total}"),
            _ => String::new(),
        };
        println!(
            "  {:<12} {:<10} {:>5.1}%{} {}",
            job.job_type,
            job.status,
            job.progress * 100.0,
            items,
            job.current_step.as_deref().unwrap_or("")
        );
    }
}
