pub mod completions;
pub mod export;
pub mod images;
pub mod job;
pub mod policy;
pub mod release;
pub mod services;
pub mod status;
pub mod sync;

use crate::client::{ApiClient, ClientError};
use caravel_schema::{Job, ReleaseStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_USER_ERROR: u8 = 2;
pub const EXIT_RELEASE_FAILED: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Poll a submitted job until it reaches terminal state.
pub fn wait_for_job(client: &ApiClient, id: &str) -> Result<Job, ClientError> {
    let pb = spinner(&format!("job {id} running..."));
    loop {
        let job = client.job(id)?;
        if job.status.is_terminal() {
            match job.error {
                None => spin_ok(&pb, &format!("job {id} {}", job.status)),
                Some(ref error) => spin_fail(&pb, &format!("job {id} {}: {error}", job.status)),
            }
            return Ok(job);
        }
        std::thread::sleep(Duration::from_millis(250));
    }
}

/// Render a release result as a table, one workload per row.
pub fn print_result(job: &Job) {
    let Some(result) = &job.result else { return };
    println!("{:<40} {:<8} RESULT", "WORKLOAD", "STATUS");
    for (id, verdict) in result {
        let detail = match verdict.status {
            ReleaseStatus::Success => verdict
                .updates
                .iter()
                .map(|u| format!("{}: {} -> {}", u.container, u.current, u.target))
                .collect::<Vec<_>>()
                .join(", "),
            _ => verdict.reason.clone(),
        };
        println!("{:<40} {:<8} {detail}", id.to_string(), verdict.status.to_string());
    }
    if let Some(revision) = &job.revision {
        println!("\ncommit: {revision}");
    }
}
