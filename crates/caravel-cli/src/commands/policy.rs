//! `caravel lock` / `caravel unlock`: policy changes submitted as jobs.

use super::{wait_for_job, EXIT_RELEASE_FAILED, EXIT_SUCCESS, EXIT_USER_ERROR};
use crate::client::{encode, ApiClient};
use caravel_schema::{JobStatus, ResourceId};

pub fn run(
    client: &ApiClient,
    controller: &str,
    lock: bool,
    user: &str,
    message: &str,
) -> Result<u8, String> {
    let id: ResourceId = match controller.parse() {
        Ok(id) => id,
        Err(e) => {
            eprintln!("invalid controller {controller:?}: {e}");
            return Ok(EXIT_USER_ERROR);
        }
    };

    let change = if lock {
        serde_json::json!({ "add": { "locked": "true" }, "remove": [] })
    } else {
        serde_json::json!({ "add": {}, "remove": ["locked"] })
    };
    let updates = serde_json::json!({ id.to_string(): change });

    let query = encode(&[
        ("user".to_owned(), user.to_owned()),
        ("message".to_owned(), message.to_owned()),
    ]);
    let job_id = client
        .patch_json(&format!("/v6/policies?{query}"), &updates)
        .map_err(|e| e.to_string())?;
    let job = wait_for_job(client, &job_id).map_err(|e| e.to_string())?;

    Ok(if job.status == JobStatus::Succeeded {
        EXIT_SUCCESS
    } else {
        EXIT_RELEASE_FAILED
    })
}
