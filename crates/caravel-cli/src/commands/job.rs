use super::{json_pretty, print_result, EXIT_FAILURE, EXIT_SUCCESS};
use crate::client::ApiClient;
use caravel_schema::JobStatus;

pub fn run(client: &ApiClient, id: &str, json: bool) -> Result<u8, String> {
    let job = client.job(id).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&job)?);
    } else {
        println!("job {id}: {}", job.status);
        if let Some(error) = &job.error {
            println!("error: {error}");
        }
        print_result(&job);
    }
    Ok(if job.status == JobStatus::Failed {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}
