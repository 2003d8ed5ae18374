use super::{json_pretty, EXIT_SUCCESS};
use crate::client::ApiClient;

pub fn run(client: &ApiClient, json: bool) -> Result<u8, String> {
    let status: serde_json::Value = client.get_json("/v6/status").map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&status)?);
        return Ok(EXIT_SUCCESS);
    }

    let connected = status["daemon"]["connected"].as_bool().unwrap_or(false);
    println!(
        "daemon:   {}",
        if connected {
            format!(
                "connected ({}, {})",
                status["daemon"]["protocol"].as_str().unwrap_or("?"),
                status["daemon"]["version"].as_str().unwrap_or("?")
            )
        } else {
            "disconnected".to_owned()
        }
    );
    if let Some(head) = status["head_revision"].as_str() {
        println!("head:     {head}");
    }
    Ok(EXIT_SUCCESS)
}
