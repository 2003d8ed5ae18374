use super::{json_pretty, EXIT_SUCCESS};
use crate::client::{encode, ApiClient};
use serde::Deserialize;

#[derive(Deserialize, serde::Serialize)]
struct ImageStatus {
    id: String,
    #[serde(default)]
    containers: Vec<ContainerImages>,
}

#[derive(Deserialize, serde::Serialize)]
struct ContainerImages {
    name: String,
    current: String,
    #[serde(default)]
    available: Vec<Available>,
}

#[derive(Deserialize, serde::Serialize)]
struct Available {
    image: String,
    created_at: String,
}

pub fn run(client: &ApiClient, service: &str, json: bool) -> Result<u8, String> {
    let query = encode(&[("service".to_owned(), service.to_owned())]);
    let statuses: Vec<ImageStatus> = client
        .get_json(&format!("/v6/images?{query}"))
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&statuses)?);
        return Ok(EXIT_SUCCESS);
    }

    for status in &statuses {
        println!("{}", status.id);
        for container in &status.containers {
            println!("  container {} (current: {})", container.name, container.current);
            for available in &container.available {
                let marker = if available.image == container.current {
                    "*"
                } else {
                    " "
                };
                println!("  {marker} {:<50} {}", available.image, available.created_at);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
