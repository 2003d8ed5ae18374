use super::{json_pretty, EXIT_SUCCESS};
use crate::client::ApiClient;
use serde::Deserialize;

#[derive(Deserialize, serde::Serialize)]
struct Service {
    id: String,
    status: String,
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    policies: serde_json::Value,
}

#[derive(Deserialize, serde::Serialize)]
struct Container {
    name: String,
    image: String,
}

pub fn run(client: &ApiClient, json: bool) -> Result<u8, String> {
    let services: Vec<Service> = client.get_json("/v6/services").map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&services)?);
    } else if services.is_empty() {
        println!("no workloads defined");
    } else {
        println!("{:<40} {:<10} IMAGES", "WORKLOAD", "STATUS");
        for service in &services {
            let images = service
                .containers
                .iter()
                .map(|c| c.image.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            println!("{:<40} {:<10} {images}", service.id, service.status);
        }
    }
    Ok(EXIT_SUCCESS)
}
