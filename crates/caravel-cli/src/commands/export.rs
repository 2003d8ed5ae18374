use super::EXIT_SUCCESS;
use crate::client::ApiClient;
use std::io::Write;
use std::path::Path;

pub fn run(client: &ApiClient, output: Option<&Path>) -> Result<u8, String> {
    let dump = client.get_bytes("/v6/export").map_err(|e| e.to_string())?;
    match output {
        Some(path) => {
            std::fs::write(path, &dump).map_err(|e| e.to_string())?;
            println!("wrote {} bytes to {}", dump.len(), path.display());
        }
        None => {
            std::io::stdout()
                .write_all(&dump)
                .map_err(|e| e.to_string())?;
        }
    }
    Ok(EXIT_SUCCESS)
}
