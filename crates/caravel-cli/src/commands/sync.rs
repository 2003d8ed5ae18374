use super::{EXIT_SUCCESS, EXIT_FAILURE};
use crate::client::ApiClient;

pub fn run(client: &ApiClient) -> Result<u8, String> {
    match client.post_empty("/v6/sync") {
        Ok(()) => {
            println!("sync requested");
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(EXIT_FAILURE)
        }
    }
}
