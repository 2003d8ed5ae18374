//! `caravel release`: marshal command-line flags into a release spec and
//! submit it.

use super::{print_result, wait_for_job, EXIT_RELEASE_FAILED, EXIT_SUCCESS, EXIT_USER_ERROR};
use crate::client::{encode, ApiClient};
use caravel_schema::{
    ImageSpec, JobStatus, ReleaseStatus, ResourceId, ResourceSpec, IMAGE_SPEC_LATEST,
    RESOURCE_SPEC_ALL,
};
use clap::Args;

#[derive(Debug, Args)]
pub struct ReleaseArgs {
    /// Release to every workload.
    #[arg(long)]
    pub all: bool,

    /// Release to specific workloads (e.g. `deployment/helloworld`).
    #[arg(long = "controller")]
    pub controllers: Vec<String>,

    /// Update each container to the newest eligible image.
    #[arg(long)]
    pub update_all_images: bool,

    /// Update containers to this exact image (e.g. `alpine:3.19`).
    #[arg(long)]
    pub update_image: Option<String>,

    /// Compute the release without applying it.
    #[arg(long)]
    pub dry_run: bool,

    /// Workloads to leave alone (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Audit: who is asking for this release.
    #[arg(long, default_value = "")]
    pub user: String,

    /// Audit: why.
    #[arg(short, long, default_value = "")]
    pub message: String,
}

/// Convert the flags into the API's form values. Pure, so the conversion
/// rules are testable without a server.
pub fn build_form(args: &ReleaseArgs) -> Result<Vec<(String, String)>, String> {
    let mut form: Vec<(String, String)> = Vec::new();

    match (args.all, args.controllers.is_empty()) {
        (true, true) => form.push(("service".to_owned(), RESOURCE_SPEC_ALL.to_owned())),
        (false, false) => {
            for controller in &args.controllers {
                let spec: ResourceSpec = controller
                    .parse()
                    .map_err(|e| format!("invalid controller {controller:?}: {e}"))?;
                form.push(("service".to_owned(), spec.to_string()));
            }
        }
        (true, false) => return Err("cannot use --all together with --controller".to_owned()),
        (false, true) => return Err("please supply --all or at least one --controller".to_owned()),
    }

    match (&args.update_image, args.update_all_images) {
        (Some(_), true) => {
            return Err("cannot use --update-image together with --update-all-images".to_owned())
        }
        (Some(image), false) => {
            let spec: ImageSpec = image
                .parse()
                .map_err(|e| format!("invalid image {image:?}: {e}"))?;
            form.push(("image".to_owned(), spec.to_string()));
        }
        (None, true) => form.push(("image".to_owned(), IMAGE_SPEC_LATEST.to_owned())),
        (None, false) => {
            return Err("please supply --update-image or --update-all-images".to_owned())
        }
    }

    form.push((
        "kind".to_owned(),
        if args.dry_run { "plan" } else { "execute" }.to_owned(),
    ));

    for excluded in &args.exclude {
        let id: ResourceId = excluded
            .parse()
            .map_err(|e| format!("invalid exclude {excluded:?}: {e}"))?;
        form.push(("exclude".to_owned(), id.to_string()));
    }

    if !args.user.is_empty() {
        form.push(("user".to_owned(), args.user.clone()));
    }
    if !args.message.is_empty() {
        form.push(("message".to_owned(), args.message.clone()));
    }
    Ok(form)
}

pub fn run(client: &ApiClient, args: &ReleaseArgs, json: bool) -> Result<u8, String> {
    let form = match build_form(args) {
        Ok(form) => form,
        Err(message) => {
            eprintln!("{message}");
            return Ok(EXIT_USER_ERROR);
        }
    };
    let body = encode(&form);

    let job_id = client
        .post_form("/v6/update-images", &body)
        .map_err(|e| e.to_string())?;
    let job = wait_for_job(client, &job_id).map_err(|e| e.to_string())?;

    if json {
        println!("{}", super::json_pretty(&job)?);
    } else {
        print_result(&job);
    }

    if job.status != JobStatus::Succeeded {
        return Ok(EXIT_RELEASE_FAILED);
    }
    let failed = job.result.as_ref().is_some_and(|result| {
        result
            .iter()
            .any(|(_, verdict)| verdict.status == ReleaseStatus::Failed)
    });
    Ok(if failed { EXIT_RELEASE_FAILED } else { EXIT_SUCCESS })
}
