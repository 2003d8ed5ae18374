//! Test support: build a throwaway origin repository and a checkout of it.
//!
//! Used by this crate's own tests and by the integration tests of the
//! crates above it, the same way the HTTP server exposes its in-process
//! test server.

use crate::checkout::{Checkout, CheckoutConfig, COMMIT_AUTHOR_EMAIL, COMMIT_AUTHOR_NAME};
use crate::git::run_git;
use crate::RepoError;
use std::path::{Path, PathBuf};

/// Where [`seed`] puts the bare origin under `root`.
pub fn origin_dir(root: &Path) -> PathBuf {
    root.join("origin.git")
}

/// Create a bare origin at `root/origin.git` seeded with `files`
/// (path, contents) on branch `main`, and return a live checkout of it
/// at `root/work`.
pub fn seed(root: &Path, files: &[(&str, &str)]) -> Result<Checkout, RepoError> {
    let seed_dir = root.join("seed");
    std::fs::create_dir_all(&seed_dir)?;
    run_git(&seed_dir, &["init", "-q"])?;
    for (path, contents) in files {
        let dest = seed_dir.join(path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, contents)?;
    }
    run_git(&seed_dir, &["add", "-A"])?;
    run_git(
        &seed_dir,
        &[
            "-c",
            &format!("user.name={COMMIT_AUTHOR_NAME}"),
            "-c",
            &format!("user.email={COMMIT_AUTHOR_EMAIL}"),
            "commit",
            "-q",
            "-m",
            "seed manifests",
        ],
    )?;
    run_git(&seed_dir, &["branch", "-M", "main"])?;

    let origin = origin_dir(root);
    run_git(
        root,
        &[
            "clone",
            "-q",
            "--bare",
            &seed_dir.to_string_lossy(),
            &origin.to_string_lossy(),
        ],
    )?;

    let config = CheckoutConfig {
        url: origin.to_string_lossy().into_owned(),
        branch: "main".to_owned(),
        path: None,
    };
    Checkout::clone_from(&config, &root.join("work"))
}
