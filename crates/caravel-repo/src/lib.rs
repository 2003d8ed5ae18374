//! Git checkout of the manifest repository for the Caravel control plane.
//!
//! The repository is the canonical store of desired state. This crate owns
//! the working copy: scoped reader/writer locking, commits with the control
//! plane's identity, structured provenance notes, push with rollback, and
//! ancestry queries for sync status. All git operations shell out to the
//! system `git` with an isolated environment.

pub mod checkout;
pub mod fixture;
mod git;

pub use checkout::{
    Checkout, CheckoutConfig, WorkTree, COMMIT_AUTHOR_EMAIL, COMMIT_AUTHOR_NAME,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to run git: {0}")]
    Spawn(String),
    #[error("{command}: {stderr}")]
    Git { command: String, stderr: String },
    #[error("checkout is locked by another process: {0}")]
    Locked(String),
}
