//! The executor: commits a successful plan to the repository and applies
//! it to the cluster.

use crate::context::ReleaseContext;
use crate::deadline::Deadline;
use crate::update::ControllerUpdate;
use crate::CoreError;
use caravel_cluster::ApplyOp;
use caravel_schema::{Cause, ContainerUpdate, Revision};
use caravel_schema::{ReleaseResult, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Structured provenance attached to every release commit as a git note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceNote {
    pub user: String,
    pub message: String,
    pub services: BTreeMap<ResourceId, Vec<ContainerUpdate>>,
}

/// Commit the SUCCESS entries of a plan, push, and apply to the cluster.
///
/// Push failure rolls the working copy back and fails the job; the
/// per-workload results are left as the planner produced them (they
/// describe the intent). Apply failures are per-workload: SUCCESS entries
/// are downgraded to FAILED with the daemon's error, and the commit stays
/// in place — the git history remains the source of truth and reconciles
/// on the next sync.
pub fn execute_release(
    ctx: &ReleaseContext<'_>,
    updates: &[ControllerUpdate],
    result: &mut ReleaseResult,
    cause: &Cause,
    deadline: &Deadline,
) -> Result<Option<Revision>, CoreError> {
    if updates.is_empty() {
        info!("nothing to execute: no successful updates in plan");
        return Ok(None);
    }
    deadline.check()?;

    ctx.write_updates(updates)?;

    let message = commit_message(cause, updates);
    let note = serde_json::to_string(&provenance(cause, updates))?;

    let revision = ctx
        .checkout()
        .with_write(|tree| -> Result<Option<Revision>, CoreError> {
            // A release whose edits are already on disk (repo ahead of the
            // cluster) has nothing to commit; it still gets applied below.
            if !tree.has_changes()? {
                info!("working tree already carries the planned edits");
                return Ok(None);
            }
            let prior = tree.head_revision()?;
            let revision = tree.commit_all(&message)?;
            tree.add_note(&revision, &note)?;
            if let Err(push_err) = tree.push() {
                warn!("push failed, rolling back to {prior}: {push_err}");
                if let Err(reset_err) = tree.reset_hard(&prior) {
                    warn!("rollback to {prior} also failed: {reset_err}");
                }
                return Err(push_err.into());
            }
            Ok(Some(revision))
        })?;
    deadline.check()?;

    let ops: Vec<ApplyOp> = updates
        .iter()
        .map(|update| ApplyOp {
            id: update.resource_id.clone(),
            // Manifest bytes came out of the TOML editor, so they are UTF-8.
            manifest: String::from_utf8_lossy(&update.manifest_bytes).into_owned(),
        })
        .collect();

    match ctx.cluster().apply(&ops) {
        Ok(apply_result) => {
            for (id, error) in &apply_result.errors {
                warn!("apply failed for {id}: {error}");
                result.downgrade_to_failed(id, format!("apply failed: {error}"));
            }
        }
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            // The daemon refused the whole batch; every committed workload
            // is downgraded, the commit stays.
            for update in updates {
                result.downgrade_to_failed(&update.resource_id, format!("apply failed: {e}"));
            }
        }
    }

    match &revision {
        Some(revision) => info!("released {} workloads at {revision}", updates.len()),
        None => info!("released {} workloads without a new commit", updates.len()),
    }
    Ok(revision)
}

fn provenance(cause: &Cause, updates: &[ControllerUpdate]) -> ProvenanceNote {
    ProvenanceNote {
        user: cause.user.clone(),
        message: cause.message.clone(),
        services: updates
            .iter()
            .map(|u| (u.resource_id.clone(), u.updates.clone()))
            .collect(),
    }
}

fn commit_message(cause: &Cause, updates: &[ControllerUpdate]) -> String {
    let subject = if cause.message.is_empty() {
        match updates {
            [only] => format!("Release {}", only.resource_id),
            many => format!("Release {} workloads", many.len()),
        }
    } else {
        cause.message.clone()
    };

    let mut message = subject;
    message.push_str("\n\n");
    for update in updates {
        for change in &update.updates {
            message.push_str(&format!(
                "- {}: {} -> {}\n",
                update.resource_id, change.current, change.target
            ));
        }
    }
    message
}
