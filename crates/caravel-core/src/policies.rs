//! Policy-update jobs: edit the `[policies]` tables of the named
//! workloads, commit, and push — the same repository discipline as a
//! release, without touching the cluster.

use crate::context::ReleaseContext;
use crate::deadline::Deadline;
use crate::CoreError;
use caravel_schema::{Cause, PolicyUpdates, Revision};
use tracing::{info, warn};

pub fn execute_policy_update(
    ctx: &ReleaseContext<'_>,
    updates: &PolicyUpdates,
    cause: &Cause,
    deadline: &Deadline,
) -> Result<Option<Revision>, CoreError> {
    if updates.is_empty() {
        return Ok(None);
    }
    deadline.check()?;

    // Resolve every named workload to its manifest before editing any.
    let defined = ctx.find_defined_services()?;
    let mut edits = Vec::with_capacity(updates.len());
    for (id, change) in updates {
        let service = defined
            .iter()
            .find(|u| &u.resource_id == id)
            .ok_or_else(|| CoreError::UnknownService(id.clone()))?;
        let bytes = ctx.manifests().update_policies(
            &service.manifest_path,
            &service.manifest_bytes,
            change,
        )?;
        let mut edited = service.clone();
        edited.manifest_bytes = bytes;
        edits.push(edited);
    }

    ctx.write_updates(&edits)?;
    deadline.check()?;

    let message = if cause.message.is_empty() {
        format!("Update policies for {} workloads", edits.len())
    } else {
        cause.message.clone()
    };

    let revision = ctx
        .checkout()
        .with_write(|tree| -> Result<Option<Revision>, CoreError> {
            if !tree.has_changes()? {
                return Ok(None);
            }
            let prior = tree.head_revision()?;
            let revision = tree.commit_all(&message)?;
            if let Err(push_err) = tree.push() {
                warn!("push failed, rolling back to {prior}: {push_err}");
                if let Err(reset_err) = tree.reset_hard(&prior) {
                    warn!("rollback to {prior} also failed: {reset_err}");
                }
                return Err(push_err.into());
            }
            Ok(Some(revision))
        })?;

    match &revision {
        Some(revision) => info!("updated policies for {} workloads at {revision}", edits.len()),
        None => info!("policy update produced no file changes"),
    }
    Ok(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_cluster::{Manifests, MockCluster};
    use caravel_registry::Catalog;
    use caravel_repo::fixture;
    use caravel_schema::{PolicyChange, ResourceId};

    const WEB: &str = "kind = \"deployment\"\nname = \"web\"\n\n[[containers]]\nname = \"main\"\nimage = \"acme/web:1\"\n";

    #[test]
    fn commits_policy_edit_and_pushes() {
        let root = tempfile::tempdir().unwrap();
        let checkout = fixture::seed(root.path(), &[("web.toml", WEB)]).unwrap();
        let cluster = MockCluster::new();
        let registry = Catalog::new();
        let ctx = ReleaseContext::new(&cluster, Manifests::new(), &registry, &checkout);

        let mut change = PolicyChange::default();
        change.add.insert("locked".to_owned(), "true".to_owned());
        let mut updates = PolicyUpdates::new();
        updates.insert("default:deployment/web".parse().unwrap(), change);

        let before = checkout.head_revision().unwrap();
        let revision = execute_policy_update(
            &ctx,
            &updates,
            &Cause::default(),
            &Deadline::for_queued_job(),
        )
        .unwrap()
        .unwrap();
        assert_ne!(revision, before);

        let defined = ctx.find_defined_services().unwrap();
        assert!(defined[0].workload.policies.locked);
    }

    #[test]
    fn unknown_service_fails_before_any_edit() {
        let root = tempfile::tempdir().unwrap();
        let checkout = fixture::seed(root.path(), &[("web.toml", WEB)]).unwrap();
        let cluster = MockCluster::new();
        let registry = Catalog::new();
        let ctx = ReleaseContext::new(&cluster, Manifests::new(), &registry, &checkout);

        let ghost: ResourceId = "default:deployment/ghost".parse().unwrap();
        let mut updates = PolicyUpdates::new();
        updates.insert(ghost, PolicyChange::default());

        let before = checkout.head_revision().unwrap();
        let err = execute_policy_update(
            &ctx,
            &updates,
            &Cause::default(),
            &Deadline::for_queued_job(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UnknownService(_)));
        assert_eq!(checkout.head_revision().unwrap(), before);
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let checkout = fixture::seed(root.path(), &[("web.toml", WEB)]).unwrap();
        let cluster = MockCluster::new();
        let registry = Catalog::new();
        let ctx = ReleaseContext::new(&cluster, Manifests::new(), &registry, &checkout);

        let revision = execute_policy_update(
            &ctx,
            &PolicyUpdates::new(),
            &Cause::default(),
            &Deadline::for_queued_job(),
        )
        .unwrap();
        assert!(revision.is_none());
    }
}
