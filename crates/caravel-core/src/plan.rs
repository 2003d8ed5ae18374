//! The planner: turns a release spec plus a release context into a set of
//! per-workload manifest edits and a total result.

use crate::context::ReleaseContext;
use crate::deadline::Deadline;
use crate::exec::execute_release;
use crate::filters::{
    ExcludeFilter, Filter, IgnoreFilter, LockedFilter, NoContainersFilter, SpecFilter,
    UpToDateFilter,
};
use crate::update::ControllerUpdate;
use crate::CoreError;
use caravel_registry::{latest_image, TagFilter};
use caravel_schema::release::reason;
use caravel_schema::{
    Cause, ContainerUpdate, ControllerResult, ImageSpec, ReleaseKind, ReleaseResult,
    ReleaseSpec, ReleaseStatus, Revision,
};
use tracing::{debug, info};

/// Run one full release: plan, and for `kind = execute` also commit and
/// apply. Returns the total result and the commit made, if any.
pub fn release(
    spec: &ReleaseSpec,
    ctx: &ReleaseContext<'_>,
    cause: &Cause,
    deadline: &Deadline,
) -> Result<(ReleaseResult, Option<Revision>), CoreError> {
    let (updates, mut result) = plan_release(spec, ctx, deadline)?;
    let revision = match spec.kind {
        ReleaseKind::Plan => None,
        ReleaseKind::Execute => execute_release(ctx, &updates, &mut result, cause, deadline)?,
    };
    Ok((result, revision))
}

/// Compute the release without mutating anything outside memory.
///
/// The returned result is total over every workload in the scope of the
/// spec; the returned updates are the SUCCESS subset with their manifest
/// bytes already rewritten, in canonical ID order.
pub fn plan_release(
    spec: &ReleaseSpec,
    ctx: &ReleaseContext<'_>,
    deadline: &Deadline,
) -> Result<(Vec<ControllerUpdate>, ReleaseResult), CoreError> {
    spec.validate()?;
    let mut result = ReleaseResult::new();

    let exclude = ExcludeFilter::new(&spec.excludes);
    let spec_filter = SpecFilter::new(&spec.service_specs);
    let filters: [&dyn Filter; 4] = [&exclude, &spec_filter, &LockedFilter, &IgnoreFilter];
    let selected = ctx.select_services(&mut result, &filters)?;
    deadline.check()?;

    let mut planned = Vec::new();
    for mut update in selected {
        deadline.check()?;
        let id = update.resource_id.clone();

        if let Err(failure) = resolve_targets(&mut update, spec, ctx) {
            debug!("{id}: {failure}");
            result.insert(id, ControllerResult::failed(failure));
            continue;
        }

        let verdict = update.filter(&[&NoContainersFilter, &UpToDateFilter]);
        if verdict.status != ReleaseStatus::Success {
            result.insert(id, verdict);
            continue;
        }

        if let Err(e) = rewrite_manifest(&mut update, ctx) {
            result.insert(id, ControllerResult::failed(e.to_string()));
            continue;
        }

        result.insert(id, ControllerResult::success(update.updates.clone()));
        planned.push(update);
    }

    info!(
        "planned {} of {} workloads for release",
        planned.len(),
        result.len()
    );
    Ok((planned, result))
}

/// Decide the target image per container. A `Err` is a per-workload
/// failure recorded in the result, never a release abort.
fn resolve_targets(
    update: &mut ControllerUpdate,
    spec: &ReleaseSpec,
    ctx: &ReleaseContext<'_>,
) -> Result<(), String> {
    let Some(controller) = update.controller.as_ref() else {
        return Ok(());
    };

    match &spec.image_spec {
        ImageSpec::Ref(target) => {
            // Eligible containers are those already running an image from
            // the target's repository; others are left unchanged.
            for container in &controller.containers {
                if container.image.same_repository(target) && container.image != *target {
                    update.updates.push(ContainerUpdate {
                        container: container.name.clone(),
                        current: container.image.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        ImageSpec::Latest => {
            for container in &controller.containers {
                let pattern = update.workload.policies.tag_pattern(&container.name);
                let filter = TagFilter::from_pattern(pattern).map_err(|e| e.to_string())?;
                let images = ctx
                    .registry()
                    .repository_images(&container.image)
                    .map_err(|e| e.to_string())?;
                let Some(latest) = latest_image(&images, &filter) else {
                    return Err(reason::NO_IMAGE_FOR_PATTERN.to_owned());
                };
                if latest.image != container.image {
                    update.updates.push(ContainerUpdate {
                        container: container.name.clone(),
                        current: container.image.clone(),
                        target: latest.image,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Rewrite the manifest bytes in memory, one planned container at a time.
/// The manifests view preserves file formatting.
fn rewrite_manifest(
    update: &mut ControllerUpdate,
    ctx: &ReleaseContext<'_>,
) -> Result<(), CoreError> {
    let planned = update.updates.clone();
    for container_update in &planned {
        update.manifest_bytes = ctx.manifests().update_image(
            &update.manifest_path,
            &update.manifest_bytes,
            &container_update.container,
            &container_update.target,
        )?;
    }
    Ok(())
}
