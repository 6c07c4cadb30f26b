//! Snapshot reconciliation.
//!
//! A plain name is created once. A timestamped template rotates: when the
//! current schedule window has no instance yet, the new instance is created
//! from its source and the retention policy retires old instances. Deletions
//! are planned as cleanup so they run after every publish has switched away.
//!
//! A plain name with `rotate` is rebuilt on every refreshing pass: the live
//! snapshot is renamed to its `rotate-via` name and created again from its
//! (refreshed) source. Plain-named snapshots built from a rebuilt one follow
//! in dependency order, and publishes switch back to the rebuilt names. The
//! retention policy applies to the renamed instances.

use log::debug;

use super::{Context, Decision};
use crate::config::{SnapshotSource, SnapshotSpec};
use crate::error::{Error, Result};
use crate::operation::{Operation, SnapshotOrigin};
use crate::report::Warning;
use crate::resolver::EntityRef;
use crate::retention::{plan_rotation, retire, Family, Retirement};
use crate::timestamp::NameTemplate;

pub fn reconcile(name: &str, spec: &SnapshotSpec, ctx: &mut Context<'_>) -> Result<Decision> {
    let entity = EntityRef::Snapshot(name.to_string());
    let template = NameTemplate::parse(name)?;
    let mut decision = Decision::default();

    if !template.is_timestamped() {
        if !ctx.snapshot_available(name) {
            decision.actions.push(build(&entity, name, &spec.source, ctx)?);
            ctx.mark_created(name);
        } else if ctx.live.snapshots.contains_key(name)
            && ((spec.rotate && ctx.refresh) || sources_rotated(spec, ctx)?)
        {
            rotate(&entity, name, spec, ctx, &mut decision)?;
        }
        return Ok(decision);
    }

    let schedule = spec
        .timestamp
        .as_ref()
        .ok_or_else(|| Error::Planning {
            entity: entity.to_string(),
            message: "timestamped snapshot without schedule".to_string(),
        })?
        .schedule()?;
    let policy = spec.retention.policy()?;
    let family = Family::collect(&template, ctx.live.snapshots.keys().map(String::as_str));
    let rotation = plan_rotation(&family, &policy, &schedule, ctx.now, &ctx.guard());

    let Some(next) = rotation.next_name else {
        debug!("{}: current instance {} exists", name, rotation.current_name);
        return Ok(decision);
    };

    decision.actions.push(build(&entity, &next, &spec.source, ctx)?);
    ctx.mark_created(&next);

    decision.cleanup = rotation
        .to_delete
        .into_iter()
        .map(|name| Operation::DeleteSnapshot { name })
        .collect();
    decision.warnings = rotation
        .withheld
        .into_iter()
        .map(|snapshot| Warning::RetentionGuardSkipped {
            family: name.to_string(),
            snapshot,
        })
        .collect();
    Ok(decision)
}

/// Any snapshot this one is built from is rebuilt earlier in the pass.
fn sources_rotated(spec: &SnapshotSpec, ctx: &Context<'_>) -> Result<bool> {
    let refs = match &spec.source {
        SnapshotSource::Merge(refs) => refs.iter().collect(),
        SnapshotSource::Filter { source, .. } => vec![source],
        SnapshotSource::Mirror(_) | SnapshotSource::Repo(_) => Vec::new(),
    };
    for reference in refs {
        if ctx.rotated(&ctx.resolve(reference)?) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Move the live snapshot aside, rebuild it, and retire old rotated instances.
fn rotate(
    entity: &EntityRef,
    name: &str,
    spec: &SnapshotSpec,
    ctx: &mut Context<'_>,
    decision: &mut Decision,
) -> Result<()> {
    let via = NameTemplate::parse(&spec.rotated_template(name))?;
    let rotated = via.expand(ctx.now);
    if ctx.snapshot_available(&rotated) {
        debug!("{}: already rotated to {}", name, rotated);
        return Ok(());
    }

    decision.actions.push(Operation::RenameSnapshot {
        name: name.to_string(),
        to: rotated.clone(),
    });
    decision.actions.push(build(entity, name, &spec.source, ctx)?);
    ctx.mark_rotated(name, &rotated);

    let family = Family::collect(&via, ctx.live.snapshots.keys().map(String::as_str));
    let Retirement { to_delete, withheld } =
        retire(&family, &spec.retention.policy()?, ctx.now, &ctx.guard());
    decision
        .cleanup
        .extend(to_delete.into_iter().map(|name| Operation::DeleteSnapshot { name }));
    decision
        .warnings
        .extend(withheld.into_iter().map(|snapshot| Warning::RetentionGuardSkipped {
            family: via.as_str().to_string(),
            snapshot,
        }));
    Ok(())
}

/// The operation that creates `instance` from its configured source.
fn build(
    entity: &EntityRef,
    instance: &str,
    source: &SnapshotSource,
    ctx: &Context<'_>,
) -> Result<Operation> {
    let op = match source {
        SnapshotSource::Mirror(mirror) => Operation::CreateSnapshot {
            name: instance.to_string(),
            origin: SnapshotOrigin::Mirror(mirror.clone()),
        },
        SnapshotSource::Repo(repo) => Operation::CreateSnapshot {
            name: instance.to_string(),
            origin: SnapshotOrigin::Repo(repo.clone()),
        },
        SnapshotSource::Merge(refs) => {
            let sources = refs
                .iter()
                .map(|r| ctx.resolve(r))
                .collect::<Result<Vec<_>>>()?;
            for source in &sources {
                ctx.require_snapshot(entity, source)?;
            }
            Operation::MergeSnapshot {
                name: instance.to_string(),
                sources,
            }
        }
        SnapshotSource::Filter { source, query } => {
            let source = ctx.resolve(source)?;
            ctx.require_snapshot(entity, &source)?;
            Operation::FilterSnapshot {
                name: instance.to_string(),
                source,
                query: query.clone(),
            }
        }
    };
    Ok(op)
}
