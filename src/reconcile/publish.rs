//! Publish reconciliation.
//!
//! Repo publishes are created once and refreshed with `publish update`.
//! Snapshot publishes (including publishes of other publishes) are created
//! with the configured snapshots and switched when the live publish exposes
//! different ones. A pinned publish (`automatic-update = false`) is never
//! switched; the difference is reported instead.
//!
//! A publish of another publish follows what its source exposes after this
//! pass, so it stays on the old snapshots while its source is pinned.
//!
//! A publish is compared with the live state as it will be after planned
//! renames: a publish serving a rotated snapshot follows it to its new name
//! and is switched back to the rebuilt one.

use std::collections::BTreeSet;

use log::info;

use super::{Context, Decision, Exposure};
use crate::config::{PublishKey, PublishSource, PublishSpec, SnapshotRef};
use crate::error::Result;
use crate::operation::{Operation, PublishOptions, PublishTarget};
use crate::report::Warning;
use crate::resolver::EntityRef;
use crate::state::PublishRecord;
use crate::timestamp::NameTemplate;

pub fn reconcile(key: &PublishKey, spec: &PublishSpec, ctx: &mut Context<'_>) -> Result<Decision> {
    let mut decision = Decision::default();

    if let PublishSource::Repo(repo) = &spec.source {
        if ctx.live.publishes.contains_key(key) {
            if ctx.refresh {
                decision.actions.push(Operation::UpdatePublish {
                    key: key.clone(),
                    skip_contents: spec.skip_contents,
                });
            }
        } else {
            decision.actions.push(Operation::CreatePublish {
                key: key.clone(),
                target: PublishTarget::Repo(repo.clone()),
                options: options(spec, spec.components.clone()),
            });
        }
        return Ok(decision);
    }

    let entity = EntityRef::Publish(key.clone());
    let (root, refs) = ctx.snapshot_root(key)?;
    let Exposure {
        components,
        snapshots: desired,
    } = match &spec.source {
        PublishSource::Publish(source) => ctx.exposure_of(source)?,
        _ => Exposure {
            components: root.components.clone(),
            snapshots: ctx.publish_snapshots(key)?,
        },
    };
    for name in &desired {
        ctx.require_snapshot(&entity, name)?;
    }
    let planned = Exposure {
        components: components.clone(),
        snapshots: desired.clone(),
    };

    let Some(live) = ctx.live.publishes.get(key).map(|record| ctx.after_renames(record)) else {
        decision.actions.push(Operation::CreatePublish {
            key: key.clone(),
            target: PublishTarget::Snapshots(desired),
            options: options(spec, components),
        });
        ctx.record_exposure(key, planned);
        return Ok(decision);
    };

    if exposes(&live, &components, &desired) {
        ctx.record_exposure(key, planned);
        return Ok(decision);
    }

    let current = live.snapshots();
    if !spec.automatic_update {
        decision.warnings.push(Warning::PublishPinned {
            publish: key.clone(),
            current,
            desired,
        });
        ctx.record_exposure(key, Exposure::of_live(&live));
        return Ok(decision);
    }

    info!(
        "Publish {} exposes [{}], switching to [{}]",
        key,
        current.join(", "),
        desired.join(", ")
    );
    for (index, reference) in refs.iter().enumerate() {
        let Some(archive) = reference.archive_on_update() else {
            continue;
        };
        let Some(outgoing) = outgoing(&live, reference, components.get(index))? else {
            continue;
        };
        if desired.get(index) == Some(&outgoing) {
            continue;
        }
        let name = NameTemplate::parse(archive)?.expand(ctx.now);
        if ctx.snapshot_available(&name) {
            continue;
        }
        decision.actions.push(Operation::MergeSnapshot {
            name: name.clone(),
            sources: vec![outgoing],
        });
        ctx.mark_created(&name);
    }

    decision.actions.push(Operation::SwitchPublish {
        key: key.clone(),
        snapshots: desired,
        components,
        skip_contents: spec.skip_contents,
    });
    ctx.record_exposure(key, planned);
    Ok(decision)
}

fn options(spec: &PublishSpec, components: Vec<String>) -> PublishOptions {
    PublishOptions {
        components,
        architectures: spec.architectures.clone(),
        label: spec.label.clone(),
        origin: spec.origin.clone(),
        gpg_key: spec.gpg_key.clone(),
        skip_contents: spec.skip_contents,
    }
}

/// Whether the live publish maps each component to the desired snapshot.
fn exposes(live: &PublishRecord, components: &[String], desired: &[String]) -> bool {
    let live: BTreeSet<(&str, &str)> = live
        .sources
        .iter()
        .filter(|s| s.kind == "snapshot")
        .map(|s| (s.component.as_str(), s.name.as_str()))
        .collect();
    let desired: BTreeSet<(&str, &str)> = components
        .iter()
        .map(String::as_str)
        .zip(desired.iter().map(String::as_str))
        .collect();
    live == desired
}

/// The published snapshot of `reference`'s family that a switch replaces.
fn outgoing(
    live: &PublishRecord,
    reference: &SnapshotRef,
    component: Option<&String>,
) -> Result<Option<String>> {
    let template = NameTemplate::parse(reference.name())?;
    let member = |name: &str| {
        template.instance_timestamp(name).is_some() || name == template.as_str()
    };
    let published = || live.sources.iter().filter(|s| s.kind == "snapshot");
    let by_component = published()
        .find(|s| Some(&s.component) == component && member(&s.name))
        .or_else(|| published().find(|s| member(&s.name)));
    Ok(by_component.map(|s| s.name.clone()))
}
