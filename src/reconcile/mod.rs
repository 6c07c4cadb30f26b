//! # Reconciliation
//!
//! Turns the desired configuration and the live state into a [`Plan`]: for
//! every configured entity, in dependency order, the operations that make
//! aptly match the configuration.
//!
//! ## Process
//!
//! 1.  **Static checks**: [`Config::validate`] rejects undefined references
//!     before anything else happens.
//! 2.  **Ordering**: the [`resolver`](crate::resolver) orders entities so
//!     that dependencies come first, failing on cycles.
//! 3.  **Per-entity decisions**: one reconciler per entity kind
//!     ([`mirror`], [`repo`], [`snapshot`], [`publish`]) compares the entity
//!     with the live state and returns a [`Decision`]. A reconciler error only
//!     affects its own entity.
//! 4.  **Execution**: [`execute::execute`] runs the plan through a
//!     [`CommandRunner`](crate::runner::CommandRunner).
//!
//! Configuration and cycle errors abort planning; nothing is emitted.

pub mod execute;
pub mod mirror;
pub mod publish;
pub mod repo;
pub mod snapshot;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::config::{
    Config, PublishKey, PublishSource, PublishSpec, SnapshotRef, SnapshotSource,
};
use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::report::Warning;
use crate::resolver::{DependencyGraph, EntityRef};
use crate::retention::RetentionGuard;
use crate::state::{LiveState, PublishRecord};
use crate::timestamp::NameTemplate;

/// Knobs for one reconciliation pass
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Reference time for rotation windows and archive names
    pub now: DateTime<Utc>,
    /// Emit `update-mirror` / `update-publish` for existing entities
    pub refresh: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            refresh: true,
        }
    }
}

/// What a reconciler decided for one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    /// Run in order, stopping at the first failure
    pub actions: Vec<Operation>,
    /// Run after every entity's actions, if this entity's actions all succeeded
    pub cleanup: Vec<Operation>,
    pub warnings: Vec<Warning>,
}

/// The planned work for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPlan {
    pub entity: EntityRef,
    pub depends_on: Vec<EntityRef>,
    pub actions: Vec<Operation>,
    pub cleanup: Vec<Operation>,
    pub warnings: Vec<Warning>,
    /// Set when the entity could not be planned
    pub error: Option<String>,
}

impl EntityPlan {
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.actions.iter().chain(self.cleanup.iter())
    }
}

/// Ordered work for a whole reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub entities: Vec<EntityPlan>,
}

impl Plan {
    /// Every operation in execution order: all actions, then all cleanup.
    pub fn operations(&self) -> Vec<&Operation> {
        let actions = self.entities.iter().flat_map(|e| e.actions.iter());
        let cleanup = self.entities.iter().flat_map(|e| e.cleanup.iter());
        actions.chain(cleanup).collect()
    }

    /// Operations that create, delete or repoint something.
    pub fn state_changing(&self) -> Vec<&Operation> {
        self.operations()
            .into_iter()
            .filter(|op| !op.is_refresh())
            .collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.entities.iter().flat_map(|e| e.warnings.iter())
    }

    pub fn errors(&self) -> impl Iterator<Item = (&EntityRef, &str)> {
        self.entities
            .iter()
            .filter_map(|e| e.error.as_deref().map(|msg| (&e.entity, msg)))
    }

    /// Live state already matches the configuration.
    pub fn converged(&self) -> bool {
        self.state_changing().is_empty() && self.errors().next().is_none()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entity in &self.entities {
            if entity.actions.is_empty()
                && entity.cleanup.is_empty()
                && entity.warnings.is_empty()
                && entity.error.is_none()
            {
                continue;
            }
            writeln!(f, "{}", entity.entity)?;
            for op in &entity.actions {
                writeln!(f, "  {}", op.argv().join(" "))?;
            }
            for op in &entity.cleanup {
                writeln!(f, "  (cleanup) {}", op.argv().join(" "))?;
            }
            for warning in &entity.warnings {
                writeln!(f, "  warning: {}", warning)?;
            }
            if let Some(error) = &entity.error {
                writeln!(f, "  error: {}", error)?;
            }
        }
        Ok(())
    }
}

/// Components of a publish and the snapshot each one exposes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exposure {
    pub components: Vec<String>,
    pub snapshots: Vec<String>,
}

impl Exposure {
    /// The snapshots a live publish serves right now.
    pub fn of_live(record: &PublishRecord) -> Self {
        let (components, snapshots) = record
            .sources
            .iter()
            .filter(|s| s.kind == "snapshot")
            .map(|s| (s.component.clone(), s.name.clone()))
            .unzip();
        Self {
            components,
            snapshots,
        }
    }
}

/// Shared inputs and bookkeeping while planning one pass
pub struct Context<'a> {
    pub config: &'a Config,
    pub live: &'a LiveState,
    pub now: DateTime<Utc>,
    pub refresh: bool,
    /// Snapshots referenced by publishes or merge/filter sources
    pins: BTreeSet<String>,
    /// Snapshots created by actions planned so far
    created: HashSet<String>,
    /// Keys already scheduled for import
    imported: HashSet<String>,
    /// What each publish planned so far exposes once its actions have run
    exposed: HashMap<PublishKey, Exposure>,
    /// Live snapshots moved aside by rotation, and their new names
    renamed: HashMap<String, String>,
}

impl<'a> Context<'a> {
    pub fn new(config: &'a Config, live: &'a LiveState, options: &Options) -> Self {
        let mut ctx = Self {
            config,
            live,
            now: options.now,
            refresh: options.refresh,
            pins: live.published_snapshots(),
            created: HashSet::new(),
            imported: HashSet::new(),
            exposed: HashMap::new(),
            renamed: HashMap::new(),
        };

        let mut pins = BTreeSet::new();
        for (key, _) in config.publishes() {
            if let Ok(names) = ctx.publish_snapshots(&key) {
                pins.extend(names);
            }
        }
        for spec in config.snapshot.values() {
            let refs: Vec<&SnapshotRef> = match &spec.source {
                SnapshotSource::Merge(sources) => sources.iter().collect(),
                SnapshotSource::Filter { source, .. } => vec![source],
                _ => Vec::new(),
            };
            pins.extend(refs.into_iter().filter_map(|r| ctx.resolve(r).ok()));
        }
        ctx.pins.extend(pins);
        debug!("Snapshots pinned against retention: {:?}", ctx.pins);
        ctx
    }

    /// Concrete snapshot name a reference points at.
    ///
    /// Timestamped templates resolve to the instance of the window selected
    /// by the reference's back-reference; plain names resolve to themselves.
    pub fn resolve(&self, reference: &SnapshotRef) -> Result<String> {
        let name = reference.name();
        let spec = self
            .config
            .snapshot
            .get(name)
            .ok_or_else(|| Error::ConfigReference {
                entity: "snapshot reference".to_string(),
                missing: format!("snapshot {}", name),
            })?;
        let template = NameTemplate::parse(name)?;
        if !template.is_timestamped() {
            return Ok(name.to_string());
        }
        let schedule = spec
            .timestamp
            .as_ref()
            .ok_or_else(|| Error::config(format!("snapshot '{}' has no timestamp", name)))?
            .schedule()?;
        Ok(template.expand(schedule.window_start(self.now, reference.back_ref())))
    }

    /// The snapshot-based publish a publish ultimately takes its snapshots
    /// from: itself, or the end of its chain of publish sources.
    pub fn snapshot_root(&self, key: &PublishKey) -> Result<(&'a PublishSpec, &'a [SnapshotRef])> {
        let config = self.config;
        let mut seen = HashSet::new();
        let mut current = key.clone();
        loop {
            if !seen.insert(current.clone()) {
                return Err(Error::CycleDetected {
                    cycle: format!("publish {}", current),
                });
            }
            let spec = config
                .publish_spec(&current)
                .ok_or_else(|| Error::ConfigReference {
                    entity: format!("publish {}", key),
                    missing: format!("publish {}", current),
                })?;
            match &spec.source {
                PublishSource::Snapshots(refs) => return Ok((spec, refs.as_slice())),
                PublishSource::Repo(repo) => {
                    return Err(Error::Planning {
                        entity: format!("publish {}", key),
                        message: format!("publish {} exposes repo {}, not snapshots", current, repo),
                    })
                }
                PublishSource::Publish(other) => current = other.clone(),
            }
        }
    }

    /// Snapshots the configuration of a publish resolves to, following
    /// publish-of-publish sources to the root.
    pub fn publish_snapshots(&self, key: &PublishKey) -> Result<Vec<String>> {
        let (_, refs) = self.snapshot_root(key)?;
        refs.iter().map(|r| self.resolve(r)).collect()
    }

    pub fn record_exposure(&mut self, key: &PublishKey, exposure: Exposure) {
        self.exposed.insert(key.clone(), exposure);
    }

    /// What another publish exposes once this pass has run.
    ///
    /// A publish planned earlier in the pass answers with its outcome: the
    /// new snapshots when it is created or switched, the live ones when it is
    /// current or pinned. Otherwise the live publish answers, and a publish
    /// that does not exist yet falls back to its configuration.
    pub fn exposure_of(&self, key: &PublishKey) -> Result<Exposure> {
        if let Some(exposure) = self.exposed.get(key) {
            return Ok(exposure.clone());
        }
        if let Some(record) = self.live.publishes.get(key) {
            let exposure = Exposure::of_live(&self.after_renames(record));
            if !exposure.snapshots.is_empty() {
                return Ok(exposure);
            }
        }
        let (root, _) = self.snapshot_root(key)?;
        Ok(Exposure {
            components: root.components.clone(),
            snapshots: self.publish_snapshots(key)?,
        })
    }

    /// The snapshot exists now or will once earlier actions have run.
    pub fn snapshot_available(&self, name: &str) -> bool {
        self.live.snapshots.contains_key(name) || self.created.contains(name)
    }

    pub fn require_snapshot(&self, entity: &EntityRef, name: &str) -> Result<()> {
        if self.snapshot_available(name) {
            Ok(())
        } else {
            Err(Error::Planning {
                entity: entity.to_string(),
                message: format!("snapshot {} does not exist and is not created by this run", name),
            })
        }
    }

    pub fn mark_created(&mut self, name: &str) {
        self.created.insert(name.to_string());
    }

    /// Record that `name` is renamed to `to` and rebuilt under its own name.
    pub fn mark_rotated(&mut self, name: &str, to: &str) {
        self.renamed.insert(name.to_string(), to.to_string());
        self.created.insert(to.to_string());
    }

    /// The snapshot is rebuilt from fresh sources by an earlier action.
    pub fn rotated(&self, name: &str) -> bool {
        self.renamed.contains_key(name)
    }

    /// A live publish as it looks once planned renames have run.
    pub fn after_renames(&self, record: &PublishRecord) -> PublishRecord {
        let mut record = record.clone();
        for source in &mut record.sources {
            if source.kind != "snapshot" {
                continue;
            }
            if let Some(to) = self.renamed.get(&source.name) {
                source.name = to.clone();
            }
        }
        record
    }

    /// Record a key import; `false` if an earlier entity already imports it.
    pub fn claim_import(&mut self, key: &str) -> bool {
        self.imported.insert(crate::state::normalize_key(key))
    }

    pub fn guard(&self) -> SnapshotGuard<'_> {
        SnapshotGuard {
            pins: &self.pins,
            live: self.live,
        }
    }
}

/// Keeps snapshots that are published, used as configured sources, or that
/// a surviving snapshot was built from
pub struct SnapshotGuard<'a> {
    pins: &'a BTreeSet<String>,
    live: &'a LiveState,
}

impl RetentionGuard for SnapshotGuard<'_> {
    fn holds(&self, candidate: &str, deleting: &BTreeSet<String>) -> bool {
        self.pins.contains(candidate)
            || self.live.snapshots.keys().any(|name| {
                name != candidate
                    && !deleting.contains(name)
                    && self.live.has_dependency(name, candidate)
            })
    }
}

/// Plan one reconciliation pass.
pub fn plan(config: &Config, live: &LiveState, options: &Options) -> Result<Plan> {
    config.validate()?;
    let graph = DependencyGraph::build(config)?;
    let order = graph.order()?;

    let mut ctx = Context::new(config, live, options);
    let mut plan = Plan::default();

    for entity in order {
        let depends_on = graph.dependencies(&entity).into_iter().cloned().collect();
        let (decision, error) = match decide(&entity, &mut ctx) {
            Ok(decision) => (decision, None),
            Err(e) => {
                warn!("Cannot plan {}: {}", entity, e);
                (Decision::default(), Some(e.to_string()))
            }
        };
        debug!("{}: {} actions, {} cleanup", entity, decision.actions.len(), decision.cleanup.len());
        plan.entities.push(EntityPlan {
            entity,
            depends_on,
            actions: decision.actions,
            cleanup: decision.cleanup,
            warnings: decision.warnings,
            error,
        });
    }
    Ok(plan)
}

fn decide(entity: &EntityRef, ctx: &mut Context<'_>) -> Result<Decision> {
    let missing = || Error::ConfigReference {
        entity: "plan".to_string(),
        missing: entity.to_string(),
    };
    let config = ctx.config;
    match entity {
        EntityRef::Mirror(name) => {
            let spec = config.mirror.get(name).ok_or_else(missing)?;
            mirror::reconcile(name, spec, ctx)
        }
        EntityRef::Repo(name) => {
            let spec = config.repo.get(name).ok_or_else(missing)?;
            repo::reconcile(name, spec, ctx)
        }
        EntityRef::Snapshot(name) => {
            let spec = config.snapshot.get(name).ok_or_else(missing)?;
            snapshot::reconcile(name, spec, ctx)
        }
        EntityRef::Publish(key) => {
            let spec = config.publish_spec(key).ok_or_else(missing)?;
            publish::reconcile(key, spec, ctx)
        }
    }
}
