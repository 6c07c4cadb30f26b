//! In-memory stand-in for an aptly installation.
//!
//! [`FakeAptly`] answers state queries with text in aptly's and gpg's output
//! formats, so the real parsers run against it, and applies operations to its
//! own [`LiveState`] with aptly's refusals: creating something that exists,
//! using something that does not, dropping a published snapshot or one other
//! snapshots were built from.
//!
//! ```
//! use std::sync::Arc;
//! use aptly_reconcile::fake::FakeAptly;
//! use aptly_reconcile::state::StateReader;
//!
//! let aptly = Arc::new(FakeAptly::new().with_snapshot("base", &[]));
//! let reader = StateReader::new(aptly.clone());
//! assert!(reader.live().unwrap().snapshots.contains_key("base"));
//! ```

use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::PublishKey;
use crate::error::{Error, Result};
use crate::operation::{Operation, PublishTarget, SnapshotOrigin};
use crate::runner::{CommandOutput, CommandRunner};
use crate::state::{
    normalize_key, ListKind, LiveState, MirrorRecord, PublishRecord, PublishedSource, Query,
    RepoRecord, SnapshotRecord, SourceRef, StateSource,
};

/// Architectures aptly records for a mirror created without `-architectures`
const DEFAULT_ARCHITECTURES: &[&str] = &["amd64"];

struct Failure {
    kind: String,
    target: String,
    message: String,
}

/// Shared in-memory aptly; implements both [`StateSource`] and [`CommandRunner`]
#[derive(Default)]
pub struct FakeAptly {
    state: Mutex<LiveState>,
    failures: Mutex<Vec<Failure>>,
    executed: Mutex<Vec<Operation>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl FakeAptly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror(self, name: &str, archive: &str, distribution: &str, components: &[&str]) -> Self {
        guard(&self.state).mirrors.insert(
            name.to_string(),
            MirrorRecord {
                name: name.to_string(),
                archive: format!("{}/", archive.trim_end_matches('/')),
                distribution: distribution.to_string(),
                components: strings(components),
                architectures: strings(DEFAULT_ARCHITECTURES),
            },
        );
        self
    }

    pub fn with_repo(self, name: &str, distribution: &str, component: &str) -> Self {
        guard(&self.state).repos.insert(
            name.to_string(),
            RepoRecord {
                name: name.to_string(),
                distribution: distribution.to_string(),
                component: component.to_string(),
            },
        );
        self
    }

    /// Add a snapshot built from the given snapshots (none for a mirror snapshot).
    pub fn with_snapshot(self, name: &str, sources: &[&str]) -> Self {
        guard(&self.state).snapshots.insert(
            name.to_string(),
            SnapshotRecord {
                name: name.to_string(),
                sources: sources
                    .iter()
                    .map(|s| SourceRef {
                        name: s.to_string(),
                        kind: "snapshot".to_string(),
                    })
                    .collect(),
            },
        );
        self
    }

    /// Add a publish exposing `(component, snapshot)` pairs.
    pub fn with_publish(self, prefix: &str, distribution: &str, sources: &[(&str, &str)]) -> Self {
        let key = PublishKey::new(prefix, distribution);
        guard(&self.state).publishes.insert(
            key.clone(),
            PublishRecord {
                key,
                sources: sources
                    .iter()
                    .map(|(component, name)| PublishedSource {
                        component: component.to_string(),
                        name: name.to_string(),
                        kind: "snapshot".to_string(),
                    })
                    .collect(),
            },
        );
        self
    }

    pub fn with_gpg_key(self, key: &str) -> Self {
        guard(&self.state).gpg_keys.insert(normalize_key(key));
        self
    }

    /// Make the operation of `kind` on `target` fail with `message`.
    pub fn fail_on(self, kind: &str, target: &str, message: &str) -> Self {
        guard(&self.failures).push(Failure {
            kind: kind.to_string(),
            target: target.to_string(),
            message: message.to_string(),
        });
        self
    }

    /// Snapshot of the current in-memory state.
    pub fn live(&self) -> LiveState {
        guard(&self.state).clone()
    }

    /// Every operation run so far, including failed ones.
    pub fn executed(&self) -> Vec<Operation> {
        guard(&self.executed).clone()
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        guard(&self.state).snapshots.keys().cloned().collect()
    }

    fn render(&self, query: &Query) -> Result<String> {
        let state = guard(&self.state);
        let mut out = String::new();
        let missing = |what: &str| Error::state(format!("ERROR: {} not found", what));
        // writeln! into a String cannot fail
        match query {
            Query::List(ListKind::Mirror) => state.mirrors.keys().for_each(|n| {
                let _ = writeln!(out, "{}", n);
            }),
            Query::List(ListKind::Repo) => state.repos.keys().for_each(|n| {
                let _ = writeln!(out, "{}", n);
            }),
            Query::List(ListKind::Snapshot) => state.snapshots.keys().for_each(|n| {
                let _ = writeln!(out, "{}", n);
            }),
            Query::List(ListKind::Publish) => state.publishes.keys().for_each(|k| {
                let _ = writeln!(out, "{} {}", k.prefix, k.distribution);
            }),
            Query::ShowMirror(name) => {
                let m = state
                    .mirrors
                    .get(name)
                    .ok_or_else(|| missing(&format!("mirror {}", name)))?;
                let _ = write!(
                    out,
                    "Name: {}\nArchive Root URL: {}\nDistribution: {}\nComponents: {}\nArchitectures: {}\nDownload Sources: no\n",
                    m.name,
                    m.archive,
                    m.distribution,
                    m.components.join(", "),
                    m.architectures.join(", ")
                );
            }
            Query::ShowRepo(name) => {
                let r = state
                    .repos
                    .get(name)
                    .ok_or_else(|| missing(&format!("local repo {}", name)))?;
                let _ = write!(
                    out,
                    "Name: {}\nComment: \nDefault Distribution: {}\nDefault Component: {}\nNumber of packages: 0\n",
                    r.name, r.distribution, r.component
                );
            }
            Query::ShowSnapshot(name) => {
                let s = state
                    .snapshots
                    .get(name)
                    .ok_or_else(|| missing(&format!("snapshot {}", name)))?;
                let _ = writeln!(out, "Name: {}\nDescription: Snapshot\nNumber of packages: 0", s.name);
                if !s.sources.is_empty() {
                    let _ = writeln!(out, "Sources:");
                    for source in &s.sources {
                        let _ = writeln!(out, "  {} [{}]", source.name, source.kind);
                    }
                }
            }
            Query::ShowPublish(key) => {
                let p = state
                    .publishes
                    .get(key)
                    .ok_or_else(|| missing(&format!("published repo {}", key)))?;
                let _ = writeln!(
                    out,
                    "Prefix: {}\nDistribution: {}\nArchitectures: amd64\nSources:",
                    key.prefix, key.distribution
                );
                for source in &p.sources {
                    let _ = writeln!(out, "  {}: {} [{}]", source.component, source.name, source.kind);
                }
            }
            Query::GpgKeys => {
                for key in &state.gpg_keys {
                    if key.len() == 40 {
                        let _ = writeln!(out, "fpr:::::::::{}:", key);
                    } else {
                        let _ = writeln!(out, "pub:-:4096:1:{}:1500000000:::-:::scSC:", key);
                    }
                }
            }
        }
        Ok(out)
    }

    fn apply(&self, op: &Operation) -> std::result::Result<(), String> {
        let mut state = guard(&self.state);
        match op {
            Operation::ImportGpgKey { key, .. } => {
                state.gpg_keys.insert(normalize_key(key));
            }
            Operation::CreateMirror {
                name,
                archive,
                distribution,
                components,
                architectures,
                ..
            } => {
                if state.mirrors.contains_key(name) {
                    return Err(format!("ERROR: mirror with name {} already exists", name));
                }
                let architectures = if architectures.is_empty() {
                    strings(DEFAULT_ARCHITECTURES)
                } else {
                    architectures.clone()
                };
                state.mirrors.insert(
                    name.clone(),
                    MirrorRecord {
                        name: name.clone(),
                        archive: format!("{}/", archive.trim_end_matches('/')),
                        distribution: distribution.clone(),
                        components: components.clone(),
                        architectures,
                    },
                );
            }
            Operation::UpdateMirror { name, .. } => {
                if !state.mirrors.contains_key(name) {
                    return Err(format!("ERROR: mirror with name {} not found", name));
                }
            }
            Operation::DropMirror { name } => {
                if state.mirrors.remove(name).is_none() {
                    return Err(format!("ERROR: mirror with name {} not found", name));
                }
            }
            Operation::CreateRepo {
                name,
                distribution,
                component,
                ..
            } => {
                if state.repos.contains_key(name) {
                    return Err(format!("ERROR: local repo with name {} already exists", name));
                }
                state.repos.insert(
                    name.clone(),
                    RepoRecord {
                        name: name.clone(),
                        distribution: distribution.clone(),
                        component: component.clone(),
                    },
                );
            }
            Operation::CreateSnapshot { name, origin } => {
                let source = match origin {
                    SnapshotOrigin::Mirror(mirror) => {
                        if !state.mirrors.contains_key(mirror) {
                            return Err(format!("ERROR: mirror with name {} not found", mirror));
                        }
                        SourceRef {
                            name: mirror.clone(),
                            kind: "repo".to_string(),
                        }
                    }
                    SnapshotOrigin::Repo(repo) => {
                        if !state.repos.contains_key(repo) {
                            return Err(format!("ERROR: local repo with name {} not found", repo));
                        }
                        SourceRef {
                            name: repo.clone(),
                            kind: "local".to_string(),
                        }
                    }
                };
                insert_snapshot(&mut state, name, vec![source])?;
            }
            Operation::MergeSnapshot { name, sources } => {
                let sources = snapshot_sources(&state, sources.iter())?;
                insert_snapshot(&mut state, name, sources)?;
            }
            Operation::FilterSnapshot { name, source, .. } => {
                let sources = snapshot_sources(&state, std::iter::once(source))?;
                insert_snapshot(&mut state, name, sources)?;
            }
            Operation::DeleteSnapshot { name } => {
                if !state.snapshots.contains_key(name) {
                    return Err(format!("ERROR: snapshot with name {} not found", name));
                }
                if state.published_snapshots().contains(name) {
                    return Err(format!("ERROR: unable to drop: snapshot {} is published", name));
                }
                let used = state
                    .snapshots
                    .values()
                    .any(|s| s.snapshot_sources().any(|source| source == name));
                if used {
                    return Err(format!(
                        "ERROR: won't delete snapshot {} that was used as source for other snapshots",
                        name
                    ));
                }
                state.snapshots.remove(name);
            }
            Operation::RenameSnapshot { name, to } => {
                if state.snapshots.contains_key(to) {
                    return Err(format!(
                        "ERROR: unable to rename: snapshot {} already exists",
                        to
                    ));
                }
                let mut record = state
                    .snapshots
                    .remove(name)
                    .ok_or_else(|| format!("ERROR: snapshot with name {} not found", name))?;
                record.name = to.clone();
                state.snapshots.insert(to.clone(), record);
                // Sources are stored by identity, so every reference follows the rename
                for snapshot in state.snapshots.values_mut() {
                    for source in &mut snapshot.sources {
                        if source.kind == "snapshot" && &source.name == name {
                            source.name = to.clone();
                        }
                    }
                }
                for publish in state.publishes.values_mut() {
                    for source in &mut publish.sources {
                        if source.kind == "snapshot" && &source.name == name {
                            source.name = to.clone();
                        }
                    }
                }
            }
            Operation::CreatePublish {
                key,
                target,
                options,
            } => {
                if state.publishes.contains_key(key) {
                    return Err(format!(
                        "ERROR: prefix/distribution {} already used by another published repo",
                        key
                    ));
                }
                let sources = match target {
                    PublishTarget::Snapshots(snapshots) => {
                        published_sources(&state, &options.components, snapshots)?
                    }
                    PublishTarget::Repo(repo) => {
                        if !state.repos.contains_key(repo) {
                            return Err(format!("ERROR: local repo with name {} not found", repo));
                        }
                        let component = options.components.first().cloned().unwrap_or_default();
                        vec![PublishedSource {
                            component,
                            name: repo.clone(),
                            kind: "local".to_string(),
                        }]
                    }
                };
                state.publishes.insert(
                    key.clone(),
                    PublishRecord {
                        key: key.clone(),
                        sources,
                    },
                );
            }
            Operation::SwitchPublish {
                key,
                snapshots,
                components,
                ..
            } => {
                if !state.publishes.contains_key(key) {
                    return Err(format!("ERROR: published repo {} not found", key));
                }
                let sources = published_sources(&state, components, snapshots)?;
                if let Some(publish) = state.publishes.get_mut(key) {
                    publish.sources = sources;
                }
            }
            Operation::UpdatePublish { key, .. } => {
                if !state.publishes.contains_key(key) {
                    return Err(format!("ERROR: published repo {} not found", key));
                }
            }
        }
        Ok(())
    }
}

fn insert_snapshot(
    state: &mut LiveState,
    name: &str,
    sources: Vec<SourceRef>,
) -> std::result::Result<(), String> {
    if state.snapshots.contains_key(name) {
        return Err(format!("ERROR: snapshot with name {} already exists", name));
    }
    state.snapshots.insert(
        name.to_string(),
        SnapshotRecord {
            name: name.to_string(),
            sources,
        },
    );
    Ok(())
}

fn snapshot_sources<'a>(
    state: &LiveState,
    names: impl Iterator<Item = &'a String>,
) -> std::result::Result<Vec<SourceRef>, String> {
    names
        .map(|name| {
            if state.snapshots.contains_key(name) {
                Ok(SourceRef {
                    name: name.clone(),
                    kind: "snapshot".to_string(),
                })
            } else {
                Err(format!("ERROR: snapshot with name {} not found", name))
            }
        })
        .collect()
}

fn published_sources(
    state: &LiveState,
    components: &[String],
    snapshots: &[String],
) -> std::result::Result<Vec<PublishedSource>, String> {
    if components.len() != snapshots.len() {
        return Err(format!(
            "ERROR: mismatch in number of components ({}) and snapshots ({})",
            components.len(),
            snapshots.len()
        ));
    }
    components
        .iter()
        .zip(snapshots)
        .map(|(component, name)| {
            if state.snapshots.contains_key(name) {
                Ok(PublishedSource {
                    component: component.clone(),
                    name: name.clone(),
                    kind: "snapshot".to_string(),
                })
            } else {
                Err(format!("ERROR: snapshot with name {} not found", name))
            }
        })
        .collect()
}

impl StateSource for FakeAptly {
    fn query(&self, query: &Query) -> Result<String> {
        self.render(query)
    }
}

impl CommandRunner for FakeAptly {
    fn run(&self, operation: &Operation) -> Result<CommandOutput> {
        guard(&self.executed).push(operation.clone());
        let target = operation.target();
        if let Some(failure) = guard(&self.failures)
            .iter()
            .find(|f| f.kind == operation.kind() && f.target == target)
        {
            return Ok(CommandOutput::failed(failure.message.clone()));
        }
        Ok(match self.apply(operation) {
            Ok(()) => CommandOutput::ok(),
            Err(message) => CommandOutput::failed(message),
        })
    }
}
