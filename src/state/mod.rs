//! # Live State
//!
//! This module models what aptly and gpg currently report: the mirrors,
//! repos, snapshots and publishes that exist, plus the trusted key ids.
//!
//! ## Design
//!
//! - [`LiveState`] is an immutable value produced by one round of queries.
//!   Reconcilers receive it by reference and never mutate it.
//! - [`StateSource`] is the seam to the external tools. [`AptlySource`] shells
//!   out to `aptly`/`gpg`; tests substitute an in-memory double.
//! - [`parse`] turns the textual `list`/`show` output into records, failing
//!   with [`Error::StateUnavailable`] on anything it does not recognise.
//! - [`reader::StateReader`] owns the per-run cache and re-reads only what an
//!   executed operation touched.

pub mod parse;
pub mod reader;

pub use reader::StateReader;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::process::Command;

use log::debug;

use crate::config::PublishKey;
use crate::error::{Error, Result};
use crate::operation::{keyring_args, Operation, Tool};

/// Observed attributes of a mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRecord {
    pub name: String,
    pub archive: String,
    pub distribution: String,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
}

/// Observed attributes of a local repo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub name: String,
    pub distribution: String,
    pub component: String,
}

/// One entry of a `Sources:` block: a name and its kind (`snapshot`, `repo`, `local`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub name: String,
    pub sources: Vec<SourceRef>,
}

impl SnapshotRecord {
    /// Names of the snapshots this one was merged or filtered from.
    pub fn snapshot_sources(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .filter(|s| s.kind == "snapshot")
            .map(|s| s.name.as_str())
    }
}

/// One component of a publish and what it exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSource {
    pub component: String,
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub key: PublishKey,
    pub sources: Vec<PublishedSource>,
}

impl PublishRecord {
    /// Published snapshot names, in component order.
    pub fn snapshots(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.kind == "snapshot")
            .map(|s| s.name.clone())
            .collect()
    }

    /// The local repo this publish exposes, if any.
    pub fn repo(&self) -> Option<&str> {
        self.sources
            .iter()
            .find(|s| s.kind == "local")
            .map(|s| s.name.as_str())
    }
}

/// Everything aptly and gpg reported in one consistent round of queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveState {
    pub mirrors: BTreeMap<String, MirrorRecord>,
    pub repos: BTreeMap<String, RepoRecord>,
    pub snapshots: BTreeMap<String, SnapshotRecord>,
    pub publishes: BTreeMap<PublishKey, PublishRecord>,
    /// Upper-case long ids, short ids and fingerprints
    pub gpg_keys: BTreeSet<String>,
}

/// Canonical form of a key id or fingerprint for comparison.
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    let key = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);
    key.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

impl LiveState {
    pub fn mirror_names(&self) -> BTreeSet<String> {
        self.mirrors.keys().cloned().collect()
    }

    pub fn repo_names(&self) -> BTreeSet<String> {
        self.repos.keys().cloned().collect()
    }

    pub fn snapshot_names(&self) -> BTreeSet<String> {
        self.snapshots.keys().cloned().collect()
    }

    /// Each publish and the snapshots it currently exposes.
    pub fn publish_map(&self) -> BTreeMap<PublishKey, Vec<String>> {
        self.publishes
            .iter()
            .map(|(key, record)| (key.clone(), record.snapshots()))
            .collect()
    }

    /// Whether a configured key id or fingerprint is in the trusted keyring.
    pub fn has_gpg_key(&self, key: &str) -> bool {
        self.gpg_keys.contains(&normalize_key(key))
    }

    /// Whether `parent` was built, directly or transitively, from `candidate`.
    ///
    /// Walks the recorded merge/filter sources; cycles in the recorded data
    /// terminate the walk instead of looping.
    pub fn has_dependency(&self, parent: &str, candidate: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![parent];
        while let Some(name) = stack.pop() {
            if !visited.insert(name) {
                continue;
            }
            if let Some(record) = self.snapshots.get(name) {
                for source in record.snapshot_sources() {
                    if source == candidate {
                        return true;
                    }
                    stack.push(source);
                }
            }
        }
        false
    }

    /// Every snapshot name currently exposed by some publish.
    pub fn published_snapshots(&self) -> BTreeSet<String> {
        self.publishes
            .values()
            .flat_map(|p| p.snapshots())
            .collect()
    }
}

/// Entity kinds that `aptly <kind> list -raw` can enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Mirror,
    Repo,
    Snapshot,
    Publish,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Mirror => "mirror",
            ListKind::Repo => "repo",
            ListKind::Snapshot => "snapshot",
            ListKind::Publish => "publish",
        }
    }
}

/// A read-only question to aptly or gpg
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    List(ListKind),
    ShowMirror(String),
    ShowRepo(String),
    ShowSnapshot(String),
    ShowPublish(PublishKey),
    GpgKeys,
}

impl Query {
    pub fn tool(&self) -> Tool {
        match self {
            Query::GpgKeys => Tool::Gpg,
            _ => Tool::Aptly,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match self {
            Query::List(kind) => owned(&[kind.as_str(), "list", "-raw"]),
            Query::ShowMirror(name) => owned(&["mirror", "show", name.as_str()]),
            Query::ShowRepo(name) => owned(&["repo", "show", name.as_str()]),
            Query::ShowSnapshot(name) => owned(&["snapshot", "show", name.as_str()]),
            Query::ShowPublish(key) => {
                owned(&["publish", "show", key.distribution.as_str(), key.prefix.as_str()])
            }
            Query::GpgKeys => {
                let mut args = keyring_args();
                args.push("--list-keys".to_string());
                args.push("--with-colons".to_string());
                args
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tool().default_program(), self.args().join(" "))
    }
}

/// Trait for state queries - allows substituting aptly and gpg in tests
pub trait StateSource: Send + Sync {
    /// Run one query and return its standard output.
    ///
    /// Implementations fail with [`Error::StateUnavailable`] when the tool
    /// cannot be reached or exits unsuccessfully.
    fn query(&self, query: &Query) -> Result<String>;
}

/// The default `StateSource`, which runs the system `aptly` and `gpg`
#[derive(Debug, Clone)]
pub struct AptlySource {
    aptly: String,
    gpg: String,
}

impl AptlySource {
    pub fn new(aptly: impl Into<String>, gpg: impl Into<String>) -> Self {
        Self {
            aptly: aptly.into(),
            gpg: gpg.into(),
        }
    }
}

impl Default for AptlySource {
    fn default() -> Self {
        Self::new(Tool::Aptly.default_program(), Tool::Gpg.default_program())
    }
}

impl StateSource for AptlySource {
    fn query(&self, query: &Query) -> Result<String> {
        let program = match query.tool() {
            Tool::Aptly => &self.aptly,
            Tool::Gpg => &self.gpg,
        };
        debug!("Querying {}", query);
        let output = Command::new(program)
            .args(query.args())
            .output()
            .map_err(|e| Error::state(format!("could not run `{}`: {}", query, e)))?;

        if !output.status.success() {
            return Err(Error::state(format!(
                "`{}` exited with {}: {}",
                query,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|_| Error::state(format!("`{}` produced non-UTF-8 output", query)))
    }
}

/// The live entity an executed operation changed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Touched {
    Mirror(String),
    Repo(String),
    Snapshot(String),
    Publish(PublishKey),
    GpgKeys,
    /// A rename changes the names other records refer to
    All,
}

impl Touched {
    pub fn of(operation: &Operation) -> Self {
        match operation {
            Operation::ImportGpgKey { .. } => Touched::GpgKeys,
            Operation::CreateMirror { name, .. }
            | Operation::UpdateMirror { name, .. }
            | Operation::DropMirror { name } => Touched::Mirror(name.clone()),
            Operation::CreateRepo { name, .. } => Touched::Repo(name.clone()),
            Operation::CreateSnapshot { name, .. }
            | Operation::MergeSnapshot { name, .. }
            | Operation::FilterSnapshot { name, .. }
            | Operation::DeleteSnapshot { name } => Touched::Snapshot(name.clone()),
            Operation::RenameSnapshot { .. } => Touched::All,
            Operation::CreatePublish { key, .. }
            | Operation::SwitchPublish { key, .. }
            | Operation::UpdatePublish { key, .. } => Touched::Publish(key.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str, sources: &[&str]) -> SnapshotRecord {
        SnapshotRecord {
            name: name.to_string(),
            sources: sources
                .iter()
                .map(|s| SourceRef {
                    name: s.to_string(),
                    kind: "snapshot".to_string(),
                })
                .collect(),
        }
    }

    fn state_with(records: Vec<SnapshotRecord>) -> LiveState {
        let mut state = LiveState::default();
        for record in records {
            state.snapshots.insert(record.name.clone(), record);
        }
        state
    }

    #[test]
    fn test_has_dependency_transitive() {
        let state = state_with(vec![
            snapshot("a", &[]),
            snapshot("b", &["a"]),
            snapshot("c", &["b"]),
        ]);
        assert!(state.has_dependency("c", "a"));
        assert!(state.has_dependency("b", "a"));
        assert!(!state.has_dependency("a", "c"));
        assert!(!state.has_dependency("c", "missing"));
    }

    #[test]
    fn test_has_dependency_tolerates_recorded_cycle() {
        let state = state_with(vec![snapshot("a", &["b"]), snapshot("b", &["a"])]);
        assert!(state.has_dependency("a", "b"));
        assert!(!state.has_dependency("a", "z"));
    }

    #[test]
    fn test_has_gpg_key_normalizes() {
        let mut state = LiveState::default();
        state.gpg_keys.insert("2841988729C7F3FF".to_string());
        state.gpg_keys.insert("29C7F3FF".to_string());
        assert!(state.has_gpg_key("2841988729c7f3ff"));
        assert!(state.has_gpg_key("0x29C7F3FF"));
        assert!(!state.has_gpg_key("7FAC5991"));
    }

    #[test]
    fn test_publish_record_accessors() {
        let record = PublishRecord {
            key: PublishKey::new(".", "stable"),
            sources: vec![
                PublishedSource {
                    component: "main".to_string(),
                    name: "nightly-20240101T0000Z".to_string(),
                    kind: "snapshot".to_string(),
                },
                PublishedSource {
                    component: "contrib".to_string(),
                    name: "extra".to_string(),
                    kind: "snapshot".to_string(),
                },
            ],
        };
        assert_eq!(record.snapshots(), vec!["nightly-20240101T0000Z", "extra"]);
        assert_eq!(record.repo(), None);
    }

    #[test]
    fn test_query_args() {
        assert_eq!(
            Query::ShowPublish(PublishKey::new("ubuntu", "stable")).to_string(),
            "aptly publish show stable ubuntu"
        );
        assert_eq!(Query::List(ListKind::Snapshot).to_string(), "aptly snapshot list -raw");
        assert_eq!(
            Query::GpgKeys.to_string(),
            "gpg --no-default-keyring --keyring trustedkeys.gpg --list-keys --with-colons"
        );
    }

    #[test]
    fn test_touched_of_operation() {
        let op = Operation::UpdatePublish {
            key: PublishKey::new(".", "stable"),
            skip_contents: false,
        };
        assert_eq!(Touched::of(&op), Touched::Publish(PublishKey::new(".", "stable")));
        let op = Operation::ImportGpgKey {
            key: "ABCD".to_string(),
            keyserver: "hkps://keys.openpgp.org".to_string(),
            url: None,
        };
        assert_eq!(Touched::of(&op), Touched::GpgKeys);
        let op = Operation::RenameSnapshot {
            name: "current".to_string(),
            to: "current-rotated-20240101T0000Z".to_string(),
        };
        assert_eq!(Touched::of(&op), Touched::All);
    }

    #[test]
    fn test_aptly_source_missing_binary_is_state_unavailable() {
        let source = AptlySource::new("/nonexistent/aptly", "/nonexistent/gpg");
        match source.query(&Query::List(ListKind::Mirror)) {
            Err(Error::StateUnavailable { message }) => assert!(message.contains("mirror list")),
            other => panic!("Expected StateUnavailable, got {:?}", other),
        }
    }
}
