//! # Configuration Schema and Parsing
//!
//! This module defines the desired-state document: the mirrors, local repos,
//! snapshot families and publishes aptly should end up with. The primary
//! format is TOML; YAML (deprecated) and JSON are accepted as well, selected
//! by file extension.
//!
//! ```toml
//! [mirror.debian]
//! archive = "http://deb.debian.org/debian"
//! distribution = "bookworm"
//! components = ["main"]
//! gpg-keys = ["6ED0E7B82643E131"]
//!
//! [snapshot."debian-%T"]
//! mirror = "debian"
//! timestamp = { time = "00:00" }
//! retention = { keep-count = 7 }
//!
//! [[publish.debian]]
//! distribution = "bookworm"
//! snapshots = [{ name = "debian-%T", timestamp = "current" }]
//! ```
//!
//! A snapshot with a plain name is built once. Setting `rotate = true` (or a
//! `rotate-via` template such as `"debian-current-old-%T"`) makes it rebuild
//! on every refreshing pass, moving the previous content aside under the
//! timestamped template first.
//!
//! Tables keep their declaration order (the `toml` crate's `preserve_order`
//! feature plus `IndexMap`), which the dependency resolver uses to break ties.
//!
//! ## Validation
//!
//! [`Config::validate`] runs every check that needs no external call: each
//! name referenced by a snapshot or publish must be defined in the document
//! ([`Error::ConfigReference`]), timestamped snapshot templates need a
//! schedule, and times, weekdays, ages and archive URLs must parse. Only
//! plain-named snapshots may rotate, and their `rotate-via` must contain `%T`.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::retention::RetentionPolicy;
use crate::timestamp::{self, NameTemplate, Schedule};

/// Keyserver used when a mirror does not name one
pub const DEFAULT_KEYSERVER: &str = "hkps://keys.openpgp.org";

/// The complete desired state
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Mirrors of upstream archives, keyed by mirror name
    #[serde(default)]
    pub mirror: IndexMap<String, MirrorSpec>,
    /// Local repositories, keyed by repo name
    #[serde(default)]
    pub repo: IndexMap<String, RepoSpec>,
    /// Snapshots, keyed by name template
    #[serde(default)]
    pub snapshot: IndexMap<String, SnapshotSpec>,
    /// Publishes, keyed by prefix; one entry per distribution
    #[serde(default)]
    pub publish: IndexMap<String, Vec<PublishSpec>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Accept either a single value or a list of values.
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    OneOrMany::<T>::deserialize(deserializer).map(Vec::from)
}

fn default_main() -> String {
    "main".to_string()
}

fn default_components() -> Vec<String> {
    vec![default_main()]
}

fn default_true() -> bool {
    true
}

/// Mirror of an upstream archive
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MirrorSpec {
    /// Upstream archive URL
    pub archive: String,
    pub distribution: String,
    #[serde(default = "default_components", deserialize_with = "one_or_many")]
    pub components: Vec<String>,
    /// Empty means "whatever aptly defaults to"
    #[serde(default, deserialize_with = "one_or_many")]
    pub architectures: Vec<String>,
    /// Trusted key ids or fingerprints the archive is signed with
    #[serde(default, deserialize_with = "one_or_many")]
    pub gpg_keys: Vec<String>,
    /// Fallback download URLs, positionally matching `gpg_keys`
    #[serde(default, deserialize_with = "one_or_many")]
    pub gpg_urls: Vec<String>,
    #[serde(default)]
    pub keyserver: Option<String>,
    /// Mirror source packages too
    #[serde(default)]
    pub sources: bool,
    /// Mirror udeb packages too
    #[serde(default)]
    pub udeb: bool,
    #[serde(default)]
    pub max_tries: Option<u32>,
}

impl MirrorSpec {
    /// The keyserver to import missing keys from.
    pub fn keyserver(&self) -> &str {
        self.keyserver.as_deref().unwrap_or(DEFAULT_KEYSERVER)
    }

    /// Fallback URL for the key at position `index` of `gpg_keys`.
    pub fn gpg_url(&self, index: usize) -> Option<&str> {
        self.gpg_urls.get(index).map(String::as_str)
    }
}

/// Locally managed package repository
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RepoSpec {
    #[serde(default = "default_main")]
    pub distribution: String,
    #[serde(default = "default_main")]
    pub component: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Selects an instance of a snapshot family relative to the current window:
/// 0 is the current instance, 1 the previous one, and so on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawBackRef")]
pub struct BackRef(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBackRef {
    Index(u32),
    Word(String),
}

impl TryFrom<RawBackRef> for BackRef {
    type Error = String;

    fn try_from(raw: RawBackRef) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawBackRef::Index(n) => Ok(BackRef(n)),
            RawBackRef::Word(word) => match word.as_str() {
                "current" => Ok(BackRef(0)),
                "previous" => Ok(BackRef(1)),
                other => other.parse().map(BackRef).map_err(|_| {
                    format!(
                        "invalid timestamp reference '{}', expected current, previous or a number",
                        other
                    )
                }),
            },
        }
    }
}

/// Reference to a snapshot from a merge, filter or publish
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SnapshotRef {
    /// Plain snapshot name (a template; `%T` means the current instance)
    Name(String),
    /// Name plus instance selector
    Spec(SnapshotRefSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SnapshotRefSpec {
    pub name: String,
    #[serde(default)]
    pub timestamp: Option<BackRef>,
    /// Publishes only: clone the outgoing snapshot under this name
    /// (`%T` is the unrounded current time) before switching
    #[serde(default)]
    pub archive_on_update: Option<String>,
}

impl SnapshotRef {
    /// Name of the referenced snapshot template.
    pub fn name(&self) -> &str {
        match self {
            SnapshotRef::Name(name) => name,
            SnapshotRef::Spec(spec) => &spec.name,
        }
    }

    /// The instance selector, defaulting to the current instance.
    pub fn back_ref(&self) -> u32 {
        match self {
            SnapshotRef::Name(_) => 0,
            SnapshotRef::Spec(spec) => spec.timestamp.unwrap_or_default().0,
        }
    }

    pub fn archive_on_update(&self) -> Option<&str> {
        match self {
            SnapshotRef::Name(_) => None,
            SnapshotRef::Spec(spec) => spec.archive_on_update.as_deref(),
        }
    }
}

impl From<&str> for SnapshotRef {
    fn from(name: &str) -> Self {
        SnapshotRef::Name(name.to_string())
    }
}

/// Rotation schedule of a timestamped snapshot family
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TimestampSpec {
    /// `HH:MM`, UTC
    pub time: String,
    /// `mon` .. `sun`; daily rotation when absent
    #[serde(default)]
    pub repeat_weekly: Option<String>,
}

impl TimestampSpec {
    pub fn schedule(&self) -> Result<Schedule> {
        Schedule::parse(&self.time, self.repeat_weekly.as_deref())
    }
}

/// Retention rules for old instances of a snapshot family
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetentionSpec {
    #[serde(default)]
    pub keep_count: Option<usize>,
    /// Age such as `30d` or `12h`
    #[serde(default)]
    pub max_age: Option<String>,
}

impl RetentionSpec {
    pub fn policy(&self) -> Result<RetentionPolicy> {
        let max_age = self.max_age.as_deref().map(timestamp::parse_age).transpose()?;
        Ok(RetentionPolicy {
            keep_count: self.keep_count,
            max_age,
        })
    }
}

/// Where a snapshot's packages come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    Mirror(String),
    Repo(String),
    /// Merge of other snapshots, in order
    Merge(Vec<SnapshotRef>),
    /// Subset of another snapshot matching an aptly package query
    Filter { source: SnapshotRef, query: String },
}

/// Snapshot definition, keyed in [`Config::snapshot`] by its name template
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSnapshotSpec")]
pub struct SnapshotSpec {
    pub source: SnapshotSource,
    pub timestamp: Option<TimestampSpec>,
    /// For timestamped templates this applies to the family; for rotating
    /// plain names, to the instances moved aside by rotation
    pub retention: RetentionSpec,
    /// Rebuild a plain-named snapshot from its refreshed source on every
    /// refreshing pass
    pub rotate: bool,
    /// Template (with `%T`) the outgoing snapshot is renamed to
    pub rotate_via: Option<String>,
}

impl SnapshotSpec {
    /// Name template rotated-out instances of `name` are renamed to.
    pub fn rotated_template(&self, name: &str) -> String {
        self.rotate_via
            .clone()
            .unwrap_or_else(|| format!("{}-rotated-%T", name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    pub source: SnapshotRef,
    pub query: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawSnapshotSpec {
    mirror: Option<String>,
    repo: Option<String>,
    #[serde(default, deserialize_with = "option_one_or_many")]
    merge: Option<Vec<SnapshotRef>>,
    filter: Option<FilterSpec>,
    timestamp: Option<TimestampSpec>,
    #[serde(default)]
    retention: RetentionSpec,
    #[serde(default)]
    rotate: bool,
    rotate_via: Option<String>,
}

fn option_one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    one_or_many(deserializer).map(Some)
}

impl TryFrom<RawSnapshotSpec> for SnapshotSpec {
    type Error = String;

    fn try_from(raw: RawSnapshotSpec) -> std::result::Result<Self, Self::Error> {
        let mut sources = Vec::new();
        if let Some(mirror) = raw.mirror {
            sources.push(SnapshotSource::Mirror(mirror));
        }
        if let Some(repo) = raw.repo {
            sources.push(SnapshotSource::Repo(repo));
        }
        if let Some(merge) = raw.merge {
            sources.push(SnapshotSource::Merge(merge));
        }
        if let Some(filter) = raw.filter {
            sources.push(SnapshotSource::Filter {
                source: filter.source,
                query: filter.query,
            });
        }
        if sources.len() != 1 {
            return Err(
                "a snapshot needs exactly one of `mirror`, `repo`, `merge` or `filter`".to_string(),
            );
        }
        Ok(SnapshotSpec {
            source: sources.remove(0),
            timestamp: raw.timestamp,
            retention: raw.retention,
            rotate: raw.rotate || raw.rotate_via.is_some(),
            rotate_via: raw.rotate_via,
        })
    }
}

/// Identity of a publish: prefix plus distribution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublishKey {
    pub prefix: String,
    pub distribution: String,
}

impl PublishKey {
    pub fn new(prefix: impl Into<String>, distribution: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            distribution: distribution.into(),
        }
    }

    /// Parse `prefix/distribution` or `prefix distribution`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (prefix, distribution) = value
            .split_once(' ')
            .or_else(|| value.rsplit_once('/'))?;
        let (prefix, distribution) = (prefix.trim(), distribution.trim());
        if prefix.is_empty() || distribution.is_empty() || distribution.contains(' ') {
            return None;
        }
        Some(Self::new(prefix, distribution))
    }
}

impl fmt::Display for PublishKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.distribution)
    }
}

/// What a publish exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishSource {
    /// One snapshot per component
    Snapshots(Vec<SnapshotRef>),
    Repo(String),
    /// Whatever another publish currently exposes
    Publish(PublishKey),
}

/// One published distribution under a prefix
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPublishSpec")]
pub struct PublishSpec {
    pub distribution: String,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub label: Option<String>,
    pub origin: Option<String>,
    /// Signing key reference passed through to aptly
    pub gpg_key: Option<String>,
    pub skip_contents: bool,
    /// `false` pins the publish: drift is reported, not switched
    pub automatic_update: bool,
    pub source: PublishSource,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawPublishSpec {
    #[serde(default = "default_main")]
    distribution: String,
    #[serde(default = "default_components", deserialize_with = "one_or_many")]
    components: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    architectures: Vec<String>,
    label: Option<String>,
    origin: Option<String>,
    gpg_key: Option<String>,
    #[serde(default)]
    skip_contents: bool,
    #[serde(default = "default_true")]
    automatic_update: bool,
    #[serde(default, deserialize_with = "option_one_or_many")]
    snapshots: Option<Vec<SnapshotRef>>,
    repo: Option<String>,
    publish: Option<String>,
}

impl TryFrom<RawPublishSpec> for PublishSpec {
    type Error = String;

    fn try_from(raw: RawPublishSpec) -> std::result::Result<Self, Self::Error> {
        let source = match (raw.snapshots, raw.repo, raw.publish) {
            (Some(snapshots), None, None) => PublishSource::Snapshots(snapshots),
            (None, Some(repo), None) => PublishSource::Repo(repo),
            (None, None, Some(publish)) => PublishSource::Publish(
                PublishKey::parse(&publish)
                    .ok_or_else(|| format!("invalid publish reference '{}', expected prefix/distribution", publish))?,
            ),
            _ => {
                return Err(
                    "a publish needs exactly one of `snapshots`, `repo` or `publish`".to_string(),
                )
            }
        };
        Ok(PublishSpec {
            distribution: raw.distribution,
            components: raw.components,
            architectures: raw.architectures,
            label: raw.label,
            origin: raw.origin,
            gpg_key: raw.gpg_key,
            skip_contents: raw.skip_contents,
            automatic_update: raw.automatic_update,
            source,
        })
    }
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Yaml,
    Json,
}

impl Format {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            other => Err(Error::ConfigParse {
                message: format!(
                    "unknown config file extension: {}",
                    other.unwrap_or("<none>")
                ),
                hint: Some("use a .toml, .yaml/.yml or .json file".to_string()),
            }),
        }
    }
}

/// Parse a configuration document in the given format.
pub fn parse(content: &str, format: Format) -> Result<Config> {
    match format {
        Format::Toml => Ok(toml::from_str(content)?),
        Format::Yaml => {
            warn!("YAML configuration is deprecated, convert it with `aptly-reconcile convert`");
            Ok(serde_yaml::from_str(content)?)
        }
        Format::Json => Ok(serde_json::from_str(content)?),
    }
}

/// Read and parse a configuration file, choosing the format by extension.
pub fn from_file(path: &Path) -> Result<Config> {
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    parse(&content, format)
}

/// Convert a configuration document to TOML.
///
/// With `add_defaults`, missing `components` and `distribution` fields of
/// mirrors and publishes are filled with `main`. The result is checked to
/// parse as a [`Config`] before it is returned.
pub fn convert(content: &str, format: Format, add_defaults: bool) -> Result<String> {
    let mut value: toml::Value = match format {
        Format::Toml => toml::from_str(content)?,
        Format::Yaml => serde_yaml::from_str(content)?,
        Format::Json => serde_json::from_str(content)?,
    };
    if add_defaults {
        add_default_fields(&mut value);
    }
    let _: Config = value.clone().try_into()?;
    Ok(toml::to_string_pretty(&value)?)
}

fn add_default_fields(value: &mut toml::Value) {
    fn fill(table: &mut toml::Value) {
        if let Some(table) = table.as_table_mut() {
            for key in ["components", "distribution"] {
                table
                    .entry(key)
                    .or_insert_with(|| toml::Value::String(default_main()));
            }
        }
    }

    if let Some(mirrors) = value.get_mut("mirror").and_then(|m| m.as_table_mut()) {
        for mirror in mirrors.iter_mut().map(|(_, v)| v) {
            fill(mirror);
        }
    }
    if let Some(publishes) = value.get_mut("publish").and_then(|p| p.as_table_mut()) {
        for entries in publishes.iter_mut().map(|(_, v)| v) {
            if let Some(entries) = entries.as_array_mut() {
                entries.iter_mut().for_each(fill);
            }
        }
    }
}

impl Config {
    /// All publish entries with their identity, in declaration order.
    pub fn publishes(&self) -> impl Iterator<Item = (PublishKey, &PublishSpec)> {
        self.publish.iter().flat_map(|(prefix, entries)| {
            entries
                .iter()
                .map(move |spec| (PublishKey::new(prefix.clone(), spec.distribution.clone()), spec))
        })
    }

    /// Look up a publish entry by identity.
    pub fn publish_spec(&self, key: &PublishKey) -> Option<&PublishSpec> {
        self.publish
            .get(&key.prefix)?
            .iter()
            .find(|spec| spec.distribution == key.distribution)
    }

    /// Run every check that needs no external call.
    ///
    /// Fails with [`Error::ConfigReference`] on the first name that does not
    /// resolve, and with [`Error::ConfigParse`] on malformed values.
    pub fn validate(&self) -> Result<()> {
        for (name, mirror) in &self.mirror {
            url::Url::parse(&mirror.archive).map_err(|e| Error::ConfigParse {
                message: format!("mirror '{}': invalid archive URL '{}': {}", name, mirror.archive, e),
                hint: None,
            })?;
            if mirror.components.is_empty() {
                return Err(Error::config(format!("mirror '{}' has no components", name)));
            }
        }

        for (name, snapshot) in &self.snapshot {
            let entity = format!("snapshot {}", name);
            let template = NameTemplate::parse(name)?;
            match (&snapshot.timestamp, template.is_timestamped()) {
                (None, true) => {
                    return Err(Error::ConfigParse {
                        message: format!("snapshot '{}' is timestamped but has no schedule", name),
                        hint: Some(format!(
                            "add `timestamp = {{ time = \"00:00\" }}` to [snapshot.\"{}\"]",
                            name
                        )),
                    })
                }
                (Some(ts), _) => {
                    ts.schedule().map_err(|e| wrap(&entity, e))?;
                }
                (None, false) => {}
            }
            snapshot.retention.policy().map_err(|e| wrap(&entity, e))?;
            if snapshot.rotate {
                if template.is_timestamped() {
                    return Err(Error::ConfigParse {
                        message: format!("snapshot '{}' is timestamped and cannot rotate", name),
                        hint: Some("timestamped snapshots rotate through their schedule".to_string()),
                    });
                }
                let via = NameTemplate::parse(&snapshot.rotated_template(name))?;
                if !via.is_timestamped() {
                    return Err(Error::config(format!(
                        "snapshot '{}': rotate-via '{}' must contain %T",
                        name,
                        via.as_str()
                    )));
                }
            }

            match &snapshot.source {
                SnapshotSource::Mirror(mirror) => {
                    self.require(self.mirror.contains_key(mirror), &entity, "mirror", mirror)?
                }
                SnapshotSource::Repo(repo) => {
                    self.require(self.repo.contains_key(repo), &entity, "repo", repo)?
                }
                SnapshotSource::Merge(sources) => {
                    if sources.is_empty() {
                        return Err(Error::config(format!("snapshot '{}' merges nothing", name)));
                    }
                    for source in sources {
                        self.require_snapshot(&entity, source)?;
                    }
                }
                SnapshotSource::Filter { source, .. } => self.require_snapshot(&entity, source)?,
            }
        }

        let mut seen = HashSet::new();
        for (key, publish) in self.publishes() {
            let entity = format!("publish {}", key);
            if !seen.insert(key.clone()) {
                return Err(Error::config(format!("publish '{}' is defined twice", key)));
            }
            match &publish.source {
                PublishSource::Snapshots(snapshots) => {
                    for snapshot in snapshots {
                        self.require_snapshot(&entity, snapshot)?;
                        if let Some(archive) = snapshot.archive_on_update() {
                            NameTemplate::parse(archive)?;
                        }
                    }
                    if snapshots.len() != publish.components.len() {
                        return Err(Error::ConfigParse {
                            message: format!(
                                "publish '{}' has {} snapshots but {} components",
                                key,
                                snapshots.len(),
                                publish.components.len()
                            ),
                            hint: Some("list one component per snapshot".to_string()),
                        });
                    }
                }
                PublishSource::Repo(repo) => {
                    self.require(self.repo.contains_key(repo), &entity, "repo", repo)?
                }
                PublishSource::Publish(other) => self.require(
                    self.publish_spec(other).is_some(),
                    &entity,
                    "publish",
                    &other.to_string(),
                )?,
            }
        }
        Ok(())
    }

    fn require(&self, found: bool, entity: &str, kind: &str, name: &str) -> Result<()> {
        if found {
            Ok(())
        } else {
            Err(Error::ConfigReference {
                entity: entity.to_string(),
                missing: format!("{} {}", kind, name),
            })
        }
    }

    fn require_snapshot(&self, entity: &str, reference: &SnapshotRef) -> Result<()> {
        self.require(
            self.snapshot.contains_key(reference.name()),
            entity,
            "snapshot",
            reference.name(),
        )
    }
}

fn wrap(entity: &str, error: Error) -> Error {
    match error {
        Error::Timestamp { message } => Error::config(format!("{}: {}", entity, message)),
        other => other,
    }
}
