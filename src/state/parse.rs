//! Strict parsers for `aptly ... list -raw`, `aptly ... show` and
//! `gpg --list-keys --with-colons` output.
//!
//! Every parser either returns a record for each row of well-formed input or
//! fails with [`Error::StateUnavailable`]; partial results are never returned.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use regex::Regex;

use super::{
    normalize_key, MirrorRecord, PublishRecord, PublishedSource, RepoRecord, SnapshotRecord,
    SourceRef,
};
use crate::config::PublishKey;
use crate::error::{Error, Result};

/// Key/value fields and the `Sources:` block of a `show` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowBlock {
    /// First occurrence of each key wins
    pub fields: IndexMap<String, String>,
    /// Indented lines of the `Sources:` block, trimmed
    pub sources: Vec<String>,
}

impl ShowBlock {
    fn require(&self, what: &str, key: &str) -> Result<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::state(format!("{}: missing `{}` field", what, key)))
    }
}

fn malformed(what: &str, line_no: usize, line: &str) -> Error {
    Error::state(format!(
        "{}: malformed output at line {}: {:?}",
        what,
        line_no + 1,
        line
    ))
}

/// `name [kind]` in a snapshot's `Sources:` block
const SOURCE_LINE: &str = r"^(\S+) \[(\w+)\]$";

/// `component: name [kind]` in a publish's `Sources:` block
const PUBLISH_SOURCE_LINE: &str = r"^([\w.+-]+): (\S+) \[(\w+)\]$";

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse `aptly mirror|repo|snapshot list -raw`: one name per non-blank line.
pub fn parse_list(what: &str, output: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for (line_no, line) in output.lines().enumerate() {
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        if name.split_whitespace().count() != 1 {
            return Err(malformed(what, line_no, line));
        }
        names.push(name.to_string());
    }
    Ok(names)
}

/// Parse `aptly publish list -raw`: one `prefix distribution` per line.
pub fn parse_publish_list(output: &str) -> Result<Vec<PublishKey>> {
    let mut keys = Vec::new();
    for (line_no, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [prefix, distribution] => keys.push(PublishKey::new(*prefix, *distribution)),
            _ => return Err(malformed("publish list", line_no, line)),
        }
    }
    Ok(keys)
}

/// Split `show` output into `Key: value` fields and the `Sources:` block.
pub fn parse_show(what: &str, output: &str) -> Result<ShowBlock> {
    let mut block = ShowBlock::default();
    let mut in_sources = false;

    for (line_no, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            in_sources = false;
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if !in_sources {
                return Err(malformed(what, line_no, line));
            }
            block.sources.push(line.trim().to_string());
            continue;
        }
        in_sources = false;
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(what, line_no, line))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            return Err(malformed(what, line_no, line));
        }
        if key == "Sources" {
            if !value.is_empty() {
                return Err(malformed(what, line_no, line));
            }
            in_sources = true;
            continue;
        }
        block
            .fields
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
    Ok(block)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `aptly mirror show NAME`.
pub fn parse_mirror_show(name: &str, output: &str) -> Result<MirrorRecord> {
    let what = format!("mirror show {}", name);
    let block = parse_show(&what, output)?;
    Ok(MirrorRecord {
        name: name.to_string(),
        archive: block.require(&what, "Archive Root URL")?.to_string(),
        distribution: block.require(&what, "Distribution")?.to_string(),
        components: split_list(block.require(&what, "Components")?),
        architectures: block
            .fields
            .get("Architectures")
            .map(|v| split_list(v))
            .unwrap_or_default(),
    })
}

/// Parse `aptly repo show NAME`.
pub fn parse_repo_show(name: &str, output: &str) -> Result<RepoRecord> {
    let what = format!("repo show {}", name);
    let block = parse_show(&what, output)?;
    Ok(RepoRecord {
        name: name.to_string(),
        distribution: block.require(&what, "Default Distribution")?.to_string(),
        component: block.require(&what, "Default Component")?.to_string(),
    })
}

/// Parse `aptly snapshot show NAME`; sources are `name [kind]` lines.
pub fn parse_snapshot_show(name: &str, output: &str) -> Result<SnapshotRecord> {
    let what = format!("snapshot show {}", name);
    let block = parse_show(&what, output)?;
    let re = Regex::new(SOURCE_LINE).map_err(Error::Regex)?;
    let sources = block
        .sources
        .iter()
        .map(|line| {
            let caps = re
                .captures(line)
                .ok_or_else(|| Error::state(format!("{}: malformed source {:?}", what, line)))?;
            Ok(SourceRef {
                name: caps[1].to_string(),
                kind: caps[2].to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SnapshotRecord {
        name: name.to_string(),
        sources,
    })
}

/// Parse `aptly publish show DIST PREFIX`; sources are `component: name [kind]` lines.
pub fn parse_publish_show(key: &PublishKey, output: &str) -> Result<PublishRecord> {
    let what = format!("publish show {}", key);
    let block = parse_show(&what, output)?;
    let re = Regex::new(PUBLISH_SOURCE_LINE).map_err(Error::Regex)?;
    let sources = block
        .sources
        .iter()
        .map(|line| {
            let caps = re
                .captures(line)
                .ok_or_else(|| Error::state(format!("{}: malformed source {:?}", what, line)))?;
            Ok(PublishedSource {
                component: caps[1].to_string(),
                name: caps[2].to_string(),
                kind: caps[3].to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(PublishRecord {
        key: key.clone(),
        sources,
    })
}

/// Parse `gpg --list-keys --with-colons`.
///
/// `pub`/`sub` records contribute their key id (field 5) and its last eight
/// digits; `fpr` records contribute the fingerprint (field 10). Other record
/// types are ignored.
pub fn parse_gpg_keys(output: &str) -> Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();
    for (line_no, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 2 {
            return Err(malformed("gpg --list-keys", line_no, line));
        }
        match fields[0] {
            "pub" | "sub" => {
                let id = fields
                    .get(4)
                    .copied()
                    .filter(|id| is_hex(id))
                    .ok_or_else(|| malformed("gpg --list-keys", line_no, line))?;
                let id = normalize_key(id);
                if id.len() > 8 {
                    keys.insert(id[id.len() - 8..].to_string());
                }
                keys.insert(id);
            }
            "fpr" => {
                let fingerprint = fields
                    .get(9)
                    .copied()
                    .filter(|fpr| is_hex(fpr))
                    .ok_or_else(|| malformed("gpg --list-keys", line_no, line))?;
                keys.insert(normalize_key(fingerprint));
            }
            _ => {}
        }
    }
    Ok(keys)
}
