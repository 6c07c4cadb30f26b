//! Per-run cache of [`LiveState`].
//!
//! The first access runs a full round of queries. Later accesses return the
//! same `Arc` until an executed operation invalidates the entity it touched;
//! the next access then re-lists every kind and re-runs `show` only for
//! invalidated or newly listed entities.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use rayon::prelude::*;

use super::parse;
use super::{
    ListKind, LiveState, MirrorRecord, PublishRecord, Query, RepoRecord, SnapshotRecord,
    StateSource, Touched,
};
use crate::config::PublishKey;
use crate::error::{Error, Result};

#[derive(Default)]
struct Cache {
    current: Option<Arc<LiveState>>,
    dirty: HashSet<Touched>,
    rounds: usize,
}

/// Reads live state through a [`StateSource`] and caches it for one run
pub struct StateReader {
    source: Arc<dyn StateSource>,
    cache: Mutex<Cache>,
}

impl StateReader {
    pub fn new(source: Arc<dyn StateSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(Cache::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Cache>> {
        self.cache.lock().map_err(|_| Error::LockPoisoned {
            context: "state reader cache".to_string(),
        })
    }

    /// Current live state, read on first use and after invalidation.
    ///
    /// Concurrent callers serialize on the cache lock, so all of them observe
    /// the result of the same round of queries.
    pub fn live(&self) -> Result<Arc<LiveState>> {
        let mut cache = self.lock()?;
        if let Some(current) = &cache.current {
            if cache.dirty.is_empty() {
                return Ok(Arc::clone(current));
            }
        }

        let state = {
            let previous = cache.current.as_deref().map(|state| (state, &cache.dirty));
            read_state(self.source.as_ref(), previous)?
        };
        let state = Arc::new(state);
        cache.current = Some(Arc::clone(&state));
        cache.dirty.clear();
        cache.rounds += 1;
        Ok(state)
    }

    /// Discard the cache and run a full round of queries.
    pub fn refresh(&self) -> Result<Arc<LiveState>> {
        {
            let mut cache = self.lock()?;
            cache.current = None;
            cache.dirty.clear();
        }
        self.live()
    }

    /// Mark an entity as changed so the next access re-reads it.
    pub fn invalidate(&self, touched: Touched) -> Result<()> {
        debug!("Invalidating {:?}", touched);
        self.lock()?.dirty.insert(touched);
        Ok(())
    }

    /// Number of query rounds run so far.
    pub fn rounds(&self) -> Result<usize> {
        Ok(self.lock()?.rounds)
    }

    pub fn mirrors(&self) -> Result<Vec<String>> {
        Ok(self.live()?.mirrors.keys().cloned().collect())
    }

    pub fn repos(&self) -> Result<Vec<String>> {
        Ok(self.live()?.repos.keys().cloned().collect())
    }

    pub fn snapshots(&self) -> Result<Vec<String>> {
        Ok(self.live()?.snapshots.keys().cloned().collect())
    }

    /// Each publish and the snapshots it exposes.
    pub fn publishes(&self) -> Result<BTreeMap<PublishKey, Vec<String>>> {
        Ok(self.live()?.publish_map())
    }

    pub fn gpg_keys(&self) -> Result<Vec<String>> {
        Ok(self.live()?.gpg_keys.iter().cloned().collect())
    }

    pub fn has_dependency(&self, parent: &str, candidate: &str) -> Result<bool> {
        Ok(self.live()?.has_dependency(parent, candidate))
    }
}

type Previous<'a> = Option<(&'a LiveState, &'a HashSet<Touched>)>;

fn reusable<'a, T>(
    previous: Previous<'a>,
    touched: Touched,
    lookup: impl FnOnce(&'a LiveState) -> Option<&'a T>,
) -> Option<&'a T> {
    let (state, dirty) = previous?;
    if dirty.contains(&touched) || dirty.contains(&Touched::All) {
        return None;
    }
    lookup(state)
}

/// Run one round of queries, reusing clean records from `previous`.
fn read_state(source: &dyn StateSource, previous: Previous<'_>) -> Result<LiveState> {
    debug!(
        "Reading live state ({})",
        if previous.is_some() { "incremental" } else { "full" }
    );

    let list = |kind: ListKind| -> Result<Vec<String>> {
        parse::parse_list(&format!("{} list", kind.as_str()), &source.query(&Query::List(kind))?)
    };

    let mirrors = list(ListKind::Mirror)?
        .par_iter()
        .map(|name| -> Result<MirrorRecord> {
            if let Some(record) =
                reusable(previous, Touched::Mirror(name.clone()), |s| s.mirrors.get(name))
            {
                return Ok(record.clone());
            }
            parse::parse_mirror_show(name, &source.query(&Query::ShowMirror(name.clone()))?)
        })
        .collect::<Result<Vec<_>>>()?;

    let repos = list(ListKind::Repo)?
        .par_iter()
        .map(|name| -> Result<RepoRecord> {
            if let Some(record) =
                reusable(previous, Touched::Repo(name.clone()), |s| s.repos.get(name))
            {
                return Ok(record.clone());
            }
            parse::parse_repo_show(name, &source.query(&Query::ShowRepo(name.clone()))?)
        })
        .collect::<Result<Vec<_>>>()?;

    let snapshots = list(ListKind::Snapshot)?
        .par_iter()
        .map(|name| -> Result<SnapshotRecord> {
            if let Some(record) =
                reusable(previous, Touched::Snapshot(name.clone()), |s| s.snapshots.get(name))
            {
                return Ok(record.clone());
            }
            parse::parse_snapshot_show(name, &source.query(&Query::ShowSnapshot(name.clone()))?)
        })
        .collect::<Result<Vec<_>>>()?;

    let publish_keys = parse::parse_publish_list(&source.query(&Query::List(ListKind::Publish))?)?;
    let publishes = publish_keys
        .par_iter()
        .map(|key| -> Result<PublishRecord> {
            if let Some(record) =
                reusable(previous, Touched::Publish(key.clone()), |s| s.publishes.get(key))
            {
                return Ok(record.clone());
            }
            parse::parse_publish_show(key, &source.query(&Query::ShowPublish(key.clone()))?)
        })
        .collect::<Result<Vec<_>>>()?;

    let gpg_keys = match previous {
        Some((state, dirty)) if !dirty.contains(&Touched::GpgKeys) && !dirty.contains(&Touched::All) => {
            state.gpg_keys.clone()
        }
        _ => parse::parse_gpg_keys(&source.query(&Query::GpgKeys)?)?,
    };

    Ok(LiveState {
        mirrors: mirrors.into_iter().map(|r| (r.name.clone(), r)).collect(),
        repos: repos.into_iter().map(|r| (r.name.clone(), r)).collect(),
        snapshots: snapshots.into_iter().map(|r| (r.name.clone(), r)).collect(),
        publishes: publishes.into_iter().map(|r| (r.key.clone(), r)).collect(),
        gpg_keys,
    })
}
