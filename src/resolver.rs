//! # Dependency Resolution
//!
//! Determines the order in which configured entities are reconciled, so that
//! every entity comes after everything it is built from:
//!
//! - a snapshot after the mirror, repo or snapshots it is created, merged or
//!   filtered from;
//! - a publish after the snapshots, repo or other publish it exposes.
//!
//! ## Process
//!
//! 1.  **Graph construction**: one node per configured entity, numbered in
//!     declaration order (mirrors, repos, snapshots, publishes; each in file
//!     order). A reference to an undefined name fails with
//!     [`Error::ConfigReference`].
//!
//! 2.  **Topological sort**: Kahn's algorithm. Among the entities that are
//!     ready, the one declared first goes next, so the result is the same on
//!     every call for the same configuration.
//!
//! 3.  **Cycle reporting**: if some entities never become ready, a
//!     depth-first search over them finds one cycle and reports it as
//!     `snapshot a -> snapshot b -> snapshot a` via [`Error::CycleDetected`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crate::config::{Config, PublishKey, PublishSource, SnapshotSource};
use crate::error::{Error, Result};

/// A configured entity, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Mirror(String),
    Repo(String),
    /// Keyed by name template
    Snapshot(String),
    Publish(PublishKey),
}

impl EntityRef {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Mirror(_) => "mirror",
            EntityRef::Repo(_) => "repo",
            EntityRef::Snapshot(_) => "snapshot",
            EntityRef::Publish(_) => "publish",
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Mirror(name) | EntityRef::Repo(name) | EntityRef::Snapshot(name) => {
                write!(f, "{} {}", self.kind(), name)
            }
            EntityRef::Publish(key) => write!(f, "{} {}", self.kind(), key),
        }
    }
}

/// Entities and their "built from" edges
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<EntityRef>,
    index: HashMap<EntityRef, usize>,
    /// `deps[i]` lists the nodes node `i` depends on
    deps: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph for a configuration.
    pub fn build(config: &Config) -> Result<Self> {
        let mut nodes = Vec::new();
        nodes.extend(config.mirror.keys().cloned().map(EntityRef::Mirror));
        nodes.extend(config.repo.keys().cloned().map(EntityRef::Repo));
        nodes.extend(config.snapshot.keys().cloned().map(EntityRef::Snapshot));
        nodes.extend(config.publishes().map(|(key, _)| EntityRef::Publish(key)));

        let index: HashMap<EntityRef, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.clone(), i))
            .collect();

        let mut graph = Self {
            deps: vec![Vec::new(); nodes.len()],
            nodes,
            index,
        };

        for (name, spec) in &config.snapshot {
            let from = EntityRef::Snapshot(name.clone());
            let targets = match &spec.source {
                SnapshotSource::Mirror(mirror) => vec![EntityRef::Mirror(mirror.clone())],
                SnapshotSource::Repo(repo) => vec![EntityRef::Repo(repo.clone())],
                SnapshotSource::Merge(sources) => sources
                    .iter()
                    .map(|s| EntityRef::Snapshot(s.name().to_string()))
                    .collect(),
                SnapshotSource::Filter { source, .. } => {
                    vec![EntityRef::Snapshot(source.name().to_string())]
                }
            };
            for target in targets {
                graph.add_edge(&from, target)?;
            }
        }

        for (key, spec) in config.publishes() {
            let from = EntityRef::Publish(key);
            let targets = match &spec.source {
                PublishSource::Snapshots(snapshots) => snapshots
                    .iter()
                    .map(|s| EntityRef::Snapshot(s.name().to_string()))
                    .collect(),
                PublishSource::Repo(repo) => vec![EntityRef::Repo(repo.clone())],
                PublishSource::Publish(other) => vec![EntityRef::Publish(other.clone())],
            };
            for target in targets {
                graph.add_edge(&from, target)?;
            }
        }

        Ok(graph)
    }

    fn add_edge(&mut self, from: &EntityRef, to: EntityRef) -> Result<()> {
        let to_index = *self.index.get(&to).ok_or_else(|| Error::ConfigReference {
            entity: from.to_string(),
            missing: to.to_string(),
        })?;
        let from_index = self.index[from];
        if !self.deps[from_index].contains(&to_index) {
            self.deps[from_index].push(to_index);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of an entity, in declaration order of the reference.
    pub fn dependencies(&self, entity: &EntityRef) -> Vec<&EntityRef> {
        self.index
            .get(entity)
            .map(|&i| self.deps[i].iter().map(|&d| &self.nodes[d]).collect())
            .unwrap_or_default()
    }

    /// Topological order, dependencies first, ties broken by declaration order.
    pub fn order(&self) -> Result<Vec<EntityRef>> {
        let n = self.nodes.len();
        let mut pending: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (node, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| pending[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.nodes[node].clone());
            for &dependent in &dependents[node] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<usize> = (0..n).filter(|&i| pending[i] > 0).collect();
            return Err(Error::CycleDetected {
                cycle: self.find_cycle(&stuck),
            });
        }
        Ok(order)
    }

    /// Describe one cycle among nodes that never became ready.
    fn find_cycle(&self, stuck: &[usize]) -> String {
        let mut visited = vec![false; self.nodes.len()];
        let mut path = Vec::new();
        for &start in stuck {
            if let Some(cycle) = self.walk(start, &mut visited, &mut path) {
                return cycle
                    .iter()
                    .map(|&i| self.nodes[i].to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
            }
        }
        // Kahn left nodes behind, so some cycle exists among them
        stuck
            .iter()
            .map(|&i| self.nodes[i].to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn walk(&self, node: usize, visited: &mut [bool], path: &mut Vec<usize>) -> Option<Vec<usize>> {
        if let Some(pos) = path.iter().position(|&p| p == node) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if visited[node] {
            return None;
        }
        visited[node] = true;
        path.push(node);
        for &dep in &self.deps[node] {
            if let Some(cycle) = self.walk(dep, visited, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    /// Render the graph in Graphviz dot syntax; edges point at dependencies.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph entities {\n");
        for node in &self.nodes {
            out.push_str(&format!("    \"{}\";\n", node));
        }
        for (from, deps) in self.deps.iter().enumerate() {
            for &to in deps {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\";\n",
                    self.nodes[from], self.nodes[to]
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Order every configured entity so that dependencies come first.
pub fn order(config: &Config) -> Result<Vec<EntityRef>> {
    DependencyGraph::build(config)?.order()
}
