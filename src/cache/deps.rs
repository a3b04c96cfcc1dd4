//! Reverse dependency index between content nodes.
//!
//! For each `(dimension, workspace)` partition the graph maps a target node to
//! the source nodes whose rendering embeds it. Invalidating a target therefore
//! means re-rendering every recorded source.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use super::item::CacheItem;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::deps";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Partition {
    dimension: String,
    workspace: String,
}

type Edges = HashMap<String, Vec<String>>;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    partitions: RwLock<HashMap<Partition, Arc<RwLock<Edges>>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the edges declared by already stored items.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a CacheItem>) -> Self {
        let graph = Self::new();
        for item in items {
            graph.record(item);
        }
        graph
    }

    /// Record every dependency declared by `item`.
    pub fn record(&self, item: &CacheItem) {
        if item.dependencies.is_empty() {
            return;
        }
        let partition = self.partition(&item.dimension, &item.workspace);
        let mut edges = rw_write(&partition, SOURCE, "record");
        for target in &item.dependencies {
            insert_edge(&mut edges, &item.id, target);
        }
    }

    /// Record that `source`'s rendering depends on `target`.
    pub fn set(&self, source: &str, target: &str, dimension: &str, workspace: &str) {
        let partition = self.partition(dimension, workspace);
        insert_edge(&mut rw_write(&partition, SOURCE, "set"), source, target);
    }

    /// Nodes that depend on `target`; empty when none were recorded.
    pub fn get(&self, target: &str, dimension: &str, workspace: &str) -> Vec<String> {
        let key = Partition {
            dimension: dimension.to_string(),
            workspace: workspace.to_string(),
        };
        let partition = rw_read(&self.partitions, SOURCE, "get")
            .get(&key)
            .map(Arc::clone);

        partition
            .map(|edges| {
                rw_read(&edges, SOURCE, "get")
                    .get(target)
                    .cloned()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Total number of recorded edges across partitions.
    pub fn edge_count(&self) -> usize {
        let partitions: Vec<_> = rw_read(&self.partitions, SOURCE, "edge_count")
            .values()
            .map(Arc::clone)
            .collect();
        partitions
            .iter()
            .map(|edges| {
                rw_read(edges, SOURCE, "edge_count")
                    .values()
                    .map(Vec::len)
                    .sum::<usize>()
            })
            .sum()
    }

    fn partition(&self, dimension: &str, workspace: &str) -> Arc<RwLock<Edges>> {
        let key = Partition {
            dimension: dimension.to_string(),
            workspace: workspace.to_string(),
        };
        if let Some(edges) = rw_read(&self.partitions, SOURCE, "partition").get(&key) {
            return Arc::clone(edges);
        }
        Arc::clone(
            rw_write(&self.partitions, SOURCE, "partition")
                .entry(key)
                .or_default(),
        )
    }
}

/// Duplicate edges are skipped so repeated re-renders do not grow the list.
fn insert_edge(edges: &mut Edges, source: &str, target: &str) {
    let sources = edges.entry(target.to_string()).or_default();
    if !sources.iter().any(|existing| existing == source) {
        sources.push(source.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::item::{NodeKey, VALID_UNTIL_FOREVER};

    #[test]
    fn get_returns_every_dependent() {
        let graph = DependencyGraph::new();
        graph.set("A", "X", "de", "live");
        graph.set("B", "X", "de", "live");

        let mut dependents = graph.get("X", "de", "live");
        dependents.sort();
        assert_eq!(dependents, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn unknown_target_yields_empty_list() {
        let graph = DependencyGraph::new();
        assert!(graph.get("X", "de", "live").is_empty());
        graph.set("A", "X", "de", "live");
        assert!(graph.get("Y", "de", "live").is_empty());
    }

    #[test]
    fn partitions_are_isolated() {
        let graph = DependencyGraph::new();
        graph.set("A", "X", "de", "live");
        assert!(graph.get("X", "en", "live").is_empty());
        assert!(graph.get("X", "de", "stage").is_empty());
    }

    #[test]
    fn repeated_edges_are_recorded_once() {
        let graph = DependencyGraph::new();
        graph.set("A", "X", "de", "live");
        graph.set("A", "X", "de", "live");
        assert_eq!(graph.get("X", "de", "live"), vec!["A".to_string()]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn rebuilds_from_stored_items() {
        let page = CacheItem::new(
            &NodeKey::new("page", "de", "live"),
            "<main/>",
            vec!["header".to_string(), "footer".to_string()],
            VALID_UNTIL_FOREVER,
        );
        let graph = DependencyGraph::from_items([&page]);

        assert_eq!(graph.get("header", "de", "live"), vec!["page".to_string()]);
        assert_eq!(graph.get("footer", "de", "live"), vec!["page".to_string()]);
        assert_eq!(graph.edge_count(), 2);
    }
}
