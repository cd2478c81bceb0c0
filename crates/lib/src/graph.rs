//! Dependency graph construction over a declaration set.
//!
//! Edges are the union of explicit `depends_on` entries and edges inferred
//! from parameter refs, always pointing from a dependency to its dependent.
//! Construction is a pure transformation: it either yields a validated DAG
//! or fails with the full cycle path / the offending unresolved reference.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::resource::{DeclarationSet, ResourceId};

/// Errors from graph construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  /// The declarations do not form a DAG. Carries the ordered cycle members.
  #[error("dependency cycle detected: {}", format_cycle(.0))]
  Cycle(Vec<ResourceId>),

  /// A ref or `depends_on` entry names a resource that is not declared.
  #[error("resource '{resource}' references unknown resource '{target}'")]
  UnresolvedReference { resource: ResourceId, target: ResourceId },
}

fn format_cycle(cycle: &[ResourceId]) -> String {
  let mut path: Vec<&str> = cycle.iter().map(|id| id.0.as_str()).collect();
  if let Some(first) = path.first().copied() {
    path.push(first);
  }
  path.join(" -> ")
}

/// A validated dependency DAG over one declaration set.
#[derive(Debug)]
pub struct ResourceGraph {
  graph: DiGraph<ResourceId, ()>,
  nodes: BTreeMap<ResourceId, NodeIndex>,
}

impl ResourceGraph {
  /// Build the graph from a declaration set.
  ///
  /// Nodes are inserted in id order and edges are deduplicated, so the graph
  /// (and everything derived from it) is deterministic for a given input.
  pub fn build(specs: &DeclarationSet) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = BTreeMap::new();

    for id in specs.keys() {
      let idx = graph.add_node(id.clone());
      nodes.insert(id.clone(), idx);
    }

    for (id, spec) in specs {
      let dependent = nodes[id];

      let mut targets: BTreeSet<ResourceId> = spec.depends_on.iter().cloned().collect();
      for r in spec.parameter_refs() {
        targets.insert(r.resource.clone());
      }

      for target in targets {
        let Some(&dep) = nodes.get(&target) else {
          return Err(GraphError::UnresolvedReference {
            resource: id.clone(),
            target,
          });
        };
        graph.update_edge(dep, dependent, ());
      }
    }

    let built = Self { graph, nodes };

    if let Some(cycle) = built.find_cycle() {
      return Err(GraphError::Cycle(cycle));
    }

    Ok(built)
  }

  /// Number of resources in the graph.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  /// True if the graph has no resources.
  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Direct dependencies of a resource, in id order.
  pub fn dependencies(&self, id: &ResourceId) -> Vec<ResourceId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of a resource, in id order.
  pub fn dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: &ResourceId, direction: Direction) -> Vec<ResourceId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };

    let mut out: Vec<ResourceId> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    out.sort();
    out
  }

  /// Deterministic topological order: Kahn's algorithm, ties broken by
  /// ascending resource id. Repeated runs over an unchanged graph produce
  /// an identical order.
  pub fn topo_order(&self) -> Vec<ResourceId> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    let mut ready: BinaryHeap<Reverse<ResourceId>> = BinaryHeap::new();

    for (id, &idx) in &self.nodes {
      let degree = self.graph.neighbors_directed(idx, Direction::Incoming).count();
      in_degree.insert(idx, degree);
      if degree == 0 {
        ready.push(Reverse(id.clone()));
      }
    }

    let mut order = Vec::with_capacity(self.nodes.len());
    while let Some(Reverse(id)) = ready.pop() {
      let idx = self.nodes[&id];
      order.push(id);

      for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        let degree = in_degree.get_mut(&neighbor).expect("all nodes have an in-degree entry");
        *degree -= 1;
        if *degree == 0 {
          ready.push(Reverse(self.graph[neighbor].clone()));
        }
      }
    }

    debug_assert_eq!(order.len(), self.nodes.len(), "graph was validated acyclic");
    order
  }

  /// Parallel execution waves: each wave contains resources whose
  /// dependencies all live in earlier waves. Waves are sorted by id.
  pub fn waves(&self) -> Vec<Vec<ResourceId>> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    for &idx in self.nodes.values() {
      in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut remaining: BTreeSet<ResourceId> = self.nodes.keys().cloned().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let wave: Vec<ResourceId> = remaining
        .iter()
        .filter(|id| in_degree[&self.nodes[*id]] == 0)
        .cloned()
        .collect();

      debug_assert!(!wave.is_empty(), "graph was validated acyclic");

      for id in &wave {
        remaining.remove(id);
        for neighbor in self.graph.neighbors_directed(self.nodes[id], Direction::Outgoing) {
          if let Some(degree) = in_degree.get_mut(&neighbor) {
            *degree = degree.saturating_sub(1);
          }
        }
      }

      waves.push(wave);
    }

    waves
  }

  /// Find one cycle and return its members in dependency order.
  ///
  /// Runs Kahn's algorithm; nodes left over all sit on (or behind) a cycle.
  /// Walking incoming edges inside the leftover set, always picking the
  /// smallest id, must eventually revisit a node, which closes the cycle.
  fn find_cycle(&self) -> Option<Vec<ResourceId>> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    let mut queue: Vec<NodeIndex> = Vec::new();

    for &idx in self.nodes.values() {
      let degree = self.graph.neighbors_directed(idx, Direction::Incoming).count();
      in_degree.insert(idx, degree);
      if degree == 0 {
        queue.push(idx);
      }
    }

    let mut removed = 0usize;
    while let Some(idx) = queue.pop() {
      removed += 1;
      for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        let degree = in_degree.get_mut(&neighbor).expect("all nodes have an in-degree entry");
        *degree -= 1;
        if *degree == 0 {
          queue.push(neighbor);
        }
      }
    }

    if removed == self.nodes.len() {
      return None;
    }

    let leftover: BTreeSet<ResourceId> = self
      .nodes
      .iter()
      .filter(|(_, idx)| in_degree[*idx] > 0)
      .map(|(id, _)| id.clone())
      .collect();

    let start = leftover.iter().next().cloned()?;
    let mut path: Vec<ResourceId> = Vec::new();
    let mut seen: HashMap<ResourceId, usize> = HashMap::new();
    let mut current = start;

    loop {
      if let Some(&pos) = seen.get(&current) {
        let mut cycle: Vec<ResourceId> = path[pos..].to_vec();
        // The walk followed incoming edges; reverse to dependency order.
        cycle.reverse();
        return Some(cycle);
      }

      seen.insert(current.clone(), path.len());
      path.push(current.clone());

      current = self
        .dependencies(&current)
        .into_iter()
        .find(|dep| leftover.contains(dep))
        .expect("every leftover node has a predecessor in the leftover set");
    }
  }
}
