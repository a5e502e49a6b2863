// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::geo::haversine_distance;
use crate::kd::KdTree;
use crate::{Edge, Node, TurnRestriction};

/// A [Graph] behind a readers-writer lock, as shared between concurrent
/// queries and the occasional weight update. Queries hold the read guard
/// for their whole search and therefore observe a consistent snapshot;
/// mutation takes the write guard and blocks until no readers remain.
pub type SharedGraph = Arc<RwLock<Graph>>;

/// Error conditions reported by the graph store.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// An operation which requires at least one node was invoked
    /// on a graph without any.
    #[error("graph is empty")]
    EmptyGraph,

    /// A weight multiplier was not a positive, finite number.
    #[error("invalid weight multiplier: {0}")]
    InvalidMultiplier(f64),

    /// A replacement edge weight was negative or not finite.
    #[error("invalid edge weight: {0}")]
    InvalidWeight(f64),
}

/// Represents a road network as a set of [Nodes](Node) connected by directed
/// [Edges](Edge), with [turn restrictions](TurnRestriction) indexed by their
/// via node.
///
/// Both a forward (node → outgoing edges) and a reverse (node → incoming
/// edges) adjacency index are maintained; the reverse index stores copies of
/// the forward records, so every mutation keeps the two in lockstep.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<i64, Node>,
    edges: HashMap<i64, Vec<Edge>>,
    reverse_edges: HashMap<i64, Vec<Edge>>,
    restrictions: HashMap<i64, Vec<TurnRestriction>>,
    spatial_index: Option<KdTree>,
}

/// A flat, point-in-time copy of a [Graph]'s contents, used by the
/// snapshot codec. Iteration order of the vectors is unspecified.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub reverse_edges: Vec<Edge>,
    pub restrictions: Vec<TurnRestriction>,
}

impl Graph {
    /// Creates a new, empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps this graph in a [SharedGraph] handle.
    pub fn into_shared(self) -> SharedGraph {
        Arc::new(RwLock::new(self))
    }

    /// Inserts a [Node]. Nodes are immutable once inserted: re-adding an
    /// existing id is ignored. Returns `true` if the node was inserted.
    ///
    /// Inserting a node discards the spatial index, if one was built.
    pub fn add_node(&mut self, node: Node) -> bool {
        match self.nodes.entry(node.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(node);
                self.spatial_index = None;
                true
            }
        }
    }

    /// Inserts a directed [Edge], updating both the forward and the reverse
    /// adjacency index. Both endpoints must already exist in the graph;
    /// otherwise nothing is inserted and `false` is returned.
    ///
    /// Parallel edges between the same endpoints are permitted and treated
    /// independently.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
            return false;
        }

        self.reverse_edges
            .entry(edge.to)
            .or_default()
            .push(edge.clone());
        self.edges.entry(edge.from).or_default().push(edge);
        true
    }

    /// Registers a [TurnRestriction], indexed by its via node.
    /// The via node must exist in the graph; otherwise the restriction is
    /// dropped and `false` is returned.
    pub fn add_restriction(&mut self, restriction: TurnRestriction) -> bool {
        if !self.nodes.contains_key(&restriction.via_node) {
            return false;
        }

        self.restrictions
            .entry(restriction.via_node)
            .or_default()
            .push(restriction);
        true
    }

    /// Retrieves a [Node] with the provided id.
    pub fn get_node(&self, id: i64) -> Option<Node> {
        self.nodes.get(&id).copied()
    }

    /// Gets all outgoing [Edges](Edge) from a node with a given id.
    pub fn outgoing_edges(&self, id: i64) -> &[Edge] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Gets all incoming [Edges](Edge) into a node with a given id.
    pub fn incoming_edges(&self, id: i64) -> &[Edge] {
        self.reverse_edges
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Gets all [turn restrictions](TurnRestriction) whose via node has the given id.
    pub fn restrictions_at(&self, id: i64) -> &[TurnRestriction] {
        self.restrictions
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Checks whether the transition from `from_way` onto `to_way` across
    /// `via_node` is permitted by the registered turn restrictions:
    ///
    /// 1. a matching prohibitory (`no_*`) restriction forbids the turn;
    /// 2. otherwise, if any mandatory (`only_*`) restriction applies to
    ///    `from_way`, the turn is permitted only onto a way one of them names;
    /// 3. otherwise the turn is permitted.
    ///
    /// A `from_way` of zero means "no predecessor way" and permits everything.
    pub fn is_valid_turn(&self, from_way: i64, via_node: i64, to_way: i64) -> bool {
        if from_way == 0 {
            return true;
        }

        let mut has_mandatory = false;
        let mut explicitly_allowed = false;

        for r in self.restrictions_at(via_node) {
            if r.from_way != from_way {
                continue;
            }

            if r.kind.is_prohibitory() {
                if r.to_way == to_way {
                    return false;
                }
            } else {
                has_mandatory = true;
                if r.to_way == to_way {
                    explicitly_allowed = true;
                }
            }
        }

        !has_mandatory || explicitly_allowed
    }

    /// Finds the closest [Node] to the given position by great-circle
    /// distance, ignoring edge admissibility. Ties on equal distance
    /// resolve to the smaller node id.
    ///
    /// Uses the spatial index when one has been built (see
    /// [Graph::build_spatial_index]); otherwise falls back to a linear scan
    /// over every node. Both produce identical results.
    pub fn nearest_node(&self, lat: f64, lon: f64) -> Result<Node, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        if let Some(index) = &self.spatial_index {
            return Ok(index.nearest(lat, lon));
        }

        self.nodes
            .values()
            .min_by(|a, b| {
                haversine_distance(lat, lon, a.lat, a.lon)
                    .total_cmp(&haversine_distance(lat, lon, b.lat, b.lon))
                    .then(a.id.cmp(&b.id))
            })
            .copied()
            .ok_or(GraphError::EmptyGraph)
    }

    /// Builds the k-d tree used to answer [Graph::nearest_node] queries.
    /// The index is discarded whenever a node is inserted, so this is
    /// typically called once, at the end of ingestion or loading.
    pub fn build_spatial_index(&mut self) {
        let mut nodes: Vec<Node> = self.nodes.values().copied().collect();
        self.spatial_index = KdTree::build(&mut nodes);
    }

    /// Multiplies the weight of every edge originating from the OSM way
    /// `way_id` by `multiplier`, and returns the number of (forward) edges
    /// mutated. The reverse copies of the affected edges move together with
    /// the forward records.
    pub fn update_weight_by_way(
        &mut self,
        way_id: i64,
        multiplier: f64,
    ) -> Result<usize, GraphError> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(GraphError::InvalidMultiplier(multiplier));
        }

        let mut count = 0;
        for edges in self.edges.values_mut() {
            for edge in edges.iter_mut().filter(|e| e.way_id == way_id) {
                edge.weight *= multiplier;
                count += 1;
            }
        }
        for edges in self.reverse_edges.values_mut() {
            for edge in edges.iter_mut().filter(|e| e.way_id == way_id) {
                edge.weight *= multiplier;
            }
        }

        Ok(count)
    }

    /// Replaces the weight of every edge from `from` to `to` (parallel edges
    /// included) and returns the number of (forward) edges mutated.
    pub fn update_weight(&mut self, from: i64, to: i64, weight: f64) -> Result<usize, GraphError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(GraphError::InvalidWeight(weight));
        }

        let mut count = 0;
        if let Some(edges) = self.edges.get_mut(&from) {
            for edge in edges.iter_mut().filter(|e| e.to == to) {
                edge.weight = weight;
                count += 1;
            }
        }
        if let Some(edges) = self.reverse_edges.get_mut(&to) {
            for edge in edges.iter_mut().filter(|e| e.from == from) {
                edge.weight = weight;
            }
        }

        Ok(count)
    }

    /// Returns the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of directed edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Returns an iterator over all [Nodes](Node) in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Copies the graph's contents into a flat [GraphSnapshot].
    pub fn export(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().copied().collect(),
            edges: self.edges.values().flatten().cloned().collect(),
            reverse_edges: self.reverse_edges.values().flatten().cloned().collect(),
            restrictions: self.restrictions.values().flatten().copied().collect(),
        }
    }

    /// Reconstructs a graph from a [GraphSnapshot].
    ///
    /// If the snapshot carries no reverse edges while forward edges are
    /// present, the reverse index is rebuilt from the forward edges; the
    /// rebuild is deterministic and equivalent to re-inserting every edge.
    /// Edges or restrictions referencing unknown nodes are dropped.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut g = Graph::new();
        for node in snapshot.nodes {
            g.add_node(node);
        }

        let rebuild_reverse = snapshot.reverse_edges.is_empty();
        for edge in snapshot.edges {
            if !g.nodes.contains_key(&edge.from) || !g.nodes.contains_key(&edge.to) {
                continue;
            }
            if rebuild_reverse {
                g.add_edge(edge);
            } else {
                g.edges.entry(edge.from).or_default().push(edge);
            }
        }
        if !rebuild_reverse {
            for edge in snapshot.reverse_edges {
                if !g.nodes.contains_key(&edge.from) || !g.nodes.contains_key(&edge.to) {
                    continue;
                }
                g.reverse_edges.entry(edge.to).or_default().push(edge);
            }
        }

        for restriction in snapshot.restrictions {
            g.add_restriction(restriction);
        }

        g.build_spatial_index();
        g
    }
}
