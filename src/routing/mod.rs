// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLockReadGuard};

use crate::geo::is_valid_position;
use crate::graph::{Graph, GraphError, SharedGraph};
use crate::profile::{Profile, ProfileError};

mod astar;
mod bidirectional;

/// Maximum number of state expansions per query, defending against
/// pathological inputs; hitting it fails the query with
/// [RouteError::NoRoute].
pub const MAX_EXPANSIONS: usize = 100_000;

/// Nominal travel speed used to derive route durations, in m/s (~50 km/h).
pub(crate) const NOMINAL_SPEED_MPS: f64 = 13.89;

/// Penalty multiplier applied to every edge of an already-emitted route
/// when searching for alternatives.
const EDGE_PENALTY: f64 = 1.5;

/// Highest tolerated fraction of a previously accepted route's nodes that
/// an alternative may share with it.
const MAX_SIMILARITY: f64 = 0.7;

/// Error conditions which may occur when answering a routing query.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// A query coordinate is non-finite or outside the lat/lon bounds.
    #[error("invalid coordinates ({0}, {1})")]
    InvalidCoordinates(f64, f64),

    /// No admissible path exists between the snapped endpoints, or the
    /// search gave up after [MAX_EXPANSIONS] expansions.
    #[error("no route found")]
    NoRoute,

    /// An edge referenced a node absent from the graph. This indicates a
    /// corrupted graph, not a bad query.
    #[error("node {0} not in graph")]
    UnknownNode(i64),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Result of a routing query: the node ids visited from origin to
/// destination (at least one), the total physical length of the path and
/// the estimated travel time.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub nodes: Vec<i64>,

    /// Sum of the base weights of the traversed edges, in meters.
    pub distance: f64,

    /// Estimated travel time, in seconds.
    pub duration: f64,
}

impl Route {
    /// The degenerate route produced when origin and destination snap to
    /// the same node.
    fn single(node: i64) -> Self {
        Self {
            nodes: vec![node],
            distance: 0.0,
            duration: 0.0,
        }
    }
}

/// Answers shortest-path queries over a [SharedGraph].
///
/// The router holds no per-query state and no ambient profile: every query
/// carries its effective [Profile] explicitly, so a single router may be
/// used from any number of threads. Each query holds the graph's read
/// guard for its duration and thus observes a consistent snapshot.
#[derive(Debug, Clone)]
pub struct Router {
    graph: SharedGraph,
}

impl Router {
    pub fn new(graph: SharedGraph) -> Self {
        Self { graph }
    }

    /// Returns a handle to the underlying graph.
    pub fn graph(&self) -> SharedGraph {
        self.graph.clone()
    }

    fn read_graph(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finds the cheapest route between two positions under the given
    /// profile using unidirectional A*. This is the only search path which
    /// honours turn restrictions.
    pub fn find_route(
        &self,
        from_lat: f64,
        from_lon: f64,
        to_lat: f64,
        to_lon: f64,
        profile: &Profile,
    ) -> Result<Route, RouteError> {
        validate_position(from_lat, from_lon)?;
        validate_position(to_lat, to_lon)?;

        let g = self.read_graph();
        let (start, goal) = snap(&g, from_lat, from_lon, to_lat, to_lon)?;
        if start == goal {
            return Ok(Route::single(start));
        }

        astar::search(&g, profile, start, goal, &HashMap::new(), MAX_EXPANSIONS)
    }

    /// Finds a route between two positions by searching from both ends at
    /// once. Typically 2-5x faster than [Router::find_route] on long
    /// queries, at the price of ignoring turn restrictions.
    pub fn find_route_bidirectional(
        &self,
        from_lat: f64,
        from_lon: f64,
        to_lat: f64,
        to_lon: f64,
        profile: &Profile,
    ) -> Result<Route, RouteError> {
        validate_position(from_lat, from_lon)?;
        validate_position(to_lat, to_lon)?;

        let g = self.read_graph();
        let (start, goal) = snap(&g, from_lat, from_lon, to_lat, to_lon)?;
        if start == goal {
            return Ok(Route::single(start));
        }

        bidirectional::search(&g, profile, start, goal, MAX_EXPANSIONS)
    }

    /// Finds up to `count` routes between two positions by iterative edge
    /// penalisation: after each accepted route, its edges cost 1.5x more
    /// for the following searches. A candidate sharing more than 70% of
    /// any accepted route's nodes stops the iteration, as does a failed
    /// search; the routes accepted so far are returned. The first route is
    /// always returned if one exists.
    pub fn find_routes(
        &self,
        from_lat: f64,
        from_lon: f64,
        to_lat: f64,
        to_lon: f64,
        profile: &Profile,
        count: usize,
    ) -> Result<Vec<Route>, RouteError> {
        validate_position(from_lat, from_lon)?;
        validate_position(to_lat, to_lon)?;

        let g = self.read_graph();
        let (start, goal) = snap(&g, from_lat, from_lon, to_lat, to_lon)?;
        if start == goal {
            return Ok(vec![Route::single(start)]);
        }

        let count = count.max(1);
        let mut penalties: HashMap<(i64, i64), f64> = HashMap::new();
        let mut routes: Vec<Route> = Vec::with_capacity(count);

        for attempt in 0..count {
            let candidate =
                match astar::search(&g, profile, start, goal, &penalties, MAX_EXPANSIONS) {
                    Ok(route) => route,
                    Err(RouteError::NoRoute) if attempt > 0 => break,
                    Err(e) => return Err(e),
                };

            if attempt > 0 && !is_sufficiently_different(&candidate, &routes) {
                break;
            }

            for pair in candidate.nodes.windows(2) {
                penalties.insert((pair[0], pair[1]), EDGE_PENALTY);
            }
            routes.push(candidate);
        }

        Ok(routes)
    }

    /// Multiplies the weight of every edge belonging to the given OSM way,
    /// returning the number of edges mutated. Blocks until in-flight
    /// queries release the graph; queries started afterwards observe the
    /// new weights.
    pub fn update_weight_by_way(
        &self,
        way_id: i64,
        multiplier: f64,
    ) -> Result<usize, GraphError> {
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .update_weight_by_way(way_id, multiplier)
    }
}

fn validate_position(lat: f64, lon: f64) -> Result<(), RouteError> {
    if is_valid_position(lat, lon) {
        Ok(())
    } else {
        Err(RouteError::InvalidCoordinates(lat, lon))
    }
}

/// Snaps both query endpoints to their nearest nodes. Snapping uses plain
/// great-circle distance and ignores admissibility; the caller takes what
/// snaps.
fn snap(
    g: &Graph,
    from_lat: f64,
    from_lon: f64,
    to_lat: f64,
    to_lon: f64,
) -> Result<(i64, i64), RouteError> {
    let start = g.nearest_node(from_lat, from_lon)?;
    let goal = g.nearest_node(to_lat, to_lon)?;
    Ok((start.id, goal.id))
}

fn is_sufficiently_different(candidate: &Route, accepted: &[Route]) -> bool {
    let candidate_nodes: HashSet<i64> = candidate.nodes.iter().copied().collect();

    accepted.iter().all(|prior| {
        let overlap = prior
            .nodes
            .iter()
            .filter(|node| candidate_nodes.contains(node))
            .count();
        overlap as f64 / prior.nodes.len() as f64 <= MAX_SIMILARITY
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Edge, Node};

    fn road(from: i64, to: i64, weight: f64, way: i64) -> Edge {
        Edge {
            from,
            to,
            weight,
            way_id: way,
            max_speed: 0.0,
            tags: HashMap::from_iter([("highway".to_string(), "residential".to_string())]),
        }
    }

    fn two_way(g: &mut Graph, from: i64, to: i64, weight: f64, way: i64) {
        g.add_edge(road(from, to, weight, way));
        g.add_edge(road(to, from, weight, way));
    }

    /// A diamond: 1 → {2, 3} → 4, equal arm lengths.
    fn diamond() -> Router {
        let mut g = Graph::new();
        g.add_node(Node { id: 1, lat: 0.0, lon: 0.0 });
        g.add_node(Node { id: 2, lat: 0.001, lon: 0.001 });
        g.add_node(Node { id: 3, lat: -0.001, lon: 0.001 });
        g.add_node(Node { id: 4, lat: 0.0, lon: 0.002 });
        two_way(&mut g, 1, 2, 160.0, 12);
        two_way(&mut g, 2, 4, 160.0, 24);
        two_way(&mut g, 1, 3, 160.0, 13);
        two_way(&mut g, 3, 4, 160.0, 34);
        Router::new(g.into_shared())
    }

    #[test]
    fn rejects_invalid_coordinates() {
        let router = diamond();
        let profile = Profile::car();

        for (lat, lon) in [(91.0, 0.0), (0.0, -181.0), (f64::NAN, 0.0)] {
            assert!(matches!(
                router.find_route(lat, lon, 0.0, 0.002, &profile),
                Err(RouteError::InvalidCoordinates(..))
            ));
            assert!(matches!(
                router.find_route(0.0, 0.0, lat, lon, &profile),
                Err(RouteError::InvalidCoordinates(..))
            ));
        }
    }

    #[test]
    fn empty_graph_is_reported() {
        let router = Router::new(Graph::new().into_shared());
        assert!(matches!(
            router.find_route(0.0, 0.0, 0.0, 0.002, &Profile::car()),
            Err(RouteError::Graph(GraphError::EmptyGraph))
        ));
    }

    #[test]
    fn identical_endpoints_snap_to_a_single_node_route() {
        let router = diamond();
        let route = router
            .find_route(0.0, 0.0, 0.0001, 0.0001, &Profile::car())
            .unwrap();
        assert_eq!(route.nodes, vec![1]);
        assert_eq!(route.distance, 0.0);
        assert_eq!(route.duration, 0.0);
    }

    #[test]
    fn alternatives_split_across_the_diamond() {
        let router = diamond();
        let routes = router
            .find_routes(0.0, 0.0, 0.0, 0.002, &Profile::car(), 2)
            .unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].nodes.len(), 3);
        assert_eq!(routes[1].nodes.len(), 3);
        assert_ne!(routes[0].nodes[1], routes[1].nodes[1]);
        assert!((routes[0].distance - routes[1].distance).abs() < 1e-9);
    }

    #[test]
    fn requesting_more_alternatives_than_exist_returns_what_was_found() {
        let router = diamond();
        let routes = router
            .find_routes(0.0, 0.0, 0.0, 0.002, &Profile::car(), 5)
            .unwrap();

        // The third attempt can only re-combine the two arms, which shares
        // every node with an accepted route.
        assert_eq!(routes.len(), 2);
    }

    #[test]
    fn weight_update_redirects_subsequent_queries() {
        let router = diamond();
        let profile = Profile::car();

        let before = router.find_route(0.0, 0.0, 0.0, 0.002, &profile).unwrap();
        let via_before = before.nodes[1];

        // Make the chosen arm four times as long. The way has one edge
        // per direction, so two forward edges are mutated.
        let way = if via_before == 2 { 12 } else { 13 };
        assert_eq!(router.update_weight_by_way(way, 4.0), Ok(2));

        let after = router.find_route(0.0, 0.0, 0.0, 0.002, &profile).unwrap();
        assert_ne!(after.nodes[1], via_before);
    }

    #[test]
    fn dissimilarity_check() {
        let a = Route {
            nodes: vec![1, 2, 3, 4],
            distance: 0.0,
            duration: 0.0,
        };
        let mostly_same = Route {
            nodes: vec![1, 2, 3, 5],
            distance: 0.0,
            duration: 0.0,
        };
        let half_same = Route {
            nodes: vec![1, 9, 8, 4],
            distance: 0.0,
            duration: 0.0,
        };

        assert!(!is_sufficiently_different(&mostly_same, &[a.clone()]));
        assert!(is_sufficiently_different(&half_same, &[a]));
    }
}
