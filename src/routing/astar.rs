// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::{BinaryHeap, HashMap};

use crate::geo::haversine_distance;
use crate::profile::Profile;
use crate::routing::{Route, RouteError, NOMINAL_SPEED_MPS};
use crate::Graph;

/// Search state: turn restrictions depend on the way by which a node was
/// entered, so a bare node id is not enough to key the closed set. The
/// predecessor way id is zero for the initial state ("no predecessor way").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SearchState {
    node: i64,
    prev_way: i64,
}

#[derive(Debug, Clone, Copy)]
struct QueueItem {
    at: SearchState,
    cost: f64,
    score: f64,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.score.eq(&other.score)
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // NOTE: We revert the order of comparison,
        // as lower scores are considered better ("higher"),
        // and Rust's BinaryHeap is a max-heap.
        other.score.total_cmp(&self.score)
    }
}

/// Back-pointer record: the predecessor state and the base (pre-profile)
/// weight of the edge taken, so that the reported route distance is the
/// physical length of the path rather than its profile-adjusted cost.
type CameFrom = HashMap<SearchState, (SearchState, f64)>;

fn reconstruct(came_from: &CameFrom, mut last: SearchState) -> (Vec<i64>, f64) {
    let mut path = vec![last.node];
    let mut distance = 0.0;

    while let Some(&(prev, weight)) = came_from.get(&last) {
        distance += weight;
        path.push(prev.node);
        last = prev;
    }

    path.reverse();
    (path, distance)
}

/// Uses the [A* algorithm](https://en.wikipedia.org/wiki/A*_search_algorithm)
/// to find the cheapest admissible route between two nodes under the given
/// profile, honouring turn restrictions on every relaxation.
///
/// The heuristic is the raw great-circle distance to the target. Speed
/// factors above 1 make edge costs drop below physical length, so the
/// heuristic may overestimate on such roads and the route can be marginally
/// sub-optimal there.
///
/// `penalties` maps `(from, to)` node pairs to extra cost multipliers; the
/// alternative-routes loop uses it to push later searches off earlier paths.
///
/// `expansion_limit` bounds how many states may be expanded before giving
/// up. Concluding that no route exists requires expanding every state
/// reachable from the start, which is usually very time-consuming on large
/// extracts; the limit protects against resource exhaustion, and exceeding
/// it reports [RouteError::NoRoute] like any other failed search.
pub(crate) fn search(
    g: &Graph,
    profile: &Profile,
    start: i64,
    goal: i64,
    penalties: &HashMap<(i64, i64), f64>,
    expansion_limit: usize,
) -> Result<Route, RouteError> {
    let goal_node = g.get_node(goal).ok_or(RouteError::UnknownNode(goal))?;
    let start_node = g.get_node(start).ok_or(RouteError::UnknownNode(start))?;

    let mut queue: BinaryHeap<QueueItem> = BinaryHeap::new();
    let mut came_from: CameFrom = HashMap::new();
    let mut known_costs: HashMap<SearchState, f64> = HashMap::new();
    let mut expanded: usize = 0;

    let initial = SearchState {
        node: start,
        prev_way: 0,
    };
    known_costs.insert(initial, 0.0);
    queue.push(QueueItem {
        at: initial,
        cost: 0.0,
        score: haversine_distance(start_node.lat, start_node.lon, goal_node.lat, goal_node.lon),
    });

    while let Some(item) = queue.pop() {
        if item.at.node == goal {
            let (nodes, distance) = reconstruct(&came_from, item.at);
            return Ok(Route {
                nodes,
                distance,
                duration: distance / NOMINAL_SPEED_MPS,
            });
        }

        // Contrary to the wikipedia definition, we might keep multiple items
        // in the queue for the same state.
        if item.cost > known_costs.get(&item.at).copied().unwrap_or(f64::INFINITY) {
            continue;
        }

        expanded += 1;
        if expanded > expansion_limit {
            log::debug!(
                target: "navgraph.routing",
                "expansion limit hit after {} states ({} -> {})",
                expanded,
                start,
                goal,
            );
            return Err(RouteError::NoRoute);
        }

        let prev_node = came_from.get(&item.at).map(|&(prev, _)| prev.node);

        for edge in g.outgoing_edges(item.at.node) {
            if !profile.is_allowed(edge.highway()) {
                continue;
            }

            // Immediate turnarounds (A-B-A) are only taken when asked for.
            if !profile.features.allow_uturns && prev_node == Some(edge.to) {
                continue;
            }

            if !g.is_valid_turn(item.at.prev_way, item.at.node, edge.way_id) {
                continue;
            }

            let Some(neighbor) = g.get_node(edge.to) else {
                continue;
            };

            let mut edge_cost = profile.edge_cost(edge);
            if let Some(&penalty) = penalties.get(&(edge.from, edge.to)) {
                edge_cost *= penalty;
            }

            let next = SearchState {
                node: edge.to,
                prev_way: edge.way_id,
            };
            let next_cost = item.cost + edge_cost;
            if next_cost >= known_costs.get(&next).copied().unwrap_or(f64::INFINITY) {
                continue;
            }

            came_from.insert(next, (item.at, edge.weight));
            known_costs.insert(next, next_cost);
            queue.push(QueueItem {
                at: next,
                cost: next_cost,
                score: next_cost
                    + haversine_distance(neighbor.lat, neighbor.lon, goal_node.lat, goal_node.lon),
            });
        }
    }

    Err(RouteError::NoRoute)
}
