// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use crate::geo::haversine_distance;
use crate::Node;

/// KdTree implements the [k-d tree data structure](https://en.wikipedia.org/wiki/K-d_tree),
/// which speeds up nearest-neighbor search for large graphs. Practice shows that a linear
/// scan over every node takes significantly more time than the route search itself when
/// answering many queries, and a k-d tree trades memory usage for CPU time.
///
/// This implementation assumes euclidean geometry, even though the distance function
/// used is the haversine. This results in undefined behavior when points
/// are close to the ante meridian (180°/-180° longitude) or poles (90°/-90° latitude),
/// or when the data spans multiple continents.
///
/// Ties on equal distance resolve to the smaller node id, matching the
/// linear-scan baseline in [Graph::nearest_node](crate::Graph::nearest_node).
#[derive(Debug, Clone)]
pub struct KdTree {
    pivot: Node,
    left: Option<Box<KdTree>>,
    right: Option<Box<KdTree>>,
}

impl KdTree {
    /// Finds the closest [Node] to the given position.
    pub fn nearest(&self, lat: f64, lon: f64) -> Node {
        self.nearest_impl(lat, lon, false).0
    }

    fn nearest_impl(&self, lat: f64, lon: f64, lon_divides: bool) -> (Node, f64) {
        // Start by assuming that pivot is the closest
        let mut best = self.pivot;
        let mut best_dist = haversine_distance(lat, lon, best.lat, best.lon);

        // Select which branch to recurse into first
        let first_left = if lon_divides {
            lon < best.lon
        } else {
            lat < best.lat
        };
        let (first, second) = if first_left {
            (&self.left, &self.right)
        } else {
            (&self.right, &self.left)
        };

        // Recurse into the first branch
        if let Some(ref branch) = first {
            let (alt, alt_dist) = branch.nearest_impl(lat, lon, !lon_divides);
            if is_better(alt_dist, &alt, best_dist, &best) {
                best = alt;
                best_dist = alt_dist;
            }
        }

        // (Optionally) recurse into the second branch
        if let Some(ref branch) = second {
            // A closer node is possible in the second branch if and only if
            // the splitting axis is not further away than the current best candidate.
            let (axis_lat, axis_lon) = if lon_divides {
                (lat, self.pivot.lon)
            } else {
                (self.pivot.lat, lon)
            };
            let dist_to_axis = haversine_distance(lat, lon, axis_lat, axis_lon);

            if dist_to_axis <= best_dist {
                let (alt, alt_dist) = branch.nearest_impl(lat, lon, !lon_divides);
                if is_better(alt_dist, &alt, best_dist, &best) {
                    best = alt;
                    best_dist = alt_dist;
                }
            }
        }

        (best, best_dist)
    }

    /// Builds a k-d tree from a mutable slice of [Nodes](Node). Nodes will be reordered
    /// in the slice to facilitate building the tree.
    pub fn build(nodes: &mut [Node]) -> Option<Self> {
        Self::build_impl(nodes, false)
    }

    fn build_impl(nodes: &mut [Node], lon_divides: bool) -> Option<Self> {
        match nodes.len() {
            0 => None,
            1 => Some(Self {
                pivot: nodes[0],
                left: None,
                right: None,
            }),
            _ => {
                if lon_divides {
                    nodes.sort_by(|a, b| a.lon.total_cmp(&b.lon));
                } else {
                    nodes.sort_by(|a, b| a.lat.total_cmp(&b.lat));
                }
                let median = nodes.len() / 2;
                let pivot = nodes[median];
                let (left, right_and_pivot) = nodes.split_at_mut(median);
                let right = &mut right_and_pivot[1..];
                Some(Self {
                    pivot,
                    left: box_option(Self::build_impl(left, !lon_divides)),
                    right: box_option(Self::build_impl(right, !lon_divides)),
                })
            }
        }
    }
}

#[inline]
fn is_better(alt_dist: f64, alt: &Node, best_dist: f64, best: &Node) -> bool {
    alt_dist < best_dist || (alt_dist == best_dist && alt.id < best.id)
}

#[inline]
fn box_option<T>(o: Option<T>) -> Option<Box<T>> {
    o.map(|thing| Box::new(thing))
}
