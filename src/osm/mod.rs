// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;

use osmpbf::{Element, ElementReader, RelMemberType};

use crate::geo::haversine_distance;
use crate::{Edge, Graph, Node, RestrictionKind, TurnRestriction};

const LOG_TARGET: &str = "navgraph.osm";

/// Highway classes which never compile into routable edges.
const NON_ROUTABLE_HIGHWAYS: [&str; 7] = [
    "footway",
    "path",
    "steps",
    "cycleway",
    "pedestrian",
    "construction",
    "proposed",
];

/// Way tags copied onto every emitted edge.
const RETAINED_TAGS: [&str; 5] = ["highway", "name", "surface", "lanes", "oneway"];

/// Error which can occur during OSM reading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("pbf: {0}")]
    Pbf(#[from] osmpbf::Error),
}

/// Counts of graph objects produced by a [load_pbf] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub nodes: usize,
    pub edges: usize,
    pub restrictions: usize,
}

/// An OSM way retained during the scan, pending edge materialisation.
#[derive(Debug, Clone)]
struct RawWay {
    id: i64,
    refs: Vec<i64>,
    tags: HashMap<String, String>,
}

/// Compiles an [OSM PBF](https://wiki.openstreetmap.org/wiki/PBF_Format)
/// extract at `path` into the provided [Graph].
///
/// The file is scanned in a single streaming pass which buffers node
/// positions, routable ways and turn-restriction relations; nodes not
/// referenced by any routable way are discarded. Afterwards each retained
/// way is compiled into directed edges (honouring `oneway` semantics),
/// node-via restrictions are registered, and the spatial index is built.
pub fn load_pbf<P: AsRef<Path>>(g: &mut Graph, path: P) -> Result<IngestStats, ParseError> {
    let reader = ElementReader::from_path(path)?;

    let mut scratch: HashMap<i64, (f64, f64)> = HashMap::new();
    let mut ways: Vec<RawWay> = Vec::new();
    let mut restrictions: Vec<TurnRestriction> = Vec::new();
    let mut way_total: u64 = 0;
    let mut relation_total: u64 = 0;

    log::info!(target: LOG_TARGET, "scanning OSM data");
    reader.for_each(|element| match element {
        Element::Node(node) => {
            scratch.insert(node.id(), (node.lat(), node.lon()));
        }
        Element::DenseNode(node) => {
            scratch.insert(node.id(), (node.lat(), node.lon()));
        }
        Element::Way(way) => {
            way_total += 1;
            let tags: HashMap<String, String> = way
                .tags()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            if is_routable(&tags) {
                ways.push(RawWay {
                    id: way.id(),
                    refs: way.refs().collect(),
                    tags,
                });
            }
        }
        Element::Relation(relation) => {
            relation_total += 1;
            if let Some(restriction) = restriction_from_relation(&relation) {
                restrictions.push(restriction);
            }
        }
        _ => {}
    })?;
    log::info!(
        target: LOG_TARGET,
        "scanned {} nodes, {} ways ({} routable), {} relations ({} restrictions)",
        scratch.len(),
        way_total,
        ways.len(),
        relation_total,
        restrictions.len(),
    );

    // Only nodes referenced by a routable way enter the graph.
    let mut used: HashSet<i64> = HashSet::new();
    for way in &ways {
        used.extend(way.refs.iter().copied());
    }
    let mut nodes = 0;
    for id in &used {
        if let Some(&(lat, lon)) = scratch.get(id) {
            if g.add_node(Node { id: *id, lat, lon }) {
                nodes += 1;
            }
        }
    }
    log::info!(
        target: LOG_TARGET,
        "added {} nodes ({} orphans discarded)",
        nodes,
        scratch.len() - nodes,
    );

    let edges_before = g.edge_count();
    for way in &ways {
        add_way_edges(g, way);
    }
    let edges = g.edge_count() - edges_before;
    log::info!(target: LOG_TARGET, "compiled {} ways into {} edges", ways.len(), edges);

    let mut restriction_count = 0;
    for restriction in restrictions {
        if g.add_restriction(restriction) {
            restriction_count += 1;
        }
    }
    log::info!(target: LOG_TARGET, "registered {} turn restrictions", restriction_count);

    g.build_spatial_index();

    Ok(IngestStats {
        nodes,
        edges,
        restrictions: restriction_count,
    })
}

/// A way is routable iff it bears a `highway` tag outside the
/// pedestrian/cycle/unbuilt classes.
fn is_routable(tags: &HashMap<String, String>) -> bool {
    tags.get("highway")
        .is_some_and(|h| !NON_ROUTABLE_HIGHWAYS.contains(&h.as_str()))
}

/// Compiles one retained way into directed edges between consecutive node
/// pairs. Pairs referencing nodes absent from the graph are skipped.
///
/// `oneway` interpretation: `yes`/`1`/`true` emit the forward direction
/// only, `-1`/`reverse` emit the backward direction only, anything else
/// emits both.
fn add_way_edges(g: &mut Graph, way: &RawWay) {
    if way.refs.len() < 2 {
        log::warn!(target: LOG_TARGET, "way {} has less than 2 nodes - ignoring", way.id);
        return;
    }

    let (forward, backward) = match way.tags.get("oneway").map(String::as_str).unwrap_or("") {
        "yes" | "1" | "true" => (true, false),
        "-1" | "reverse" => (false, true),
        _ => (true, true),
    };

    let max_speed = max_speed_for(&way.tags);
    let tags = retained_tags(&way.tags);

    for pair in way.refs.windows(2) {
        let (Some(from), Some(to)) = (g.get_node(pair[0]), g.get_node(pair[1])) else {
            continue;
        };

        let weight = haversine_distance(from.lat, from.lon, to.lat, to.lon);
        if forward {
            g.add_edge(Edge {
                from: from.id,
                to: to.id,
                weight,
                way_id: way.id,
                max_speed,
                tags: tags.clone(),
            });
        }
        if backward {
            g.add_edge(Edge {
                from: to.id,
                to: from.id,
                weight,
                way_id: way.id,
                max_speed,
                tags: tags.clone(),
            });
        }
    }
}

/// Derives the maximum speed of a way in m/s: the `maxspeed` tag when
/// present (0 when unparseable), otherwise a default keyed by highway class.
fn max_speed_for(tags: &HashMap<String, String>) -> f64 {
    if let Some(value) = tags.get("maxspeed") {
        return parse_maxspeed(value).unwrap_or(0.0);
    }
    default_speed(tags.get("highway").map(String::as_str).unwrap_or(""))
}

/// Parses the leading numeric value of a `maxspeed` tag, interpreted as
/// km/h unless a `mph` suffix follows it. Returns m/s.
fn parse_maxspeed(value: &str) -> Option<f64> {
    let value = value.trim();
    let end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let number: f64 = value[..end].parse().ok()?;

    if value[end..].trim_start().starts_with("mph") {
        Some(number * 0.44704)
    } else {
        Some(number / 3.6)
    }
}

/// Default maximum speed per highway class, in m/s.
fn default_speed(highway: &str) -> f64 {
    let kmh = match highway {
        "motorway" => 120.0,
        "trunk" => 100.0,
        "primary" => 80.0,
        "secondary" => 70.0,
        "tertiary" => 50.0,
        "unclassified" => 50.0,
        "residential" => 30.0,
        "service" => 20.0,
        _ => 50.0,
    };
    kmh / 3.6
}

fn retained_tags(tags: &HashMap<String, String>) -> HashMap<String, String> {
    RETAINED_TAGS
        .iter()
        .filter_map(|&key| tags.get(key).map(|value| (key.to_string(), value.clone())))
        .collect()
}

/// Extracts a node-via turn restriction from a relation, if it is one.
/// Restrictions whose via member is a way (not a node), or with an
/// unsupported `restriction` value, are silently skipped.
fn restriction_from_relation(relation: &osmpbf::Relation) -> Option<TurnRestriction> {
    let is_restriction = relation
        .tags()
        .any(|(k, v)| k == "type" && (v == "restriction" || v == "restriction:conditional"));
    if !is_restriction {
        return None;
    }

    let kind = relation
        .tags()
        .find(|(k, _)| *k == "restriction")
        .and_then(|(_, v)| RestrictionKind::from_tag(v))?;

    let mut from_way: Option<i64> = None;
    let mut via_node: Option<i64> = None;
    let mut to_way: Option<i64> = None;

    for member in relation.members() {
        let Ok(role) = member.role() else { continue };
        match role {
            "from" if member.member_type == RelMemberType::Way => {
                from_way = Some(member.member_id);
            }
            "via" if member.member_type == RelMemberType::Node => {
                via_node = Some(member.member_id);
            }
            "to" if member.member_type == RelMemberType::Way => {
                to_way = Some(member.member_id);
            }
            _ => {}
        }
    }

    Some(TurnRestriction {
        from_way: from_way?,
        via_node: via_node?,
        to_way: to_way?,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! tags {
        {} => { HashMap::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    fn graph_with_nodes(ids: &[i64]) -> Graph {
        let mut g = Graph::new();
        for (i, &id) in ids.iter().enumerate() {
            g.add_node(Node {
                id,
                lat: 0.0,
                lon: i as f64 * 0.001,
            });
        }
        g
    }

    #[test]
    fn routability() {
        assert!(is_routable(&tags! {"highway": "primary"}));
        assert!(is_routable(&tags! {"highway": "residential", "oneway": "yes"}));
        assert!(!is_routable(&tags! {"highway": "footway"}));
        assert!(!is_routable(&tags! {"highway": "construction"}));
        assert!(!is_routable(&tags! {"building": "yes"}));
        assert!(!is_routable(&tags! {}));
    }

    #[test]
    fn maxspeed_parsing() {
        assert_eq!(parse_maxspeed("36"), Some(10.0));
        assert_eq!(parse_maxspeed("50 km/h"), Some(50.0 / 3.6));
        assert_eq!(parse_maxspeed("30 mph"), Some(30.0 * 0.44704));
        assert_eq!(parse_maxspeed("30mph"), Some(30.0 * 0.44704));
        assert_eq!(parse_maxspeed("none"), None);
        assert_eq!(parse_maxspeed(""), None);
    }

    #[test]
    fn maxspeed_defaults_by_highway_class() {
        assert_eq!(max_speed_for(&tags! {"highway": "motorway"}), 120.0 / 3.6);
        assert_eq!(max_speed_for(&tags! {"highway": "service"}), 20.0 / 3.6);
        assert_eq!(max_speed_for(&tags! {"highway": "bridleway"}), 50.0 / 3.6);
        // An explicit tag wins over the class default
        assert_eq!(
            max_speed_for(&tags! {"highway": "motorway", "maxspeed": "90"}),
            25.0
        );
        // An unparseable tag means unknown
        assert_eq!(
            max_speed_for(&tags! {"highway": "motorway", "maxspeed": "signals"}),
            0.0
        );
    }

    #[test]
    fn bidirectional_way_emits_edge_pairs() {
        let mut g = graph_with_nodes(&[1, 2, 3]);
        add_way_edges(
            &mut g,
            &RawWay {
                id: 10,
                refs: vec![1, 2, 3],
                tags: tags! {"highway": "primary"},
            },
        );

        assert_eq!(g.edge_count(), 4);
        assert_eq!(g.outgoing_edges(1).len(), 1);
        assert_eq!(g.outgoing_edges(2).len(), 2);
        assert_eq!(g.outgoing_edges(1)[0].way_id, 10);
        assert!(g.outgoing_edges(1)[0].weight > 0.0);
    }

    #[test]
    fn oneway_emits_forward_only() {
        let mut g = graph_with_nodes(&[1, 2]);
        add_way_edges(
            &mut g,
            &RawWay {
                id: 10,
                refs: vec![1, 2],
                tags: tags! {"highway": "primary", "oneway": "yes"},
            },
        );

        assert_eq!(g.outgoing_edges(1).len(), 1);
        assert_eq!(g.outgoing_edges(2).len(), 0);
    }

    #[test]
    fn reverse_oneway_emits_backward_only() {
        let mut g = graph_with_nodes(&[1, 2]);
        add_way_edges(
            &mut g,
            &RawWay {
                id: 10,
                refs: vec![1, 2],
                tags: tags! {"highway": "primary", "oneway": "-1"},
            },
        );

        assert_eq!(g.outgoing_edges(1).len(), 0);
        assert_eq!(g.outgoing_edges(2).len(), 1);
        assert_eq!(g.outgoing_edges(2)[0].to, 1);
    }

    #[test]
    fn segments_with_missing_nodes_are_skipped() {
        let mut g = graph_with_nodes(&[1, 3]);
        add_way_edges(
            &mut g,
            &RawWay {
                id: 10,
                refs: vec![1, 2, 3],
                tags: tags! {"highway": "primary"},
            },
        );

        // Both segments touch the missing node 2.
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn edges_carry_the_retained_tag_subset() {
        let mut g = graph_with_nodes(&[1, 2]);
        add_way_edges(
            &mut g,
            &RawWay {
                id: 10,
                refs: vec![1, 2],
                tags: tags! {
                    "highway": "primary",
                    "name": "Main Street",
                    "surface": "asphalt",
                    "lit": "yes",
                    "maxspeed": "50"
                },
            },
        );

        let edge = &g.outgoing_edges(1)[0];
        assert_eq!(edge.highway(), Some("primary"));
        assert_eq!(edge.tags.get("name").map(String::as_str), Some("Main Street"));
        assert_eq!(edge.surface(), Some("asphalt"));
        assert!(!edge.tags.contains_key("lit"));
        assert!(!edge.tags.contains_key("maxspeed"));
        assert_eq!(edge.max_speed, 50.0 / 3.6);
    }
}
