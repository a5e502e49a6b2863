// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

mod geo;
mod graph;
mod kd;
pub mod osm;
mod profile;
mod restriction;
pub mod routing;
mod storage;

pub use geo::haversine_distance;
pub use graph::{Graph, GraphError, GraphSnapshot, SharedGraph};
pub use osm::{load_pbf, IngestStats, ParseError};
pub use profile::{Features, Profile, ProfileError, ProfileRegistry, RouteOptions};
pub use restriction::{RestrictionKind, TurnRestriction};
pub use routing::{Route, RouteError, Router, MAX_EXPANSIONS};
pub use storage::{Storage, StorageError};

/// Represents a geographic vertex of the road network.
///
/// The identifier is inherited from OpenStreetMap and stable across
/// builds of the same extract. Nodes are immutable once inserted into a
/// [Graph].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub id: i64,

    /// Latitude in degrees, within [-90, 90].
    pub lat: f64,

    /// Longitude in degrees, within [-180, 180].
    pub lon: f64,
}

/// Represents a directed road segment between two [Nodes](Node).
///
/// The only field mutable after graph construction is `weight`
/// (see [Graph::update_weight_by_way]).
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: i64,
    pub to: i64,

    /// Base traversal cost: the great-circle length of the segment,
    /// in meters, until mutated by a weight update.
    pub weight: f64,

    /// Id of the OSM way this edge was compiled from. Weight updates and
    /// turn restrictions match edges by this value.
    pub way_id: i64,

    /// Maximum speed in m/s, 0 when unknown.
    pub max_speed: f64,

    /// Retained subset of the originating way's tags:
    /// `highway`, `name`, `surface`, `lanes` and `oneway`.
    pub tags: HashMap<String, String>,
}

impl Edge {
    /// Value of the `highway` tag, if present.
    pub fn highway(&self) -> Option<&str> {
        self.tags.get("highway").map(String::as_str)
    }

    /// Value of the `surface` tag, if present.
    pub fn surface(&self) -> Option<&str> {
        self.tags.get("surface").map(String::as_str)
    }
}
