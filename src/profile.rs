// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Edge;

/// Cost multiplier applied to edges whose surface the profile avoids.
const AVOIDED_SURFACE_PENALTY: f64 = 2.0;

/// Highway classes removed from the admissible set when a query asks to
/// avoid highways.
const AVOIDED_HIGHWAY_CLASSES: [&str; 4] = ["motorway", "motorway_link", "trunk", "trunk_link"];

/// Error conditions reported by the profile registry.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// No profile with the requested name is registered.
    #[error("profile '{0}' not found")]
    NotFound(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// A profile directory was scanned, but no file in it produced
    /// a usable profile.
    #[error("no valid profiles found in {}", .0.display())]
    NoProfiles(PathBuf),
}

/// Boolean feature toggles carried by a [Profile]. All default to `false`;
/// in particular, immediate turnarounds (A-B-A) are forbidden during search
/// unless `allow_uturns` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Features {
    pub avoid_tolls: bool,
    pub avoid_highways: bool,
    pub avoid_ferries: bool,
    pub avoid_tunnels: bool,
    pub allow_uturns: bool,
}

/// Per-query overrides of a [Profile]'s feature toggles and maximum speed.
/// Unset fields leave the profile value untouched; overrides never mutate
/// the underlying profile (see [Profile::with_options]).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RouteOptions {
    pub avoid_tolls: Option<bool>,
    pub avoid_highways: Option<bool>,
    pub avoid_ferries: Option<bool>,
    pub avoid_tunnels: Option<bool>,
    pub allow_uturns: Option<bool>,

    /// Maximum speed override, in km/h.
    pub max_speed: Option<f64>,
}

/// Describes how a transport mode is allowed to use the road network
/// and how edge traversal costs are derived for it.
///
/// Profiles are immutable value types: queries derive a per-query profile
/// via [Profile::with_options] instead of mutating a shared one.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,

    /// Highway classes this mode may use. Edges without a `highway` tag
    /// are never admissible.
    pub allowed_highways: HashSet<String>,

    /// Multiplicative speed factor per highway class; larger factor means
    /// lower cost and thus preference. Unlisted classes use 1.0.
    pub speed_factors: HashMap<String, f64>,

    /// Surfaces whose edges get their cost doubled.
    pub avoid_surfaces: HashSet<String>,

    /// Maximum permissible speed, in m/s.
    pub max_speed: f64,

    pub features: Features,
}

impl Profile {
    fn from_tables(
        name: &str,
        allowed: &[&str],
        factors: &[(&str, f64)],
        avoid: &[&str],
        max_speed: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            allowed_highways: allowed.iter().map(|s| s.to_string()).collect(),
            speed_factors: factors.iter().map(|&(k, v)| (k.to_string(), v)).collect(),
            avoid_surfaces: avoid.iter().map(|s| s.to_string()).collect(),
            max_speed,
            features: Features::default(),
        }
    }

    /// Standard car routing: fast road classes preferred, ~120 km/h cap.
    pub fn car() -> Self {
        Self::from_tables(
            "car",
            &[
                "motorway",
                "trunk",
                "primary",
                "secondary",
                "tertiary",
                "unclassified",
                "residential",
                "service",
                "motorway_link",
                "trunk_link",
                "primary_link",
                "secondary_link",
                "tertiary_link",
            ],
            &[
                ("motorway", 1.2),
                ("trunk", 1.1),
                ("primary", 1.0),
                ("secondary", 0.95),
                ("tertiary", 0.9),
                ("residential", 0.8),
                ("service", 0.7),
            ],
            &[],
            33.33,
        )
    }

    /// Bicycle routing: dedicated cycle infrastructure preferred,
    /// loose surfaces avoided, ~30 km/h cap.
    pub fn bike() -> Self {
        Self::from_tables(
            "bike",
            &[
                "cycleway",
                "path",
                "footway",
                "track",
                "primary",
                "secondary",
                "tertiary",
                "residential",
                "service",
                "unclassified",
            ],
            &[
                ("cycleway", 1.2),
                ("path", 1.1),
                ("residential", 1.0),
                ("secondary", 0.9),
                ("primary", 0.7),
                ("service", 0.95),
            ],
            &["gravel", "sand"],
            8.33,
        )
    }

    /// Pedestrian routing: footways preferred, stairs slow, ~5 km/h.
    pub fn foot() -> Self {
        Self::from_tables(
            "foot",
            &[
                "footway",
                "path",
                "steps",
                "pedestrian",
                "residential",
                "service",
                "track",
                "cycleway",
                "primary",
                "secondary",
                "tertiary",
                "unclassified",
            ],
            &[
                ("footway", 1.2),
                ("pedestrian", 1.2),
                ("path", 1.1),
                ("residential", 1.0),
                ("service", 1.0),
                ("steps", 0.8),
                ("primary", 0.7),
            ],
            &[],
            1.4,
        )
    }

    /// Checks if an edge with the given `highway` tag value may be used.
    pub fn is_allowed(&self, highway: Option<&str>) -> bool {
        highway.is_some_and(|h| self.allowed_highways.contains(h))
    }

    /// Returns the speed factor for a highway class, defaulting to 1.0.
    pub fn speed_factor(&self, highway: &str) -> f64 {
        self.speed_factors.get(highway).copied().unwrap_or(1.0)
    }

    /// Derives the traversal cost of an edge under this profile: the base
    /// weight divided by the highway speed factor, doubled on avoided
    /// surfaces. This is the quantity minimised by route search.
    pub fn edge_cost(&self, edge: &Edge) -> f64 {
        let mut cost = edge.weight / self.speed_factor(edge.highway().unwrap_or(""));
        if edge.surface().is_some_and(|s| self.avoid_surfaces.contains(s)) {
            cost *= AVOIDED_SURFACE_PENALTY;
        }
        cost
    }

    /// Produces the effective profile for a single query by applying
    /// [RouteOptions] to a copy of this profile. `avoid_highways` removes
    /// the motorway and trunk classes from the admissible set; the speed
    /// override is given in km/h and ignored unless positive.
    pub fn with_options(&self, options: &RouteOptions) -> Profile {
        let mut derived = self.clone();

        if let Some(v) = options.avoid_tolls {
            derived.features.avoid_tolls = v;
        }
        if let Some(v) = options.avoid_highways {
            derived.features.avoid_highways = v;
        }
        if let Some(v) = options.avoid_ferries {
            derived.features.avoid_ferries = v;
        }
        if let Some(v) = options.avoid_tunnels {
            derived.features.avoid_tunnels = v;
        }
        if let Some(v) = options.allow_uturns {
            derived.features.allow_uturns = v;
        }
        if let Some(kmh) = options.max_speed {
            if kmh > 0.0 && kmh.is_finite() {
                derived.max_speed = kmh / 3.6;
            }
        }

        if derived.features.avoid_highways {
            for class in AVOIDED_HIGHWAY_CLASSES {
                derived.allowed_highways.remove(class);
            }
        }

        derived
    }
}

/// Holds the named [Profiles](Profile) available for queries: the three
/// built-ins (car, bike, foot) plus any loaded from a configuration
/// directory. Names are unique; loading a profile with a known name
/// replaces it.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ProfileRegistry {
    /// Creates a registry pre-populated with the built-in profiles.
    pub fn with_builtins() -> Self {
        let mut profiles = BTreeMap::new();
        for p in [Profile::car(), Profile::bike(), Profile::foot()] {
            profiles.insert(p.name.clone(), p);
        }
        Self { profiles }
    }

    /// Fetches a profile by name.
    pub fn get(&self, name: &str) -> Result<&Profile, ProfileError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    /// Returns all registered profile names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Returns the first available profile (by name order), used when a
    /// query names none. Only `None` for a registry stripped of profiles.
    pub fn default_profile(&self) -> Option<&Profile> {
        self.profiles.values().next()
    }

    /// Registers a profile, replacing any previous one with the same name.
    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    /// Loads every `*.yaml`/`*.yml` profile file from a directory.
    /// Files that fail to parse or validate are logged and skipped.
    /// Returns the number of profiles loaded; a directory yielding none
    /// is an error.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, ProfileError> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match load_profile_file(&path) {
                Ok(profile) => {
                    log::info!(target: "navgraph.profile", "loaded profile '{}' from {}", profile.name, path.display());
                    self.insert(profile);
                    loaded += 1;
                }
                Err(e) => {
                    log::warn!(target: "navgraph.profile", "skipping {}: {}", path.display(), e);
                }
            }
        }

        if loaded == 0 {
            return Err(ProfileError::NoProfiles(dir.to_path_buf()));
        }
        Ok(loaded)
    }

    /// Discards every registered profile, restores the built-ins and
    /// re-reads the given configuration directory.
    pub fn reload<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, ProfileError> {
        *self = Self::with_builtins();
        self.load_dir(dir)
    }
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    name: String,
    settings: ProfileFileSettings,
    #[serde(default)]
    highways: BTreeMap<String, HighwayEntry>,
    #[serde(default)]
    surfaces: BTreeMap<String, SurfaceEntry>,
    #[serde(default)]
    features: Features,
}

#[derive(Debug, Deserialize)]
struct ProfileFileSettings {
    max_speed_kmh: f64,
}

#[derive(Debug, Deserialize)]
struct HighwayEntry {
    #[serde(default = "default_true")]
    allowed: bool,
    #[serde(default = "default_factor")]
    speed_factor: f64,
}

#[derive(Debug, Deserialize)]
struct SurfaceEntry {
    penalty: f64,
}

fn default_true() -> bool {
    true
}

fn default_factor() -> f64 {
    1.0
}

#[derive(Debug, thiserror::Error)]
enum ProfileFileError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("profile name is required")]
    MissingName,

    #[error("max_speed_kmh must be a positive number, got {0}")]
    BadMaxSpeed(f64),

    #[error("speed factor for '{0}' must be a positive number, got {1}")]
    BadSpeedFactor(String, f64),
}

fn load_profile_file(path: &Path) -> Result<Profile, ProfileFileError> {
    let data = fs::read_to_string(path)?;
    let file: ProfileFile = serde_yml::from_str(&data)?;

    if file.name.is_empty() {
        return Err(ProfileFileError::MissingName);
    }
    if !file.settings.max_speed_kmh.is_finite() || file.settings.max_speed_kmh <= 0.0 {
        return Err(ProfileFileError::BadMaxSpeed(file.settings.max_speed_kmh));
    }
    for (class, entry) in &file.highways {
        if !entry.speed_factor.is_finite() || entry.speed_factor <= 0.0 {
            return Err(ProfileFileError::BadSpeedFactor(
                class.clone(),
                entry.speed_factor,
            ));
        }
    }

    Ok(Profile {
        name: file.name,
        allowed_highways: file
            .highways
            .iter()
            .filter(|(_, e)| e.allowed)
            .map(|(class, _)| class.clone())
            .collect(),
        speed_factors: file
            .highways
            .iter()
            .map(|(class, e)| (class.clone(), e.speed_factor))
            .collect(),
        avoid_surfaces: file
            .surfaces
            .iter()
            .filter(|(_, e)| e.penalty > 1.0)
            .map(|(surface, _)| surface.clone())
            .collect(),
        max_speed: file.settings.max_speed_kmh / 3.6,
        features: file.features,
    })
}
