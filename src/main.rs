use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use navgraph::{Graph, ProfileRegistry, Route, RouteOptions, Router, SharedGraph, Storage};

#[derive(Debug, thiserror::Error)]
enum GraphLoadError {
    #[error("{}: {}", .path.display(), .source)]
    Osm {
        path: PathBuf,
        #[source]
        source: navgraph::ParseError,
    },

    #[error("{}: {}", .path.display(), .source)]
    Snapshot {
        path: PathBuf,
        #[source]
        source: navgraph::StorageError,
    },
}

#[derive(Parser)]
#[command(
    name = "navgraph",
    about = "In-memory road-network routing engine built from OpenStreetMap extracts"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile an OSM PBF extract into a graph snapshot
    Build {
        /// The path to the OSM PBF file
        osm_file: PathBuf,

        /// Where to write the compiled snapshot
        snapshot: PathBuf,
    },

    /// Find a route and print it as GeoJSON
    Route {
        /// A graph snapshot, or an OSM PBF file (by extension)
        graph_file: PathBuf,

        /// Latitude of the start point
        #[arg(allow_negative_numbers = true)]
        from_lat: f64,

        /// Longitude of the start point
        #[arg(allow_negative_numbers = true)]
        from_lon: f64,

        /// Latitude of the end point
        #[arg(allow_negative_numbers = true)]
        to_lat: f64,

        /// Longitude of the end point
        #[arg(allow_negative_numbers = true)]
        to_lon: f64,

        #[command(flatten)]
        options: RouteArgs,
    },
}

#[derive(Args)]
struct RouteArgs {
    /// Routing profile name
    #[arg(long, default_value = "car")]
    profile: String,

    /// Directory with additional profile definitions (*.yaml)
    #[arg(long)]
    profile_dir: Option<PathBuf>,

    /// Number of alternative routes to look for
    #[arg(long, default_value_t = 0)]
    alternatives: usize,

    /// Force the turn-restriction-honouring unidirectional search
    #[arg(long)]
    unidirectional: bool,

    /// Maximum speed override, in km/h
    #[arg(long)]
    max_speed: Option<f64>,

    /// Keep off motorways and trunk roads
    #[arg(long)]
    avoid_highways: bool,

    /// Permit immediate turnarounds
    #[arg(long)]
    allow_uturns: bool,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Build { osm_file, snapshot } => build(&osm_file, &snapshot),
        Command::Route {
            graph_file,
            from_lat,
            from_lon,
            to_lat,
            to_lon,
            options,
        } => route(&graph_file, from_lat, from_lon, to_lat, to_lon, &options),
    }
}

fn build(osm_file: &Path, snapshot: &Path) -> Result<(), Box<dyn Error>> {
    let g = load_graph(osm_file)?;
    Storage::new(snapshot).save(&g)?;
    log::info!(
        "saved {} nodes and {} edges to {}",
        g.node_count(),
        g.edge_count(),
        snapshot.display(),
    );
    Ok(())
}

fn route(
    graph_file: &Path,
    from_lat: f64,
    from_lon: f64,
    to_lat: f64,
    to_lon: f64,
    args: &RouteArgs,
) -> Result<(), Box<dyn Error>> {
    let mut registry = ProfileRegistry::with_builtins();
    if let Some(dir) = &args.profile_dir {
        registry.load_dir(dir)?;
    }
    let profile = registry.get(&args.profile)?.with_options(&RouteOptions {
        avoid_highways: args.avoid_highways.then_some(true),
        allow_uturns: args.allow_uturns.then_some(true),
        max_speed: args.max_speed,
        ..Default::default()
    });

    let router = Router::new(load_graph(graph_file)?.into_shared());

    let routes = if args.alternatives > 0 {
        router.find_routes(
            from_lat,
            from_lon,
            to_lat,
            to_lon,
            &profile,
            args.alternatives + 1,
        )?
    } else if args.unidirectional {
        vec![router.find_route(from_lat, from_lon, to_lat, to_lon, &profile)?]
    } else {
        vec![router.find_route_bidirectional(from_lat, from_lon, to_lat, to_lon, &profile)?]
    };

    print_geojson(&router.graph(), &routes);
    Ok(())
}

fn load_graph(path: &Path) -> Result<Graph, GraphLoadError> {
    let is_osm = path
        .to_str()
        .is_some_and(|p| p.ends_with(".pbf") || p.ends_with(".osm"));

    if is_osm {
        let mut g = Graph::new();
        match navgraph::load_pbf(&mut g, path) {
            Ok(_) => Ok(g),
            Err(source) => Err(GraphLoadError::Osm {
                path: path.to_path_buf(),
                source,
            }),
        }
    } else {
        Storage::new(path).load().map_err(|source| GraphLoadError::Snapshot {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn print_geojson(graph: &SharedGraph, routes: &[Route]) {
    let g = graph.read().unwrap_or_else(std::sync::PoisonError::into_inner);

    println!("{{");
    println!("  \"type\": \"FeatureCollection\",");
    println!("  \"features\": [");

    let mut routes = routes.iter().peekable();
    while let Some(route) = routes.next() {
        println!("    {{");
        println!("      \"type\": \"Feature\",");
        println!(
            "      \"properties\": {{\"distance\": {}, \"duration\": {}}},",
            route.distance, route.duration,
        );
        println!("      \"geometry\": {{");
        println!("        \"type\": \"LineString\",");
        println!("        \"coordinates\": [");

        let mut nodes = route
            .nodes
            .iter()
            .filter_map(|&node_id| g.get_node(node_id))
            .peekable();
        while let Some(node) = nodes.next() {
            let suffix = if nodes.peek().is_some() { "," } else { "" };
            println!("          [{}, {}]{}", node.lon, node.lat, suffix);
        }

        println!("        ]");
        println!("      }}");
        let suffix = if routes.peek().is_some() { "," } else { "" };
        println!("    }}{}", suffix);
    }

    println!("  ]");
    println!("}}");
}
