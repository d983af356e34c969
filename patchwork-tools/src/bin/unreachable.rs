//! Reachability report for a world document.
//!
//! Walks choice destinations and teleport targets from every declared start
//! and lists the nodes nothing reaches.
//!
//! ```bash
//! unreachable world/world.json
//! ```

use patchwork_core::{reachability, WorldModel};
use patchwork_tools::cli::{init_tracing, world_path};

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }
    let path = world_path(&args);

    let world = match WorldModel::load_from_path(&path) {
        Ok(world) => world,
        Err(err) => {
            eprintln!("Failed to load {path}: {err}");
            std::process::exit(1);
        }
    };

    let report = reachability(&world);
    println!("World file: {path}");
    println!("Total nodes: {}", report.total);
    println!("Reachable nodes: {}", report.reachable.len());
    if report.unreachable.is_empty() {
        println!("All nodes reachable from the declared starts.");
    } else {
        println!("Unreachable nodes:");
        for node in &report.unreachable {
            println!("  - {node}");
        }
    }
}

fn print_help() {
    println!("unreachable - list nodes no start can reach");
    println!();
    println!("USAGE:");
    println!("  unreachable [world.json]");
    println!();
    println!("The world path defaults to PATCHWORK_WORLD, then world/world.json.");
    println!("Edges are choice destinations plus teleport targets; conditions");
    println!("are ignored, so a listed node is unreachable for every player.");
}
