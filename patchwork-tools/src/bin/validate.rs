//! World content validator.
//!
//! Runs the full content load (reference checks included) against a world
//! document, then prints advisory lint warnings. Load failures exit
//! non-zero; lint findings do not.
//!
//! ```bash
//! validate world/world.json
//! ```

use patchwork_core::{lint, WorldModel};
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
            eprintln!("Validation failed for {path}:");
            eprintln!(" - {err}");
            std::process::exit(1);
        }
    };

    println!("Validation passed for {path}.");
    println!("  title:  {}", world.title);
    println!("  nodes:  {}", world.nodes.len());
    println!("  starts: {}", world.starts.len());

    let warnings = lint(&world);
    if warnings.is_empty() {
        println!("No lint warnings.");
    } else {
        println!("{} lint warning(s):", warnings.len());
        for warning in &warnings {
            println!(" - {warning}");
        }
    }
}

fn print_help() {
    println!("validate - check a Patchwork Isles world document");
    println!();
    println!("USAGE:");
    println!("  validate [world.json]");
    println!();
    println!("The world path defaults to PATCHWORK_WORLD, then world/world.json.");
    println!("Structural errors (bad references, unknown kinds) fail the run;");
    println!("authoring lint (choice corridor, gate variety) is advisory.");
}
