//! Merge module documents into a compiled world file.
//!
//! Modules are partial world documents; merging folds their nodes, starts,
//! and catalogs into a base world. The merged result must pass the full
//! content load before anything is written.
//!
//! ```bash
//! merge-modules world/base.json world/modules world/world.json
//! ```

use patchwork_tools::cli::init_tracing;
use patchwork_tools::merge::merge_from_dir;
use std::path::PathBuf;

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }
    if args.len() < 3 {
        print_help();
        std::process::exit(1);
    }

    let base = PathBuf::from(&args[1]);
    let modules = PathBuf::from(&args[2]);
    let output = args.get(3).map(PathBuf::from).unwrap_or_else(|| base.clone());

    let (merged, count) = match merge_from_dir(&base, &modules) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("Merge aborted: {err}");
            std::process::exit(1);
        }
    };

    let pretty = match serde_json::to_string_pretty(&merged) {
        Ok(pretty) => pretty,
        Err(err) => {
            eprintln!("Failed to serialize merged world: {err}");
            std::process::exit(1);
        }
    };
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                eprintln!("Failed to create {}: {err}", parent.display());
                std::process::exit(1);
            }
        }
    }
    if let Err(err) = std::fs::write(&output, pretty + "\n") {
        eprintln!("Failed to write {}: {err}", output.display());
        std::process::exit(1);
    }

    println!("Merged {count} module(s) into {}.", output.display());
}

fn print_help() {
    println!("merge-modules - fold module documents into a base world");
    println!();
    println!("USAGE:");
    println!("  merge-modules <base.json> <modules-dir> [output.json]");
    println!();
    println!("Every *.json under <modules-dir> is merged in name order.");
    println!("Node ids must be unique across base and modules; starts append;");
    println!("factions and advanced tags deduplicate; conflicting tag aliases");
    println!("abort the merge. Output defaults to the base path.");
}
