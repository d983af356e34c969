//! Interactive terminal walk through a world file.
//!
//! A thin line-oriented front end over [`StorySession`]: it renders frames,
//! reads choice numbers, and leans on the engine for saves and recovery.
//! Useful for playtesting a world without a full client.
//!
//! ```bash
//! play world/world.json
//! ```
//!
//! `PATCHWORK_WORLD` overrides the world path, `PATCHWORK_SAVES` and
//! `PATCHWORK_PROFILES` relocate the save and profile directories.

use patchwork_core::persist::{AUTOSAVE_SLOT, QUICK_SLOT};
use patchwork_core::{
    available_starts, Frame, Profile, ProfileStore, SaveManager, Step, StorySession, WalkError,
    WorldModel,
};
use patchwork_tools::cli::{init_tracing, world_path, DEFAULT_WORLD};
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

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

    let saves_root = std::env::var("PATCHWORK_SAVES").unwrap_or_else(|_| "saves".to_string());
    let profiles_root =
        std::env::var("PATCHWORK_PROFILES").unwrap_or_else(|_| "profiles".to_string());
    let profiles = ProfileStore::new(profiles_root);
    let saves = SaveManager::new(saves_root, profiles, world.title.clone());

    if let Err(err) = run(world, saves) {
        eprintln!("Session aborted: {err}");
        std::process::exit(1);
    }
}

fn run(world: Arc<WorldModel>, saves: SaveManager) -> Result<(), Box<dyn Error>> {
    println!("=== {} ===", world.title);
    println!();

    let profile_name = match prompt("Profile [default]: ") {
        Some(name) if !name.is_empty() => name,
        Some(_) => "default".to_string(),
        None => return Ok(()),
    };
    let profile = saves.profile_store().load_or_create(&profile_name)?;
    if !profile.seen_endings.is_empty() {
        println!(
            "Welcome back. This profile has found {} ending(s).",
            profile.seen_endings.len()
        );
    }

    let mut session = if saves.has_slot(AUTOSAVE_SLOT) && wants_resume() {
        let outcome = saves.load(AUTOSAVE_SLOT)?;
        if outcome.recovered_from_backup {
            println!("[RECOVERED] The autosave was damaged; its backup was promoted.");
        }
        StorySession::resume(Arc::clone(&world), outcome.state, outcome.profile)?
    } else {
        pick_start(Arc::clone(&world), profile)?
    }
    .with_saves(saves.clone());

    println!();
    println!("Enter a choice number. S quick-saves, L loads the quick save, Q quits.");

    loop {
        match session.current()? {
            Step::Ended { ending } => {
                println!();
                println!("=== THE END: {ending} ===");
                println!(
                    "This profile has found {} ending(s).",
                    session.profile().seen_endings.len()
                );
                break;
            }
            Step::Frame(frame) => {
                render(&frame);
                let Some(line) = prompt("> ") else {
                    break;
                };
                match line.to_ascii_lowercase().as_str() {
                    "" => continue,
                    "q" | "quit" => {
                        println!("Goodbye!");
                        break;
                    }
                    "s" | "save" => match session.quick_save() {
                        Ok(()) => println!("[SAVED] Quick save written."),
                        Err(err) => println!("[ERROR] Save failed: {err}"),
                    },
                    "l" | "load" => load_quick(&mut session, &world, &saves),
                    other => match other.parse::<usize>() {
                        Ok(n) if n >= 1 => step(&mut session, &world, n - 1)?,
                        _ => println!("[ERROR] Enter a choice number, S, L, or Q."),
                    },
                }
            }
        }
    }

    Ok(())
}

/// Apply one selection, downgrading recoverable walk errors to messages.
fn step(
    session: &mut StorySession,
    world: &Arc<WorldModel>,
    index: usize,
) -> Result<(), Box<dyn Error>> {
    match session.choose(index) {
        Ok(_) => {}
        Err(WalkError::ChoiceOutOfRange { available, .. }) => {
            println!("[ERROR] Pick a number between 1 and {available}.");
        }
        Err(WalkError::DeadEnd { node }) => {
            println!("[DEAD END] '{node}' offers no way forward.");
            let fallback = world
                .start(&session.state().start_id)
                .map(|start| start.node.clone());
            match fallback {
                Some(origin) => {
                    println!("Returning to where this run began.");
                    session.recover(&origin)?;
                }
                None => return Err(WalkError::DeadEnd { node }.into()),
            }
        }
        Err(err) => return Err(err.into()),
    }
    if let Some(err) = session.take_autosave_error() {
        println!("[WARN] Autosave failed: {err}");
    }
    Ok(())
}

fn render(frame: &Frame) {
    println!();
    println!("== {} ==", frame.title);
    println!("{}", frame.text);
    if !frame.tags.is_empty() {
        println!("Tags: {}", frame.tags.join(", "));
    }
    if !frame.items.is_empty() {
        let items: Vec<String> = frame
            .items
            .iter()
            .map(|(name, count)| {
                if *count > 1 {
                    format!("{name} x{count}")
                } else {
                    name.clone()
                }
            })
            .collect();
        println!("Items: {}", items.join(", "));
    }
    if !frame.reputation.is_empty() {
        let standing: Vec<String> = frame
            .reputation
            .iter()
            .map(|(faction, value)| format!("{faction} {value:+}"))
            .collect();
        println!("Standing: {}", standing.join(", "));
    }
    println!();
    for (i, label) in frame.choices.iter().enumerate() {
        println!("  {}. {label}", i + 1);
    }
}

fn pick_start(world: Arc<WorldModel>, profile: Profile) -> Result<StorySession, Box<dyn Error>> {
    let picks: Vec<(String, String, Option<String>)> = available_starts(&world, &profile)
        .into_iter()
        .map(|start| {
            (
                start.id().to_string(),
                start.title().to_string(),
                start.blurb.clone(),
            )
        })
        .collect();
    if picks.is_empty() {
        return Err("this profile has no available starts".into());
    }

    println!();
    println!("Choose a start:");
    for (i, (_, title, blurb)) in picks.iter().enumerate() {
        match blurb {
            Some(blurb) => println!("  {}. {title}: {blurb}", i + 1),
            None => println!("  {}. {title}", i + 1),
        }
    }

    let index = loop {
        let Some(line) = prompt("Start [1]: ") else {
            return Err("no start selected".into());
        };
        if line.is_empty() {
            break 0;
        }
        match line.parse::<usize>() {
            Ok(n) if n >= 1 && n <= picks.len() => break n - 1,
            _ => println!("[ERROR] Pick a number between 1 and {}.", picks.len()),
        }
    };

    let player = match prompt("Character name [Traveler]: ") {
        Some(name) if !name.is_empty() => name,
        _ => "Traveler".to_string(),
    };

    Ok(StorySession::new(world, profile, &picks[index].0, player)?)
}

fn load_quick(session: &mut StorySession, world: &Arc<WorldModel>, saves: &SaveManager) {
    let outcome = match saves.load(QUICK_SLOT) {
        Ok(outcome) => outcome,
        Err(err) => {
            println!("[ERROR] Load failed: {err}");
            return;
        }
    };
    let recovered = outcome.recovered_from_backup;
    match StorySession::resume(Arc::clone(world), outcome.state, outcome.profile) {
        Ok(resumed) => {
            *session = resumed.with_saves(saves.clone());
            println!("[LOADED] Quick save restored.");
            if recovered {
                println!("[RECOVERED] The quick save was damaged; its backup was promoted.");
            }
        }
        Err(err) => println!("[ERROR] Load failed: {err}"),
    }
}

fn wants_resume() -> bool {
    match prompt("Resume the autosave? [Y/n] ") {
        Some(answer) => {
            let answer = answer.to_ascii_lowercase();
            answer != "n" && answer != "no"
        }
        None => false,
    }
}

fn prompt(label: &str) -> Option<String> {
    print!("{label}");
    io::stdout().flush().ok();
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()),
        Err(err) => {
            eprintln!("Error reading input: {err}");
            None
        }
    }
}

fn print_help() {
    println!("play - interactive walk through a world file");
    println!();
    println!("USAGE:");
    println!("  play [world.json]");
    println!();
    println!("Defaults to {DEFAULT_WORLD}; PATCHWORK_WORLD overrides it.");
    println!("PATCHWORK_SAVES and PATCHWORK_PROFILES relocate the save and");
    println!("profile directories (default: saves/, profiles/).");
    println!();
    println!("At the prompt: a number picks a choice, S quick-saves,");
    println!("L loads the quick save, Q quits.");
}
