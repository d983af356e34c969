//! Shared plumbing for the command-line tools.

use tracing_subscriber::{fmt, EnvFilter};

/// Default world document location when neither an argument nor
/// `PATCHWORK_WORLD` says otherwise.
pub const DEFAULT_WORLD: &str = "world/world.json";

/// Initialize tracing from `RUST_LOG`, defaulting to warnings only so tool
/// output stays readable.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).compact().init();
}

/// World path resolution: first non-flag argument, then the
/// `PATCHWORK_WORLD` variable, then [`DEFAULT_WORLD`].
pub fn world_path(args: &[String]) -> String {
    args.iter()
        .skip(1)
        .find(|a| !a.starts_with('-'))
        .cloned()
        .or_else(|| std::env::var("PATCHWORK_WORLD").ok())
        .unwrap_or_else(|| DEFAULT_WORLD.to_string())
}
