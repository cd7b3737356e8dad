//! Tracing bootstrap for the binary and tests.

use std::str::FromStr;

use tracing::Level;

/// Parses a configured level name. Unknown names fall back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "warning" => Level::WARN,
        other => Level::from_str(other).unwrap_or(Level::INFO),
    }
}

/// Installs the global fmt subscriber at `level`. Only the first call takes
/// effect.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .compact()
        .try_init();
}
