//! Tracing initialisation.

use std::collections::BTreeMap;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Per-crate overrides, e.g. `govindex-storage` → `debug`.
    pub components: BTreeMap<String, String>,
    /// JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives: `"info,govindex_storage=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Parse a `<crate>=<level>` override as given to `--log`.
pub fn parse_component_level(raw: &str) -> Result<(String, String), String> {
    let (component, level) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <crate>=<level>, got `{raw}`"))?;
    let component = component.trim();
    let level = level.trim().to_ascii_lowercase();
    if component.is_empty() {
        return Err(format!("missing crate name in `{raw}`"));
    }
    if !LEVELS.contains(&level.as_str()) {
        return Err(format!("unknown level `{level}`, expected one of: {}", LEVELS.join(", ")));
    }
    Ok((component.to_string(), level))
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over `config`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
