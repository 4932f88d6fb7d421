//! Built-in configuration defaults.
//!
//! Every tunable has a named constant here so the TOML file can stay
//! sparse; an absent section falls back to these values.

/// Custom tool and LLM step timeout.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Preset API fetch timeout. Shares the tool bound unless tuned down.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Frame interval for animated states that set expressions without a speed.
pub const DEFAULT_FRAME_MS: u64 = 50;

/// Persistent memory location, relative to the working directory.
pub const DEFAULT_MEMORY_FILE: &str = "storage/memory.json";

/// Pipeline registry location, relative to the working directory.
pub const DEFAULT_PIPELINES_FILE: &str = "storage/pipelines.json";

/// Config file read when `LUMEN_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "lumen.toml";
