//! Engine-wide tunables (SPEC_FULL §6): morsel size, worker thread
//! count, and log filter directives, loaded from an optional
//! `config.toml` overlaid with `JOINBENCH_`-prefixed environment
//! variables. Every field defaults, so the engine runs unconfigured.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

fn default_morsel_size() -> u64 {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Row count per morsel in JIT execution (spec.md §5). The reference
    /// implementation hardcodes this; here it's overridable for
    /// experimentation without recompiling.
    #[serde(default = "default_morsel_size")]
    pub morsel_size: u64,

    /// Override for the rayon global thread pool's worker count. `None`
    /// (the default) leaves rayon's own ambient default in place.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// `tracing-subscriber` `EnvFilter` directive string.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "joinbench=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config { morsel_size: default_morsel_size(), worker_threads: None, log_filter: default_log_filter() }
    }
}

impl Config {
    /// Load `config.toml` from the current directory if present, then
    /// apply `JOINBENCH_*` environment overrides on top of it; both are
    /// entirely optional.
    pub fn load() -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("JOINBENCH_"))
            .extract()
            .unwrap_or_else(|_| Config::default());
        Ok(config)
    }
}
