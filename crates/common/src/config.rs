use std::path::PathBuf;

/// Runtime settings loaded from environment variables at startup.
/// Every variable is optional; unparsable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the journal tree (`<root>/<YYYY>/<YYYY-MM-DD>.json`).
    pub journal_dir: PathBuf,

    // Metrics
    pub metrics_days: usize,
    pub metrics_tail_days: usize,

    /// Optional TOML file with engine parameters.
    pub engine_config_path: Option<PathBuf>,

    /// Per-request timeout for the market feed.
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_dir: PathBuf::from("journal"),
            metrics_days: 30,
            metrics_tail_days: 14,
            engine_config_path: None,
            http_timeout_secs: 20,
        }
    }
}

impl Config {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let optional = |key: &str| optional_value(&lookup, key);
        let parsed_usize = |key: &str| parsed_value::<usize>(&lookup, key);

        Config {
            journal_dir: optional("JOURNAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.journal_dir),
            metrics_days: parsed_usize("METRICS_DAYS")
                .filter(|&d| d > 0)
                .unwrap_or(defaults.metrics_days),
            metrics_tail_days: parsed_usize("METRICS_TAIL_DAYS").unwrap_or(defaults.metrics_tail_days),
            engine_config_path: optional("ENGINE_CONFIG_PATH").map(PathBuf::from),
            http_timeout_secs: parsed_value::<u64>(&lookup, "HTTP_TIMEOUT_SECS")
                .filter(|&s| s > 0)
                .unwrap_or(defaults.http_timeout_secs),
        }
    }
}

fn optional_value(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_value<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = optional_value(lookup, key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}
