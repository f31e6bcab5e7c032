//! Process settings: command line, optional env file, environment variables.
//!
//! Every setting has a default. A missing variable is not an error (it is
//! reported once logging is up); a variable that is set but cannot be parsed
//! is, and all such problems are reported together.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::fetcher::RetryPolicy;

/// Env name meaning "use the process environment as is".
pub const PROCESS_ENV: &str = "docker";

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "shelly-irrigation-hub", version, about = "Keeps an irrigation pump running while any Shelly zone is active")]
pub struct Cli {
    /// Environment name. Anything but `docker` loads `.env.<name>` first.
    #[arg(long, env = "HUB_ENV", default_value = PROCESS_ENV)]
    pub env: String,
}

/// Load `.env.<name>` into the process environment. Variables already set
/// in the environment win over the file.
pub fn load_env_file(env: &str) -> Result<Option<PathBuf>> {
    if env == PROCESS_ENV {
        return Ok(None);
    }
    let path = PathBuf::from(format!(".env.{env}"));
    dotenvy::from_path(&path)
        .with_context(|| format!("failed to load env file: {}", path.display()))?;
    Ok(Some(path))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub logging_level: String,
    pub polling_interval: Duration,
    pub devices_config_dir: String,
    pub devices_config_file: String,
    pub timeout: Duration,
    pub failsafe_seconds: u32,
    pub retry_policy: RetryPolicy,
    pub web_port: u16,
    /// Variables that were not set, with the default used instead.
    pub defaulted: Vec<(&'static str, String)>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut r = Reader {
            lookup,
            defaulted: Vec::new(),
            problems: Vec::new(),
        };

        let logging_level = r.string("LOGGING_LEVEL", "INFO");
        let polling_interval = r.parsed("POLLING_INTERVAL_SECONDS", 5u64);
        let devices_config_dir = r.string("DEVICES_CONFIG_DIR", "");
        let devices_config_file = r.string("DEVICES_CONFIG_FILE", "config.json");
        let timeout = r.parsed("TIMEOUT", 1.0f64);
        let failsafe_seconds = r.parsed("FAILSAFE", 10u32);
        let retry_policy = r.parsed("FETCH_RETRY_POLICY", RetryPolicy::default());
        let web_port = r.parsed("WEB_PORT", 8080u16);

        if polling_interval == 0 {
            r.problems.push("POLLING_INTERVAL_SECONDS must be positive".to_string());
        }
        let timeout = Duration::try_from_secs_f64(timeout)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| {
                r.problems
                    .push(format!("TIMEOUT must be a positive number of seconds, got {timeout}"));
                Duration::ZERO
            });
        if failsafe_seconds == 0 {
            r.problems.push("FAILSAFE must be positive".to_string());
        }

        if !r.problems.is_empty() {
            bail!("invalid settings:\n  {}", r.problems.join("\n  "));
        }

        Ok(Self {
            logging_level,
            polling_interval: Duration::from_secs(polling_interval),
            devices_config_dir,
            devices_config_file,
            timeout,
            failsafe_seconds,
            retry_policy,
            web_port,
            defaulted: r.defaulted,
        })
    }

    /// `DEVICES_CONFIG_DIR/DEVICES_CONFIG_FILE`; an empty dir means the
    /// working directory.
    pub fn devices_config_path(&self) -> PathBuf {
        PathBuf::from(&self.devices_config_dir).join(&self.devices_config_file)
    }

    /// Report defaulted variables. Call once the subscriber is installed.
    pub fn log_defaults(&self) {
        for (key, value) in &self.defaulted {
            warn!(key, default = %value, "setting not set, using default");
        }
        info!(
            polling_interval_secs = self.polling_interval.as_secs(),
            timeout_ms = self.timeout.as_millis() as u64,
            failsafe_seconds = self.failsafe_seconds,
            retry_policy = %self.retry_policy,
            web_port = self.web_port,
            devices_config = %self.devices_config_path().display(),
            "settings loaded"
        );
    }
}

struct Reader<F> {
    lookup: F,
    defaulted: Vec<(&'static str, String)>,
    problems: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Reader<F> {
    fn string(&mut self, key: &'static str, default: &str) -> String {
        match (self.lookup)(key) {
            Some(v) => v,
            None => {
                self.defaulted.push((key, default.to_string()));
                default.to_string()
            }
        }
    }

    fn parsed<T>(&mut self, key: &'static str, default: T) -> T
    where
        T: std::str::FromStr + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(raw) => match raw.trim().parse() {
                Ok(v) => v,
                Err(e) => {
                    self.problems.push(format!("{key}={raw:?}: {e}"));
                    default
                }
            },
            None => {
                self.defaulted.push((key, default.to_string()));
                default
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Map a `LOGGING_LEVEL` value (`DEBUG`, `INFO`, `WARNING`, ...) to a
/// tracing filter directive. `None` for unknown levels.
pub fn level_directive(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" | "fatal" => Some("error"),
        _ => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
