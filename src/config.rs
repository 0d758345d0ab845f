// =============================================================================
// config.rs - THE STARTING GRID
// =============================================================================
//
// Which postal code to look up, which services to ask, and how long we're
// willing to wait for them. Once upon a time all of this was hardcoded. Now
// every knob reads from the environment (prefixed with CEP_RACE_, loaded
// from .env if one is lying around) and can be overridden again on the
// command line.
//
// Precedence, lowest to highest: built-in default, environment, CLI flag.
// =============================================================================

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::fetchers::{brasilapi, viacep};
use crate::race::RacePolicy;

/// The postal code we look up when nobody tells us otherwise.
pub const DEFAULT_POSTAL_CODE: &str = "01153000";

/// How log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-friendly text.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Every tunable of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The query. Forwarded to both backends as-is.
    pub postal_code: String,

    /// The shared deadline for the whole race. Default: 1000ms.
    pub deadline: Duration,

    /// Per-request ceiling enforced by the HTTP client itself. The race
    /// deadline normally fires long before this does. Default: 5000ms.
    pub request_timeout: Duration,

    /// ViaCEP base URL. The `/ws/{code}/json/` path is appended.
    pub viacep_base_url: String,

    /// BrasilAPI base URL. The `/api/cep/v1/{code}` path is appended.
    pub brasilapi_base_url: String,

    /// First-completed (default) or first-success.
    pub race_policy: RacePolicy,

    pub log_format: LogFormat,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            postal_code: DEFAULT_POSTAL_CODE.to_string(),
            deadline: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(5000),
            viacep_base_url: viacep::DEFAULT_BASE_URL.to_string(),
            brasilapi_base_url: brasilapi::DEFAULT_BASE_URL.to_string(),
            race_policy: RacePolicy::FirstCompleted,
            log_format: LogFormat::Pretty,
            user_agent: format!("cep-race-engine/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// A `.env` file in the working directory is read first if it exists.
    pub fn from_env() -> Self {
        // No .env is perfectly fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`], but reading from any key/value source.
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Config {
            postal_code: env_or_default(&lookup, "CEP_RACE_POSTAL_CODE", &defaults.postal_code),
            deadline: Duration::from_millis(
                env_or_default(&lookup, "CEP_RACE_DEADLINE_MS", "1000")
                    .trim()
                    .parse()
                    .unwrap_or(1000),
            ),
            request_timeout: Duration::from_millis(
                env_or_default(&lookup, "CEP_RACE_REQUEST_TIMEOUT_MS", "5000")
                    .trim()
                    .parse()
                    .unwrap_or(5000),
            ),
            viacep_base_url: env_or_default(&lookup, "CEP_RACE_VIACEP_URL", viacep::DEFAULT_BASE_URL),
            brasilapi_base_url: env_or_default(&lookup, "CEP_RACE_BRASILAPI_URL", brasilapi::DEFAULT_BASE_URL),
            race_policy: env_or_default(&lookup, "CEP_RACE_POLICY", "first-completed")
                .parse()
                .unwrap_or(defaults.race_policy),
            log_format: env_or_default(&lookup, "CEP_RACE_LOG_FORMAT", "pretty")
                .parse()
                .unwrap_or(defaults.log_format),
            user_agent: env_or_default(&lookup, "CEP_RACE_USER_AGENT", &defaults.user_agent),
        }
    }

    /// Layer explicit command-line flags over whatever the environment said.
    pub fn with_cli(mut self, cli: Cli) -> Self {
        if let Some(code) = cli.postal_code {
            self.postal_code = code;
        }
        if let Some(ms) = cli.deadline_ms {
            self.deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = cli.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(url) = cli.viacep_url {
            self.viacep_base_url = url;
        }
        if let Some(url) = cli.brasilapi_url {
            self.brasilapi_base_url = url;
        }
        if let Some(policy) = cli.policy {
            self.race_policy = policy;
        }
        if let Some(format) = cli.log_format {
            self.log_format = format;
        }
        if let Some(agent) = cli.user_agent {
            self.user_agent = agent;
        }
        self
    }
}

fn env_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Resolve a Brazilian postal code by racing ViaCEP against BrasilAPI.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "cep_race_engine", version)]
pub struct Cli {
    /// Postal code (CEP) to look up. Falls back to CEP_RACE_POSTAL_CODE.
    #[arg(value_name = "CEP")]
    pub postal_code: Option<String>,

    /// Race deadline in milliseconds.
    #[arg(long = "deadline-ms", value_name = "ms")]
    pub deadline_ms: Option<u64>,

    /// Per-request HTTP timeout in milliseconds.
    #[arg(long = "request-timeout-ms", value_name = "ms")]
    pub request_timeout_ms: Option<u64>,

    /// ViaCEP base URL.
    #[arg(long = "viacep-url", value_name = "url")]
    pub viacep_url: Option<String>,

    /// BrasilAPI base URL.
    #[arg(long = "brasilapi-url", value_name = "url")]
    pub brasilapi_url: Option<String>,

    /// `first-completed` or `first-success`.
    #[arg(long = "policy", value_name = "policy")]
    pub policy: Option<RacePolicy>,

    /// `pretty` or `json`.
    #[arg(long = "log-format", value_name = "format")]
    pub log_format: Option<LogFormat>,

    /// User-Agent header sent to both backends.
    #[arg(long = "user-agent", value_name = "agent")]
    pub user_agent: Option<String>,
}
