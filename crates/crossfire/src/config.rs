use std::path::PathBuf;
use std::time::Duration;

use coordination::TimingConfig;

/// Which automation backend hosts the agent sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Real browser windows through a W3C WebDriver server
    Webdriver,
    /// In-process pages with scripted replies
    Simulated,
}

/// Process-level settings, read from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// WebDriver server (chromedriver, geckodriver, selenium)
    pub webdriver_url: String,
    /// Existing WebDriver session to attach to instead of starting one
    pub webdriver_session: Option<String>,
    /// Per-command HTTP timeout for the WebDriver backend
    pub webdriver_request_timeout: Duration,
    /// Debate configuration store
    pub config_path: PathBuf,
    pub timing: TimingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let defaults = TimingConfig::default();
        Self {
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".into()),
            webdriver_session: std::env::var("WEBDRIVER_SESSION").ok(),
            webdriver_request_timeout: secs_from_env(
                "CROSSFIRE_WEBDRIVER_TIMEOUT_SECS",
                Duration::from_secs(30),
            ),
            config_path: std::env::var("CROSSFIRE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("crossfire.json")),
            timing: TimingConfig {
                load_timeout: secs_from_env("CROSSFIRE_LOAD_TIMEOUT_SECS", defaults.load_timeout),
                response_timeout: secs_from_env(
                    "CROSSFIRE_RESPONSE_TIMEOUT_SECS",
                    defaults.response_timeout,
                ),
                ..defaults
            },
        }
    }
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    parse_secs(std::env::var(key).ok().as_deref(), default)
}

/// Whole seconds, falling back to `default` when unset or malformed.
pub fn parse_secs(value: Option<&str>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
