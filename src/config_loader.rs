use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use log::info;
use serde::Deserialize;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "harness.yml";

// ---------- Data structures ----------

#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Deleted before every run. The server or the test recreates it.
    #[serde(default = "default_config_artifact")]
    pub config_artifact: PathBuf,
    /// Combined stdout/stderr of the test command. Overwritten on every run.
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    #[serde(default)]
    pub status_source: StatusSource,
    /// Kill the test command after this many seconds. Absent = wait forever.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub markers: Markers,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

/// Where the pass/fail decision for the test command comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StatusSource {
    /// Scan the captured output for the configured markers.
    #[default]
    Markers,
    /// Use the test command's own exit status.
    ExitCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Markers {
    #[serde(default = "default_success_marker")]
    pub success: String,
    #[serde(default = "default_failure_marker")]
    pub failure: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_program")]
    pub program: PathBuf,
    #[serde(default = "default_server_args")]
    pub args: Vec<String>,
    /// Server stdout/stderr are appended here. Inherited when absent.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessMode {
    /// Poll `address` until it accepts a TCP connection.
    #[default]
    Probe,
    /// Sleep `startup_delay_ms` and assume the server is up.
    Delay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default)]
    pub mode: ReadinessMode,
    #[serde(default = "default_probe_address")]
    pub address: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

impl HarnessConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-attempt bound. `connect_timeout_ms: 0` means no bound.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

// ---------- Defaults ----------

fn default_config_artifact() -> PathBuf {
    PathBuf::from("./server-config.yml")
}

fn default_output_file() -> PathBuf {
    PathBuf::from("./test-output.log")
}

fn default_success_marker() -> String {
    "+ exit 0".to_string()
}

fn default_failure_marker() -> String {
    "+ exit 1".to_string()
}

fn default_server_program() -> PathBuf {
    PathBuf::from("./rest-server")
}

fn default_server_args() -> Vec<String> {
    ["--host", "127.0.0.1", "--port", "8080"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_probe_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_startup_delay_ms() -> u64 {
    5_000
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            success: default_success_marker(),
            failure: default_failure_marker(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: default_server_program(),
            args: default_server_args(),
            log_file: None,
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::default(),
            address: default_probe_address(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            startup_delay_ms: default_startup_delay_ms(),
        }
    }
}

// ---------- Loading ----------

pub fn parse_config(contents: &str) -> anyhow::Result<HarnessConfig> {
    serde_yaml::from_str(contents).context("failed to parse YAML config")
}

/// Loads the harness config.
///
/// An explicit path must exist. Without one, `harness.yml` in the working
/// directory is used when present and the built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HarnessConfig> {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };

    match fs::read_to_string(path) {
        Ok(contents) => {
            info!("Loading harness config from {}", path.display());
            parse_config(&contents)
                .with_context(|| format!("invalid config file {}", path.display()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound && !explicit => {
            info!("No {} found, using built-in defaults", path.display());
            parse_config(&default_config())
        }
        Err(e) => {
            Err(e).with_context(|| format!("failed to read config file {}", path.display()))
        }
    }
}

// The built-in config, also a reference for writing harness.yml.
fn default_config() -> String {
    r#"# Default configuration for the REST integration harness.
# Deleted before each run; the server recreates it.
config_artifact: "./server-config.yml"

# Combined stdout/stderr of the test command.
output_file: "./test-output.log"

# markers | exit-code
status_source: markers

# Kill the test command after this many seconds. ~ = no limit
command_timeout_secs: ~

markers:
  success: "+ exit 0"
  failure: "+ exit 1"

server:
  program: "./rest-server"
  args: ["--host", "127.0.0.1", "--port", "8080"]
  # Server stdout/stderr go here. ~ = inherit the harness's
  log_file: ~

readiness:
  # probe = poll address until it accepts TCP; delay = sleep startup_delay_ms
  mode: probe
  address: "127.0.0.1:8080"
  timeout_ms: 10000
  poll_interval_ms: 50
  # 0 = no per-attempt limit
  connect_timeout_ms: 1000
  startup_delay_ms: 5000
"#
    .to_string()
}
