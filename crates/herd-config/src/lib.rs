//! Configuration surface: a TOML file with a `[core]` table and one
//! `[tool.NAME]` table per supervised tool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use herd_core::{MAX_SUBSCRIPTIONS, OverflowPolicy, RestartPolicy, normalize_pattern};

fn default_max_tools() -> usize {
    100
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_max_restarts() -> u32 {
    3
}

fn default_queue_size() -> usize {
    100
}

fn default_command_file() -> PathBuf {
    PathBuf::from("herd.command")
}

fn default_response_file() -> PathBuf {
    PathBuf::from("herd.response")
}

/// Log threshold names accepted in `[core] log_level`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Maps onto `error`; the tracing stack has no separate fatal level.
    Fatal,
}

impl LogLevel {
    /// Directive string for a `tracing_subscriber::EnvFilter`.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("invalid log level '{other}'")),
        }
    }
}

/// Kernel-wide settings from the `[core]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub log_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub pid_file: Option<PathBuf>,
    pub max_tools: usize,
    pub message_queue_size: usize,
    pub enable_debug: bool,
    /// Loopback control port; when absent the command/response file pair
    /// is used instead.
    pub control_port: Option<u16>,
    pub command_file: PathBuf,
    pub response_file: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: LogLevel::default(),
            pid_file: None,
            max_tools: default_max_tools(),
            message_queue_size: default_bus_capacity(),
            enable_debug: false,
            control_port: None,
            command_file: default_command_file(),
            response_file: default_response_file(),
        }
    }
}

/// Per-tool settings from a `[tool.NAME]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub restart_on_crash: bool,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Comma-separated event types; `*` subscribes to everything.
    #[serde(default)]
    pub subscribe_to: Option<String>,
    #[serde(default = "default_queue_size")]
    pub max_queue_size: usize,
    #[serde(default)]
    pub queue_policy: OverflowPolicy,
}

impl ToolSpec {
    /// Subscription patterns, split on commas and trimmed of whitespace
    /// and matched quotes.
    pub fn subscriptions(&self) -> Vec<String> {
        let Some(raw) = &self.subscribe_to else {
            return Vec::new();
        };
        raw.split(',')
            .map(normalize_pattern)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// The whole configuration file.
///
/// Tool tables are held in a `BTreeMap`, so tools from a config file are
/// registered in name order; that order is then the registry's fan-out and
/// `list` order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub tool: BTreeMap<String, ToolSpec>,
}

impl KernelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.core.max_tools == 0 {
            bail!("[core] max_tools must be at least 1");
        }
        if self.core.message_queue_size == 0 {
            bail!("[core] message_queue_size must be at least 1");
        }
        if self.tool.len() > self.core.max_tools {
            bail!(
                "{} tools configured but max_tools is {}",
                self.tool.len(),
                self.core.max_tools
            );
        }
        for (name, spec) in &self.tool {
            if name.trim().is_empty() {
                bail!("tool names must not be empty");
            }
            if name.contains('|') || name.contains(char::is_whitespace) {
                bail!("tool name '{name}' must not contain '|' or whitespace");
            }
            if spec.command.trim().is_empty() {
                bail!("[tool.{name}] command must not be empty");
            }
            if spec.max_queue_size == 0 {
                bail!("[tool.{name}] max_queue_size must be at least 1");
            }
            let subs = spec.subscriptions();
            if subs.len() > MAX_SUBSCRIPTIONS {
                bail!(
                    "[tool.{name}] has {} subscriptions, the limit is {}",
                    subs.len(),
                    MAX_SUBSCRIPTIONS
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
