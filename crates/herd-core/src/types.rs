use serde::{Deserialize, Serialize};

/// Upper bound on subscription patterns per tool.
pub const MAX_SUBSCRIPTIONS: usize = 50;

/// Trim surrounding whitespace and one pair of matched quotes from a
/// subscription pattern, the normal form in which patterns are stored.
pub fn normalize_pattern(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].trim();
        }
    }
    trimmed
}

/// Lifecycle state of a supervised tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolState {
    /// Registered but no child process exists.
    Stopped,
    /// A spawn has been requested but not yet completed.
    Starting,
    /// Child process is alive and serviced every iteration.
    Running,
    /// A graceful stop is in progress.
    Stopping,
    /// The child exited without being asked to.
    Crashed,
    /// Spawn failed or the crash-restart budget is exhausted.
    Error,
}

impl ToolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Crashed => "Crashed",
            Self::Error => "Error",
        }
    }

    /// States in which a tool must hold no pipe endpoints.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed | Self::Error)
    }
}

impl std::fmt::Display for ToolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// When the kernel may start a tool on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Only explicit `start` brings the tool up.
    #[default]
    Never,
    /// Eligible for autostart and unconditional supervision.
    Always,
    /// Started lazily the first time a subscribed event arrives.
    OnDemand,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Always => "always",
            Self::OnDemand => "on_demand",
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "on_demand" | "on-demand" => Ok(Self::OnDemand),
            other => Err(format!(
                "invalid restart policy '{other}' (expected never, always, or on_demand)"
            )),
        }
    }
}

/// What a full ring buffer does with the next line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the front line to make room; freshness wins.
    #[default]
    DropOldest,
    /// Discard the incoming line; history wins.
    DropNewest,
    /// Refuse without mutating; the caller applies backpressure.
    Block,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropOldest => "drop_oldest",
            Self::DropNewest => "drop_newest",
            Self::Block => "block",
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_oldest" | "drop-oldest" => Ok(Self::DropOldest),
            "drop_newest" | "drop-newest" => Ok(Self::DropNewest),
            "block" => Ok(Self::Block),
            other => Err(format!(
                "invalid queue policy '{other}' (expected drop_oldest, drop_newest, or block)"
            )),
        }
    }
}

/// Observable subset of a tool record, returned by `status` and `list`.
#[derive(Clone, Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub command: String,
    pub description: Option<String>,
    pub state: ToolState,
    pub pid: Option<u32>,
    pub autostart: bool,
    pub restart_on_crash: bool,
    pub max_restarts: u32,
    pub restart_count: u32,
    pub events_sent: u64,
    pub events_received: u64,
    pub subscription_count: usize,
    /// Seconds since the last successful start, while running.
    pub uptime_secs: Option<u64>,
    /// Seconds since the child last produced output on either stream.
    pub idle_secs: Option<u64>,
}
