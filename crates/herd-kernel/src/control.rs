use tokio::sync::oneshot;

/// One parsed control verb. Every transport binding reduces its input to
/// this enum; the kernel never sees transport details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Start(String),
    Stop(String),
    Restart(String),
    Status(String),
    List,
    Shutdown,
    Uptime,
    Version,
    Exists(String),
    Count,
}

impl ControlCommand {
    /// Parse one control line: case-insensitive first token, space
    /// separated arguments. The error string is a ready-to-send response.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err("Error: empty command".to_string());
        };
        let verb = verb.to_ascii_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("Error: too many arguments for '{verb}'"));
        }

        let named = |arg: Option<&str>, make: fn(String) -> Self| match arg {
            Some(name) => Ok(make(name.to_string())),
            None => Err(format!("Error: '{verb}' requires a tool name")),
        };
        let bare = |arg: Option<&str>, cmd: Self| match arg {
            None => Ok(cmd),
            Some(_) => Err(format!("Error: '{verb}' takes no arguments")),
        };

        match verb.as_str() {
            "start" => named(arg, Self::Start),
            "stop" => named(arg, Self::Stop),
            "restart" => named(arg, Self::Restart),
            "status" => named(arg, Self::Status),
            "exists" => named(arg, Self::Exists),
            "list" => bare(arg, Self::List),
            "shutdown" => bare(arg, Self::Shutdown),
            "uptime" => bare(arg, Self::Uptime),
            "version" => bare(arg, Self::Version),
            "count" => bare(arg, Self::Count),
            other => Err(format!("Error: unknown command '{other}'")),
        }
    }
}

/// A command submitted from outside the supervisor loop, paired with the
/// channel its response travels back on.
#[derive(Debug)]
pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: oneshot::Sender<String>,
}
