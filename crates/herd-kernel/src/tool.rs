use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use herd_bus::{Pushed, RingBuffer};
use herd_core::{
    KernelError, MAX_SUBSCRIPTIONS, OverflowPolicy, RestartPolicy, ToolInfo, ToolState,
    normalize_pattern,
};
use herd_process::{ChildProcess, LineAssembler, ReadOutcome, Reaped, WriteOutcome};

/// How long a force-terminated child gets to disappear before we give up
/// on reaping it inline.
const FORCE_REAP_WINDOW: Duration = Duration::from_millis(500);

/// Everything needed to register a tool.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub name: String,
    pub command: String,
    pub description: Option<String>,
    pub autostart: bool,
    pub restart_policy: RestartPolicy,
    pub restart_on_crash: bool,
    pub max_restarts: u32,
    pub queue_capacity: usize,
    pub queue_policy: OverflowPolicy,
}

impl ToolSettings {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            description: None,
            autostart: false,
            restart_policy: RestartPolicy::Never,
            restart_on_crash: false,
            max_restarts: 3,
            queue_capacity: 100,
            queue_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Lines collected from one child stream during an iteration.
#[derive(Debug, Default)]
pub struct StreamDrain {
    pub lines: Vec<String>,
    /// The pipe reached EOF.
    pub closed: bool,
    /// The pipe failed in a way not explained by would-block or EOF.
    pub failed: bool,
}

/// One registered tool: configuration, lifecycle state, child handle,
/// inbox, reassemblers and counters, owned exclusively by the registry.
#[derive(Debug)]
pub struct Tool {
    name: String,
    command: String,
    description: Option<String>,
    state: ToolState,
    pub(crate) autostart: bool,
    pub(crate) restart_policy: RestartPolicy,
    pub(crate) restart_on_crash: bool,
    pub(crate) max_restarts: u32,
    pub(crate) restart_count: u32,
    /// When a scheduled crash restart becomes due.
    pub(crate) retry_at: Option<Instant>,
    subscriptions: Vec<String>,
    inbox: RingBuffer,
    pub(crate) child: Option<ChildProcess>,
    stdout_lines: LineAssembler,
    stderr_lines: LineAssembler,
    /// Bytes of the inbox front line already written to the child.
    front_written: usize,
    pub(crate) events_sent: u64,
    events_received: u64,
    /// Lifetime spawn attempts, across crash episodes.
    spawn_attempts: u32,
    started_at: Option<Instant>,
    last_output_at: Option<Instant>,
}

impl Tool {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            name: settings.name,
            command: settings.command,
            description: settings.description,
            state: ToolState::Stopped,
            autostart: settings.autostart,
            restart_policy: settings.restart_policy,
            restart_on_crash: settings.restart_on_crash,
            max_restarts: settings.max_restarts,
            restart_count: 0,
            retry_at: None,
            subscriptions: Vec::new(),
            inbox: RingBuffer::new(settings.queue_capacity, settings.queue_policy),
            child: None,
            stdout_lines: LineAssembler::new(),
            stderr_lines: LineAssembler::new(),
            front_written: 0,
            events_sent: 0,
            events_received: 0,
            spawn_attempts: 0,
            started_at: None,
            last_output_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ToolState {
        self.state
    }

    pub fn inbox(&self) -> &RingBuffer {
        &self.inbox
    }

    #[cfg(test)]
    pub(crate) fn inbox_mut(&mut self) -> &mut RingBuffer {
        &mut self.inbox
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent
    }

    pub fn events_received(&self) -> u64 {
        self.events_received
    }

    pub fn spawn_attempts(&self) -> u32 {
        self.spawn_attempts
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Add a subscription pattern: either `*` or an exact event type.
    pub fn subscribe(&mut self, pattern: &str) -> Result<(), KernelError> {
        let pattern = normalize_pattern(pattern);
        if pattern.is_empty() {
            return Err(KernelError::InvalidArg(
                "subscription pattern must not be empty".into(),
            ));
        }
        if pattern.contains('|') {
            return Err(KernelError::InvalidArg(
                "subscription pattern must not contain '|'".into(),
            ));
        }
        if self.subscriptions.len() >= MAX_SUBSCRIPTIONS {
            return Err(KernelError::InvalidArg(format!(
                "tool '{}' already has {MAX_SUBSCRIPTIONS} subscriptions",
                self.name
            )));
        }
        if !self.subscriptions.iter().any(|p| p == pattern) {
            self.subscriptions.push(pattern.to_string());
        }
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// `*` matches every type, including the literal type `*`.
    pub fn is_subscribed(&self, event_type: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|p| p == "*" || p == event_type)
    }

    /// Whether queued inbox lines survive the transition out of `Running`.
    pub fn preserves_inbox(&self) -> bool {
        self.restart_policy == RestartPolicy::OnDemand && self.restart_on_crash
    }

    pub fn push_inbox(&mut self, line: String) -> Pushed {
        self.inbox.push(line)
    }

    /// Account an event line the fan-out step could not store and cannot
    /// retry, so the inbox ledger covers every matched event.
    pub(crate) fn record_inbox_drop(&mut self) {
        self.inbox.record_drop();
    }

    /// Transition `Stopped` → `Starting`; the spawn happens later in the
    /// same loop iteration.
    pub(crate) fn set_starting(&mut self) {
        if self.state == ToolState::Stopped {
            self.state = ToolState::Starting;
        }
    }

    /// Spawn the child. Idempotent when already running.
    pub fn start(&mut self) -> Result<(), KernelError> {
        if self.state == ToolState::Running {
            return Ok(());
        }
        self.state = ToolState::Starting;
        self.spawn_attempts += 1;
        match ChildProcess::spawn(&self.command) {
            Ok(child) => {
                let pid = child.pid();
                self.child = Some(child);
                self.stdout_lines = LineAssembler::new();
                self.stderr_lines = LineAssembler::new();
                self.front_written = 0;
                self.state = ToolState::Running;
                self.started_at = Some(Instant::now());
                self.last_output_at = Some(Instant::now());
                info!(tool = %self.name, pid, "tool started");
                Ok(())
            }
            Err(err) => {
                self.state = ToolState::Error;
                warn!(tool = %self.name, error = %err, "spawn failed");
                Err(err)
            }
        }
    }

    /// Graceful stop with a bounded grace window, escalating to force.
    /// Idempotent when already in a terminal state.
    pub fn stop(&mut self, grace: Duration) -> Result<(), KernelError> {
        if self.state.is_terminal() {
            self.retry_at = None;
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            self.state = ToolState::Stopped;
            return Ok(());
        };
        self.state = ToolState::Stopping;
        child.terminate(false);
        match child.reap(grace) {
            Reaped::Exited(code) => {
                debug!(tool = %self.name, ?code, "tool stopped");
            }
            Reaped::TimedOut => {
                warn!(tool = %self.name, grace_ms = grace.as_millis() as u64,
                    "graceful stop timed out, force-terminating");
                child.terminate(true);
                child.reap(FORCE_REAP_WINDOW);
            }
        }
        self.retry_at = None;
        self.finish_exit(ToolState::Stopped);
        Ok(())
    }

    /// The child went away without being asked to.
    pub(crate) fn mark_crashed(&mut self) {
        let exit_code = self.child.as_ref().and_then(ChildProcess::exit_code);
        warn!(tool = %self.name, ?exit_code, "tool crashed");
        self.finish_exit(ToolState::Crashed);
    }

    /// Drop the child (closing all endpoints), settle the inbox per the
    /// preservation rule, and land in `next`.
    pub(crate) fn finish_exit(&mut self, next: ToolState) {
        self.child = None;
        self.started_at = None;
        self.front_written = 0;
        if !self.preserves_inbox() {
            self.inbox.clear();
        }
        self.state = next;
    }

    /// Read stdout up to `budget` bytes, returning completed lines.
    pub(crate) fn drain_stdout(&mut self, budget: usize) -> StreamDrain {
        let mut drain = StreamDrain::default();
        let Some(child) = self.child.as_mut() else {
            drain.closed = true;
            return drain;
        };
        let mut buf = [0u8; 4096];
        let mut read = 0;
        while read < budget {
            match child.read_stdout(&mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    read += n;
                    self.last_output_at = Some(Instant::now());
                    drain.lines.extend(self.stdout_lines.feed(&buf[..n]));
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Closed) => {
                    drain.closed = true;
                    if let Some(tail) = self.stdout_lines.flush_remainder() {
                        drain.lines.push(tail);
                    }
                    break;
                }
                Err(err) => {
                    warn!(tool = %self.name, error = %err, "stdout read failed");
                    drain.failed = true;
                    break;
                }
            }
        }
        drain
    }

    pub(crate) fn drain_stderr(&mut self, budget: usize) -> StreamDrain {
        let mut drain = StreamDrain::default();
        let Some(child) = self.child.as_mut() else {
            drain.closed = true;
            return drain;
        };
        let mut buf = [0u8; 4096];
        let mut read = 0;
        while read < budget {
            match child.read_stderr(&mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    read += n;
                    self.last_output_at = Some(Instant::now());
                    drain.lines.extend(self.stderr_lines.feed(&buf[..n]));
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Closed) => {
                    drain.closed = true;
                    if let Some(tail) = self.stderr_lines.flush_remainder() {
                        drain.lines.push(tail);
                    }
                    break;
                }
                Err(err) => {
                    warn!(tool = %self.name, error = %err, "stderr read failed");
                    drain.failed = true;
                    break;
                }
            }
        }
        drain
    }

    /// Write queued inbox lines to the child's stdin. Pops a line only
    /// after it has fully drained; a partial write leaves the remainder at
    /// the front for the next iteration. Returns true when the stdin pipe
    /// is broken.
    pub(crate) fn flush_inbox(&mut self) -> bool {
        loop {
            let Some(child) = self.child.as_mut() else {
                return false;
            };
            let Some(front) = self.inbox.peek_front() else {
                return false;
            };
            let total = front.len();
            let offset = self.front_written;
            match child.write_stdin(&front.as_bytes()[offset..]) {
                Ok(WriteOutcome::Wrote(n)) => {
                    self.front_written += n;
                    if self.front_written >= total {
                        self.inbox.pop_front();
                        self.front_written = 0;
                        self.events_received += 1;
                    } else {
                        return false;
                    }
                }
                Ok(WriteOutcome::WouldBlock) => return false,
                Ok(WriteOutcome::Closed) => return true,
                Err(err) => {
                    warn!(tool = %self.name, error = %err, "stdin write failed");
                    return true;
                }
            }
        }
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            command: self.command.clone(),
            description: self.description.clone(),
            state: self.state,
            pid: self.child.as_ref().map(ChildProcess::pid),
            autostart: self.autostart,
            restart_on_crash: self.restart_on_crash,
            max_restarts: self.max_restarts,
            restart_count: self.restart_count,
            events_sent: self.events_sent,
            events_received: self.events_received,
            subscription_count: self.subscriptions.len(),
            uptime_secs: self.started_at.map(|t| t.elapsed().as_secs()),
            idle_secs: self.last_output_at.map(|t| t.elapsed().as_secs()),
        }
    }
}
