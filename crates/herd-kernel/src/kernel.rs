use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use herd_bus::{EventBus, Pushed, RingBuffer};
use herd_config::KernelConfig;
use herd_core::{Event, KernelError, OverflowPolicy, RestartPolicy, ToolInfo, ToolState};

use crate::bindings::file::FileTransport;
use crate::control::{ControlCommand, ControlRequest};
use crate::registry::Registry;
use crate::tool::{Tool, ToolSettings};

/// Recent published events kept when debug mode is on.
const DEBUG_RING_CAPACITY: usize = 256;

/// Budget-sized rounds allowed for draining a dead child's pipes.
const FINAL_DRAIN_ROUNDS: usize = 16;

/// Tunables for one kernel instance. Defaults match the documented
/// suggestions; tests shrink the timing knobs.
#[derive(Debug, Clone)]
pub struct KernelOptions {
    /// Supervisor loop iteration cadence.
    pub cadence: Duration,
    /// Grace window for a stop before force-termination.
    pub stop_grace: Duration,
    /// Per-tool, per-stream read budget per iteration, in bytes.
    pub read_budget: usize,
    pub bus_capacity: usize,
    pub max_tools: usize,
    /// First crash-restart delay; doubles per attempt up to the cap.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub enable_debug: bool,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            cadence: Duration::from_millis(50),
            stop_grace: Duration::from_secs(1),
            read_budget: 64 * 1024,
            bus_capacity: 1024,
            max_tools: 100,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            enable_debug: false,
        }
    }
}

/// Process-wide supervisor state: the registry, the bus, the running flag
/// and the loop that drives everything. Owned by the entry point and
/// mutated only from the loop task; command submission happens through a
/// channel so any number of transport bindings can feed it.
pub struct Kernel {
    registry: Registry,
    bus: Arc<EventBus>,
    opts: KernelOptions,
    running: bool,
    started_at: Instant,
    debug_ring: Option<RingBuffer>,
}

impl Kernel {
    pub fn new(opts: KernelOptions) -> Self {
        let debug_ring = opts
            .enable_debug
            .then(|| RingBuffer::new(DEBUG_RING_CAPACITY, OverflowPolicy::DropOldest));
        Self {
            registry: Registry::new(opts.max_tools),
            bus: Arc::new(EventBus::new(opts.bus_capacity)),
            opts,
            running: false,
            started_at: Instant::now(),
            debug_ring,
        }
    }

    /// Build a kernel from a loaded configuration: one registration plus
    /// subscriptions per `[tool.NAME]` table, in name order.
    pub fn from_config(config: &KernelConfig) -> Result<Self, KernelError> {
        let opts = KernelOptions {
            bus_capacity: config.core.message_queue_size,
            max_tools: config.core.max_tools,
            enable_debug: config.core.enable_debug,
            ..KernelOptions::default()
        };
        let mut kernel = Self::new(opts);
        for (name, spec) in &config.tool {
            kernel.register_tool(ToolSettings {
                name: name.clone(),
                command: spec.command.clone(),
                description: spec.description.clone(),
                autostart: spec.autostart,
                restart_policy: spec.restart_policy,
                restart_on_crash: spec.restart_on_crash,
                max_restarts: spec.max_restarts,
                queue_capacity: spec.max_queue_size,
                queue_policy: spec.queue_policy,
            })?;
            for pattern in spec.subscriptions() {
                kernel.subscribe(name, &pattern)?;
            }
        }
        Ok(kernel)
    }

    /// Shared handle for embedded publishers.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn register_tool(&mut self, settings: ToolSettings) -> Result<(), KernelError> {
        if settings.name.trim().is_empty() {
            return Err(KernelError::InvalidArg("tool name must not be empty".into()));
        }
        self.registry.register(Tool::new(settings))
    }

    /// Stop the tool gracefully, then drop its record entirely.
    pub fn unregister_tool(&mut self, name: &str) -> Result<(), KernelError> {
        let mut tool = self.registry.unregister(name)?;
        tool.stop(self.opts.stop_grace)?;
        Ok(())
    }

    pub fn subscribe(&mut self, name: &str, pattern: &str) -> Result<(), KernelError> {
        let tool = self
            .registry
            .find_mut(name)
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        tool.subscribe(pattern)
    }

    /// Operator-initiated start: resets the crash-restart budget.
    pub fn start_tool(&mut self, name: &str) -> Result<(), KernelError> {
        let tool = self
            .registry
            .find_mut(name)
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        tool.restart_count = 0;
        tool.retry_at = None;
        tool.start()
    }

    pub fn stop_tool(&mut self, name: &str) -> Result<(), KernelError> {
        let grace = self.opts.stop_grace;
        let tool = self
            .registry
            .find_mut(name)
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        tool.stop(grace)
    }

    pub fn restart_tool(&mut self, name: &str) -> Result<(), KernelError> {
        self.stop_tool(name)?;
        self.start_tool(name)
    }

    pub fn status_tool(&self, name: &str) -> Result<ToolInfo, KernelError> {
        self.registry
            .find(name)
            .map(Tool::info)
            .ok_or_else(|| KernelError::NotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.registry.iter().map(Tool::info).collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.registry.find(name).is_some()
    }

    pub fn count(&self) -> usize {
        self.registry.len()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ask the loop to exit after the current iteration.
    pub fn request_shutdown(&mut self) {
        self.running = false;
    }

    /// Execute one verb and render the response text. The first word is
    /// `Success:`, `Error:`, or a table header.
    pub fn execute(&mut self, command: ControlCommand) -> String {
        match command {
            ControlCommand::Start(name) => match self.start_tool(&name) {
                Ok(()) => format!("Success: tool '{name}' started"),
                Err(err) => format!("Error: {err}"),
            },
            ControlCommand::Stop(name) => match self.stop_tool(&name) {
                Ok(()) => format!("Success: tool '{name}' stopped"),
                Err(err) => format!("Error: {err}"),
            },
            ControlCommand::Restart(name) => match self.restart_tool(&name) {
                Ok(()) => format!("Success: tool '{name}' restarted"),
                Err(err) => format!("Error: {err}"),
            },
            ControlCommand::Status(name) => match self.status_tool(&name) {
                Ok(info) => render_table(std::slice::from_ref(&info)),
                Err(err) => format!("Error: {err}"),
            },
            ControlCommand::List => render_table(&self.list()),
            ControlCommand::Shutdown => {
                self.request_shutdown();
                "Success: shutting down".to_string()
            }
            ControlCommand::Uptime => format!("Success: {}", self.uptime_secs()),
            ControlCommand::Version => format!("Success: {}", self.version()),
            ControlCommand::Exists(name) => format!("Success: {}", self.exists(&name)),
            ControlCommand::Count => format!("Success: {}", self.count()),
        }
    }

    /// Start every autostart tool; failures land the tool in `Error` and
    /// are otherwise non-fatal.
    pub fn autostart(&mut self) {
        for tool in self.registry.iter_mut() {
            if tool.autostart && tool.state() == ToolState::Stopped {
                if let Err(err) = tool.start() {
                    warn!(tool = %tool.name(), error = %err, "autostart failed");
                }
            }
        }
    }

    /// One full loop iteration minus control polling: fan-out, per-tool
    /// I/O, health sweep, restart scheduling.
    pub fn step(&mut self) {
        self.pump_bus();
        self.service_tools();
        self.sweep_health();
        self.apply_restarts();
    }

    /// Drain the bus completely and fan each event out to every matching
    /// inbox, in registration order.
    fn pump_bus(&mut self) {
        for event in self.bus.drain() {
            let line = event.serialize();
            if let Some(ring) = self.debug_ring.as_mut() {
                ring.push(line.trim_end().to_string());
            }
            for tool in self.registry.iter_mut() {
                if !tool.is_subscribed(&event.event_type) {
                    continue;
                }
                match tool.push_inbox(line.clone()) {
                    Pushed::Stored => {}
                    Pushed::Dropped => {
                        debug!(tool = %tool.name(), event = %event.event_type,
                            "inbox full, newest event dropped");
                    }
                    Pushed::Full => {
                        // Fan-out has nowhere to hold the event for a
                        // retry, so the refusal still counts as a drop.
                        tool.record_inbox_drop();
                        debug!(tool = %tool.name(), event = %event.event_type,
                            "inbox full, event lost");
                    }
                }
                if tool.restart_policy == RestartPolicy::OnDemand
                    && tool.state() == ToolState::Stopped
                {
                    debug!(tool = %tool.name(), event = %event.event_type,
                        "on-demand start triggered");
                    tool.set_starting();
                }
            }
        }
    }

    /// Drain stdout/stderr of every running tool under the byte budget and
    /// flush its inbox toward stdin. Events published here are fanned out
    /// on the next iteration.
    fn service_tools(&mut self) {
        let budget = self.opts.read_budget;
        let bus = Arc::clone(&self.bus);
        for tool in self.registry.iter_mut() {
            if tool.state() != ToolState::Running {
                continue;
            }

            let out = tool.drain_stdout(budget);
            publish_stdout_lines(tool, &bus, &out.lines);

            let errs = tool.drain_stderr(budget);
            forward_stderr_lines(tool, &errs.lines);

            if out.failed || errs.failed {
                tool.mark_crashed();
                continue;
            }

            if tool.flush_inbox() {
                warn!(tool = %tool.name(), "stdin pipe closed");
                tool.mark_crashed();
            }
        }
    }

    /// Probe liveness of every running tool; a dead child means `Crashed`,
    /// closed endpoints, and a restart decision.
    fn sweep_health(&mut self) {
        let base = self.opts.backoff_base;
        let cap = self.opts.backoff_cap;
        let budget = self.opts.read_budget;
        let bus = Arc::clone(&self.bus);
        for tool in self.registry.iter_mut() {
            if tool.state() != ToolState::Running {
                continue;
            }
            let alive = tool.child.as_mut().is_some_and(|c| c.is_alive());
            if alive {
                continue;
            }
            // The pipes may still hold the child's last output; drain them
            // to EOF before the endpoints are closed. Bounded rounds, in
            // case something inherited the write end and keeps it open.
            for _ in 0..FINAL_DRAIN_ROUNDS {
                let out = tool.drain_stdout(budget);
                publish_stdout_lines(tool, &bus, &out.lines);
                if out.closed || out.failed || out.lines.is_empty() {
                    break;
                }
            }
            for _ in 0..FINAL_DRAIN_ROUNDS {
                let errs = tool.drain_stderr(budget);
                forward_stderr_lines(tool, &errs.lines);
                if errs.closed || errs.failed || errs.lines.is_empty() {
                    break;
                }
            }
            tool.mark_crashed();
            if !tool.restart_on_crash {
                continue;
            }
            if tool.restart_count < tool.max_restarts {
                tool.restart_count += 1;
                let delay = backoff_delay(base, cap, tool.restart_count);
                tool.retry_at = Some(Instant::now() + delay);
                info!(tool = %tool.name(), attempt = tool.restart_count,
                    max = tool.max_restarts, delay_ms = delay.as_millis() as u64,
                    "crash restart scheduled");
            } else {
                tool.finish_exit(ToolState::Error);
                warn!(tool = %tool.name(), max = tool.max_restarts,
                    "crash-restart budget exhausted");
            }
        }
    }

    /// Spawn tools whose backoff has elapsed and on-demand tools marked
    /// `Starting` earlier in this iteration.
    fn apply_restarts(&mut self) {
        let now = Instant::now();
        for tool in self.registry.iter_mut() {
            match tool.state() {
                ToolState::Crashed => {
                    if tool.retry_at.is_some_and(|at| now >= at) {
                        tool.retry_at = None;
                        if let Err(err) = tool.start() {
                            warn!(tool = %tool.name(), error = %err, "crash restart failed");
                        }
                    }
                }
                ToolState::Starting if !tool.has_child() => {
                    if let Err(err) = tool.start() {
                        warn!(tool = %tool.name(), error = %err, "on-demand start failed");
                    }
                }
                _ => {}
            }
        }
    }

    /// Stop everything: signal all running tools first, then run one
    /// bounded reap sweep, force-killing stragglers.
    pub fn shutdown_sweep(&mut self) {
        info!("shutting down, stopping all running tools");
        for tool in self.registry.iter_mut() {
            if let Some(child) = &tool.child {
                child.terminate(false);
            }
        }
        let deadline = Instant::now() + self.opts.stop_grace;
        for tool in self.registry.iter_mut() {
            let Some(child) = tool.child.as_mut() else {
                if !tool.state().is_terminal() {
                    tool.finish_exit(ToolState::Stopped);
                }
                continue;
            };
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(10));
            if child.reap(remaining) == herd_process::Reaped::TimedOut {
                let tool_name = tool.name().to_string();
                let child = tool.child.as_mut().expect("child checked above");
                warn!(tool = %tool_name, "graceful shutdown timed out, force-terminating");
                child.terminate(true);
                child.reap(Duration::from_millis(500));
            }
            tool.finish_exit(ToolState::Stopped);
        }
        if let Some(ring) = self.debug_ring.as_mut() {
            while let Some(line) = ring.pop_front() {
                debug!(event = %line, "debug ring");
            }
        }
    }

    /// The supervisor loop. Exits after a `shutdown` verb or
    /// `request_shutdown`, winding down every child first.
    pub async fn run(
        &mut self,
        mut control_rx: mpsc::Receiver<ControlRequest>,
        file_transport: Option<FileTransport>,
    ) {
        self.autostart();
        self.running = true;
        let mut tick = tokio::time::interval(self.opts.cadence);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while self.running {
            tick.tick().await;
            self.drain_control(&mut control_rx);
            if let Some(transport) = &file_transport {
                self.poll_file_transport(transport);
            }
            self.step();
        }
        self.shutdown_sweep();
    }

    fn drain_control(&mut self, rx: &mut mpsc::Receiver<ControlRequest>) {
        while let Ok(request) = rx.try_recv() {
            let response = self.execute(request.command);
            let _ = request.reply.send(response);
        }
    }

    fn poll_file_transport(&mut self, transport: &FileTransport) {
        match transport.poll() {
            Ok(Some(line)) => {
                let response = match ControlCommand::parse(&line) {
                    Ok(command) => self.execute(command),
                    Err(message) => message,
                };
                if let Err(err) = transport.acknowledge(&response) {
                    warn!(error = %err, "failed to write control response file");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read control command file"),
        }
    }
}

/// Parse each stdout line as an event and publish it, crediting the
/// producing tool. Malformed lines and a full bus are logged, not fatal.
fn publish_stdout_lines(tool: &mut Tool, bus: &EventBus, lines: &[String]) {
    for line in lines {
        match Event::parse(line) {
            Ok(event) => match bus.publish_event(event) {
                Ok(()) => tool.events_sent += 1,
                Err(err) => {
                    warn!(tool = %tool.name(), error = %err, "event dropped");
                }
            },
            Err(err) => {
                warn!(tool = %tool.name(), line = %line, error = %err,
                    "discarding malformed event line");
            }
        }
    }
}

/// Child stderr goes to the log sink verbatim, tagged with the tool name.
fn forward_stderr_lines(tool: &Tool, lines: &[String]) {
    for line in lines {
        info!(tool = %tool.name(), "{line}");
    }
}

/// Exponential backoff: base doubled per attempt, bounded by the cap.
fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(cap)
}

/// Fixed-width table over `ToolInfo` rows; the header is the response's
/// first word.
fn render_table(infos: &[ToolInfo]) -> String {
    let mut out = format!(
        "{:<14} {:<9} {:>7} {:>9} {:>7} {:>7} {:>5} {:>8} {:>6}\n",
        "NAME", "STATE", "PID", "RESTARTS", "SENT", "RECV", "SUBS", "UPTIME", "IDLE"
    );
    for info in infos {
        let pid = info
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let uptime = info
            .uptime_secs
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "-".to_string());
        let idle = info
            .idle_secs
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<14} {:<9} {:>7} {:>9} {:>7} {:>7} {:>5} {:>8} {:>6}\n",
            info.name,
            info.state.as_str(),
            pid,
            format!("{}/{}", info.restart_count, info.max_restarts),
            info.events_sent,
            info.events_received,
            info.subscription_count,
            uptime,
            idle,
        ));
    }
    out.pop();
    out
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
