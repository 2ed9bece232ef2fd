use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use herd_core::KernelError;

/// Outcome of a non-blocking read from a child stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// The pipe is open but has no data right now.
    WouldBlock,
    /// The pipe is closed; this condition is sticky.
    Closed,
}

/// Outcome of a non-blocking write to the child's stdin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `n` bytes were accepted; may be fewer than offered.
    Wrote(usize),
    /// The pipe buffer is full; retry on a later iteration.
    WouldBlock,
    /// The child closed its stdin; sticky.
    Closed,
}

/// Result of waiting for an exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reaped {
    /// The process exited; `None` code means it died to a signal.
    Exited(Option<i32>),
    /// Still running when the grace window elapsed.
    TimedOut,
}

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One spawned child: process id plus the three parent-side pipe endpoints,
/// owned together so they can never outlive each other.
///
/// The command line runs under `/bin/sh -c` so simple quoting works, and
/// the child is made its own session leader so group signals reach any
/// grandchildren the shell leaves behind. All three endpoints are switched
/// to non-blocking mode before this constructor returns.
///
/// Dropping a `ChildProcess` force-terminates and reaps the process and
/// closes every pipe; a tool record can hold one of these and never leak.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: u32,
    exit_status: Option<ExitStatus>,
}

impl ChildProcess {
    pub fn spawn(command_line: &str) -> Result<Self, KernelError> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command_line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // SAFETY: setsid() is async-signal-safe and runs before exec.
        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| KernelError::SpawnFailed {
            command: command_line.to_string(),
            source,
        })?;
        let pid = child.id();

        let mut this = Self {
            child,
            pid,
            exit_status: None,
        };
        this.set_pipes_nonblocking()?;
        debug!(pid, command = command_line, "spawned child");
        Ok(this)
    }

    /// Dropping the handles on failure kills the half-built child via `Drop`.
    fn set_pipes_nonblocking(&mut self) -> Result<(), KernelError> {
        if let Some(stdin) = &self.child.stdin {
            set_nonblocking(stdin.as_raw_fd()).map_err(KernelError::PipeFailed)?;
        }
        if let Some(stdout) = &self.child.stdout {
            set_nonblocking(stdout.as_raw_fd()).map_err(KernelError::PipeFailed)?;
        }
        if let Some(stderr) = &self.child.stderr {
            set_nonblocking(stderr.as_raw_fd()).map_err(KernelError::PipeFailed)?;
        }
        Ok(())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code once the process has been observed dead; `None` while it
    /// runs or when it died to a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }

    /// Request termination without waiting. `SIGTERM` targets the child's
    /// process group; `force` escalates to `SIGKILL`. Returns true when the
    /// signal was delivered or the process is already gone.
    pub fn terminate(&self, force: bool) -> bool {
        if self.exit_status.is_some() {
            return true;
        }
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: kill() is async-signal-safe; the negative pid targets the
        // process group created by setsid in pre_exec.
        let rc = unsafe { libc::kill(-(self.pid as i32), signal) };
        if rc == 0 {
            return true;
        }
        let errno = std::io::Error::last_os_error().raw_os_error();
        if errno == Some(libc::ESRCH) {
            return true;
        }
        // Group kill can fail if the child exec'd before setsid took effect;
        // fall back to the process itself.
        let rc = unsafe { libc::kill(self.pid as i32, signal) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
    }

    /// Non-blocking liveness probe. A process that has exited is not alive
    /// even before `reap` collects it; the status is remembered.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                false
            }
            Err(err) => {
                warn!(pid = self.pid, error = %err, "liveness probe failed");
                false
            }
        }
    }

    /// Wait up to `timeout` for the exit and collect the zombie.
    pub fn reap(&mut self, timeout: Duration) -> Reaped {
        if let Some(status) = self.exit_status {
            return Reaped::Exited(status.code());
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_status = Some(status);
                    return Reaped::Exited(status.code());
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return Reaped::TimedOut;
                    }
                    std::thread::sleep(REAP_POLL_INTERVAL);
                }
                Err(err) => {
                    warn!(pid = self.pid, error = %err, "reap failed");
                    return Reaped::TimedOut;
                }
            }
        }
    }

    pub fn read_stdout(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, KernelError> {
        read_avail(&mut self.child.stdout, buf)
    }

    pub fn read_stderr(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, KernelError> {
        read_avail(&mut self.child.stderr, buf)
    }

    /// Write as many bytes as the pipe accepts right now.
    pub fn write_stdin(&mut self, buf: &[u8]) -> Result<WriteOutcome, KernelError> {
        let Some(stdin) = self.child.stdin.as_mut() else {
            return Ok(WriteOutcome::Closed);
        };
        match stdin.write(buf) {
            Ok(0) if !buf.is_empty() => Ok(WriteOutcome::WouldBlock),
            Ok(n) => Ok(WriteOutcome::Wrote(n)),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                Ok(WriteOutcome::WouldBlock)
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                Ok(WriteOutcome::WouldBlock)
            }
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                self.child.stdin = None;
                Ok(WriteOutcome::Closed)
            }
            Err(err) => Err(KernelError::Io(err)),
        }
    }

    /// True while any of the three parent-side endpoints is still open.
    pub fn has_open_endpoints(&self) -> bool {
        self.child.stdin.is_some() || self.child.stdout.is_some() || self.child.stderr.is_some()
    }
}

fn read_avail<R: Read>(
    slot: &mut Option<R>,
    buf: &mut [u8],
) -> Result<ReadOutcome, KernelError> {
    let Some(stream) = slot.as_mut() else {
        return Ok(ReadOutcome::Closed);
    };
    match stream.read(buf) {
        Ok(0) => {
            // EOF: drop the endpoint so closed stays sticky.
            *slot = None;
            Ok(ReadOutcome::Closed)
        }
        Ok(n) => Ok(ReadOutcome::Data(n)),
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(ReadOutcome::WouldBlock),
        Err(err) => Err(KernelError::Io(err)),
    }
}

fn set_nonblocking(fd: i32) -> std::io::Result<()> {
    // SAFETY: fcntl on a fd we own; F_GETFL/F_SETFL do not affect memory.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.exit_status.is_none() && self.child.try_wait().ok().flatten().is_none() {
            self.terminate(true);
            if let Err(err) = self.child.wait() {
                warn!(pid = self.pid, error = %err, "failed to reap child on drop");
            }
        }
    }
}

#[cfg(test)]
#[path = "child_tests.rs"]
mod tests;
