use super::*;

/// Poll stdout until the pipe closes or the deadline passes.
fn drain_stdout(child: &mut ChildProcess, deadline: Duration) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    let end = Instant::now() + deadline;
    loop {
        match child.read_stdout(&mut buf).expect("read_stdout") {
            ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
            ReadOutcome::Closed => break,
            ReadOutcome::WouldBlock => {
                if Instant::now() >= end {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[test]
fn spawn_echo_and_read_until_close() {
    let mut child = ChildProcess::spawn("echo hello").unwrap();
    let out = drain_stdout(&mut child, Duration::from_secs(5));
    assert_eq!(out, "hello\n");
    assert_eq!(child.reap(Duration::from_secs(5)), Reaped::Exited(Some(0)));
}

#[test]
fn shell_quoting_works() {
    let mut child = ChildProcess::spawn("printf '%s\\n' 'a b'").unwrap();
    let out = drain_stdout(&mut child, Duration::from_secs(5));
    assert_eq!(out, "a b\n");
    child.reap(Duration::from_secs(5));
}

#[test]
fn read_would_block_while_child_is_silent() {
    let mut child = ChildProcess::spawn("sleep 5").unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(
        child.read_stdout(&mut buf).unwrap(),
        ReadOutcome::WouldBlock
    );
    assert!(child.is_alive());
    assert!(child.terminate(false));
    assert!(matches!(
        child.reap(Duration::from_secs(5)),
        Reaped::Exited(_)
    ));
    assert!(!child.is_alive());
}

#[test]
fn exited_child_is_not_alive_before_reap() {
    let mut child = ChildProcess::spawn("true").unwrap();
    let end = Instant::now() + Duration::from_secs(5);
    while child.is_alive() && Instant::now() < end {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!child.is_alive());
    assert_eq!(child.reap(Duration::from_millis(100)), Reaped::Exited(Some(0)));
}

#[test]
fn nonzero_exit_code_is_reported() {
    let mut child = ChildProcess::spawn("exit 3").unwrap();
    assert_eq!(child.reap(Duration::from_secs(5)), Reaped::Exited(Some(3)));
    assert_eq!(child.exit_code(), Some(3));
}

#[test]
fn missing_binary_under_shell_exits_127() {
    let mut child = ChildProcess::spawn("definitely-not-a-real-binary-herd").unwrap();
    assert_eq!(
        child.reap(Duration::from_secs(5)),
        Reaped::Exited(Some(127))
    );
}

#[test]
fn reap_times_out_on_a_stubborn_child() {
    let mut child = ChildProcess::spawn("sleep 10").unwrap();
    assert_eq!(child.reap(Duration::from_millis(50)), Reaped::TimedOut);
    assert!(child.terminate(true));
    assert!(matches!(
        child.reap(Duration::from_secs(5)),
        Reaped::Exited(_)
    ));
}

#[test]
fn terminate_is_idempotent_after_exit() {
    let mut child = ChildProcess::spawn("true").unwrap();
    child.reap(Duration::from_secs(5));
    assert!(child.terminate(false));
    assert!(child.terminate(true));
}

#[test]
fn stdin_round_trip_through_cat() {
    let mut child = ChildProcess::spawn("cat").unwrap();
    let mut written = 0;
    let payload = b"ping\n";
    let end = Instant::now() + Duration::from_secs(5);
    while written < payload.len() && Instant::now() < end {
        match child.write_stdin(&payload[written..]).unwrap() {
            WriteOutcome::Wrote(n) => written += n,
            WriteOutcome::WouldBlock => std::thread::sleep(Duration::from_millis(10)),
            WriteOutcome::Closed => panic!("cat closed stdin unexpectedly"),
        }
    }
    assert_eq!(written, payload.len());

    let mut buf = [0u8; 64];
    let mut got = Vec::new();
    while got.len() < payload.len() && Instant::now() < end {
        match child.read_stdout(&mut buf).unwrap() {
            ReadOutcome::Data(n) => got.extend_from_slice(&buf[..n]),
            ReadOutcome::WouldBlock => std::thread::sleep(Duration::from_millis(10)),
            ReadOutcome::Closed => break,
        }
    }
    assert_eq!(got, payload);
    child.terminate(true);
    child.reap(Duration::from_secs(5));
}

#[test]
fn write_to_dead_child_reports_closed() {
    let mut child = ChildProcess::spawn("true").unwrap();
    child.reap(Duration::from_secs(5));
    // The first write may be accepted into the pipe buffer; keep writing
    // until the broken pipe surfaces.
    let end = Instant::now() + Duration::from_secs(5);
    loop {
        match child.write_stdin(b"x\n").unwrap() {
            WriteOutcome::Closed => break,
            _ if Instant::now() >= end => panic!("broken pipe never surfaced"),
            _ => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}

#[test]
fn closed_stdout_is_sticky() {
    let mut child = ChildProcess::spawn("true").unwrap();
    child.reap(Duration::from_secs(5));
    let mut buf = [0u8; 16];
    let end = Instant::now() + Duration::from_secs(5);
    loop {
        match child.read_stdout(&mut buf).unwrap() {
            ReadOutcome::Closed => break,
            _ if Instant::now() >= end => panic!("stdout never closed"),
            _ => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    assert_eq!(child.read_stdout(&mut buf).unwrap(), ReadOutcome::Closed);
}

#[test]
fn stderr_is_readable_separately() {
    let mut child = ChildProcess::spawn("echo oops >&2").unwrap();
    let mut buf = [0u8; 256];
    let mut got = Vec::new();
    let end = Instant::now() + Duration::from_secs(5);
    loop {
        match child.read_stderr(&mut buf).unwrap() {
            ReadOutcome::Data(n) => got.extend_from_slice(&buf[..n]),
            ReadOutcome::Closed => break,
            ReadOutcome::WouldBlock => {
                if Instant::now() >= end {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    assert_eq!(String::from_utf8_lossy(&got), "oops\n");
    child.reap(Duration::from_secs(5));
}

#[test]
fn drop_kills_a_running_child() {
    let child = ChildProcess::spawn("sleep 30").unwrap();
    let pid = child.pid();
    drop(child);
    // SAFETY: kill with signal 0 probes for existence only.
    let rc = unsafe { libc::kill(pid as i32, 0) };
    assert_eq!(rc, -1, "child {pid} should be gone after drop");
}
