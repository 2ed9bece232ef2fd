use std::io::{BufRead, Write};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::control::{ControlCommand, ControlRequest};

/// Operator prompt on the kernel's own terminal.
///
/// Runs on a dedicated reader thread because stdin has no non-blocking
/// story worth having; commands are submitted through the same queue as
/// every other binding and executed in the loop's thread of control.
pub fn spawn(tx: mpsc::Sender<ControlRequest>) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("herd-control-stdin".to_string())
        .spawn(move || read_loop(tx))
}

fn read_loop(tx: mpsc::Sender<ControlRequest>) {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("herd> ");
        let _ = std::io::stdout().flush();
        let Some(Ok(line)) = lines.next() else {
            debug!("stdin closed, control prompt exiting");
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match ControlCommand::parse(line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        let ends_session = command == ControlCommand::Shutdown;
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ControlRequest {
            command,
            reply: reply_tx,
        };
        if tx.blocking_send(request).is_err() {
            return;
        }
        match reply_rx.blocking_recv() {
            Ok(response) => println!("{response}"),
            Err(_) => return,
        }
        if ends_session {
            return;
        }
    }
}
