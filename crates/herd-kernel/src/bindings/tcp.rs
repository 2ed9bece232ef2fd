use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::control::{ControlCommand, ControlRequest};

/// Loopback control listener: one command line in, one response text out,
/// connection kept open across commands until the client closes or sends
/// `shutdown`. Each accepted client gets its own task; execution is
/// serialized by the single command queue the loop drains.
pub async fn serve(listener: TcpListener, tx: mpsc::Sender<ControlRequest>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "control client connected");
                tokio::spawn(handle_client(stream, tx.clone()));
            }
            Err(err) => {
                warn!(error = %err, "control accept failed");
                return;
            }
        }
    }
}

async fn handle_client(stream: TcpStream, tx: mpsc::Sender<ControlRequest>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let command = match ControlCommand::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                if send_response(&mut writer, &message).await.is_err() {
                    return;
                }
                continue;
            }
        };
        let closes_connection = command == ControlCommand::Shutdown;
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ControlRequest {
            command,
            reply: reply_tx,
        };
        if tx.send(request).await.is_err() {
            return;
        }
        let Ok(response) = reply_rx.await else {
            return;
        };
        if send_response(&mut writer, &response).await.is_err() {
            return;
        }
        if closes_connection {
            return;
        }
    }
}

async fn send_response(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    response: &str,
) -> std::io::Result<()> {
    writer.write_all(response.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Stands in for the supervisor loop: answer every request with a
    /// canned response.
    fn echo_executor(mut rx: mpsc::Receiver<ControlRequest>) {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let _ = request.reply.send(format!("Success: {:?}", request.command));
            }
        });
    }

    #[tokio::test]
    async fn command_and_response_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(8);
        echo_executor(rx);
        tokio::spawn(serve(listener, tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"count\n").await.unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert_eq!(response.trim(), "Success: Count");
    }

    #[tokio::test]
    async fn connection_survives_multiple_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(8);
        echo_executor(rx);
        tokio::spawn(serve(listener, tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        for _ in 0..3 {
            client.write_all(b"uptime\n").await.unwrap();
            let mut buf = [0u8; 256];
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0);
        }
    }

    #[tokio::test]
    async fn parse_errors_are_answered_without_touching_the_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // No executor: a queued request would hang the client forever.
        let (tx, _rx) = mpsc::channel(8);
        tokio::spawn(serve(listener, tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"frobnicate\n").await.unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("Error:"));
    }
}
