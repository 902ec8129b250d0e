// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Unix socket request server.
//!
//! One task per connection; commands on a connection are answered in
//! order. Command handlers block (they sleep between fan writes and run
//! helper programs), so each one runs on the blocking pool. When the last
//! client disconnects the fans go back to Better-Auto.

use crate::daemon::Daemon;
use crate::protocol::{self, Frame};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

pub struct Server {
    daemon: Arc<Daemon>,
    max_command_len: u32,
    active_clients: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(daemon: Arc<Daemon>, max_command_len: u32) -> Self {
        Self {
            daemon,
            max_command_len,
            active_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::Acquire)
    }

    /// Accept connections until `shutdown` is notified.
    pub async fn serve(&self, listener: UnixListener, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            tokio::spawn(handle_client(
                                stream,
                                self.daemon.clone(),
                                self.max_command_len,
                                self.active_clients.clone(),
                            ));
                        }
                        Err(e) => {
                            log::error!("Failed to accept connection: {e}");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    log::info!("Server shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_client(
    mut stream: UnixStream,
    daemon: Arc<Daemon>,
    max_command_len: u32,
    active_clients: Arc<AtomicUsize>,
) {
    let active = active_clients.fetch_add(1, Ordering::AcqRel) + 1;
    log::info!("Client connected ({active} active)");

    loop {
        let payload = match protocol::read_frame(&mut stream, max_command_len).await {
            Ok(Frame::Payload(payload)) => payload,
            Ok(Frame::Closed) => break,
            Ok(Frame::TooLong(len)) => {
                log::warn!("Command of {len} bytes exceeds {max_command_len}, closing connection");
                break;
            }
            Err(e) => {
                log::debug!("Client read failed: {e}");
                break;
            }
        };

        let command = String::from_utf8_lossy(&payload)
            .trim_end_matches('\0')
            .to_string();
        let handler = daemon.clone();
        let response =
            match tokio::task::spawn_blocking(move || handler.handle_command(&command)).await {
                Ok(response) => response,
                Err(e) => {
                    log::error!("Command handler failed: {e}");
                    break;
                }
            };

        if let Err(e) = protocol::write_frame(&mut stream, response.as_bytes()).await {
            log::debug!("Client write failed: {e}");
            break;
        }
    }

    let remaining = active_clients.fetch_sub(1, Ordering::AcqRel) - 1;
    log::info!("Client disconnected ({remaining} active)");

    if remaining == 0 {
        match tokio::task::spawn_blocking(move || daemon.ensure_better_auto()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Could not restore BETTER_AUTO after last client left: {e}"),
            Err(e) => log::error!("BETTER_AUTO restore task failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::testing::{Rig, rig};
    use crate::mode::FanMode;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn start(rig: &Rig) -> (PathBuf, Arc<Notify>, tokio::task::JoinHandle<()>) {
        let socket = rig.tmp.path().join("victus.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let shutdown = Arc::new(Notify::new());
        let server = Server::new(rig.daemon.clone(), 1024);
        let stop = shutdown.clone();
        let task = tokio::spawn(async move { server.serve(listener, stop).await });
        (socket, shutdown, task)
    }

    async fn request(stream: &mut UnixStream, command: &str) -> String {
        protocol::write_frame(stream, command.as_bytes()).await.unwrap();
        match protocol::read_frame(stream, protocol::MAX_RESPONSE_LEN).await.unwrap() {
            Frame::Payload(p) => String::from_utf8(p).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commands_in_order_on_one_connection() {
        let rig = rig();
        let (socket, shutdown, task) = start(&rig).await;

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        assert_eq!(request(&mut stream, "SET_FAN_MODE MANUAL").await, "OK");
        assert_eq!(request(&mut stream, "SET_FAN_SPEED 2 4000").await, "OK");
        assert_eq!(request(&mut stream, "GET_FAN_SPEED 2").await, "4000");
        assert_eq!(request(&mut stream, "DANCE").await, "ERROR: Unknown command");

        shutdown.notify_one();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_oversized_frame_closes_only_that_connection() {
        let rig = rig();
        let (socket, shutdown, task) = start(&rig).await;

        let mut bad = UnixStream::connect(&socket).await.unwrap();
        protocol::write_frame(&mut bad, &[b'x'; 2000]).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), bad.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0, "server answered an oversized frame");

        let mut good = UnixStream::connect(&socket).await.unwrap();
        assert_eq!(
            request(&mut good, "GET_FAN_SPEED 3").await,
            "ERROR: Invalid fan number: 3"
        );

        shutdown.notify_one();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_last_disconnect_restores_better_auto() {
        let rig = rig();
        let (socket, shutdown, task) = start(&rig).await;

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        assert_eq!(request(&mut stream, "SET_FAN_MODE MAX").await, "OK");
        assert_eq!(rig.daemon.requested_mode(), FanMode::Max);
        drop(stream);

        let restored = tokio::time::timeout(Duration::from_secs(5), async {
            while !(rig.daemon.requested_mode() == FanMode::BetterAuto
                && rig.daemon.controller().is_running())
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(restored.is_ok());

        shutdown.notify_one();
        task.await.unwrap();
    }
}
