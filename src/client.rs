// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client side of the daemon socket.
//!
//! [`RequestQueue`] funnels requests from any number of callers onto one
//! shared connection with a bounded number in flight. The connection is
//! opened on first use and dropped after any I/O failure; the next request
//! reconnects. Failures come back as `ERROR: ...` strings, the same shape
//! the daemon uses, so callers handle both alike.

use crate::protocol::{self, Frame, MAX_RESPONSE_LEN, Request};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};

/// Requests allowed in flight at once.
pub const MAX_IN_FLIGHT: usize = 3;

struct Job {
    command: String,
    reply: oneshot::Sender<String>,
}

#[derive(Clone)]
pub struct RequestQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

impl RequestQueue {
    /// Start the queue worker. Must be called inside a Tokio runtime.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx, socket_path.into()));
        Self { jobs }
    }

    pub async fn send(&self, request: &Request) -> String {
        self.send_raw(&request.to_string()).await
    }

    /// Send a pre-formatted command line.
    pub async fn send_raw(&self, command: &str) -> String {
        let (reply, response) = oneshot::channel();
        let job = Job {
            command: command.to_string(),
            reply,
        };
        if self.jobs.send(job).is_err() {
            return "ERROR: Request queue stopped".to_string();
        }
        response
            .await
            .unwrap_or_else(|_| "ERROR: Request dropped".to_string())
    }
}

async fn worker(mut jobs: mpsc::UnboundedReceiver<Job>, socket_path: PathBuf) {
    let slots = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let connection = Arc::new(Connection {
        socket_path,
        stream: Mutex::new(None),
    });

    while let Some(job) = jobs.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let connection = connection.clone();
        tokio::spawn(async move {
            let response = connection.exchange(&job.command).await;
            // Caller may have given up waiting.
            let _ = job.reply.send(response);
            drop(permit);
        });
    }
}

struct Connection {
    socket_path: PathBuf,
    stream: Mutex<Option<UnixStream>>,
}

impl Connection {
    /// One request/response round trip. The stream lock is held throughout
    /// so responses cannot be paired with the wrong request.
    async fn exchange(&self, command: &str) -> String {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => {
                    log::info!("Connected to {}", self.socket_path.display());
                    *guard = Some(stream);
                }
                Err(e) => {
                    log::warn!("Failed to connect to {}: {e}", self.socket_path.display());
                    return "ERROR: No server connection".to_string();
                }
            }
        }
        let Some(stream) = guard.as_mut() else {
            return "ERROR: No server connection".to_string();
        };

        match round_trip(stream, command).await {
            Ok(response) => response,
            Err(reason) => {
                log::warn!("{reason}, closing connection");
                *guard = None;
                format!("ERROR: {reason}")
            }
        }
    }
}

async fn round_trip(stream: &mut UnixStream, command: &str) -> Result<String, &'static str> {
    protocol::write_frame(stream, command.as_bytes())
        .await
        .map_err(|_| "Failed to send command")?;

    match protocol::read_frame(stream, MAX_RESPONSE_LEN).await {
        Ok(Frame::Payload(payload)) => Ok(String::from_utf8_lossy(&payload).into_owned()),
        Ok(Frame::Closed) => Err("Failed to read response length"),
        Ok(Frame::TooLong(_)) => Err("Response too long"),
        Err(_) => Err("Failed to read response"),
    }
}
