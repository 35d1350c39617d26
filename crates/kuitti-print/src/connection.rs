// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection manager for direct-transport printers.
//
// Each device gets one worker task that owns its link and its connection
// state. Callers talk to the worker over an mpsc channel, which is what
// serialises sends per device; different devices run concurrently. The
// worker is the only writer of a device's state. Everyone else reads the
// published snapshot or subscribes to `DeviceEvent`s.
//
//   discovered -> connecting -> connected <-> printing
//        error / offline reachable from any of them
//        error / offline -> connecting   (backoff, when auto_reconnect)

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use kuitti_core::config::ConnectionConfig;
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{ConnectionState, PrinterDevice};

use crate::retry::{Backoff, Reconnect};
use crate::transport::{Connector, PrinterLink};

/// Commands queued per worker before callers wait.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Broadcast buffer for state events.
const EVENT_BUFFER: usize = 256;

/// Acknowledgement of a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendAck {
    pub bytes: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Published on every connection state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DeviceEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        printer_id: String,
        from: ConnectionState,
        to: ConnectionState,
        at: DateTime<Utc>,
    },
}

enum Command {
    Connect {
        device: PrinterDevice,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        device: PrinterDevice,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<SendAck>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

struct WorkerHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

type StateMap = Arc<RwLock<HashMap<String, ConnectionState>>>;

/// Owns one worker per direct-transport device.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    states: StateMap,
    events: broadcast::Sender<DeviceEvent>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            connector,
            config,
            workers: Mutex::new(HashMap::new()),
            states: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Open the device's link now instead of on first send.
    #[instrument(skip(self, device), fields(printer_id = %device.id))]
    pub async fn connect(&self, device: &PrinterDevice) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.dispatch(
            device,
            Command::Connect {
                device: device.clone(),
                reply,
            },
        )
        .await?;
        response.await.map_err(|_| worker_gone(&device.id))?
    }

    /// Send `bytes` and wait until they are written. Connects first when
    /// the device is not connected; a failed connect fails the send with
    /// `ConnectionFailed` instead of waiting for the backoff.
    #[instrument(skip(self, device, bytes), fields(printer_id = %device.id, bytes = bytes.len()))]
    pub async fn send(&self, device: &PrinterDevice, bytes: Vec<u8>) -> Result<SendAck> {
        let (reply, response) = oneshot::channel();
        self.dispatch(
            device,
            Command::Send {
                device: device.clone(),
                bytes,
                reply,
            },
        )
        .await?;
        response.await.map_err(|_| KuittiError::SendFailed {
            printer_id: device.id.clone(),
            reason: "connection worker stopped".into(),
        })?
    }

    /// Close the link and return the device to `discovered`. Cancels any
    /// pending reconnect.
    pub async fn disconnect(&self, printer_id: &str) -> Result<()> {
        let Some(commands) = self.commands_for(printer_id) else {
            return Ok(());
        };
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Disconnect { reply })
            .await
            .map_err(|_| worker_gone(printer_id))?;
        response.await.map_err(|_| worker_gone(printer_id))
    }

    /// Stop the device's worker and drop its state.
    pub async fn forget(&self, printer_id: &str) {
        let handle = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(printer_id);
        if let Some(handle) = handle {
            let _ = handle.commands.send(Command::Shutdown).await;
            if let Err(e) = handle.task.await {
                warn!(printer_id, error = %e, "connection worker ended abnormally");
            }
        }
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(printer_id);
        debug!(printer_id, "connection worker forgotten");
    }

    /// Stop every worker.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for id in ids {
            self.forget(&id).await;
        }
    }

    /// Live state, `None` until the device has a worker.
    pub fn state(&self, printer_id: &str) -> Option<ConnectionState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(printer_id)
            .copied()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    // -- internal helpers ---------------------------------------------------

    fn commands_for(&self, printer_id: &str) -> Option<mpsc::Sender<Command>> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(printer_id)
            .map(|h| h.commands.clone())
    }

    async fn dispatch(&self, device: &PrinterDevice, command: Command) -> Result<()> {
        if !device.transport.is_direct() {
            return Err(KuittiError::ConnectionFailed {
                printer_id: device.id.clone(),
                reason: format!("{} printers have no direct connection", device.transport),
            });
        }
        let commands = self.worker_for(device);
        commands.send(command).await.map_err(|_| worker_gone(&device.id))
    }

    /// Existing worker sender, or a freshly spawned worker.
    fn worker_for(&self, device: &PrinterDevice) -> mpsc::Sender<Command> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = workers.get(&device.id) {
            if !handle.commands.is_closed() {
                return handle.commands.clone();
            }
        }

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let worker = Worker {
            device: device.clone(),
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            backoff: Backoff::new(&self.config.backoff),
            link: None,
            state: ConnectionState::Discovered,
            attempts: 0,
            retry_at: None,
            states: Arc::clone(&self.states),
            events: self.events.clone(),
        };
        worker.publish_initial();
        let task = tokio::spawn(worker.run(rx));
        debug!(printer_id = %device.id, "connection worker started");
        workers.insert(
            device.id.clone(),
            WorkerHandle {
                commands: tx.clone(),
                task,
            },
        );
        tx
    }
}

fn worker_gone(printer_id: &str) -> KuittiError {
    KuittiError::ConnectionFailed {
        printer_id: printer_id.to_owned(),
        reason: "connection worker stopped".into(),
    }
}

// ---------------------------------------------------------------------------
// Per-device worker
// ---------------------------------------------------------------------------

struct Worker {
    device: PrinterDevice,
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    backoff: Backoff,
    link: Option<Box<dyn PrinterLink>>,
    state: ConnectionState,
    /// Consecutive failed connects since the last success.
    attempts: u32,
    /// When the next automatic reconnect is due.
    retry_at: Option<tokio::time::Instant>,
    states: StateMap,
    events: broadcast::Sender<DeviceEvent>,
}

impl Worker {
    fn publish_initial(&self) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.device.id.clone(), self.state);
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let command = match self.retry_at {
                Some(deadline) => {
                    tokio::select! {
                        command = commands.recv() => command,
                        _ = tokio::time::sleep_until(deadline) => {
                            self.retry_at = None;
                            self.reconnect().await;
                            continue;
                        }
                    }
                }
                None => commands.recv().await,
            };

            match command {
                Some(Command::Connect { device, reply }) => {
                    self.refresh(device).await;
                    let result = self.ensure_connected().await;
                    let _ = reply.send(result);
                }
                Some(Command::Send { device, bytes, reply }) => {
                    self.refresh(device).await;
                    let result = self.send(bytes).await;
                    let _ = reply.send(result);
                }
                Some(Command::Disconnect { reply }) => {
                    self.close_link().await;
                    self.retry_at = None;
                    self.attempts = 0;
                    self.transition(ConnectionState::Discovered);
                    let _ = reply.send(());
                }
                Some(Command::Shutdown) | None => break,
            }
        }

        self.close_link().await;
        debug!(printer_id = %self.device.id, "connection worker stopped");
    }

    /// Adopt the latest catalog record; a changed endpoint drops the link.
    async fn refresh(&mut self, device: PrinterDevice) {
        let moved = device.endpoint() != self.device.endpoint() || device.transport != self.device.transport;
        self.device = device;
        if moved && self.link.is_some() {
            info!(printer_id = %self.device.id, endpoint = %self.device.endpoint(), "endpoint changed, reconnecting");
            self.close_link().await;
            self.transition(ConnectionState::Discovered);
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if let Some(link) = self.link.as_mut() {
            if link.is_open().await {
                return Ok(());
            }
            info!(printer_id = %self.device.id, "printer closed the connection");
            self.close_link().await;
            self.transition(ConnectionState::Offline);
        }
        self.open().await
    }

    async fn open(&mut self) -> Result<()> {
        self.transition(ConnectionState::Connecting);
        let timeout = self.config.connect_timeout;
        let opened = match tokio::time::timeout(timeout, self.connector.connect(&self.device, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(KuittiError::ConnectionFailed {
                printer_id: self.device.id.clone(),
                reason: format!("connect timed out after {} ms", timeout.as_millis()),
            }),
        };

        match opened {
            Ok(link) => {
                self.link = Some(link);
                self.attempts = 0;
                self.retry_at = None;
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(printer_id = %self.device.id, error = %e, attempt = self.attempts, "connect failed");
                self.transition(ConnectionState::Error);
                self.schedule_reconnect(&e);
                self.attempts = self.attempts.saturating_add(1);
                Err(match e {
                    KuittiError::ConnectionFailed { .. } => e,
                    other => KuittiError::ConnectionFailed {
                        printer_id: self.device.id.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    async fn send(&mut self, bytes: Vec<u8>) -> Result<SendAck> {
        self.ensure_connected().await?;

        self.transition(ConnectionState::Printing);
        let started = Instant::now();
        let timeout = self.config.send_timeout;
        let written = match self.link.as_mut() {
            Some(link) => match tokio::time::timeout(timeout, link.write_all(&bytes)).await {
                Ok(result) => result,
                Err(_) => Err(KuittiError::SendFailed {
                    printer_id: self.device.id.clone(),
                    reason: format!("send timed out after {} ms", timeout.as_millis()),
                }),
            },
            None => Err(worker_gone(&self.device.id)),
        };

        match written {
            Ok(()) => {
                let ack = SendAck {
                    bytes: bytes.len(),
                    elapsed: started.elapsed(),
                };
                self.transition(ConnectionState::Connected);
                debug!(printer_id = %self.device.id, bytes = ack.bytes, elapsed_ms = ack.elapsed.as_millis(), "send acknowledged");
                Ok(ack)
            }
            Err(e) => {
                warn!(printer_id = %self.device.id, error = %e, "send failed mid-stream");
                self.close_link().await;
                self.transition(ConnectionState::Offline);
                self.schedule_reconnect(&e);
                Err(match e {
                    KuittiError::SendFailed { .. } => e,
                    other => KuittiError::SendFailed {
                        printer_id: self.device.id.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Automatic reconnect fired by the backoff timer.
    async fn reconnect(&mut self) {
        if self.link.is_some() {
            return;
        }
        info!(printer_id = %self.device.id, attempt = self.attempts, "automatic reconnect");
        let _ = self.open().await;
    }

    fn schedule_reconnect(&mut self, err: &KuittiError) {
        if !self.config.auto_reconnect {
            return;
        }
        match self.backoff.after_failure(err, self.attempts) {
            Reconnect::After(delay) => {
                debug!(printer_id = %self.device.id, delay_ms = delay.as_millis(), "reconnect scheduled");
                self.retry_at = Some(tokio::time::Instant::now() + delay);
            }
            Reconnect::Hold(class) => {
                info!(printer_id = %self.device.id, ?class, "not reconnecting automatically");
                self.retry_at = None;
            }
            Reconnect::Exhausted => {
                warn!(printer_id = %self.device.id, attempts = self.attempts, "reconnect attempts exhausted, waiting for caller");
                self.retry_at = None;
            }
        }
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.device.id.clone(), to);
        info!(printer_id = %self.device.id, %from, %to, "connection state changed");
        // No subscribers is fine.
        let _ = self.events.send(DeviceEvent::StateChanged {
            printer_id: self.device.id.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }
}
