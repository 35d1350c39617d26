// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Direct transports: raw TCP (port 9100) and Bluetooth RFCOMM.
//
// Both are plain byte pipes. There is no framing and no handshake; the
// socket boundary is the message boundary. The connection manager only sees
// the `Connector` and `PrinterLink` traits, so tests can swap in fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use kuitti_bridge::{NativeBluetooth, RFCOMM_DEFAULT_CHANNEL, RfcommLink};
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{PrinterDevice, Transport};

/// Opens links to printers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to `device`, giving up after `timeout`.
    async fn connect(&self, device: &PrinterDevice, timeout: Duration) -> Result<Box<dyn PrinterLink>>;
}

/// An open byte stream to one printer.
#[async_trait]
pub trait PrinterLink: Send {
    /// Write and flush every byte.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// `false` once the remote end has closed the connection.
    async fn is_open(&mut self) -> bool;

    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Raw TCP
// ---------------------------------------------------------------------------

/// Raw TCP connector (JetDirect-style, port 9100).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, device: &PrinterDevice, timeout: Duration) -> Result<Box<dyn PrinterLink>> {
        let addr = device.endpoint();
        info!(printer_id = %device.id, addr = %addr, "connecting via raw TCP");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| KuittiError::ConnectionFailed {
                printer_id: device.id.clone(),
                reason: format!("connect to {addr} timed out after {} ms", timeout.as_millis()),
            })?
            .map_err(|e| KuittiError::ConnectionFailed {
                printer_id: device.id.clone(),
                reason: format!("connect to {addr}: {e}"),
            })?;
        // Receipts are small; do not wait to coalesce.
        stream.set_nodelay(true)?;

        Ok(Box::new(TcpLink {
            stream,
            printer_id: device.id.clone(),
        }))
    }
}

struct TcpLink {
    stream: TcpStream,
    printer_id: String,
}

#[async_trait]
impl PrinterLink for TcpLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| KuittiError::SendFailed {
                printer_id: self.printer_id.clone(),
                reason: format!("raw TCP write: {e}"),
            })?;
        self.stream
            .flush()
            .await
            .map_err(|e| KuittiError::SendFailed {
                printer_id: self.printer_id.clone(),
                reason: format!("raw TCP flush: {e}"),
            })?;
        debug!(printer_id = %self.printer_id, bytes = data.len(), "raw TCP write complete");
        Ok(())
    }

    async fn is_open(&mut self) -> bool {
        // Drain any status bytes the printer pushed; a zero-length read is
        // the remote close.
        let mut buf = [0u8; 256];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => return false,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(printer_id = %self.printer_id, error = %e, "raw TCP shutdown");
        }
    }
}

// ---------------------------------------------------------------------------
// Bluetooth RFCOMM
// ---------------------------------------------------------------------------

/// RFCOMM connector over the platform bridge. Bridge calls block, so they
/// run on the blocking pool.
#[derive(Clone)]
pub struct BluetoothConnector {
    bridge: Arc<dyn NativeBluetooth>,
    channel: u8,
}

impl BluetoothConnector {
    pub fn new(bridge: Arc<dyn NativeBluetooth>) -> Self {
        Self {
            bridge,
            channel: RFCOMM_DEFAULT_CHANNEL,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
}

#[async_trait]
impl Connector for BluetoothConnector {
    async fn connect(&self, device: &PrinterDevice, timeout: Duration) -> Result<Box<dyn PrinterLink>> {
        info!(printer_id = %device.id, address = %device.address, channel = self.channel, "connecting via RFCOMM");
        let bridge = Arc::clone(&self.bridge);
        let address = device.address.clone();
        let channel = self.channel;

        let opened = tokio::task::spawn_blocking(move || bridge.open_rfcomm(&address, channel, timeout))
            .await
            .map_err(|e| KuittiError::Bluetooth(format!("connect task: {e}")))?;
        let link = opened.map_err(|e| match e {
            KuittiError::PlatformUnavailable => KuittiError::PlatformUnavailable,
            other => KuittiError::ConnectionFailed {
                printer_id: device.id.clone(),
                reason: other.to_string(),
            },
        })?;

        Ok(Box::new(BluetoothLink {
            link: Some(link),
            printer_id: device.id.clone(),
        }))
    }
}

struct BluetoothLink {
    /// Taken while a blocking call owns it.
    link: Option<Box<dyn RfcommLink>>,
    printer_id: String,
}

impl BluetoothLink {
    /// Run `op` on the blocking pool with ownership of the socket.
    async fn with_link<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RfcommLink) -> T + Send + 'static,
    {
        let mut link = self.link.take().ok_or_else(|| KuittiError::SendFailed {
            printer_id: self.printer_id.clone(),
            reason: "RFCOMM link already closed".into(),
        })?;
        let (link, out) = tokio::task::spawn_blocking(move || {
            let out = op(link.as_mut());
            (link, out)
        })
        .await
        .map_err(|e| KuittiError::Bluetooth(format!("RFCOMM task: {e}")))?;
        self.link = Some(link);
        Ok(out)
    }
}

#[async_trait]
impl PrinterLink for BluetoothLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let data = data.to_vec();
        let printer_id = self.printer_id.clone();
        self.with_link(move |link| link.write_all(&data))
            .await?
            .map_err(|e| KuittiError::SendFailed {
                printer_id,
                reason: e.to_string(),
            })
    }

    async fn is_open(&mut self) -> bool {
        match self.with_link(|link| !link.peer_closed()).await {
            Ok(open) => open,
            Err(_) => false,
        }
    }

    async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = tokio::task::spawn_blocking(move || link.close()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Transport routing
// ---------------------------------------------------------------------------

/// Picks the connector matching each device's transport.
pub struct TransportConnector {
    tcp: TcpConnector,
    bluetooth: BluetoothConnector,
}

impl TransportConnector {
    pub fn new(bridge: Arc<dyn NativeBluetooth>) -> Self {
        Self {
            tcp: TcpConnector,
            bluetooth: BluetoothConnector::new(bridge),
        }
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self, device: &PrinterDevice, timeout: Duration) -> Result<Box<dyn PrinterLink>> {
        match device.transport {
            Transport::Network => self.tcp.connect(device, timeout).await,
            Transport::Bluetooth => self.bluetooth.connect(device, timeout).await,
            Transport::CloudPrnt => Err(KuittiError::ConnectionFailed {
                printer_id: device.id.clone(),
                reason: "cloudprnt printers have no direct connection".into(),
            }),
        }
    }
}
