// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network scan: TCP connect sweep on the raw printing port.
//
// Receipt printers do not answer any discovery handshake on port 9100, so an
// accepted connection only makes a host a candidate. A follow-up status
// request (ESC/POS first, then Star) tells us whether something that speaks
// a printer command set is listening.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use ipnetwork::{IpNetwork, Ipv4Network};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use kuitti_core::config::DiscoveryConfig;
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{Capabilities, Confidence, PrinterDevice, ProtocolFamily, Transport};
use kuitti_encode::{escpos, star_line};

use super::{ScanSink, mdns};

pub const STRATEGY: &str = "network";

/// Prefix used when deriving the subnet from the local address.
const LOCAL_PREFIX: u8 = 24;

/// Shortest configured prefix accepted; a /16 is already 65k probes.
const MIN_PREFIX: u8 = 16;

/// Addresses to probe for `config`.
pub async fn candidate_hosts(config: &DiscoveryConfig) -> Result<Vec<Ipv4Addr>> {
    let network = match &config.subnet {
        Some(subnet) => parse_subnet(subnet)?,
        None => {
            let local = local_ipv4().await?;
            Ipv4Network::new(local, LOCAL_PREFIX)
                .map_err(|e| KuittiError::Discovery(format!("derive subnet from {local}: {e}")))?
        }
    };
    Ok(hosts(network))
}

/// Parse a configured CIDR block. Only IPv4 is scanned.
pub fn parse_subnet(subnet: &str) -> Result<Ipv4Network> {
    match subnet.trim().parse::<IpNetwork>() {
        Ok(IpNetwork::V4(net)) if net.prefix() >= MIN_PREFIX => Ok(net),
        Ok(IpNetwork::V4(net)) => Err(KuittiError::InvalidConfig(format!(
            "discovery.subnet {net} is too large, use /{MIN_PREFIX} or longer"
        ))),
        Ok(IpNetwork::V6(net)) => Err(KuittiError::InvalidConfig(format!(
            "discovery.subnet {net} is IPv6, only IPv4 subnets can be scanned"
        ))),
        Err(e) => Err(KuittiError::InvalidConfig(format!("discovery.subnet {subnet:?}: {e}"))),
    }
}

/// Host addresses of `network`, without its network and broadcast
/// addresses when it has them.
pub fn hosts(network: Ipv4Network) -> Vec<Ipv4Addr> {
    if network.prefix() >= 31 {
        return network.iter().collect();
    }
    let (base, broadcast) = (network.network(), network.broadcast());
    network.iter().filter(|ip| *ip != base && *ip != broadcast).collect()
}

/// Local IPv4 address of the default route. Connecting a UDP socket picks
/// the outgoing interface without sending anything.
async fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| KuittiError::Discovery(format!("bind probe socket: {e}")))?;
    socket
        .connect((Ipv4Addr::new(192, 0, 2, 1), 9))
        .await
        .map_err(|e| KuittiError::Discovery(format!("no IPv4 route: {e}")))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(KuittiError::Discovery(format!("no usable local IPv4 address (got {other})"))),
    }
}

/// Probe one host. `None` when nothing accepts on `port`.
#[instrument(skip(config), level = "trace")]
pub async fn probe_host(ip: Ipv4Addr, config: &DiscoveryConfig) -> Option<PrinterDevice> {
    let addr = SocketAddr::from((ip, config.network_port));
    let mut stream = match tokio::time::timeout(config.probe_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(_)) | Err(_) => return None,
    };

    let hint = capability_probe(&mut stream, config.capability_probe_timeout).await;
    let _ = stream.shutdown().await;
    debug!(%addr, hint = ?hint, "port open");

    let mut device = PrinterDevice::new(
        ip.to_string(),
        Transport::Network,
        &ip.to_string(),
        hint.unwrap_or(ProtocolFamily::EscPos),
    );
    device.port = Some(config.network_port);
    device.capabilities = Capabilities {
        confidence: Some(if hint.is_some() { Confidence::High } else { Confidence::Low }),
        discovered_by: Some(STRATEGY.to_owned()),
        protocol_hint: hint,
        ..Capabilities::default()
    };
    Some(device)
}

/// Ask for printer status in both command sets. The first one answered
/// names the protocol family.
async fn capability_probe(stream: &mut TcpStream, wait: Duration) -> Option<ProtocolFamily> {
    let probes = [
        (ProtocolFamily::EscPos, &escpos::STATUS_REQUEST[..]),
        (ProtocolFamily::StarLine, &star_line::STATUS_REQUEST[..]),
    ];
    for (family, request) in probes {
        if stream.write_all(request).await.is_err() {
            return None;
        }
        let mut reply = [0u8; 1];
        match tokio::time::timeout(wait, stream.read(&mut reply)).await {
            Ok(Ok(n)) if n > 0 => return Some(family),
            // Peer hung up: no point trying the second set.
            Ok(Ok(_)) | Ok(Err(_)) => return None,
            Err(_) => continue,
        }
    }
    None
}

/// Run the sweep, with mDNS hints browsed alongside when enabled.
pub(crate) async fn run(config: DiscoveryConfig, sink: ScanSink) -> Result<()> {
    let targets = candidate_hosts(&config).await?;
    info!(hosts = targets.len(), port = config.network_port, "probing subnet");

    let mut hints = if config.mdns_enabled {
        match mdns::browse(config.network_scan_budget, sink.token().clone()) {
            Ok(rx) => Some(rx),
            Err(e) => {
                debug!(error = %e, "mDNS browse unavailable, probing only");
                None
            }
        }
    } else {
        None
    };

    let config = &config;
    let mut probes = stream::iter(targets)
        .map(|ip| probe_host(ip, config))
        .buffer_unordered(config.max_parallel_probes.max(1));

    loop {
        tokio::select! {
            probe = probes.next() => match probe {
                Some(Some(device)) => {
                    if !sink.found(device).await {
                        return Ok(());
                    }
                }
                Some(None) => {}
                None => break,
            },
            Some(hint) = next_hint(&mut hints) => {
                if !sink.found(hint).await {
                    return Ok(());
                }
            }
        }
    }

    // Hints that arrived while the last probes were finishing.
    if let Some(rx) = hints.as_mut() {
        while let Ok(hint) = rx.try_recv() {
            if !sink.found(hint).await {
                break;
            }
        }
    }
    Ok(())
}

/// Next mDNS hint, or never once the browse is done or disabled.
async fn next_hint(hints: &mut Option<mpsc::UnboundedReceiver<PrinterDevice>>) -> Option<PrinterDevice> {
    let Some(rx) = hints.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Some(device) => Some(device),
        None => {
            *hints = None;
            std::future::pending().await
        }
    }
}
