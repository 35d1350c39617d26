// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// mDNS hints for the network scan.
//
// Printers that announce the raw port as `_pdl-datastream._tcp.local.` are
// reported as medium-confidence network candidates while the TCP sweep runs.
// Browsing happens on a dedicated thread draining the `mdns-sd` receiver.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{Capabilities, Confidence, PrinterDevice, ProtocolFamily, Transport};

/// Service type announced for raw (port 9100) printing.
pub const PDL_SERVICE: &str = "_pdl-datastream._tcp.local.";

pub const STRATEGY: &str = "mdns";

/// How often the listener checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Browse for `window`, or until `token` is cancelled or the receiver is
/// dropped. Resolved services arrive on the returned channel.
pub fn browse(window: Duration, token: CancellationToken) -> Result<mpsc::UnboundedReceiver<PrinterDevice>> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| KuittiError::Discovery(format!("failed to start mDNS daemon: {e}")))?;
    let receiver = daemon
        .browse(PDL_SERVICE)
        .map_err(|e| KuittiError::Discovery(format!("browse {PDL_SERVICE}: {e}")))?;
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("mdns-pdl".into())
        .spawn(move || {
            let deadline = Instant::now() + window;
            info!(service_type = PDL_SERVICE, "mDNS browse started");
            while Instant::now() < deadline && !token.is_cancelled() && !tx.is_closed() {
                let event = match receiver.recv_timeout(POLL_INTERVAL) {
                    Ok(event) => event,
                    Err(_) if receiver.is_disconnected() => break,
                    Err(_) => continue,
                };
                match event {
                    ServiceEvent::ServiceResolved(info) => match service_to_candidate(&info) {
                        Some(device) => {
                            debug!(name = %info.get_fullname(), address = %device.address, "raw printer announced");
                            if tx.send(device).is_err() {
                                break;
                            }
                        }
                        None => {
                            warn!(name = %info.get_fullname(), "announced printer has no address");
                        }
                    },
                    ServiceEvent::SearchStopped(stype) => {
                        debug!(service_type = %stype, "mDNS search stopped");
                        break;
                    }
                    other => debug!(event = ?other, "mDNS event"),
                }
            }
            if let Err(e) = daemon.stop_browse(PDL_SERVICE) {
                debug!(error = %e, "stop browse");
            }
            if let Err(e) = daemon.shutdown() {
                debug!(error = %e, "mDNS daemon shutdown");
            }
            info!("mDNS browse finished");
        })
        .map_err(|e| KuittiError::Discovery(format!("spawn mDNS listener: {e}")))?;

    Ok(rx)
}

/// Turn a resolved `_pdl-datastream` service into a network candidate.
///
/// TXT keys used: `ty` (model string, per the printer service conventions)
/// and `product` (often `(model)` in parentheses).
fn service_to_candidate(info: &ServiceInfo) -> Option<PrinterDevice> {
    // Prefer IPv4 for wider printer compatibility.
    let ip: IpAddr = info
        .get_addresses()
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| info.get_addresses().iter().next())
        .copied()?;

    let model = info.get_property_val_str("ty").or_else(|| info.get_property_val_str("product"));
    let family = model.map(family_from_model).unwrap_or(ProtocolFamily::EscPos);

    let address = ip.to_string();
    let mut device = PrinterDevice::new(address.clone(), Transport::Network, &address, family);
    device.port = Some(info.get_port());
    device.capabilities = Capabilities {
        confidence: Some(Confidence::Medium),
        discovered_by: Some(STRATEGY.to_owned()),
        model: model.map(clean_model),
        name: Some(instance_name(info.get_fullname()).to_owned()),
        ..Capabilities::default()
    };
    Some(device)
}

/// Star models announce themselves by brand or series name.
pub fn family_from_model(model: &str) -> ProtocolFamily {
    let lower = model.to_ascii_lowercase();
    let star = ["star", "tsp", "mc-print", "sm-", "sp7", "fvp"];
    if star.iter().any(|s| lower.contains(s)) {
        ProtocolFamily::StarLine
    } else {
        ProtocolFamily::EscPos
    }
}

/// `(TSP143IIIW)` -> `TSP143IIIW`.
fn clean_model(model: &str) -> String {
    model.trim().trim_start_matches('(').trim_end_matches(')').trim().to_owned()
}

/// Instance label of a full service name.
fn instance_name(fullname: &str) -> &str {
    fullname
        .strip_suffix(PDL_SERVICE)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
}
