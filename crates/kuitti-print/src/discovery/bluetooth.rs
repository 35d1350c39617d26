// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bluetooth scan through the native bridge.
//
// The bridge call blocks for the whole inquiry, so it runs on the blocking
// pool and hands matches back over a channel as they turn up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use kuitti_bridge::{BluetoothDeviceInfo, NativeBluetooth};
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{Capabilities, Confidence, PrinterDevice, Transport};

use super::{ScanSink, mdns::family_from_model};

pub const STRATEGY: &str = "bluetooth";

/// Name fragments of serial-port devices that are receipt printers.
const PRINTER_NAME_HINTS: &[&str] = &["star", "tsp", "mc-print", "sm-", "printer", "pos", "tm-", "rpp"];

/// How sure we are that `info` is a printer, or `None` to skip it.
pub fn printer_signature(info: &BluetoothDeviceInfo) -> Option<Confidence> {
    if info.is_imaging_printer() {
        return Some(Confidence::High);
    }
    let named_like_printer = info.name.as_deref().is_some_and(|name| {
        let lower = name.to_ascii_lowercase();
        PRINTER_NAME_HINTS.iter().any(|hint| lower.contains(hint))
    });
    if info.offers_serial_port() && named_like_printer {
        return Some(Confidence::Medium);
    }
    None
}

/// Catalog candidate for a matching device.
pub fn to_candidate(info: BluetoothDeviceInfo, confidence: Confidence) -> PrinterDevice {
    let family = family_from_model(info.name.as_deref().unwrap_or_default());
    let mut device = PrinterDevice::new(info.address.clone(), Transport::Bluetooth, &info.address, family);
    let mut capabilities = Capabilities {
        confidence: Some(confidence),
        discovered_by: Some(STRATEGY.to_owned()),
        name: info.name,
        ..Capabilities::default()
    };
    if info.paired {
        capabilities.extra.insert("paired".into(), "true".into());
    }
    device.capabilities = capabilities;
    device
}

pub(crate) async fn run(bridge: Arc<dyn NativeBluetooth>, budget: Duration, sink: ScanSink) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<PrinterDevice>(16);
    let token = sink.token().clone();
    info!(platform = bridge.platform_name(), "bluetooth scan started");

    let scan = tokio::task::spawn_blocking(move || {
        bridge.scan(budget, &mut |info| {
            if token.is_cancelled() {
                return false;
            }
            match printer_signature(&info) {
                Some(confidence) => {
                    debug!(address = %info.address, ?confidence, "bluetooth printer seen");
                    tx.blocking_send(to_candidate(info, confidence)).is_ok()
                }
                None => {
                    debug!(address = %info.address, class = ?info.class_of_device, "not a printer");
                    true
                }
            }
        })
    });

    while let Some(device) = rx.recv().await {
        if !sink.found(device).await {
            // Dropping the receiver stops the bridge at its next find.
            break;
        }
    }
    drop(rx);

    scan.await
        .map_err(|e| KuittiError::Bluetooth(format!("scan task failed: {e}")))?
}
