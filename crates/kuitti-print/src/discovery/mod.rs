// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer discovery.
//
// Two strategies, both time-bounded and cancellable: a TCP sweep of the
// local subnet on the raw printing port (with mDNS hints alongside), and a
// Bluetooth scan through the native bridge. Each scan runs on its own task
// and streams `ScanEvent`s to the caller as it goes. Every find is merged
// into the shared `DeviceCatalog` before it is emitted, so a cancelled or
// timed-out scan still leaves its results in the catalog.

pub mod bluetooth;
pub mod mdns;
pub mod network;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kuitti_bridge::NativeBluetooth;
use kuitti_core::config::DiscoveryConfig;
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::PrinterDevice;

use crate::catalog::{DeviceCatalog, Observation};

/// Found devices buffered between a scan task and its consumer.
const SCAN_CHANNEL_CAPACITY: usize = 64;

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd {
    /// Every candidate was examined.
    Exhausted,
    /// The caller cancelled or dropped the scan.
    Cancelled,
    /// The budget ran out first.
    TimedOut,
    /// The strategy could not run at all.
    Failed(String),
}

/// One item of a discovery stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A printer, as recorded in the catalog after merging.
    Found(PrinterDevice),
    /// Always the last event.
    Finished(ScanEnd),
}

/// A running discovery scan.
///
/// Yields `Found` events as printers turn up and exactly one `Finished`
/// event at the end. Dropping the scan cancels it.
pub struct DiscoveryScan {
    strategy: &'static str,
    events: mpsc::Receiver<ScanEvent>,
    token: CancellationToken,
}

impl DiscoveryScan {
    /// Stop the scan. Printers already found stay in the catalog; no
    /// further `Found` events are yielded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token that cancels this scan, for callers that want to stop it from
    /// elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    /// Drain the scan, returning what it found and how it ended.
    pub async fn collect_partial(mut self) -> (Vec<PrinterDevice>, ScanEnd) {
        let mut found = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                ScanEvent::Found(device) => found.push(device),
                ScanEvent::Finished(end) => return (found, end),
            }
        }
        // Scan task went away without a verdict; only happens on runtime
        // shutdown.
        (found, ScanEnd::Cancelled)
    }

    /// Drain the scan. Running out of budget is a `DiscoveryTimeout`; the
    /// partial results are in the catalog regardless.
    pub async fn collect(self) -> Result<Vec<PrinterDevice>> {
        let strategy = self.strategy;
        let (found, end) = self.collect_partial().await;
        match end {
            ScanEnd::Exhausted | ScanEnd::Cancelled => Ok(found),
            ScanEnd::TimedOut => Err(KuittiError::DiscoveryTimeout {
                strategy: strategy.to_owned(),
                found: found.len(),
            }),
            ScanEnd::Failed(reason) => Err(KuittiError::Discovery(format!("{strategy} scan: {reason}"))),
        }
    }
}

impl Stream for DiscoveryScan {
    type Item = ScanEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ScanEvent>> {
        loop {
            match self.events.poll_recv(cx) {
                // Finds queued before a cancel are swallowed.
                Poll::Ready(Some(ScanEvent::Found(_))) if self.token.is_cancelled() => continue,
                other => return other,
            }
        }
    }
}

impl Drop for DiscoveryScan {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Scan-side handle: records finds in the catalog and forwards them.
#[derive(Clone)]
pub(crate) struct ScanSink {
    strategy: &'static str,
    catalog: Arc<DeviceCatalog>,
    events: mpsc::Sender<ScanEvent>,
    token: CancellationToken,
}

impl ScanSink {
    /// Record a candidate. Returns `false` once the scan should stop.
    pub(crate) async fn found(&self, candidate: PrinterDevice) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let (device, observation) = self.catalog.observe(candidate, Utc::now());
        debug!(
            strategy = self.strategy,
            printer_id = %device.id,
            new = observation == Observation::Inserted,
            "scan hit"
        );
        self.events.send(ScanEvent::Found(device)).await.is_ok()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Run `strategy` on a new task under `budget` and hand back its stream.
fn launch<F, Fut>(strategy: &'static str, budget: Duration, catalog: Arc<DeviceCatalog>, run: F) -> DiscoveryScan
where
    F: FnOnce(ScanSink) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
    let token = CancellationToken::new();
    // The strategy sees a child token so a timeout can stop it without
    // looking like a caller cancel.
    let inner = token.child_token();
    let sink = ScanSink {
        strategy,
        catalog,
        events: tx.clone(),
        token: inner.clone(),
    };
    let work = run(sink);
    let caller = token.clone();

    info!(strategy, budget_ms = budget.as_millis(), "discovery scan started");
    tokio::spawn(async move {
        let end = tokio::select! {
            _ = caller.cancelled() => ScanEnd::Cancelled,
            outcome = tokio::time::timeout(budget, work) => match outcome {
                Ok(Ok(())) if caller.is_cancelled() => ScanEnd::Cancelled,
                Ok(Ok(())) => ScanEnd::Exhausted,
                Ok(Err(e)) => {
                    warn!(strategy, error = %e, "discovery scan failed");
                    ScanEnd::Failed(e.to_string())
                }
                Err(_) => ScanEnd::TimedOut,
            },
        };
        inner.cancel();
        info!(strategy, end = ?end, "discovery scan finished");
        let _ = tx.send(ScanEvent::Finished(end)).await;
    });

    DiscoveryScan {
        strategy,
        events: rx,
        token,
    }
}

/// Entry point for both scan strategies.
pub struct Discovery {
    catalog: Arc<DeviceCatalog>,
    bluetooth: Arc<dyn NativeBluetooth>,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(catalog: Arc<DeviceCatalog>, bluetooth: Arc<dyn NativeBluetooth>, config: DiscoveryConfig) -> Self {
        Self {
            catalog,
            bluetooth,
            config,
        }
    }

    /// Probe the local subnet (or the configured one) on the raw printing
    /// port. Must be called inside a tokio runtime.
    pub fn scan_network(&self) -> DiscoveryScan {
        let config = self.config.clone();
        launch(
            network::STRATEGY,
            self.config.network_scan_budget,
            Arc::clone(&self.catalog),
            move |sink| network::run(config, sink),
        )
    }

    /// Look for paired and discoverable Bluetooth printers. Must be called
    /// inside a tokio runtime.
    pub fn scan_bluetooth(&self) -> DiscoveryScan {
        let bridge = Arc::clone(&self.bluetooth);
        let budget = self.config.bluetooth_scan_budget;
        launch(
            bluetooth::STRATEGY,
            budget,
            Arc::clone(&self.catalog),
            move |sink| bluetooth::run(bridge, budget, sink),
        )
    }
}
