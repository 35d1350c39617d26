// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service façade: one explicitly constructed value holding the catalog,
// connection manager, CloudPRNT queue, discovery and dispatcher, handed to
// whatever layer takes orders and wants receipts printed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use kuitti_bridge::{NativeBluetooth, platform_bridge};
use kuitti_core::config::ServiceConfig;
use kuitti_core::document::ReceiptDocument;
use kuitti_core::error::Result;
use kuitti_core::types::{ConnectionState, JobId, JobStatus, PrinterDevice, PrinterRegistration, Transport};

use crate::catalog::DeviceCatalog;
use crate::cloudprnt_server::CloudPrntServer;
use crate::connection::{ConnectionManager, DeviceEvent};
use crate::discovery::{Discovery, DiscoveryScan};
use crate::dispatcher::{PrintDispatcher, PrintResult};
use crate::queue::CloudPrntQueue;
use crate::transport::{Connector, TransportConnector};

/// A printer record with what is known about it right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatus {
    /// Catalog record with the live connection state.
    pub printer: PrinterDevice,
    /// CloudPRNT only: jobs still waiting to be polled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_jobs: Option<usize>,
    /// CloudPRNT only: when the printer last polled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<DateTime<Utc>>,
}

/// Everything needed to print receipts.
pub struct PrinterService {
    config: ServiceConfig,
    catalog: Arc<DeviceCatalog>,
    manager: Arc<ConnectionManager>,
    queue: Arc<CloudPrntQueue>,
    discovery: Discovery,
    dispatcher: Arc<PrintDispatcher>,
}

impl PrinterService {
    /// Build the service on the platform's Bluetooth stack and real
    /// sockets.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let bridge: Arc<dyn NativeBluetooth> = Arc::from(platform_bridge());
        let connector = Arc::new(TransportConnector::new(Arc::clone(&bridge)));
        Self::with_parts(config, bridge, connector)
    }

    /// Build the service on an explicit bridge and connector.
    pub fn with_parts(
        config: ServiceConfig,
        bridge: Arc<dyn NativeBluetooth>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(DeviceCatalog::new());
        let manager = Arc::new(ConnectionManager::new(connector, config.connection.clone()));
        let queue = Arc::new(CloudPrntQueue::new(config.cloudprnt.retention));
        let discovery = Discovery::new(Arc::clone(&catalog), bridge, config.discovery.clone());
        let dispatcher = Arc::new(PrintDispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&manager),
            Arc::clone(&queue),
            config.encoding.clone(),
        ));
        info!(
            auto_reconnect = config.connection.auto_reconnect,
            cloudprnt_addr = %config.cloudprnt.listen_addr,
            "printer service ready"
        );
        Ok(Self {
            config,
            catalog,
            manager,
            queue,
            discovery,
            dispatcher,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // -- printing -----------------------------------------------------------

    /// Print `document` on `printer_id`.
    pub async fn print(&self, printer_id: &str, document: &ReceiptDocument) -> PrintResult {
        self.dispatcher.print(printer_id, document).await
    }

    /// Status of a job accepted for a CloudPRNT printer.
    pub fn delivery_status(&self, job_id: JobId) -> Result<JobStatus> {
        self.dispatcher.delivery_status(job_id)
    }

    pub fn dispatcher(&self) -> &Arc<PrintDispatcher> {
        &self.dispatcher
    }

    // -- catalog ------------------------------------------------------------

    /// Add or update a printer from operator-entered details.
    #[instrument(skip(self), fields(address = %registration.address))]
    pub fn register_printer(&self, registration: PrinterRegistration) -> Result<PrinterDevice> {
        let device = self.catalog.register(registration)?;
        Ok(self.with_live_state(device))
    }

    /// All known printers, sorted by id, with live connection states.
    pub fn list_printers(&self) -> Vec<PrinterDevice> {
        self.catalog
            .list()
            .into_iter()
            .map(|d| self.with_live_state(d))
            .collect()
    }

    pub fn printer_status(&self, printer_id: &str) -> Result<PrinterStatus> {
        let printer = self.with_live_state(self.catalog.require(printer_id)?);
        let poller = match printer.transport {
            Transport::CloudPrnt => self
                .queue
                .pollers()
                .into_iter()
                .find(|p| p.printer_id == printer.address),
            _ => None,
        };
        let pending_jobs = match printer.transport {
            Transport::CloudPrnt => Some(poller.as_ref().map_or_else(
                || self.queue.stats().per_printer.get(&printer.address).copied().unwrap_or(0),
                |p| p.pending,
            )),
            _ => None,
        };
        Ok(PrinterStatus {
            last_poll: poller.map(|p| p.last_poll),
            pending_jobs,
            printer,
        })
    }

    /// Stop the printer's connection worker and drop its record.
    pub async fn deregister_printer(&self, printer_id: &str) -> Result<PrinterDevice> {
        let device = self.catalog.require(printer_id)?;
        self.manager.forget(&device.id).await;
        self.catalog.deregister(&device.id)
    }

    pub fn catalog(&self) -> &Arc<DeviceCatalog> {
        &self.catalog
    }

    // -- connections --------------------------------------------------------

    /// Open a direct printer's link ahead of the first print.
    pub async fn connect_printer(&self, printer_id: &str) -> Result<()> {
        let device = self.catalog.require(printer_id)?;
        self.manager.connect(&device).await
    }

    pub async fn disconnect_printer(&self, printer_id: &str) -> Result<()> {
        let device = self.catalog.require(printer_id)?;
        self.manager.disconnect(&device.id).await
    }

    /// Connection state changes of every direct printer.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.manager.subscribe()
    }

    // -- discovery ----------------------------------------------------------

    pub fn scan_network(&self) -> DiscoveryScan {
        self.discovery.scan_network()
    }

    pub fn scan_bluetooth(&self) -> DiscoveryScan {
        self.discovery.scan_bluetooth()
    }

    // -- CloudPRNT ----------------------------------------------------------

    pub fn queue(&self) -> &Arc<CloudPrntQueue> {
        &self.queue
    }

    /// HTTP endpoint over this service's queue, not yet started.
    pub fn cloudprnt_server(&self) -> CloudPrntServer {
        CloudPrntServer::new(self.config.cloudprnt.clone(), Arc::clone(&self.dispatcher))
    }

    /// Start the retention sweep at the configured interval.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.queue).spawn_sweeper(self.config.cloudprnt.sweep_interval, token)
    }

    /// Close every direct connection.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        info!("printer service stopped");
    }

    fn with_live_state(&self, mut device: PrinterDevice) -> PrinterDevice {
        if let Some(state) = self.manager.state(&device.id) {
            device.connection_state = state;
        } else if device.transport == Transport::CloudPrnt && self.has_polled(&device.address) {
            // A polling printer is as connected as CloudPRNT gets.
            device.connection_state = ConnectionState::Connected;
        }
        device
    }

    fn has_polled(&self, address: &str) -> bool {
        self.queue.pollers().iter().any(|p| p.printer_id == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuitti_core::types::ProtocolFamily;

    fn service() -> PrinterService {
        PrinterService::new(ServiceConfig::default()).expect("service")
    }

    #[tokio::test]
    async fn registered_printers_are_listed_sorted() {
        let svc = service();
        svc.register_printer(PrinterRegistration::network("10.0.0.9", 9100, ProtocolFamily::EscPos))
            .expect("register");
        svc.register_printer(PrinterRegistration::network("10.0.0.5", 9100, ProtocolFamily::StarLine))
            .expect("register");
        let ids: Vec<_> = svc.list_printers().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["10.0.0.5", "10.0.0.9"]);
        assert_eq!(svc.list_printers()[0].connection_state, ConnectionState::Discovered);
    }

    #[tokio::test]
    async fn cloudprnt_status_reports_pending_jobs_and_polls() {
        let svc = service();
        svc.register_printer(PrinterRegistration::cloudprnt("aa:bb:cc:dd:ee:ff", ProtocolFamily::StarLine))
            .expect("register");
        let doc = ReceiptDocument::builder().line("hi").cut().build().expect("doc");
        assert!(svc.print("AA:BB:CC:DD:EE:FF", &doc).await.is_success());

        let status = svc.printer_status("AA:BB:CC:DD:EE:FF").expect("status");
        assert_eq!(status.pending_jobs, Some(1));
        assert_eq!(status.last_poll, None);
        assert_eq!(status.printer.connection_state, ConnectionState::Unknown);

        svc.queue().record_poll("AA:BB:CC:DD:EE:FF", None, Utc::now());
        let status = svc.printer_status("AA:BB:CC:DD:EE:FF").expect("status");
        assert!(status.last_poll.is_some());
        assert_eq!(status.printer.connection_state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn deregistered_printer_is_gone() {
        let svc = service();
        svc.register_printer(PrinterRegistration::network("10.0.0.5", 9100, ProtocolFamily::EscPos))
            .expect("register");
        svc.deregister_printer("10.0.0.5").await.expect("deregister");
        assert!(svc.list_printers().is_empty());
        assert!(svc.printer_status("10.0.0.5").is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ServiceConfig::default();
        config.discovery.max_parallel_probes = 0;
        assert!(PrinterService::new(config).is_err());
    }
}
