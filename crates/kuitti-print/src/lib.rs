// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Kuitti Print — printer discovery, per-device connection workers, the
// CloudPRNT job queue and HTTP endpoint, and print dispatch. This crate
// connects the encoded byte streams from `kuitti-encode` to real printers.

pub mod catalog;
pub mod cloudprnt_server;
pub mod connection;
pub mod discovery;
pub mod dispatcher;
pub mod queue;
pub mod retry;
pub mod service;
pub mod transport;

pub use catalog::DeviceCatalog;
pub use cloudprnt_server::CloudPrntServer;
pub use connection::{ConnectionManager, DeviceEvent, SendAck};
pub use discovery::{Discovery, DiscoveryScan, ScanEnd, ScanEvent};
pub use dispatcher::{PrintDispatcher, PrintResult, PrintSummary};
pub use queue::CloudPrntQueue;
pub use service::{PrinterService, PrinterStatus};
pub use transport::{Connector, PrinterLink, TransportConnector};
