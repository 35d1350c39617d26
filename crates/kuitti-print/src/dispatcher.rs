// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print dispatch: look up the printer, encode for its command set, then hand
// the bytes to the connection manager (direct transports) or the CloudPRNT
// queue (poll transport).

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use kuitti_core::config::EncodingConfig;
use kuitti_core::document::ReceiptDocument;
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{
    JobId, JobStatus, PrinterDevice, ProtocolFamily, Transport, is_mac_address, normalize_address,
};
use kuitti_encode::ReceiptEncoder;

use crate::catalog::DeviceCatalog;
use crate::connection::{ConnectionManager, SendAck};
use crate::queue::{CloudPrntQueue, media_type_for};

/// Outcome of [`PrintDispatcher::print`].
///
/// Direct transports report a terminal outcome; the poll transport only
/// reports that the job was queued.
#[derive(Debug)]
pub enum PrintResult {
    /// Bytes written to the printer's socket.
    Printed { printer_id: String, ack: SendAck },
    /// Queued for a CloudPRNT printer; see `delivery_status`.
    Accepted { printer_id: String, job_id: JobId },
    Failed { printer_id: String, error: KuittiError },
}

impl PrintResult {
    /// `Printed` or `Accepted`.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn printer_id(&self) -> &str {
        match self {
            Self::Printed { printer_id, .. }
            | Self::Accepted { printer_id, .. }
            | Self::Failed { printer_id, .. } => printer_id,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Accepted { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&KuittiError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Flat view for callers that want `{success, jobId?, error?}`.
    pub fn summary(&self) -> PrintSummary {
        PrintSummary {
            success: self.is_success(),
            printer_id: self.printer_id().to_owned(),
            job_id: self.job_id(),
            error: self.error().map(ToString::to_string),
            pending: matches!(self, Self::Accepted { .. }),
        }
    }
}

/// Serializable form of a [`PrintResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSummary {
    pub success: bool,
    pub printer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Accepted into the CloudPRNT queue, not yet printed.
    pub pending: bool,
}

/// Routes documents to printers.
pub struct PrintDispatcher {
    catalog: Arc<DeviceCatalog>,
    manager: Arc<ConnectionManager>,
    queue: Arc<CloudPrntQueue>,
    encoding: EncodingConfig,
}

impl PrintDispatcher {
    pub fn new(
        catalog: Arc<DeviceCatalog>,
        manager: Arc<ConnectionManager>,
        queue: Arc<CloudPrntQueue>,
        encoding: EncodingConfig,
    ) -> Self {
        Self {
            catalog,
            manager,
            queue,
            encoding,
        }
    }

    /// Print `document` on `printer_id`.
    ///
    /// The document is encoded before any transport is touched, so an
    /// unsupported node never leaves partial output on a printer.
    #[instrument(skip(self, document), fields(nodes = document.len()))]
    pub async fn print(&self, printer_id: &str, document: &ReceiptDocument) -> PrintResult {
        let device = match self.catalog.require(printer_id) {
            Ok(device) => device,
            Err(error) => return failed(printer_id, error),
        };
        let bytes = match self.encode(&device, document) {
            Ok(bytes) => bytes,
            Err(error) => return failed(&device.id, error),
        };

        match device.transport {
            Transport::Network | Transport::Bluetooth => match self.manager.send(&device, bytes).await {
                Ok(ack) => {
                    info!(printer_id = %device.id, bytes = ack.bytes, elapsed_ms = ack.elapsed.as_millis(), "printed");
                    PrintResult::Printed {
                        printer_id: device.id,
                        ack,
                    }
                }
                Err(error) => failed(&device.id, error),
            },
            Transport::CloudPrnt => {
                let job_id = self
                    .queue
                    .enqueue(&device.address, bytes, media_type_for(device.protocol_family));
                PrintResult::Accepted {
                    printer_id: device.id,
                    job_id,
                }
            }
        }
    }

    /// Queue `document` for a CloudPRNT printer named by catalog id or MAC,
    /// returning the printer id and job token.
    ///
    /// A MAC the catalog does not know is accepted as well and encoded for
    /// `family`, Star Line when unset; a catalogued printer keeps its own
    /// family. Printers reached directly are refused.
    #[instrument(skip(self, document), fields(nodes = document.len()))]
    pub fn submit(
        &self,
        target: &str,
        family: Option<ProtocolFamily>,
        document: &ReceiptDocument,
    ) -> Result<(String, JobId)> {
        let device = match self.catalog.get(target) {
            Some(device) if device.transport == Transport::CloudPrnt => device,
            Some(device) => {
                return Err(KuittiError::InvalidConfig(format!(
                    "printer {} is reached over {}, not CloudPRNT",
                    device.id, device.transport
                )));
            }
            None if is_mac_address(target) => {
                let mac = normalize_address(target);
                PrinterDevice::new(
                    mac.clone(),
                    Transport::CloudPrnt,
                    &mac,
                    family.unwrap_or(ProtocolFamily::StarLine),
                )
            }
            None => return Err(KuittiError::UnknownPrinter(target.to_owned())),
        };
        let bytes = self.encode(&device, document)?;
        let job_id = self
            .queue
            .enqueue(&device.address, bytes, media_type_for(device.protocol_family));
        info!(printer_id = %device.id, job_id = %job_id, "job submitted for polling");
        Ok((device.id, job_id))
    }

    /// Encode `document` for `device` without printing it.
    pub fn encode(&self, device: &PrinterDevice, document: &ReceiptDocument) -> Result<Vec<u8>> {
        ReceiptEncoder::for_device(device, self.encoding.fallback_byte, self.encoding.default_columns).encode(document)
    }

    /// Where a CloudPRNT job stands. Expired jobs, even purged ones, are
    /// `JobExpired`.
    pub fn delivery_status(&self, job_id: JobId) -> Result<JobStatus> {
        self.queue.status(job_id)
    }

    pub fn queue(&self) -> &Arc<CloudPrntQueue> {
        &self.queue
    }
}

fn failed(printer_id: &str, error: KuittiError) -> PrintResult {
    warn!(printer_id, error = %error, "print failed");
    PrintResult::Failed {
        printer_id: printer_id.to_owned(),
        error,
    }
}
