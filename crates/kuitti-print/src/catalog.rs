// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device catalog: every printer the service knows about, keyed by id and
// deduplicated on normalised address.
//
// Discovery merges observations into it, operators register and deregister
// printers through it. Connection state stored here is only the initial
// value; the live state belongs to the connection manager.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{
    Capabilities, ConnectionState, PrinterDevice, PrinterRegistration, Transport,
    normalize_address,
};

/// `discovered_by` value for operator-entered printers.
pub const MANUAL_SOURCE: &str = "manual";

/// What `observe` did with a discovery candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Inserted,
    Updated,
}

/// Shared printer catalog.
#[derive(Debug, Default)]
pub struct DeviceCatalog {
    devices: RwLock<BTreeMap<String, PrinterDevice>>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an operator-entered printer, or update the record that
    /// already has its id or address.
    #[instrument(skip(self, registration), fields(address = %registration.address, transport = %registration.transport))]
    pub fn register(&self, registration: PrinterRegistration) -> Result<PrinterDevice> {
        registration.validate()?;
        let address = normalize_address(&registration.address);
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);

        let by_address = find_id_by_address(&devices, &address);
        let id = match (&registration.id, by_address) {
            (Some(wanted), Some(existing)) if *wanted != existing => {
                return Err(KuittiError::InvalidConfig(format!(
                    "address {address} is already registered as {existing}"
                )));
            }
            (Some(wanted), _) => wanted.clone(),
            (None, Some(existing)) => existing,
            (None, None) => match devices.get(&address) {
                Some(holder) => {
                    return Err(KuittiError::InvalidConfig(format!(
                        "id {address} already names the printer at {}, register with an explicit id",
                        holder.address
                    )));
                }
                None => address.clone(),
            },
        };

        let record = match devices.get_mut(&id) {
            Some(existing) => {
                existing.transport = registration.transport;
                existing.address = address;
                existing.port = registration.port.or(default_port(registration.transport));
                existing.protocol_family = registration.protocol_family;
                existing.code_page = registration.code_page;
                apply_registration_capabilities(&mut existing.capabilities, &registration);
                info!(printer_id = %id, "printer registration updated");
                existing.clone()
            }
            None => {
                let mut device = PrinterDevice::new(
                    id.clone(),
                    registration.transport,
                    &address,
                    registration.protocol_family,
                );
                if registration.port.is_some() {
                    device.port = registration.port;
                }
                device.code_page = registration.code_page;
                device.connection_state = initial_state(registration.transport);
                apply_registration_capabilities(&mut device.capabilities, &registration);
                info!(printer_id = %id, endpoint = %device.endpoint(), "printer registered");
                devices.insert(id, device.clone());
                device
            }
        };
        Ok(record)
    }

    /// Merge a discovery candidate. A known address keeps its id and record
    /// and only gets `last_seen_at` and capabilities refreshed.
    pub fn observe(&self, candidate: PrinterDevice, seen_at: DateTime<Utc>) -> (PrinterDevice, Observation) {
        let address = normalize_address(&candidate.address);
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(id) = find_id_by_address(&devices, &address) {
            if let Some(existing) = devices.get_mut(&id) {
                existing.last_seen_at = Some(seen_at);
                let manual = existing.capabilities.discovered_by.as_deref() == Some(MANUAL_SOURCE);
                if !manual {
                    if let Some(hint) = candidate.capabilities.protocol_hint {
                        existing.protocol_family = hint;
                    }
                    if existing.transport == Transport::Network && candidate.port.is_some() {
                        existing.port = candidate.port;
                    }
                }
                let source = existing.capabilities.discovered_by.clone();
                existing.capabilities.merge(candidate.capabilities);
                if manual {
                    existing.capabilities.discovered_by = source;
                }
                debug!(printer_id = %id, "known printer re-observed");
                return (existing.clone(), Observation::Updated);
            }
        }

        let mut device = candidate;
        device.id = unused_id(&devices, &address);
        device.address = address;
        device.last_seen_at = Some(seen_at);
        device.connection_state = ConnectionState::Discovered;
        info!(printer_id = %device.id, transport = %device.transport, "printer discovered");
        devices.insert(device.id.clone(), device.clone());
        (device, Observation::Inserted)
    }

    pub fn get(&self, id: &str) -> Option<PrinterDevice> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices
            .get(id)
            .or_else(|| devices.get(&normalize_address(id)))
            .cloned()
    }

    /// Like [`get`](Self::get) but an unknown id is an error.
    pub fn require(&self, id: &str) -> Result<PrinterDevice> {
        self.get(id).ok_or_else(|| KuittiError::UnknownPrinter(id.to_owned()))
    }

    pub fn find_by_address(&self, address: &str) -> Option<PrinterDevice> {
        let address = normalize_address(address);
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|d| d.address == address)
            .cloned()
    }

    /// All records, sorted by id.
    pub fn list(&self) -> Vec<PrinterDevice> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a record. This is the only way a record leaves the catalog.
    #[instrument(skip(self))]
    pub fn deregister(&self, id: &str) -> Result<PrinterDevice> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let key = if devices.contains_key(id) {
            id.to_owned()
        } else {
            normalize_address(id)
        };
        let removed = devices
            .remove(&key)
            .ok_or_else(|| KuittiError::UnknownPrinter(id.to_owned()))?;
        info!(printer_id = %removed.id, "printer deregistered");
        Ok(removed)
    }
}

fn find_id_by_address(devices: &BTreeMap<String, PrinterDevice>, address: &str) -> Option<String> {
    devices
        .values()
        .find(|d| d.address == address)
        .map(|d| d.id.clone())
}

/// `wanted`, or `wanted#2`, `wanted#3`, ... when another record already
/// holds it as an explicit id.
fn unused_id(devices: &BTreeMap<String, PrinterDevice>, wanted: &str) -> String {
    let mut id = wanted.to_owned();
    let mut n = 1usize;
    while devices.contains_key(&id) {
        n += 1;
        id = format!("{wanted}#{n}");
    }
    id
}

fn default_port(transport: Transport) -> Option<u16> {
    match transport {
        Transport::Network => Some(kuitti_core::types::DEFAULT_NETWORK_PORT),
        _ => None,
    }
}

fn initial_state(transport: Transport) -> ConnectionState {
    if transport.is_direct() {
        ConnectionState::Discovered
    } else {
        ConnectionState::Unknown
    }
}

fn apply_registration_capabilities(caps: &mut Capabilities, registration: &PrinterRegistration) {
    caps.discovered_by = Some(MANUAL_SOURCE.to_owned());
    if registration.name.is_some() {
        caps.name = registration.name.clone();
    }
    if registration.line_width.is_some() {
        caps.line_width = registration.line_width;
    }
}
