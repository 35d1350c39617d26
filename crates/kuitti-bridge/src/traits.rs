// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for native Bluetooth access.
//
// Receipt printers speak the Serial Port Profile over RFCOMM. The bridge
// exposes just enough of the platform stack for that: enumerating candidate
// devices and opening a byte-stream socket to one of them. Both calls block
// and are meant to run on a blocking thread.

use std::time::Duration;

use kuitti_core::error::Result;

/// Default RFCOMM channel for SPP printers.
pub const RFCOMM_DEFAULT_CHANNEL: u8 = 1;

/// Serial Port Profile service class UUID prefix.
pub const SPP_UUID_PREFIX: &str = "00001101-";

/// Native Bluetooth capabilities used by discovery and the connection
/// manager.
pub trait NativeBluetooth: Send + Sync {
    /// Human-readable platform name (e.g. "Linux (BlueZ)").
    fn platform_name(&self) -> &str;

    /// Enumerate paired and discoverable devices for at most `budget`.
    ///
    /// Each device is handed to `on_found` as soon as it is known. The scan
    /// stops early when `on_found` returns `false`.
    fn scan(
        &self,
        budget: Duration,
        on_found: &mut dyn FnMut(BluetoothDeviceInfo) -> bool,
    ) -> Result<()>;

    /// Open an RFCOMM stream to `address` (`AA:BB:CC:DD:EE:FF`).
    fn open_rfcomm(
        &self,
        address: &str,
        channel: u8,
        timeout: Duration,
    ) -> Result<Box<dyn RfcommLink>>;
}

/// An open RFCOMM byte stream.
pub trait RfcommLink: Send {
    /// Write every byte or fail.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Whether the remote end has closed the connection.
    fn peer_closed(&mut self) -> bool;

    fn close(&mut self);
}

/// A Bluetooth device as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BluetoothDeviceInfo {
    /// Upper-case, colon separated MAC.
    pub address: String,
    pub name: Option<String>,
    /// 24-bit Class of Device, when known.
    pub class_of_device: Option<u32>,
    /// Advertised service class UUIDs, lower-case.
    pub service_uuids: Vec<String>,
    pub paired: bool,
}

impl BluetoothDeviceInfo {
    /// Major device class 0x06 (Imaging) with the printer minor bit set.
    pub fn is_imaging_printer(&self) -> bool {
        self.class_of_device
            .map(|cod| (cod >> 8) & 0x1F == 0x06 && cod & 0x80 != 0)
            .unwrap_or(false)
    }

    pub fn offers_serial_port(&self) -> bool {
        self.service_uuids
            .iter()
            .any(|u| u.to_ascii_lowercase().starts_with(SPP_UUID_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printer_class_of_device_is_recognised() {
        // Imaging major class, printer minor bit.
        let printer = BluetoothDeviceInfo {
            class_of_device: Some(0x040680),
            ..Default::default()
        };
        assert!(printer.is_imaging_printer());

        // Imaging camera, not a printer.
        let camera = BluetoothDeviceInfo {
            class_of_device: Some(0x000620),
            ..Default::default()
        };
        assert!(!camera.is_imaging_printer());

        // Phone.
        let phone = BluetoothDeviceInfo {
            class_of_device: Some(0x5A020C),
            ..Default::default()
        };
        assert!(!phone.is_imaging_printer());
    }

    #[test]
    fn spp_uuid_detection_ignores_case() {
        let dev = BluetoothDeviceInfo {
            service_uuids: vec!["00001101-0000-1000-8000-00805F9B34FB".into()],
            ..Default::default()
        };
        assert!(dev.offers_serial_port());
        assert!(!BluetoothDeviceInfo::default().offers_serial_port());
    }
}
