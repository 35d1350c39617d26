// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Linux (BlueZ) bridge over raw AF_BLUETOOTH sockets.
//
// Paired devices come from BlueZ's on-disk store, which carries names,
// class and service UUIDs. Discoverable devices come from HCI inquiries,
// which only report address and class. The kernel hands back an inquiry's
// results only once it ends, so the scan budget is split into short rounds
// and each round's new devices are reported before the next one starts. RFCOMM streams are plain
// SOCK_STREAM sockets.

use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use kuitti_core::error::{KuittiError, Result};

use crate::traits::{BluetoothDeviceInfo, NativeBluetooth, RfcommLink};

// <bluetooth/bluetooth.h>, <bluetooth/hci.h>, <bluetooth/rfcomm.h>
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const BTPROTO_RFCOMM: i32 = 3;

/// `_IOR('H', 240, int)`
const HCIINQUIRY: u32 = 0x8004_48F0;
const IREQ_CACHE_FLUSH: u16 = 0x0001;
/// General Inquiry Access Code 0x9E8B33, little-endian.
const GIAC_LAP: [u8; 3] = [0x33, 0x8B, 0x9E];
/// One inquiry length unit.
const INQUIRY_UNIT: Duration = Duration::from_millis(1280);
const MAX_INQUIRY_LENGTH: u8 = 48;
/// Units per inquiry round.
const ROUND_LENGTH: u8 = 2;
const MAX_RESPONSES: usize = 255;

/// `struct hci_inquiry_req` including trailing padding.
const INQUIRY_REQ_LEN: usize = 10;
/// Packed `struct inquiry_info`.
const INQUIRY_INFO_LEN: usize = 14;

const BLUEZ_STORAGE: &str = "/var/lib/bluetooth";

/// sockaddr_rc structure for RFCOMM connections.
#[repr(C)]
struct SockaddrRc {
    rc_family: u16,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

/// BlueZ-backed bridge.
pub struct LinuxBridge {
    storage: PathBuf,
    hci_dev: u16,
}

impl LinuxBridge {
    pub fn new() -> Self {
        Self {
            storage: PathBuf::from(BLUEZ_STORAGE),
            hci_dev: 0,
        }
    }

    /// Read paired devices from a BlueZ storage directory instead of the
    /// system one.
    pub fn with_storage(mut self, storage: impl Into<PathBuf>) -> Self {
        self.storage = storage.into();
        self
    }
}

impl Default for LinuxBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBluetooth for LinuxBridge {
    fn platform_name(&self) -> &str {
        "Linux (BlueZ)"
    }

    fn scan(
        &self,
        budget: Duration,
        on_found: &mut dyn FnMut(BluetoothDeviceInfo) -> bool,
    ) -> Result<()> {
        let mut seen = HashSet::new();

        for device in paired_devices(&self.storage) {
            seen.insert(device.address.clone());
            if !on_found(device) {
                return Ok(());
            }
        }

        let rounds = inquiry_rounds(budget);
        info!(hci = self.hci_dev, rounds = rounds.len(), "starting HCI inquiry");
        for (round, length) in rounds.into_iter().enumerate() {
            // Later rounds keep the cache so repeat answers are cheap.
            let flush = round == 0;
            for device in hci_inquiry(self.hci_dev, length, flush)? {
                if seen.insert(device.address.clone()) && !on_found(device) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn open_rfcomm(
        &self,
        address: &str,
        channel: u8,
        timeout: Duration,
    ) -> Result<Box<dyn RfcommLink>> {
        Ok(Box::new(RfcommSocket::connect(address, channel, timeout)?))
    }
}

// ---------------------------------------------------------------------------
// Paired devices
// ---------------------------------------------------------------------------

/// Devices under `<storage>/<adapter>/<device>/info`. Unreadable entries are
/// skipped; the store is normally root-only.
pub fn paired_devices(storage: &Path) -> Vec<BluetoothDeviceInfo> {
    let mut devices = Vec::new();
    let adapters = match std::fs::read_dir(storage) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %storage.display(), error = %e, "BlueZ storage not readable");
            return devices;
        }
    };

    for adapter in adapters.flatten() {
        let Ok(entries) = std::fs::read_dir(adapter.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if parse_bdaddr(&name).is_err() {
                continue;
            }
            match std::fs::read_to_string(entry.path().join("info")) {
                Ok(text) => devices.push(parse_device_info(&name, &text)),
                Err(e) => debug!(device = %name, error = %e, "skipping paired device"),
            }
        }
    }
    devices
}

/// Parse the `[General]` group of a BlueZ device `info` file.
pub fn parse_device_info(address: &str, text: &str) -> BluetoothDeviceInfo {
    let mut info = BluetoothDeviceInfo {
        address: address.to_ascii_uppercase(),
        paired: true,
        ..Default::default()
    };
    let mut alias = None;
    let mut in_general = false;

    for line in text.lines().map(str::trim) {
        if line.starts_with('[') {
            in_general = line == "[General]";
            continue;
        }
        if !in_general {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "Name" => info.name = Some(value.to_string()),
            "Alias" => alias = Some(value.to_string()),
            "Class" => {
                info.class_of_device =
                    u32::from_str_radix(value.trim_start_matches("0x"), 16).ok();
            }
            "Services" => {
                info.service_uuids = value
                    .split(';')
                    .filter(|s| !s.is_empty())
                    .map(str::to_ascii_lowercase)
                    .collect();
            }
            _ => {}
        }
    }
    if info.name.is_none() {
        info.name = alias;
    }
    info
}

// ---------------------------------------------------------------------------
// HCI inquiry
// ---------------------------------------------------------------------------

fn inquiry_length(budget: Duration) -> u8 {
    let units = budget.as_millis() / INQUIRY_UNIT.as_millis();
    units.clamp(1, u128::from(MAX_INQUIRY_LENGTH)) as u8
}

/// Lengths of the inquiry rounds that fit `budget`.
fn inquiry_rounds(budget: Duration) -> Vec<u8> {
    let mut left = inquiry_length(budget);
    let mut rounds = Vec::new();
    while left > 0 {
        let length = left.min(ROUND_LENGTH);
        rounds.push(length);
        left -= length;
    }
    rounds
}

/// Run a general inquiry on `hci<dev_id>`. Blocks for the inquiry length.
fn hci_inquiry(dev_id: u16, length: u8, flush_cache: bool) -> Result<Vec<BluetoothDeviceInfo>> {
    let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_RAW | libc::SOCK_CLOEXEC, BTPROTO_HCI) };
    if fd < 0 {
        let err = std::io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::EAFNOSUPPORT) => KuittiError::PlatformUnavailable,
            _ => KuittiError::Bluetooth(format!("HCI socket: {err}")),
        });
    }

    let mut buf = vec![0u8; INQUIRY_REQ_LEN + INQUIRY_INFO_LEN * MAX_RESPONSES];
    buf[0..2].copy_from_slice(&dev_id.to_ne_bytes());
    let flags = if flush_cache { IREQ_CACHE_FLUSH } else { 0 };
    buf[2..4].copy_from_slice(&flags.to_ne_bytes());
    buf[4..7].copy_from_slice(&GIAC_LAP);
    buf[7] = length;
    buf[8] = MAX_RESPONSES as u8;

    let ret = unsafe { libc::ioctl(fd, HCIINQUIRY as _, buf.as_mut_ptr()) };
    let err = std::io::Error::last_os_error();
    unsafe {
        libc::close(fd);
    }
    if ret < 0 {
        return Err(KuittiError::Bluetooth(format!("HCI inquiry on hci{dev_id}: {err}")));
    }

    let count = usize::from(buf[8]);
    debug!(count, length, "HCI inquiry round complete");
    Ok(parse_inquiry_responses(&buf[INQUIRY_REQ_LEN..], count))
}

fn parse_inquiry_responses(data: &[u8], count: usize) -> Vec<BluetoothDeviceInfo> {
    data.chunks_exact(INQUIRY_INFO_LEN)
        .take(count)
        .map(|entry| {
            let class = u32::from(entry[9]) | u32::from(entry[10]) << 8 | u32::from(entry[11]) << 16;
            BluetoothDeviceInfo {
                address: format_bdaddr(&entry[0..6]),
                class_of_device: Some(class),
                ..Default::default()
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// RFCOMM socket
// ---------------------------------------------------------------------------

/// A connected RFCOMM stream.
pub struct RfcommSocket {
    fd: RawFd,
    address: String,
}

impl RfcommSocket {
    /// Connect to `addr` on `channel`. `timeout` bounds both the connect and
    /// each subsequent send.
    pub fn connect(addr: &str, channel: u8, timeout: Duration) -> Result<Self> {
        let bdaddr = parse_bdaddr(addr)?;

        let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, BTPROTO_RFCOMM) };
        if fd < 0 {
            return Err(KuittiError::Bluetooth(format!(
                "RFCOMM socket: {}",
                std::io::Error::last_os_error()
            )));
        }
        let sock = Self {
            fd,
            address: addr.to_ascii_uppercase(),
        };
        // Kernel RFCOMM honours the send timeout while connecting.
        sock.set_timeout(timeout)?;

        let sa = SockaddrRc {
            rc_family: AF_BLUETOOTH as u16,
            rc_bdaddr: bdaddr,
            rc_channel: channel,
        };
        let ret = unsafe {
            libc::connect(
                sock.fd,
                &sa as *const SockaddrRc as *const libc::sockaddr,
                std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            // `sock` is dropped here and closes the descriptor.
            return Err(KuittiError::Bluetooth(format!(
                "RFCOMM connect to {addr} channel {channel}: {}",
                std::io::Error::last_os_error()
            )));
        }

        info!(address = %sock.address, channel, "RFCOMM connected");
        Ok(sock)
    }

    fn set_timeout(&self, timeout: Duration) -> Result<()> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        for opt in [libc::SO_RCVTIMEO, libc::SO_SNDTIMEO] {
            let ret = unsafe {
                libc::setsockopt(
                    self.fd,
                    libc::SOL_SOCKET,
                    opt,
                    &tv as *const libc::timeval as *const libc::c_void,
                    std::mem::size_of::<libc::timeval>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                return Err(KuittiError::Bluetooth(format!(
                    "setsockopt: {}",
                    std::io::Error::last_os_error()
                )));
            }
        }
        Ok(())
    }
}

impl RfcommLink for RfcommSocket {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.fd < 0 {
            return Err(KuittiError::Bluetooth(format!("{} is closed", self.address)));
        }
        let mut sent = 0;
        while sent < data.len() {
            let n = unsafe {
                libc::send(
                    self.fd,
                    data[sent..].as_ptr() as *const libc::c_void,
                    data.len() - sent,
                    libc::MSG_NOSIGNAL,
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(KuittiError::Bluetooth(format!(
                    "send to {} failed after {sent} bytes: {err}",
                    self.address
                )));
            }
            sent += n as usize;
        }
        Ok(())
    }

    fn peer_closed(&mut self) -> bool {
        if self.fd < 0 {
            return true;
        }
        // Drain status bytes the printer volunteered; EOF means closed.
        let mut buf = [0u8; 256];
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n > 0 {
                continue;
            }
            if n == 0 {
                return true;
            }
            let err = std::io::Error::last_os_error();
            return !matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            );
        }
    }

    fn close(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
            debug!(address = %self.address, "RFCOMM closed");
        }
    }
}

impl Drop for RfcommSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Parse "A4:93:40:A0:87:57" into bdaddr_t byte order (reversed).
pub fn parse_bdaddr(addr: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = addr.split(':').collect();
    if parts.len() != 6 {
        return Err(KuittiError::Bluetooth(format!("invalid Bluetooth address: {addr}")));
    }
    let mut bdaddr = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        bdaddr[5 - i] = u8::from_str_radix(part, 16)
            .map_err(|_| KuittiError::Bluetooth(format!("invalid Bluetooth address: {addr}")))?;
    }
    Ok(bdaddr)
}

/// Inverse of [`parse_bdaddr`].
pub fn format_bdaddr(bdaddr: &[u8]) -> String {
    bdaddr
        .iter()
        .rev()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
