// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Kuitti native Bluetooth bridge.
//
// Defines the `NativeBluetooth` trait used by discovery and the connection
// manager, and selects the implementation for the target operating system.

pub mod traits;

#[cfg(target_os = "linux")]
pub mod linux;

pub mod stub;

pub use traits::{BluetoothDeviceInfo, NativeBluetooth, RfcommLink, RFCOMM_DEFAULT_CHANNEL};

/// The bridge implementation for the target operating system.
pub fn platform_bridge() -> Box<dyn NativeBluetooth> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::LinuxBridge::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        // No native backend: Bluetooth discovery and printing report
        // PlatformUnavailable.
        Box::new(stub::StubBridge)
    }
}
