// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub bridge for platforms without a native Bluetooth backend.
//
// Every trait method returns `PlatformUnavailable`; discovery reports the
// Bluetooth strategy as unavailable and network printing is unaffected.

use std::time::Duration;

use kuitti_core::error::{KuittiError, Result};

use crate::traits::*;

/// No-op bridge returned where no native backend exists.
pub struct StubBridge;

impl NativeBluetooth for StubBridge {
    fn platform_name(&self) -> &str {
        "Unsupported (stub)"
    }

    fn scan(
        &self,
        _budget: Duration,
        _on_found: &mut dyn FnMut(BluetoothDeviceInfo) -> bool,
    ) -> Result<()> {
        tracing::warn!("NativeBluetooth::scan called on stub bridge");
        Err(KuittiError::PlatformUnavailable)
    }

    fn open_rfcomm(
        &self,
        address: &str,
        _channel: u8,
        _timeout: Duration,
    ) -> Result<Box<dyn RfcommLink>> {
        tracing::warn!(address, "NativeBluetooth::open_rfcomm called on stub bridge");
        Err(KuittiError::PlatformUnavailable)
    }
}
