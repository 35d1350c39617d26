// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.
//
// Every field has a default so a partial JSON file (or none at all) is a
// valid configuration. Durations are written as whole milliseconds.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KuittiError, Result};
use crate::types::{DEFAULT_NETWORK_PORT, PrinterRegistration};

/// Top-level settings for the printer service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub connection: ConnectionConfig,
    pub discovery: DiscoveryConfig,
    pub cloudprnt: CloudPrntConfig,
    pub encoding: EncodingConfig,
    /// Printers registered at startup.
    pub printers: Vec<PrinterRegistration>,
}

/// Direct-transport connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub send_timeout: Duration,
    /// Reconnect dropped devices in the background.
    pub auto_reconnect: bool,
    pub backoff: BackoffConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Capped exponential backoff applied to every reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Automatic attempts before waiting for a caller to retry.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 6,
        }
    }
}

/// Scan settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub network_port: u16,
    /// Per-host TCP connect timeout.
    #[serde(with = "duration_ms")]
    pub probe_timeout: Duration,
    /// Wait for a status byte after a probe request.
    #[serde(with = "duration_ms")]
    pub capability_probe_timeout: Duration,
    pub max_parallel_probes: usize,
    #[serde(with = "duration_ms")]
    pub network_scan_budget: Duration,
    #[serde(with = "duration_ms")]
    pub bluetooth_scan_budget: Duration,
    /// CIDR to scan, e.g. `192.168.1.0/24`. Derived from the local address
    /// when absent.
    pub subnet: Option<String>,
    pub mdns_enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            network_port: DEFAULT_NETWORK_PORT,
            probe_timeout: Duration::from_millis(500),
            capability_probe_timeout: Duration::from_millis(300),
            max_parallel_probes: 64,
            network_scan_budget: Duration::from_secs(30),
            bluetooth_scan_budget: Duration::from_secs(30),
            subnet: None,
            mdns_enabled: true,
        }
    }
}

/// How a CloudPRNT printer confirms a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckConvention {
    /// The printer sends `DELETE` with a result code.
    #[default]
    ExplicitDelete,
    /// The next poll from the same printer confirms the delivered job.
    NextPoll,
}

/// CloudPRNT endpoint and queue retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudPrntConfig {
    pub listen_addr: SocketAddr,
    #[serde(with = "duration_ms")]
    pub retention: Duration,
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
    pub ack_convention: AckConvention,
}

impl Default for CloudPrntConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(60),
            ack_convention: AckConvention::ExplicitDelete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Byte written for characters the code page cannot represent.
    pub fallback_byte: u8,
    /// Columns at normal size when the device does not report a width.
    pub default_columns: u16,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            fallback_byte: b'?',
            default_columns: 48,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is
    /// an error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| KuittiError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.connection;
        let d = &self.discovery;
        let q = &self.cloudprnt;
        let nonzero = [
            ("connection.connect_timeout", c.connect_timeout),
            ("connection.send_timeout", c.send_timeout),
            ("connection.backoff.base_delay", c.backoff.base_delay),
            ("discovery.probe_timeout", d.probe_timeout),
            ("discovery.network_scan_budget", d.network_scan_budget),
            ("discovery.bluetooth_scan_budget", d.bluetooth_scan_budget),
            ("cloudprnt.retention", q.retention),
            ("cloudprnt.sweep_interval", q.sweep_interval),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, d)| d.is_zero()) {
            return Err(KuittiError::InvalidConfig(format!("{name} must be greater than zero")));
        }
        if c.backoff.base_delay > c.backoff.max_delay {
            return Err(KuittiError::InvalidConfig(
                "connection.backoff.base_delay exceeds max_delay".into(),
            ));
        }
        if d.max_parallel_probes == 0 {
            return Err(KuittiError::InvalidConfig(
                "discovery.max_parallel_probes must be at least 1".into(),
            ));
        }
        if self.encoding.default_columns == 0 {
            return Err(KuittiError::InvalidConfig(
                "encoding.default_columns must be at least 1".into(),
            ));
        }
        for (index, printer) in self.printers.iter().enumerate() {
            printer
                .validate()
                .map_err(|e| KuittiError::InvalidConfig(format!("printers[{index}]: {e}")))?;
        }
        Ok(())
    }
}

/// Serde adapter writing a `Duration` as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
