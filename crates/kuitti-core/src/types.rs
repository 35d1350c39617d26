// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Kuitti receipt printer subsystem.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KuittiError, Result};

/// Default raw TCP port for network receipt printers.
pub const DEFAULT_NETWORK_PORT: u16 = 9100;

/// Unique identifier for a CloudPRNT print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = KuittiError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| KuittiError::InvalidJobToken(format!("{s}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Printer identity
// ---------------------------------------------------------------------------

/// How a printer is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// RFCOMM socket to a paired Bluetooth printer.
    Bluetooth,
    /// Raw TCP socket, usually port 9100.
    Network,
    /// The printer polls us over HTTP.
    #[serde(rename = "cloudprnt")]
    CloudPrnt,
}

impl Transport {
    /// Whether this transport holds a live socket owned by the connection
    /// manager. CloudPRNT printers never do.
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Bluetooth | Self::Network)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bluetooth => "bluetooth",
            Self::Network => "network",
            Self::CloudPrnt => "cloudprnt",
        })
    }
}

/// Printer command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    #[serde(rename = "escpos")]
    EscPos,
    #[serde(rename = "star-line")]
    StarLine,
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EscPos => "escpos",
            Self::StarLine => "star-line",
        })
    }
}

impl FromStr for ProtocolFamily {
    type Err = KuittiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "escpos" | "esc/pos" | "esc-pos" => Ok(Self::EscPos),
            "star-line" | "starline" | "star" => Ok(Self::StarLine),
            other => Err(KuittiError::InvalidConfig(format!(
                "unknown protocol family: {other}"
            ))),
        }
    }
}

/// Character code page a printer is configured for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodePage {
    /// PC437, US. The power-on default of most printers.
    #[default]
    #[serde(rename = "cp437")]
    Cp437,
    /// PC850, Multilingual Latin-1.
    #[serde(rename = "cp850")]
    Cp850,
    /// PC858, PC850 with the euro sign at 0xD5.
    #[serde(rename = "cp858")]
    Cp858,
    /// PC865, Nordic.
    #[serde(rename = "cp865")]
    Cp865,
    /// Windows-1252, Latin-1 compatible.
    #[serde(rename = "windows-1252")]
    Windows1252,
}

impl CodePage {
    pub const ALL: [CodePage; 5] = [
        Self::Cp437,
        Self::Cp850,
        Self::Cp858,
        Self::Cp865,
        Self::Windows1252,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cp437 => "cp437",
            Self::Cp850 => "cp850",
            Self::Cp858 => "cp858",
            Self::Cp865 => "cp865",
            Self::Windows1252 => "windows-1252",
        }
    }
}

impl fmt::Display for CodePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodePage {
    type Err = KuittiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cp437" | "pc437" | "437" => Ok(Self::Cp437),
            "cp850" | "pc850" | "850" => Ok(Self::Cp850),
            "cp858" | "pc858" | "858" => Ok(Self::Cp858),
            "cp865" | "pc865" | "865" | "nordic" => Ok(Self::Cp865),
            "windows-1252" | "cp1252" | "wpc1252" | "latin1" => Ok(Self::Windows1252),
            other => Err(KuittiError::InvalidConfig(format!("unknown code page: {other}"))),
        }
    }
}

/// Connection state of a printer. Written only by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Unknown,
    Discovered,
    Connecting,
    Connected,
    Printing,
    Error,
    Offline,
}

impl ConnectionState {
    /// States from which a send can go out without reconnecting first.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Printing)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Printing => "printing",
            Self::Error => "error",
            Self::Offline => "offline",
        })
    }
}

/// How sure discovery is that an endpoint is a receipt printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Something accepted a connection, nothing more.
    Low,
    /// A naming or service advertisement hint.
    Medium,
    /// The device answered a printer status request or advertises a
    /// printer device class.
    High,
}

/// Discovery metadata attached to a printer record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub confidence: Option<Confidence>,
    /// `network`, `bluetooth`, `mdns` or `manual`.
    pub discovered_by: Option<String>,
    /// Command set the device answered to during probing.
    pub protocol_hint: Option<ProtocolFamily>,
    pub model: Option<String>,
    pub name: Option<String>,
    /// Printable columns at normal size.
    pub line_width: Option<u16>,
    pub extra: BTreeMap<String, String>,
}

impl Capabilities {
    /// Merge a newer observation into this one.
    ///
    /// Fields present in `newer` replace ours, absent ones keep their old
    /// value, and confidence never goes down.
    pub fn merge(&mut self, newer: Capabilities) {
        self.confidence = match (self.confidence, newer.confidence) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => b.or(a),
        };
        if newer.discovered_by.is_some() {
            self.discovered_by = newer.discovered_by;
        }
        if newer.protocol_hint.is_some() {
            self.protocol_hint = newer.protocol_hint;
        }
        if newer.model.is_some() {
            self.model = newer.model;
        }
        if newer.name.is_some() {
            self.name = newer.name;
        }
        if newer.line_width.is_some() {
            self.line_width = newer.line_width;
        }
        self.extra.extend(newer.extra);
    }
}

/// A receipt printer known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterDevice {
    pub id: String,
    pub transport: Transport,
    /// Bluetooth MAC, IP address or hostname.
    pub address: String,
    /// TCP port for network printers, absent otherwise.
    pub port: Option<u16>,
    pub protocol_family: ProtocolFamily,
    pub code_page: CodePage,
    pub connection_state: ConnectionState,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub capabilities: Capabilities,
}

impl PrinterDevice {
    /// Build a record with normalised address and default port.
    pub fn new(
        id: impl Into<String>,
        transport: Transport,
        address: &str,
        protocol_family: ProtocolFamily,
    ) -> Self {
        let port = match transport {
            Transport::Network => Some(DEFAULT_NETWORK_PORT),
            _ => None,
        };
        Self {
            id: id.into(),
            transport,
            address: normalize_address(address),
            port,
            protocol_family,
            code_page: CodePage::default(),
            connection_state: ConnectionState::Unknown,
            last_seen_at: None,
            capabilities: Capabilities::default(),
        }
    }

    /// `host:port` for network printers, the bare address otherwise.
    pub fn endpoint(&self) -> String {
        match (self.transport, self.port) {
            (Transport::Network, Some(port)) => format!("{}:{port}", self.address),
            (Transport::Network, None) => format!("{}:{DEFAULT_NETWORK_PORT}", self.address),
            _ => self.address.clone(),
        }
    }
}

/// Operator-entered printer details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterRegistration {
    /// Explicit id. Defaults to the normalised address.
    #[serde(default)]
    pub id: Option<String>,
    pub transport: Transport,
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub protocol_family: ProtocolFamily,
    #[serde(default)]
    pub code_page: CodePage,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub line_width: Option<u16>,
}

impl PrinterRegistration {
    pub fn network(address: &str, port: u16, protocol_family: ProtocolFamily) -> Self {
        Self {
            id: None,
            transport: Transport::Network,
            address: address.to_owned(),
            port: Some(port),
            protocol_family,
            code_page: CodePage::default(),
            name: None,
            line_width: None,
        }
    }

    pub fn bluetooth(mac: &str, protocol_family: ProtocolFamily) -> Self {
        Self {
            transport: Transport::Bluetooth,
            port: None,
            ..Self::network(mac, DEFAULT_NETWORK_PORT, protocol_family)
        }
    }

    /// CloudPRNT printers are keyed by their MAC.
    pub fn cloudprnt(mac: &str, protocol_family: ProtocolFamily) -> Self {
        Self {
            transport: Transport::CloudPrnt,
            port: None,
            ..Self::network(mac, DEFAULT_NETWORK_PORT, protocol_family)
        }
    }

    pub fn with_code_page(mut self, code_page: CodePage) -> Self {
        self.code_page = code_page;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(KuittiError::InvalidConfig("printer address is empty".into()));
        }
        if self.transport == Transport::Network && self.port == Some(0) {
            return Err(KuittiError::InvalidConfig("printer port 0 is not valid".into()));
        }
        if matches!(self.transport, Transport::Bluetooth | Transport::CloudPrnt)
            && !is_mac_address(&self.address)
        {
            return Err(KuittiError::InvalidConfig(format!(
                "{} printers need a MAC address, got {}",
                self.transport, self.address
            )));
        }
        Ok(())
    }
}

/// Normalise an address for catalog keys and comparisons.
///
/// MAC addresses (with `:`, `-` or no separators) become upper-case and
/// colon separated. Anything else is trimmed and lower-cased.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    match mac_digits(trimmed) {
        Some(digits) => digits
            .chunks(2)
            .map(|pair| pair.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(":"),
        None => trimmed.to_ascii_lowercase(),
    }
}

/// Whether `address` parses as a 48-bit MAC address.
pub fn is_mac_address(address: &str) -> bool {
    mac_digits(address.trim()).is_some()
}

fn mac_digits(s: &str) -> Option<Vec<char>> {
    let digits: Vec<char> = s
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let separators = s.chars().filter(|c| *c == ':' || *c == '-').count();
    let valid = digits.len() == 12
        && digits.iter().all(|c| c.is_ascii_hexdigit())
        && (separators == 0 || separators == 5);
    valid.then_some(digits)
}

// ---------------------------------------------------------------------------
// CloudPRNT jobs
// ---------------------------------------------------------------------------

/// Lifecycle states of a CloudPRNT job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the printer to poll.
    Queued,
    /// Handed to the printer, completion not yet confirmed.
    Delivered,
    /// The printer confirmed it printed the job.
    Completed,
    /// The printer reported a failure.
    Failed,
    /// Aged out before completion.
    Expired,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        })
    }
}

/// A unit of work in the CloudPRNT queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: JobId,
    /// Normalised MAC of the polling printer.
    pub printer_id: String,
    pub payload: Vec<u8>,
    /// Content type served to the printer with the payload.
    pub media_type: String,
    /// SHA-256 of the payload, hex encoded.
    pub payload_sha256: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl PrintJob {
    pub fn new(
        printer_id: &str,
        payload: Vec<u8>,
        media_type: &str,
        payload_sha256: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            printer_id: normalize_address(printer_id),
            payload,
            media_type: media_type.to_owned(),
            payload_sha256,
            status: JobStatus::Queued,
            created_at,
            delivered_at: None,
            finished_at: None,
            expires_at,
            error: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, zero when already past.
    pub fn remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        (self.expires_at - now).max(ChronoDuration::zero())
    }
}

// ---------------------------------------------------------------------------
// Errors and servers
// ---------------------------------------------------------------------------

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blip, timeout, busy printer. Safe to retry automatically.
    Transient,
    /// Someone has to act first (power the printer on, pair it, fix config).
    UserAction,
    /// Retrying will not help.
    Permanent,
}

/// Lifecycle of the embedded CloudPRNT HTTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_addresses_normalise_to_upper_colon_form() {
        assert_eq!(normalize_address("aa:bb:cc:dd:ee:ff"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_address("aa-bb-cc-dd-ee-ff"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_address(" aabbccddeeff "), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn hostnames_and_ips_are_lowercased() {
        assert_eq!(normalize_address("Printer.LOCAL"), "printer.local");
        assert_eq!(normalize_address("192.168.1.50"), "192.168.1.50");
        // Twelve hex digits with the wrong separator count is not a MAC.
        assert_eq!(normalize_address("aa:bbccddeeff"), "aa:bbccddeeff");
    }

    #[test]
    fn capability_merge_keeps_old_fields_and_never_lowers_confidence() {
        let mut caps = Capabilities {
            confidence: Some(Confidence::High),
            model: Some("TSP143".into()),
            ..Default::default()
        };
        caps.merge(Capabilities {
            confidence: Some(Confidence::Low),
            name: Some("Kitchen".into()),
            ..Default::default()
        });
        assert_eq!(caps.confidence, Some(Confidence::High));
        assert_eq!(caps.model.as_deref(), Some("TSP143"));
        assert_eq!(caps.name.as_deref(), Some("Kitchen"));
    }

    #[test]
    fn network_device_defaults_to_port_9100() {
        let dev = PrinterDevice::new("p1", Transport::Network, "10.0.0.5", ProtocolFamily::EscPos);
        assert_eq!(dev.port, Some(9100));
        assert_eq!(dev.endpoint(), "10.0.0.5:9100");
        let bt = PrinterDevice::new("p2", Transport::Bluetooth, "00:11:22:33:44:55", ProtocolFamily::StarLine);
        assert_eq!(bt.port, None);
    }

    #[test]
    fn cloudprnt_registration_requires_mac() {
        let bad = PrinterRegistration::cloudprnt("printer.local", ProtocolFamily::StarLine);
        assert!(bad.validate().is_err());
        let good = PrinterRegistration::cloudprnt("AA:BB:CC:DD:EE:FF", ProtocolFamily::StarLine);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn enums_use_wire_names() {
        let json = serde_json::to_string(&ProtocolFamily::StarLine).expect("serialize");
        assert_eq!(json, "\"star-line\"");
        let json = serde_json::to_string(&Transport::CloudPrnt).expect("serialize");
        assert_eq!(json, "\"cloudprnt\"");
        assert_eq!("windows-1252".parse::<CodePage>().expect("parse"), CodePage::Windows1252);
        assert_eq!(CodePage::Cp865.to_string(), "cp865");
    }

    #[test]
    fn job_expiry_is_inclusive() {
        let now = Utc::now();
        let job = PrintJob::new("aa:bb:cc:dd:ee:ff", vec![1], "application/vnd.star.line", String::new(), now, now);
        assert!(job.is_expired_at(now));
        assert_eq!(job.printer_id, "AA:BB:CC:DD:EE:FF");
        assert_eq!(job.remaining(now), ChronoDuration::zero());
    }
}
