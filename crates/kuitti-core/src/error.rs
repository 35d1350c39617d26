// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Kuitti.

use thiserror::Error;

use crate::types::{ErrorClass, JobId, JobStatus, ProtocolFamily};

/// Top-level error type for all Kuitti operations.
#[derive(Debug, Error)]
pub enum KuittiError {
    // -- Discovery --
    /// The scan ran out of time. Devices found before that are already in
    /// the catalog.
    #[error("{strategy} scan exceeded its time budget after finding {found} printer(s)")]
    DiscoveryTimeout { strategy: String, found: usize },

    #[error("printer discovery failed: {0}")]
    Discovery(String),

    // -- Connection --
    #[error("device {printer_id} unreachable: {reason}")]
    ConnectionFailed { printer_id: String, reason: String },

    #[error("send to {printer_id} did not complete: {reason}")]
    SendFailed { printer_id: String, reason: String },

    #[error("bluetooth error: {0}")]
    Bluetooth(String),

    // -- Encoding --
    #[error("{family} cannot encode {node}: {reason}")]
    EncodingUnsupportedNode {
        family: ProtocolFamily,
        node: String,
        reason: String,
    },

    #[error("invalid receipt document: {0}")]
    InvalidDocument(String),

    // -- CloudPRNT queue --
    #[error("job {0} expired before the printer collected it")]
    JobExpired(JobId),

    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    #[error("invalid job token: {0}")]
    InvalidJobToken(String),

    #[error("job {job_id} is {status}, not delivered")]
    JobNotDelivered { job_id: JobId, status: JobStatus },

    #[error("CloudPRNT server error: {0}")]
    CloudPrntServer(String),

    // -- Catalog / configuration --
    #[error("unknown printer: {0}")]
    UnknownPrinter(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // -- Storage / platform --
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KuittiError>;

impl KuittiError {
    /// Whether retrying can help, and who has to act first.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ConnectionFailed { reason, .. } | Self::SendFailed { reason, .. } => {
                class_of_socket_error(reason)
            }
            Self::Bluetooth(detail) => class_of_socket_error(detail),
            Self::DiscoveryTimeout { .. } | Self::Discovery(_) | Self::CloudPrntServer(_) => {
                ErrorClass::Transient
            }
            Self::UnknownPrinter(_) | Self::InvalidConfig(_) => ErrorClass::UserAction,
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => ErrorClass::UserAction,
                _ => ErrorClass::Transient,
            },
            Self::EncodingUnsupportedNode { .. }
            | Self::InvalidDocument(_)
            | Self::JobExpired(_)
            | Self::UnknownJob(_)
            | Self::InvalidJobToken(_)
            | Self::JobNotDelivered { .. }
            | Self::PlatformUnavailable
            | Self::Serialization(_) => ErrorClass::Permanent,
        }
    }
}

/// Socket errors only come to us as text once they cross the bridge.
fn class_of_socket_error(detail: &str) -> ErrorClass {
    let lower = detail.to_ascii_lowercase();
    let needs_operator = ["permission denied", "operation not permitted", "not paired", "invalid bluetooth address"];
    let unreachable_for_good = [
        "no direct connection",
        "not available on this platform",
        "address family not supported",
    ];
    if needs_operator.iter().any(|s| lower.contains(s)) {
        ErrorClass::UserAction
    } else if unreachable_for_good.iter().any(|s| lower.contains(s)) {
        ErrorClass::Permanent
    } else {
        ErrorClass::Transient
    }
}
