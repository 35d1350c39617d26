// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end printing scenarios across the catalog, encoder, connection
// manager, CloudPRNT queue and discovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use chrono::{TimeZone, Utc};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceExt;

use kuitti_bridge::stub::StubBridge;
use kuitti_core::config::{AckConvention, ServiceConfig};
use kuitti_core::document::{Align, ReceiptDocument, TextBlock};
use kuitti_core::error::Result;
use kuitti_core::types::{
    Capabilities, Confidence, ConnectionState, JobStatus, PrinterDevice, PrinterRegistration, ProtocolFamily,
    Transport,
};
use kuitti_print::catalog::{DeviceCatalog, Observation};
use kuitti_print::cloudprnt_server::router;
use kuitti_print::transport::TcpConnector;
use kuitti_print::{Connector, PrintResult, PrinterLink, PrinterService};

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const CUT: [u8; 4] = [GS, b'V', 66, 3];

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn position(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap_or_else(|| panic!("{needle:02X?} not found"))
}

/// Reaches any printer by dialling a loopback fake instead.
struct Loopback {
    port: u16,
}

#[async_trait]
impl Connector for Loopback {
    async fn connect(&self, device: &PrinterDevice, timeout: Duration) -> Result<Box<dyn PrinterLink>> {
        let mut local = device.clone();
        local.address = "127.0.0.1".into();
        local.port = Some(self.port);
        TcpConnector.connect(&local, timeout).await
    }
}

/// Fake printer that reports everything received up to the first cut.
async fn fake_printer() -> (u16, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.expect("accept");
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        while !received.ends_with(&CUT) {
            match sock.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
            }
        }
        let _ = tx.send(received);
    });
    (port, rx)
}

fn hello() -> ReceiptDocument {
    ReceiptDocument::builder()
        .text(TextBlock::new("HELLO").emphasized().aligned(Align::Center))
        .cut()
        .build()
        .expect("document")
}

#[tokio::test]
async fn direct_transport_prints_hello() {
    let (port, received) = fake_printer().await;
    let svc = PrinterService::with_parts(
        ServiceConfig::default(),
        Arc::new(StubBridge),
        Arc::new(Loopback { port }),
    )
    .expect("service");

    let printer = svc
        .register_printer(PrinterRegistration::network("10.0.0.5", 9100, ProtocolFamily::EscPos))
        .expect("register");
    assert_eq!(printer.endpoint(), "10.0.0.5:9100");
    let mut events = svc.subscribe();

    let result = svc.print("10.0.0.5", &hello()).await;
    let PrintResult::Printed { ack, .. } = &result else {
        panic!("expected Printed, got {result:?}");
    };
    assert!(result.is_success());
    assert_eq!(result.job_id(), None);

    let bytes = received.await.expect("printer received data");
    assert_eq!(ack.bytes, bytes.len());
    let init = position(&bytes, &[ESC, b'@']);
    let bold = position(&bytes, &[ESC, b'E', 1]);
    let text = position(&bytes, b"HELLO");
    let cut = position(&bytes, &CUT);
    assert!(init < bold && bold < text && text < cut);
    assert!(contains(&bytes, &[ESC, b'a', 1]));

    // discovered -> connecting -> connected -> printing -> connected
    let mut seen = Vec::new();
    while let Ok(kuitti_print::DeviceEvent::StateChanged { to, .. }) = events.try_recv() {
        seen.push(to);
    }
    assert_eq!(
        seen,
        [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Printing,
            ConnectionState::Connected
        ]
    );
    assert_eq!(svc.list_printers()[0].connection_state, ConnectionState::Connected);
    svc.shutdown().await;
}

#[tokio::test]
async fn poll_transport_queues_and_delivers_once() {
    let svc = PrinterService::new(ServiceConfig::default()).expect("service");
    svc.register_printer(PrinterRegistration::cloudprnt("AA:BB:CC:DD:EE:FF", ProtocolFamily::StarLine))
        .expect("register");

    let result = svc.print("AA:BB:CC:DD:EE:FF", &hello()).await;
    let job_id = result.job_id().expect("accepted, not printed");
    assert!(matches!(result, PrintResult::Accepted { .. }));
    assert_eq!(svc.delivery_status(job_id).expect("status"), JobStatus::Queued);

    let job = svc.queue().poll("AA:BB:CC:DD:EE:FF").expect("exactly that job");
    assert_eq!(job.id, job_id);
    assert_eq!(job.status, JobStatus::Delivered);
    assert!(svc.queue().poll("AA:BB:CC:DD:EE:FF").is_none());

    svc.queue().acknowledge(job_id).expect("ack");
    svc.queue().acknowledge(job_id).expect("second ack is a no-op");
    assert_eq!(svc.delivery_status(job_id).expect("status"), JobStatus::Completed);
}

#[tokio::test]
async fn poll_transport_over_http() {
    let svc = PrinterService::new(ServiceConfig::default()).expect("service");
    svc.register_printer(PrinterRegistration::cloudprnt("AA:BB:CC:DD:EE:FF", ProtocolFamily::StarLine))
        .expect("register");
    let job_id = svc.print("AA:BB:CC:DD:EE:FF", &hello()).await.job_id().expect("accepted");
    let app = router(Arc::clone(svc.dispatcher()), AckConvention::ExplicitDelete);

    let poll = Request::builder()
        .method(Method::POST)
        .uri("/cloudprnt")
        .body(Body::from(r#"{"printerMAC":"aa:bb:cc:dd:ee:ff","status":"23 6 0 0 0 0 0 0 0"}"#))
        .expect("request");
    let response = app.clone().oneshot(poll).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let offer: serde_json::Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.expect("body")).expect("json");
    assert_eq!(offer["jobToken"], job_id.to_string());

    let fetch = Request::builder()
        .uri(format!("/cloudprnt/AA:BB:CC:DD:EE:FF/{job_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(fetch).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/vnd.star.line");
    let payload = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    assert!(contains(&payload, b"HELLO"));

    let confirm = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/cloudprnt?mac=AA:BB:CC:DD:EE:FF&token={job_id}&code=success"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(confirm).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(svc.delivery_status(job_id).expect("status"), JobStatus::Completed);
}

#[test]
fn discovery_dedup_keeps_one_record_with_latest_sighting() {
    let catalog = DeviceCatalog::new();
    let candidate = || {
        let mut device = PrinterDevice::new("192.168.1.50", Transport::Network, "192.168.1.50", ProtocolFamily::EscPos);
        device.capabilities = Capabilities {
            confidence: Some(Confidence::Low),
            discovered_by: Some("network".into()),
            ..Capabilities::default()
        };
        device
    };
    let first = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("time");
    let second = Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).single().expect("time");

    let (_, observation) = catalog.observe(candidate(), first);
    assert_eq!(observation, Observation::Inserted);
    let (device, observation) = catalog.observe(candidate(), second);
    assert_eq!(observation, Observation::Updated);

    assert_eq!(catalog.len(), 1);
    assert_eq!(device.last_seen_at, Some(second));
    assert_eq!(catalog.get("192.168.1.50").expect("record").last_seen_at, Some(second));
}

#[tokio::test]
async fn two_network_scans_of_one_printer_make_one_record() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        // Keep accepting; a silent printer is still a candidate.
        let mut open = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            open.push(sock);
        }
    });

    let mut config = ServiceConfig::default();
    config.discovery.subnet = Some("127.0.0.1/32".into());
    config.discovery.network_port = port;
    config.discovery.mdns_enabled = false;
    config.discovery.capability_probe_timeout = Duration::from_millis(50);
    let svc = PrinterService::new(config).expect("service");

    let first = svc.scan_network().collect().await.expect("first pass");
    assert_eq!(first.len(), 1);
    let first_seen = first[0].last_seen_at.expect("seen");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = svc.scan_network().collect().await.expect("second pass");
    assert_eq!(second.len(), 1);

    let printers = svc.list_printers();
    assert_eq!(printers.len(), 1);
    assert_eq!(printers[0].address, "127.0.0.1");
    assert_eq!(printers[0].port, Some(port));
    assert!(printers[0].last_seen_at.expect("seen") > first_seen);
    assert_eq!(printers[0].capabilities.confidence, Some(Confidence::Low));
}

#[tokio::test]
async fn unmappable_character_prints_as_fallback() {
    let svc = PrinterService::new(ServiceConfig::default()).expect("service");
    let printer = svc
        .register_printer(PrinterRegistration::network("10.0.0.5", 9100, ProtocolFamily::EscPos))
        .expect("register");
    let doc = ReceiptDocument::builder()
        .text(TextBlock::new("A€B"))
        .build()
        .expect("document");

    // Code page 437 has no euro sign.
    let bytes = svc.dispatcher().encode(&printer, &doc).expect("encoding still succeeds");
    assert!(contains(&bytes, b"A?B"));
}
