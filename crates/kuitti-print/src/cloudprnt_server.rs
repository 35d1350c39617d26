// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded CloudPRNT endpoint.
//
// Printers behind NAT or firewalls poll this server over HTTP:
//
//   POST   /cloudprnt[/{mac}]          "anything for me?"
//   GET    /cloudprnt[/{mac}/{token}]  fetch the job payload
//   DELETE /cloudprnt[/{mac}/{token}]  report the print result
//
// plus management routes under /cloudprnt-api: two read-only views and a
// submit route through which clients queue a receipt document. All job
// state lives in the shared `CloudPrntQueue`; the handlers only translate
// HTTP to dispatcher and queue calls, and errors to status codes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use kuitti_core::config::{AckConvention, CloudPrntConfig};
use kuitti_core::document::ReceiptDocument;
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{JobId, ProtocolFamily, ServerStatus, is_mac_address, normalize_address};

use crate::dispatcher::PrintDispatcher;
use crate::queue::CloudPrntQueue;

// ---------------------------------------------------------------------------
// Request shapes
// ---------------------------------------------------------------------------

/// Status document a printer posts with each poll. Only the fields used to
/// identify the printer are read; the rest is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PollBody {
    #[serde(rename = "printerMAC")]
    printer_mac: Option<String>,
    mac: Option<String>,
    #[serde(rename = "macAddress")]
    mac_address: Option<String>,
    #[serde(rename = "printerModel")]
    printer_model: Option<String>,
    model: Option<String>,
}

impl PollBody {
    fn mac(&self) -> Option<&str> {
        self.printer_mac
            .as_deref()
            .or(self.mac.as_deref())
            .or(self.mac_address.as_deref())
    }

    fn model(&self) -> Option<String> {
        self.printer_model.clone().or_else(|| self.model.clone())
    }
}

/// Query string of the bare GET/DELETE routes.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobQuery {
    mac: Option<String>,
    token: Option<String>,
    #[serde(rename = "jobToken")]
    job_token: Option<String>,
    code: Option<String>,
}

impl JobQuery {
    fn token(&self) -> Option<&str> {
        self.token.as_deref().or(self.job_token.as_deref())
    }
}

/// A receipt a client wants printed on a CloudPRNT printer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
    /// Catalog id or MAC address.
    #[serde(alias = "printerId", alias = "printerMac")]
    printer: String,
    /// Only used for printers missing from the catalog.
    #[serde(default)]
    protocol_family: Option<ProtocolFamily>,
    document: ReceiptDocument,
}

/// Query string of the path-style DELETE route.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CodeQuery {
    code: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Queue errors as HTTP responses.
struct ApiError(KuittiError);

impl From<KuittiError> for ApiError {
    fn from(err: KuittiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KuittiError::UnknownJob(_) | KuittiError::UnknownPrinter(_) => StatusCode::NOT_FOUND,
            KuittiError::JobNotDelivered { .. } => StatusCode::CONFLICT,
            KuittiError::JobExpired(_) => StatusCode::GONE,
            KuittiError::InvalidJobToken(_) | KuittiError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            KuittiError::EncodingUnsupportedNode { .. } | KuittiError::InvalidDocument(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "CloudPRNT request failed");
        } else {
            debug!(error = %self.0, status = status.as_u16(), "CloudPRNT request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Normalised MAC, or `None` when `raw` is not one.
fn parse_mac(raw: Option<&str>) -> Option<String> {
    raw.filter(|m| is_mac_address(m)).map(normalize_address)
}

/// Result codes that count as printed: none at all, `success`, `OK`, or any
/// 2xx status.
fn is_success_code(code: Option<&str>) -> bool {
    match code.map(str::trim) {
        None | Some("") => true,
        Some(c) => c.eq_ignore_ascii_case("success") || c.eq_ignore_ascii_case("ok") || c.starts_with('2'),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<PrintDispatcher>,
    queue: Arc<CloudPrntQueue>,
    ack_convention: AckConvention,
}

async fn poll_bare(State(state): State<AppState>, body: Bytes) -> Response {
    handle_poll(&state, None, &body)
}

async fn poll_with_mac(State(state): State<AppState>, Path(mac): Path<String>, body: Bytes) -> Response {
    handle_poll(&state, Some(mac), &body)
}

fn handle_poll(state: &AppState, path_mac: Option<String>, body: &[u8]) -> Response {
    // Firmware sends JSON, but not always with a JSON content type.
    let status: PollBody = serde_json::from_slice(body).unwrap_or_default();
    let raw_mac = path_mac.as_deref().or(status.mac());
    let Some(mac) = parse_mac(raw_mac) else {
        return bad_request("printer MAC address required");
    };

    state.queue.record_poll(&mac, status.model(), Utc::now());

    if state.ack_convention == AckConvention::NextPoll {
        for job_id in state.queue.delivered_for(&mac) {
            if let Err(e) = state.queue.acknowledge(job_id) {
                warn!(job_id = %job_id, error = %e, "implicit acknowledge failed");
            }
        }
    }

    match state.queue.poll(&mac) {
        Some(job) => {
            debug!(printer_id = %mac, job_id = %job.id, "job offered");
            Json(json!({
                "jobReady": true,
                "mediaTypes": [job.media_type],
                "jobToken": job.id.to_string(),
                "deleteMethod": "DELETE",
            }))
            .into_response()
        }
        None => Json(json!({ "jobReady": false })).into_response(),
    }
}

async fn fetch_by_query(State(state): State<AppState>, Query(query): Query<JobQuery>) -> Response {
    let (Some(mac), Some(token)) = (parse_mac(query.mac.as_deref()), query.token()) else {
        return bad_request("mac and token are required");
    };
    respond(fetch_job(&state, &mac, token))
}

async fn fetch_by_path(State(state): State<AppState>, Path((mac, token)): Path<(String, String)>) -> Response {
    let Some(mac) = parse_mac(Some(&mac)) else {
        return bad_request("printer MAC address required");
    };
    respond(fetch_job(&state, &mac, &token))
}

fn fetch_job(state: &AppState, mac: &str, token: &str) -> std::result::Result<Response, ApiError> {
    let job_id: JobId = token.parse()?;
    let job = state.queue.delivered_job(job_id, mac)?;
    info!(printer_id = %mac, job_id = %job_id, bytes = job.payload.len(), "job payload served");
    Ok(([(header::CONTENT_TYPE, job.media_type)], job.payload).into_response())
}

async fn confirm_by_query(State(state): State<AppState>, Query(query): Query<JobQuery>) -> Response {
    let Some(token) = query.token() else {
        return bad_request("token is required");
    };
    let mac = parse_mac(query.mac.as_deref());
    respond(confirm_job(&state, mac.as_deref(), token, query.code.as_deref()))
}

async fn confirm_by_path(
    State(state): State<AppState>,
    Path((mac, token)): Path<(String, String)>,
    Query(query): Query<CodeQuery>,
) -> Response {
    let Some(mac) = parse_mac(Some(&mac)) else {
        return bad_request("printer MAC address required");
    };
    respond(confirm_job(&state, Some(&mac), &token, query.code.as_deref()))
}

fn confirm_job(
    state: &AppState,
    mac: Option<&str>,
    token: &str,
    code: Option<&str>,
) -> std::result::Result<Response, ApiError> {
    let job_id: JobId = token.parse()?;
    let owner = state.queue.owner(job_id).ok_or(KuittiError::UnknownJob(job_id))?;
    if mac.is_some_and(|m| m != owner) {
        return Err(KuittiError::UnknownJob(job_id).into());
    }

    let outcome = if is_success_code(code) {
        state.queue.acknowledge(job_id)
    } else {
        state.queue.fail(job_id, code.unwrap_or_default())
    };
    // Confirmation is idempotent for known jobs; a late or out-of-order
    // report is logged, not bounced back to the printer.
    if let Err(e) = outcome {
        warn!(job_id = %job_id, code = ?code, error = %e, "confirmation not applied");
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn queue_status(State(state): State<AppState>) -> Response {
    Json(state.queue.stats()).into_response()
}

async fn list_pollers(State(state): State<AppState>) -> Response {
    Json(state.queue.pollers()).into_response()
}

async fn submit_job(State(state): State<AppState>, Json(body): Json<SubmitBody>) -> Response {
    let submitted = state
        .dispatcher
        .submit(&body.printer, body.protocol_family, &body.document);
    match submitted {
        Ok((printer_id, job_id)) => Json(json!({
            "success": true,
            "printerId": printer_id,
            "jobToken": job_id.to_string(),
        }))
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

fn respond(result: std::result::Result<Response, ApiError>) -> Response {
    result.unwrap_or_else(IntoResponse::into_response)
}

/// Routes of the CloudPRNT endpoint. Jobs are queued and served through
/// `dispatcher`'s queue.
pub fn router(dispatcher: Arc<PrintDispatcher>, ack_convention: AckConvention) -> Router {
    let queue = Arc::clone(dispatcher.queue());
    Router::new()
        .route(
            "/cloudprnt",
            post(poll_bare).get(fetch_by_query).delete(confirm_by_query),
        )
        .route("/cloudprnt/{mac}", post(poll_with_mac))
        .route("/cloudprnt/{mac}/{token}", get(fetch_by_path).delete(confirm_by_path))
        .route("/cloudprnt-api/status", get(queue_status))
        .route("/cloudprnt-api/printers", get(list_pollers))
        .route("/cloudprnt-api/submit-job", post(submit_job))
        .with_state(AppState {
            dispatcher,
            queue,
            ack_convention,
        })
}

// ---------------------------------------------------------------------------
// CloudPrntServer
// ---------------------------------------------------------------------------

/// The CloudPRNT HTTP server and its lifecycle.
pub struct CloudPrntServer {
    config: CloudPrntConfig,
    dispatcher: Arc<PrintDispatcher>,
    status: ServerStatus,
    /// Signals a graceful shutdown to the serve task.
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl CloudPrntServer {
    /// Create a stopped server. Call [`start`](Self::start) to listen.
    pub fn new(config: CloudPrntConfig, dispatcher: Arc<PrintDispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            status: ServerStatus::Stopped,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            local_addr: None,
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Address actually bound, once started. Differs from the configured
    /// one when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and serve in a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or cannot be bound.
    pub async fn start(&mut self) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(addr = ?self.local_addr, "CloudPRNT server already running");
            return Ok(());
        }
        self.status = ServerStatus::Starting;

        let bind_addr = self.config.listen_addr;
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(KuittiError::CloudPrntServer(format!("bind {bind_addr}: {e}")));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| KuittiError::CloudPrntServer(format!("local address: {e}")))?;
        info!(addr = %local_addr, ack = ?self.config.ack_convention, "CloudPRNT server listening");

        let app = router(Arc::clone(&self.dispatcher), self.config.ack_convention);
        let shutdown = Arc::clone(&self.shutdown_signal);
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "CloudPRNT server stopped with an error");
            }
        });

        self.local_addr = Some(local_addr);
        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop accepting polls and wait for in-flight requests to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }
        info!(addr = ?self.local_addr, "stopping CloudPRNT server");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| KuittiError::CloudPrntServer(format!("task join: {e}")))?;
        }
        self.status = ServerStatus::Stopped;
        info!("CloudPRNT server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use kuitti_bridge::stub::StubBridge;
    use kuitti_core::config::{ConnectionConfig, EncodingConfig};
    use kuitti_core::types::PrinterRegistration;

    use crate::catalog::DeviceCatalog;
    use crate::connection::ConnectionManager;
    use crate::queue::MEDIA_STAR_LINE;
    use crate::transport::TransportConnector;

    const MAC: &str = "00:11:62:0A:BC:DE";

    fn dispatcher_over(queue: &Arc<CloudPrntQueue>, catalog: Arc<DeviceCatalog>) -> Arc<PrintDispatcher> {
        let connector = Arc::new(TransportConnector::new(Arc::new(StubBridge)));
        let manager = Arc::new(ConnectionManager::new(connector, ConnectionConfig::default()));
        Arc::new(PrintDispatcher::new(
            catalog,
            manager,
            Arc::clone(queue),
            EncodingConfig::default(),
        ))
    }

    fn app(queue: &Arc<CloudPrntQueue>, ack: AckConvention) -> Router {
        router(dispatcher_over(queue, Arc::new(DeviceCatalog::new())), ack)
    }

    async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, bytes)
    }

    fn json_of(bytes: &Bytes) -> serde_json::Value {
        serde_json::from_slice(bytes).expect("json body")
    }

    #[tokio::test]
    async fn poll_without_jobs_reports_not_ready() {
        let queue = Arc::new(CloudPrntQueue::default());
        let (status, body) = call(app(&queue, AckConvention::ExplicitDelete), Method::POST, "/cloudprnt", &format!(r#"{{"printerMAC":"{MAC}"}}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({ "jobReady": false }));
        assert_eq!(queue.pollers().len(), 1);
    }

    #[tokio::test]
    async fn poll_without_mac_is_rejected() {
        let queue = Arc::new(CloudPrntQueue::default());
        let (status, _) = call(app(&queue, AckConvention::ExplicitDelete), Method::POST, "/cloudprnt", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn full_poll_fetch_delete_cycle() {
        let queue = Arc::new(CloudPrntQueue::default());
        let id = queue.enqueue(MAC, b"\x1b@HELLO".to_vec(), MEDIA_STAR_LINE);
        let ack = AckConvention::ExplicitDelete;

        let (status, body) = call(app(&queue, ack), Method::POST, &format!("/cloudprnt/{MAC}"), r#"{"printerModel":"mC-Print3"}"#).await;
        assert_eq!(status, StatusCode::OK);
        let offer = json_of(&body);
        assert_eq!(offer["jobReady"], true);
        assert_eq!(offer["jobToken"], id.to_string());
        assert_eq!(offer["mediaTypes"][0], MEDIA_STAR_LINE);

        let (status, body) = call(app(&queue, ack), Method::GET, &format!("/cloudprnt?mac={MAC}&token={id}"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"\x1b@HELLO");

        let (status, _) = call(app(&queue, ack), Method::DELETE, &format!("/cloudprnt/{MAC}/{id}?code=200%20OK"), "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(queue.status(id).expect("status"), kuitti_core::types::JobStatus::Completed);

        // Repeat confirmation is still fine.
        let (status, _) = call(app(&queue, ack), Method::DELETE, &format!("/cloudprnt?mac={MAC}&token={id}"), "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(queue.pollers()[0].model.as_deref(), Some("mC-Print3"));
    }

    #[tokio::test]
    async fn error_code_marks_job_failed() {
        let queue = Arc::new(CloudPrntQueue::default());
        let id = queue.enqueue(MAC, b"x".to_vec(), MEDIA_STAR_LINE);
        queue.poll(MAC).expect("delivered");
        let (status, _) = call(app(&queue, AckConvention::ExplicitDelete), Method::DELETE, &format!("/cloudprnt?mac={MAC}&token={id}&code=520"), "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(queue.status(id).expect("status"), kuitti_core::types::JobStatus::Failed);
    }

    #[tokio::test]
    async fn fetch_maps_queue_errors_to_status_codes() {
        let queue = Arc::new(CloudPrntQueue::default());
        let queued = queue.enqueue(MAC, b"x".to_vec(), MEDIA_STAR_LINE);
        let ack = AckConvention::ExplicitDelete;

        let (status, _) = call(app(&queue, ack), Method::GET, &format!("/cloudprnt/{MAC}/{queued}"), "").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let unknown = JobId::new();
        let (status, _) = call(app(&queue, ack), Method::GET, &format!("/cloudprnt/{MAC}/{unknown}"), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(app(&queue, ack), Method::GET, &format!("/cloudprnt/{MAC}/not-a-token"), "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        queue.poll(MAC).expect("delivered");
        let (status, _) = call(app(&queue, ack), Method::GET, &format!("/cloudprnt/11:22:33:44:55:66/{queued}"), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn expired_job_is_gone() {
        let queue = Arc::new(CloudPrntQueue::default());
        let now = Utc::now();
        let id = queue.enqueue_with_expiry(MAC, b"x".to_vec(), MEDIA_STAR_LINE, now + chrono::Duration::seconds(5));
        queue.poll_at(MAC, now).expect("delivered");
        queue.sweep(now + chrono::Duration::seconds(6));
        let (status, _) = call(app(&queue, AckConvention::ExplicitDelete), Method::GET, &format!("/cloudprnt/{MAC}/{id}"), "").await;
        assert_eq!(status, StatusCode::GONE);
    }

    #[tokio::test]
    async fn next_poll_convention_acknowledges_the_previous_job() {
        let queue = Arc::new(CloudPrntQueue::default());
        let first = queue.enqueue(MAC, b"1".to_vec(), MEDIA_STAR_LINE);
        let ack = AckConvention::NextPoll;
        let body = format!(r#"{{"mac":"{MAC}"}}"#);

        call(app(&queue, ack), Method::POST, "/cloudprnt", &body).await;
        assert_eq!(queue.status(first).expect("status"), kuitti_core::types::JobStatus::Delivered);
        call(app(&queue, ack), Method::POST, "/cloudprnt", &body).await;
        assert_eq!(queue.status(first).expect("status"), kuitti_core::types::JobStatus::Completed);
    }

    #[tokio::test]
    async fn delete_of_unknown_job_is_not_found() {
        let queue = Arc::new(CloudPrntQueue::default());
        let (status, _) = call(app(&queue, AckConvention::ExplicitDelete), Method::DELETE, &format!("/cloudprnt?token={}", JobId::new()), "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn management_routes_report_queue_state() {
        let queue = Arc::new(CloudPrntQueue::default());
        queue.enqueue(MAC, b"1".to_vec(), MEDIA_STAR_LINE);
        queue.record_poll(MAC, None, Utc::now());

        let (status, body) = call(app(&queue, AckConvention::ExplicitDelete), Method::GET, "/cloudprnt-api/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["queued"], 1);

        let (_, body) = call(app(&queue, AckConvention::ExplicitDelete), Method::GET, "/cloudprnt-api/printers", "").await;
        assert_eq!(json_of(&body)[0]["printerId"], MAC);
        assert_eq!(json_of(&body)[0]["pending"], 1);
    }

    #[tokio::test]
    async fn submitted_document_is_queued_and_offered_to_the_printer() {
        let queue = Arc::new(CloudPrntQueue::default());
        let catalog = Arc::new(DeviceCatalog::new());
        catalog
            .register(PrinterRegistration::cloudprnt(MAC, ProtocolFamily::StarLine).with_id("bar"))
            .expect("register");
        let app = router(dispatcher_over(&queue, catalog), AckConvention::ExplicitDelete);
        let body = r#"{"printerId":"bar","document":[{"type":"text_block","content":"TABLE 4"},{"type":"cut_paper"}]}"#;

        let (status, reply) = call(app.clone(), Method::POST, "/cloudprnt-api/submit-job", body).await;
        assert_eq!(status, StatusCode::OK);
        let reply = json_of(&reply);
        assert_eq!(reply["success"], true);
        assert_eq!(reply["printerId"], "bar");
        let token = reply["jobToken"].as_str().expect("token").to_owned();

        let (_, offer) = call(app, Method::POST, &format!("/cloudprnt/{MAC}"), "{}").await;
        assert_eq!(json_of(&offer)["jobToken"], token);
        let job = queue.delivered_job(token.parse().expect("job id"), MAC).expect("delivered");
        assert!(job.payload.windows(7).any(|w| w == b"TABLE 4"));
    }

    #[tokio::test]
    async fn submit_accepts_an_uncatalogued_mac() {
        let queue = Arc::new(CloudPrntQueue::default());
        let body = r#"{"printerMac":"00-11-62-0a-bc-de","protocolFamily":"escpos","document":[{"type":"text_block","content":"HI"}]}"#;
        let (status, reply) = call(app(&queue, AckConvention::ExplicitDelete), Method::POST, "/cloudprnt-api/submit-job", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&reply)["printerId"], MAC);
        let job = queue.poll(MAC).expect("queued");
        assert_eq!(job.media_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn submit_rejects_unknown_printers_and_bad_documents() {
        let queue = Arc::new(CloudPrntQueue::default());
        let ack = AckConvention::ExplicitDelete;

        let unknown = r#"{"printer":"kitchen","document":[{"type":"cut_paper"}]}"#;
        let (status, _) = call(app(&queue, ack), Method::POST, "/cloudprnt-api/submit-job", unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let empty_qr = format!(r#"{{"printer":"{MAC}","document":[{{"type":"qr_code","payload":""}}]}}"#);
        let (status, _) = call(app(&queue, ack), Method::POST, "/cloudprnt-api/submit-job", &empty_qr).await;
        assert!(status.is_client_error());
        assert_eq!(queue.stats().queued, 0);
    }

    #[tokio::test]
    async fn server_binds_port_zero_and_stops() {
        let config = CloudPrntConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..CloudPrntConfig::default()
        };
        let queue = Arc::new(CloudPrntQueue::default());
        let dispatcher = dispatcher_over(&queue, Arc::new(DeviceCatalog::new()));
        let mut server = CloudPrntServer::new(config, dispatcher);
        server.start().await.expect("start");
        assert_eq!(server.status(), ServerStatus::Running);
        let addr = server.local_addr().expect("bound");
        assert_ne!(addr.port(), 0);

        tokio::net::TcpStream::connect(addr).await.expect("accepts connections");
        server.stop().await.expect("stop");
        assert_eq!(server.status(), ServerStatus::Stopped);
    }
}
