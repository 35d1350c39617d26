// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CloudPRNT job queue.
//
// Printers that cannot accept inbound connections poll for work instead.
// Each printer has a FIFO of queued jobs; a poll hands out the oldest one
// and marks it delivered under the queue lock, so no job reaches two
// pollers. The retention window bounds memory: a periodic sweep expires and
// purges jobs past `expires_at`, keeping a small tombstone per purged job
// so late status queries still get a meaningful answer.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{JobId, JobStatus, PrintJob, ProtocolFamily, normalize_address};

/// Content type of Star Line Mode payloads.
pub const MEDIA_STAR_LINE: &str = "application/vnd.star.line";

/// Content type of ESC/POS payloads.
pub const MEDIA_OCTET_STREAM: &str = "application/octet-stream";

/// Default retention window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Media type a CloudPRNT printer is told to fetch for `family`.
pub fn media_type_for(family: ProtocolFamily) -> &'static str {
    match family {
        ProtocolFamily::StarLine => MEDIA_STAR_LINE,
        ProtocolFamily::EscPos => MEDIA_OCTET_STREAM,
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Jobs demoted from queued/delivered to expired.
    pub expired: usize,
    /// Jobs removed from the queue.
    pub purged: usize,
    /// Printers dropped from the poller list after a retention window of
    /// silence.
    pub idle_pollers: usize,
}

/// Job counts for the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub delivered: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
    /// Live (not yet purged) jobs per printer.
    pub per_printer: BTreeMap<String, usize>,
}

/// A printer that has polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerInfo {
    pub printer_id: String,
    pub last_poll: DateTime<Utc>,
    pub model: Option<String>,
    /// Jobs still waiting for this printer.
    pub pending: usize,
}

/// What remains of a purged job.
#[derive(Debug, Clone)]
struct Tombstone {
    printer_id: String,
    status: JobStatus,
    /// The tombstone itself is dropped after this.
    forget_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, PrintJob>,
    /// Queued job ids per printer, oldest first.
    fifo: HashMap<String, VecDeque<JobId>>,
    tombstones: HashMap<JobId, Tombstone>,
    pollers: BTreeMap<String, (DateTime<Utc>, Option<String>)>,
}

/// In-memory CloudPRNT queue, shared between the dispatcher, the HTTP
/// endpoint and the sweeper.
#[derive(Debug)]
pub struct CloudPrntQueue {
    state: Mutex<QueueState>,
    retention: ChronoDuration,
}

impl Default for CloudPrntQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl CloudPrntQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            retention: ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::hours(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job to `printer_id`'s FIFO. It expires one retention window
    /// from now.
    pub fn enqueue(&self, printer_id: &str, payload: Vec<u8>, media_type: &str) -> JobId {
        let now = Utc::now();
        self.enqueue_with_expiry(printer_id, payload, media_type, now + self.retention)
    }

    /// Like [`enqueue`](Self::enqueue) with an explicit expiry. A job whose
    /// expiry is not in the future is stored but never handed out.
    #[instrument(skip(self, payload, media_type), fields(bytes = payload.len()))]
    pub fn enqueue_with_expiry(
        &self,
        printer_id: &str,
        payload: Vec<u8>,
        media_type: &str,
        expires_at: DateTime<Utc>,
    ) -> JobId {
        let sha = hex::encode(Sha256::digest(&payload));
        let job = PrintJob::new(printer_id, payload, media_type, sha, Utc::now(), expires_at);
        let id = job.id;
        let printer_id = job.printer_id.clone();
        info!(
            job_id = %id,
            printer_id = %printer_id,
            bytes = job.payload.len(),
            sha256 = %&job.payload_sha256[..12],
            "job enqueued"
        );

        let mut state = self.lock();
        state.fifo.entry(printer_id).or_default().push_back(id);
        state.jobs.insert(id, job);
        id
    }

    /// Hand the oldest queued job of `printer_id` to the caller and mark it
    /// delivered. Never waits.
    pub fn poll(&self, printer_id: &str) -> Option<PrintJob> {
        self.poll_at(printer_id, Utc::now())
    }

    /// [`poll`](Self::poll) at an explicit instant.
    pub fn poll_at(&self, printer_id: &str, now: DateTime<Utc>) -> Option<PrintJob> {
        let printer_id = normalize_address(printer_id);
        let mut guard = self.lock();
        let state = &mut *guard;
        let fifo = state.fifo.get_mut(&printer_id)?;

        while let Some(id) = fifo.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Queued {
                continue;
            }
            if job.is_expired_at(now) {
                job.status = JobStatus::Expired;
                job.finished_at = Some(now);
                warn!(job_id = %id, printer_id = %printer_id, "job expired before the printer collected it");
                continue;
            }
            job.status = JobStatus::Delivered;
            job.delivered_at = Some(now);
            info!(job_id = %id, printer_id = %printer_id, "job delivered");
            return Some(job.clone());
        }
        None
    }

    /// Mark a delivered job completed and release its payload. Repeating
    /// the call is a no-op.
    #[instrument(skip(self))]
    pub fn acknowledge(&self, job_id: JobId) -> Result<()> {
        self.finish(job_id, JobStatus::Completed, None)
    }

    /// Mark a delivered job failed with the printer's reason. Repeating the
    /// call is a no-op.
    #[instrument(skip(self))]
    pub fn fail(&self, job_id: JobId, reason: &str) -> Result<()> {
        self.finish(job_id, JobStatus::Failed, Some(reason.to_owned()))
    }

    fn finish(&self, job_id: JobId, outcome: JobStatus, error: Option<String>) -> Result<()> {
        let now = Utc::now();
        let retention = self.retention;
        let mut state = self.lock();

        if let Some(tomb) = state.tombstones.get(&job_id) {
            return match tomb.status {
                JobStatus::Expired => Err(KuittiError::JobExpired(job_id)),
                _ => Ok(()),
            };
        }
        let job = state.jobs.get(&job_id).ok_or(KuittiError::UnknownJob(job_id))?;
        match job.status {
            JobStatus::Delivered => {}
            JobStatus::Expired => return Err(KuittiError::JobExpired(job_id)),
            status => {
                return Err(KuittiError::JobNotDelivered { job_id, status });
            }
        }

        if let Some(mut job) = state.jobs.remove(&job_id) {
            job.status = outcome;
            job.finished_at = Some(now);
            job.error = error;
            match outcome {
                JobStatus::Failed => {
                    warn!(job_id = %job_id, printer_id = %job.printer_id, reason = ?job.error, "printer reported failure");
                }
                _ => info!(job_id = %job_id, printer_id = %job.printer_id, "job completed"),
            }
            state.tombstones.insert(
                job_id,
                Tombstone {
                    printer_id: job.printer_id,
                    status: outcome,
                    forget_at: now + retention,
                },
            );
        }
        Ok(())
    }

    /// Current status. Expired jobs, live or purged, are `JobExpired`.
    pub fn status(&self, job_id: JobId) -> Result<JobStatus> {
        self.status_at(job_id, Utc::now())
    }

    pub fn status_at(&self, job_id: JobId, now: DateTime<Utc>) -> Result<JobStatus> {
        let state = self.lock();
        let status = match (state.jobs.get(&job_id), state.tombstones.get(&job_id)) {
            (Some(job), _) if !job.status.is_terminal() && job.is_expired_at(now) => JobStatus::Expired,
            (Some(job), _) => job.status,
            (None, Some(tomb)) => tomb.status,
            (None, None) => return Err(KuittiError::UnknownJob(job_id)),
        };
        match status {
            JobStatus::Expired => Err(KuittiError::JobExpired(job_id)),
            other => Ok(other),
        }
    }

    /// A delivered job's record for `printer_id`, as served to the printer.
    pub fn delivered_job(&self, job_id: JobId, printer_id: &str) -> Result<PrintJob> {
        let now = Utc::now();
        let printer_id = normalize_address(printer_id);
        let state = self.lock();

        let Some(job) = state.jobs.get(&job_id) else {
            return Err(match state.tombstones.get(&job_id) {
                Some(tomb) if tomb.printer_id == printer_id && tomb.status == JobStatus::Expired => {
                    KuittiError::JobExpired(job_id)
                }
                Some(tomb) if tomb.printer_id == printer_id => KuittiError::JobNotDelivered {
                    job_id,
                    status: tomb.status,
                },
                _ => KuittiError::UnknownJob(job_id),
            });
        };
        if job.printer_id != printer_id {
            return Err(KuittiError::UnknownJob(job_id));
        }
        if job.status == JobStatus::Expired || job.is_expired_at(now) {
            return Err(KuittiError::JobExpired(job_id));
        }
        if job.status != JobStatus::Delivered {
            return Err(KuittiError::JobNotDelivered {
                job_id,
                status: job.status,
            });
        }
        Ok(job.clone())
    }

    /// Printer a job belongs to, live or tombstoned.
    pub fn owner(&self, job_id: JobId) -> Option<String> {
        let state = self.lock();
        state
            .jobs
            .get(&job_id)
            .map(|j| j.printer_id.clone())
            .or_else(|| state.tombstones.get(&job_id).map(|t| t.printer_id.clone()))
    }

    /// Delivered, not yet acknowledged jobs of `printer_id`.
    pub fn delivered_for(&self, printer_id: &str) -> Vec<JobId> {
        let printer_id = normalize_address(printer_id);
        let state = self.lock();
        let mut jobs: Vec<&PrintJob> = state
            .jobs
            .values()
            .filter(|j| j.printer_id == printer_id && j.status == JobStatus::Delivered)
            .collect();
        jobs.sort_by_key(|j| j.delivered_at);
        jobs.into_iter().map(|j| j.id).collect()
    }

    /// Remember that `printer_id` polled, with the model it reported.
    pub fn record_poll(&self, printer_id: &str, model: Option<String>, at: DateTime<Utc>) {
        let printer_id = normalize_address(printer_id);
        let mut state = self.lock();
        let entry = state.pollers.entry(printer_id).or_insert((at, None));
        entry.0 = at;
        if model.is_some() {
            entry.1 = model;
        }
    }

    pub fn pollers(&self) -> Vec<PollerInfo> {
        let state = self.lock();
        state
            .pollers
            .iter()
            .map(|(id, (last_poll, model))| PollerInfo {
                printer_id: id.clone(),
                last_poll: *last_poll,
                model: model.clone(),
                pending: state.fifo.get(id).map_or(0, |ids| {
                    ids.iter()
                        .filter(|id| state.jobs.get(*id).is_some_and(|j| j.status == JobStatus::Queued))
                        .count()
                }),
            })
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let mut stats = QueueStats::default();
        let statuses = state
            .jobs
            .values()
            .map(|j| j.status)
            .chain(state.tombstones.values().map(|t| t.status));
        for status in statuses {
            match status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Delivered => stats.delivered += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Expired => stats.expired += 1,
            }
        }
        for job in state.jobs.values() {
            *stats.per_printer.entry(job.printer_id.clone()).or_default() += 1;
        }
        stats
    }

    /// Expire and purge every job past its expiry, and drop old tombstones.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = self.retention;
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut report = SweepReport::default();

        let due: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.is_expired_at(now))
            .map(|j| j.id)
            .collect();

        for id in due {
            let Some(mut job) = state.jobs.remove(&id) else {
                continue;
            };
            if matches!(job.status, JobStatus::Queued | JobStatus::Delivered) {
                warn!(
                    job_id = %id,
                    printer_id = %job.printer_id,
                    status = %job.status,
                    "job expired before completion"
                );
                job.status = JobStatus::Expired;
                report.expired += 1;
            }
            if let Some(fifo) = state.fifo.get_mut(&job.printer_id) {
                fifo.retain(|queued| *queued != id);
            }
            state.tombstones.insert(
                id,
                Tombstone {
                    printer_id: job.printer_id,
                    status: job.status,
                    forget_at: now + retention,
                },
            );
            report.purged += 1;
        }

        state.fifo.retain(|_, ids| !ids.is_empty());
        state.tombstones.retain(|_, t| t.forget_at > now);

        // Anyone can poll, so silent pollers must not pile up. A printer with
        // jobs still waiting stays listed.
        let pollers_before = state.pollers.len();
        let fifo = &state.fifo;
        state
            .pollers
            .retain(|id, (last_poll, _)| *last_poll + retention > now || fifo.contains_key(id));
        report.idle_pollers = pollers_before - state.pollers.len();
        if report.idle_pollers > 0 {
            debug!(count = report.idle_pollers, "idle pollers forgotten");
        }

        if report.purged > 0 {
            info!(expired = report.expired, purged = report.purged, "retention sweep");
        } else {
            debug!("retention sweep found nothing to purge");
        }
        report
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `token` is
    /// cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis(), "retention sweeper started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep(Utc::now());
                    }
                }
            }
            info!("retention sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn queue() -> CloudPrntQueue {
        CloudPrntQueue::new(DEFAULT_RETENTION)
    }

    #[test]
    fn poll_delivers_fifo_and_only_once() {
        let q = queue();
        let first = q.enqueue(MAC, b"one".to_vec(), MEDIA_STAR_LINE);
        let second = q.enqueue(MAC, b"two".to_vec(), MEDIA_STAR_LINE);

        let job = q.poll(MAC).expect("first job");
        assert_eq!(job.id, first);
        assert_eq!(job.status, JobStatus::Delivered);
        assert_eq!(q.poll(MAC).expect("second job").id, second);
        assert!(q.poll(MAC).is_none());
    }

    #[test]
    fn poll_only_returns_jobs_for_that_printer() {
        let q = queue();
        q.enqueue("11:22:33:44:55:66", b"other".to_vec(), MEDIA_STAR_LINE);
        assert!(q.poll(MAC).is_none());
        // Lower-case MACs name the same printer.
        let id = q.enqueue(MAC, b"mine".to_vec(), MEDIA_STAR_LINE);
        assert_eq!(q.poll("aa:bb:cc:dd:ee:ff").map(|j| j.id), Some(id));
    }

    #[test]
    fn concurrent_pollers_never_share_a_job() {
        let q = Arc::new(queue());
        for i in 0..200u32 {
            q.enqueue(MAC, i.to_be_bytes().to_vec(), MEDIA_OCTET_STREAM);
        }
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(job) = q.poll(MAC) {
                        got.push(job.id);
                    }
                    got
                })
            })
            .collect();
        let mut all: Vec<JobId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("poller thread"))
            .collect();
        assert_eq!(all.len(), 200);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
    }

    #[test]
    fn job_with_past_expiry_is_never_polled() {
        let q = queue();
        let id = q.enqueue_with_expiry(MAC, b"late".to_vec(), MEDIA_STAR_LINE, Utc::now() - ChronoDuration::seconds(1));
        assert!(q.poll(MAC).is_none());
        assert!(matches!(q.status(id), Err(KuittiError::JobExpired(_))));
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let q = queue();
        let id = q.enqueue(MAC, b"x".to_vec(), MEDIA_STAR_LINE);
        assert!(matches!(
            q.acknowledge(id),
            Err(KuittiError::JobNotDelivered { status: JobStatus::Queued, .. })
        ));
        q.poll(MAC).expect("job");
        q.acknowledge(id).expect("first ack");
        q.acknowledge(id).expect("second ack");
        assert_eq!(q.status(id).expect("status"), JobStatus::Completed);
        assert_eq!(q.stats().completed, 1);
    }

    #[test]
    fn fail_records_failure_once() {
        let q = queue();
        let id = q.enqueue(MAC, b"x".to_vec(), MEDIA_STAR_LINE);
        q.poll(MAC).expect("job");
        q.fail(id, "paper out").expect("fail");
        q.fail(id, "paper out").expect("fail again");
        assert_eq!(q.status(id).expect("status"), JobStatus::Failed);
        assert_eq!(q.stats().failed, 1);
    }

    #[test]
    fn unknown_job_is_reported() {
        let q = queue();
        let id = JobId::new();
        assert!(matches!(q.acknowledge(id), Err(KuittiError::UnknownJob(_))));
        assert!(matches!(q.status(id), Err(KuittiError::UnknownJob(_))));
    }

    #[test]
    fn sweep_expires_delivered_and_purges_everything_due() {
        let q = queue();
        let now = Utc::now();
        let delivered = q.enqueue_with_expiry(MAC, b"a".to_vec(), MEDIA_STAR_LINE, now + ChronoDuration::seconds(10));
        let queued = q.enqueue_with_expiry(MAC, b"b".to_vec(), MEDIA_STAR_LINE, now + ChronoDuration::seconds(10));
        let fresh = q.enqueue(MAC, b"c".to_vec(), MEDIA_STAR_LINE);
        assert_eq!(q.poll_at(MAC, now).map(|j| j.id), Some(delivered));

        let report = q.sweep(now + ChronoDuration::seconds(11));
        assert_eq!(
            report,
            SweepReport {
                expired: 2,
                purged: 2,
                idle_pollers: 0
            }
        );

        // Purged jobs are remembered as expired.
        assert!(matches!(q.status(delivered), Err(KuittiError::JobExpired(_))));
        assert!(matches!(q.status(queued), Err(KuittiError::JobExpired(_))));
        assert!(matches!(q.acknowledge(delivered), Err(KuittiError::JobExpired(_))));
        assert_eq!(q.status(fresh).expect("status"), JobStatus::Queued);
        assert_eq!(q.poll(MAC).map(|j| j.id), Some(fresh));
    }

    #[test]
    fn tombstones_are_forgotten_after_another_retention_window() {
        let q = CloudPrntQueue::new(Duration::from_secs(60));
        let now = Utc::now();
        let id = q.enqueue_with_expiry(MAC, b"a".to_vec(), MEDIA_STAR_LINE, now);
        q.sweep(now + ChronoDuration::seconds(1));
        assert!(matches!(q.status(id), Err(KuittiError::JobExpired(_))));
        q.sweep(now + ChronoDuration::seconds(120));
        assert!(matches!(q.status(id), Err(KuittiError::UnknownJob(_))));
    }

    #[test]
    fn delivered_job_checks_owner_and_state() {
        let q = queue();
        let id = q.enqueue(MAC, b"payload".to_vec(), MEDIA_STAR_LINE);
        assert!(matches!(
            q.delivered_job(id, MAC),
            Err(KuittiError::JobNotDelivered { .. })
        ));
        q.poll(MAC).expect("job");
        assert!(matches!(
            q.delivered_job(id, "11:22:33:44:55:66"),
            Err(KuittiError::UnknownJob(_))
        ));
        let job = q.delivered_job(id, MAC).expect("delivered");
        assert_eq!(job.payload, b"payload");
        assert_eq!(job.payload_sha256.len(), 64);
        assert_eq!(q.delivered_for(MAC), vec![id]);
    }

    #[test]
    fn pollers_report_model_and_pending_jobs() {
        let q = queue();
        q.enqueue(MAC, b"a".to_vec(), MEDIA_STAR_LINE);
        q.enqueue(MAC, b"b".to_vec(), MEDIA_STAR_LINE);
        q.record_poll(MAC, Some("mC-Print3".into()), Utc::now());
        q.record_poll(MAC, None, Utc::now());
        q.poll(MAC);

        let pollers = q.pollers();
        assert_eq!(pollers.len(), 1);
        assert_eq!(pollers[0].model.as_deref(), Some("mC-Print3"));
        assert_eq!(pollers[0].pending, 1);
        assert_eq!(q.stats().per_printer.get(MAC), Some(&2));
    }

    #[test]
    fn sweep_forgets_pollers_silent_for_a_retention_window() {
        let q = CloudPrntQueue::new(Duration::from_secs(60));
        let now = Utc::now();
        let waiting = "11:22:33:44:55:66";
        q.record_poll(MAC, None, now);
        q.record_poll("22:33:44:55:66:77", None, now + ChronoDuration::seconds(50));
        q.enqueue_with_expiry(waiting, b"a".to_vec(), MEDIA_STAR_LINE, now + ChronoDuration::seconds(600));
        q.record_poll(waiting, None, now);

        let report = q.sweep(now + ChronoDuration::seconds(61));
        assert_eq!(report.idle_pollers, 1);
        let ids: Vec<_> = q.pollers().into_iter().map(|p| p.printer_id).collect();
        assert_eq!(ids, vec![waiting.to_owned(), "22:33:44:55:66:77".to_owned()]);

        // Polling again brings a forgotten printer back.
        q.record_poll(MAC, None, now + ChronoDuration::seconds(62));
        assert_eq!(q.pollers().len(), 3);
    }

    #[test]
    fn media_type_follows_family() {
        assert_eq!(media_type_for(ProtocolFamily::StarLine), MEDIA_STAR_LINE);
        assert_eq!(media_type_for(ProtocolFamily::EscPos), MEDIA_OCTET_STREAM);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let q = Arc::new(queue());
        let token = CancellationToken::new();
        let handle = Arc::clone(&q).spawn_sweeper(Duration::from_secs(60), token.clone());
        tokio::time::sleep(Duration::from_secs(180)).await;
        token.cancel();
        handle.await.expect("sweeper task");
    }
}
