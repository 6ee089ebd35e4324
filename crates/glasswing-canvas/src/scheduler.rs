//! State Capture Scheduler
//!
//! Polls each mounted surface for scroll, url and serialized content on a
//! fixed cadence and hands deltas to the sync bridge. At most one capture
//! query is in flight per surface; a tick that finds the previous query
//! unresolved is skipped. While a document loads nothing is captured: the
//! record holds the state restoration is about to apply.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::SyncBridge;
use crate::config::DEFAULT_CAPTURE_INTERVAL_MS;
use crate::controller::SurfaceHandle;
use crate::error::Error;
use crate::events::{CaptureTrigger, SyncEventRecorder, SyncEventType};
use crate::surface::{QueryResult, SurfaceBackend, SurfaceQuery};

/// Result of one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The sample differed and was written
    Committed,
    /// The sample matched the record
    Unchanged,
    /// The query or the write failed
    Failed,
    /// The surface was torn down before the result arrived
    Discarded,
    /// A load was in progress, the record was left alone
    Deferred,
}

/// Counters for one scheduled capture task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Ticks fired
    pub ticks: u64,
    /// Ticks skipped because a query was still in flight
    pub skipped_in_flight: u64,
    /// Ticks skipped because the document was loading
    pub skipped_loading: u64,
    /// Captures that wrote
    pub commits: u64,
    /// Captures that matched the record
    pub unchanged: u64,
    /// Captures that failed
    pub failures: u64,
    /// Results discarded after teardown
    pub discarded: u64,
    /// Samples dropped because a load started while they were taken
    pub deferred: u64,
}

#[derive(Default)]
struct CaptureState {
    in_flight: AtomicBool,
    ticks: AtomicU64,
    skipped_in_flight: AtomicU64,
    skipped_loading: AtomicU64,
    commits: AtomicU64,
    unchanged: AtomicU64,
    failures: AtomicU64,
    discarded: AtomicU64,
    deferred: AtomicU64,
}

impl CaptureState {
    fn note(&self, outcome: CaptureOutcome) {
        let counter = match outcome {
            CaptureOutcome::Committed => &self.commits,
            CaptureOutcome::Unchanged => &self.unchanged,
            CaptureOutcome::Failed => &self.failures,
            CaptureOutcome::Discarded => &self.discarded,
            CaptureOutcome::Deferred => &self.deferred,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped_in_flight.load(Ordering::Relaxed),
            skipped_loading: self.skipped_loading.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }
}

struct ScheduledCapture {
    generation: Uuid,
    token: CancellationToken,
    state: Arc<CaptureState>,
}

/// Runs one capture against a surface and commits the delta
struct Capturer {
    backend: Arc<dyn SurfaceBackend>,
    bridge: Arc<SyncBridge>,
    recorder: Arc<SyncEventRecorder>,
}

impl Capturer {
    async fn capture(
        &self,
        handle: &SurfaceHandle,
        token: &CancellationToken,
        trigger: CaptureTrigger,
    ) -> CaptureOutcome {
        let record_id = handle.record_id();
        if handle.is_loading() {
            debug!(record_id = %record_id, trigger = ?trigger, "Document loading, capture deferred");
            return CaptureOutcome::Deferred;
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = self.backend.execute(handle.surface_id(), SurfaceQuery::CaptureState) => Some(result),
        };

        let Some(result) = result.filter(|_| !token.is_cancelled() && handle.is_live()) else {
            return self.discard(record_id, trigger).await;
        };

        if handle.is_loading() {
            debug!(record_id = %record_id, "Load started during capture, dropping sample");
            return CaptureOutcome::Deferred;
        }

        let sample = match result {
            Ok(QueryResult::State(sample)) => sample,
            Ok(other) => {
                let e = Error::query(format!("unexpected answer to capture_state: {other:?}"));
                return self.skip(record_id, trigger, &e).await;
            }
            Err(e) => return self.skip(record_id, trigger, &e).await,
        };

        let live = || !token.is_cancelled() && handle.is_live() && !handle.is_loading();
        match self.bridge.commit_capture_while(record_id, &sample, live).await {
            Ok(true) => {
                self.recorder
                    .record_capture_committed(
                        record_id,
                        trigger,
                        &sample.current_url,
                        sample.scroll_offset(),
                        sample.serialized_content.is_some(),
                    )
                    .await;
                CaptureOutcome::Committed
            }
            Ok(false) => CaptureOutcome::Unchanged,
            Err(Error::StaleHandle(_)) if handle.is_loading() && handle.is_live() => CaptureOutcome::Deferred,
            Err(Error::StaleHandle(_)) => self.discard(record_id, trigger).await,
            Err(e) => self.skip(record_id, trigger, &e).await,
        }
    }

    async fn discard(&self, record_id: Uuid, trigger: CaptureTrigger) -> CaptureOutcome {
        debug!(record_id = %record_id, "Surface torn down during capture, discarding result");
        self.recorder
            .record(
                record_id,
                SyncEventType::CaptureDiscarded,
                serde_json::json!({ "trigger": trigger }),
            )
            .await;
        CaptureOutcome::Discarded
    }

    async fn skip(&self, record_id: Uuid, trigger: CaptureTrigger, e: &Error) -> CaptureOutcome {
        warn!(record_id = %record_id, error = %e, class = %e.class(), "State capture failed, skipping tick");
        self.recorder
            .record_capture_skipped(record_id, trigger, &e.to_string())
            .await;
        CaptureOutcome::Failed
    }
}

/// Periodic capture of mounted surfaces
pub struct CaptureScheduler {
    capturer: Arc<Capturer>,
    interval: Duration,
    tasks: DashMap<Uuid, ScheduledCapture>,
}

impl CaptureScheduler {
    /// Create a scheduler with the default interval
    pub fn new(
        backend: Arc<dyn SurfaceBackend>,
        bridge: Arc<SyncBridge>,
        recorder: Arc<SyncEventRecorder>,
    ) -> Self {
        Self {
            capturer: Arc::new(Capturer {
                backend,
                bridge,
                recorder,
            }),
            interval: Duration::from_millis(DEFAULT_CAPTURE_INTERVAL_MS),
            tasks: DashMap::new(),
        }
    }

    /// Set the capture interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Capture interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start capturing for a handle.
    ///
    /// Returns false when a task for this exact instance already runs. A task
    /// for an older instance of the same record is replaced.
    pub fn start(&self, handle: &SurfaceHandle) -> bool {
        let record_id = handle.record_id();

        if let Some(existing) = self.tasks.get(&record_id) {
            if existing.generation == handle.generation() && !existing.token.is_cancelled() {
                debug!(record_id = %record_id, "Capture already running for this surface");
                return false;
            }
        }

        let token = handle.child_token();
        let state = Arc::new(CaptureState::default());
        let previous = self.tasks.insert(
            record_id,
            ScheduledCapture {
                generation: handle.generation(),
                token: token.clone(),
                state: state.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            debug!(record_id = %record_id, "Replaced capture task of previous surface");
        }

        tokio::spawn(run_capture_loop(
            self.capturer.clone(),
            handle.clone(),
            token,
            state,
            self.interval,
        ));
        info!(record_id = %record_id, interval_ms = self.interval.as_millis() as u64, "Capture scheduler started");
        true
    }

    /// Stop capturing for a handle. In-flight results are discarded.
    pub fn stop(&self, handle: &SurfaceHandle) -> bool {
        let removed = self
            .tasks
            .remove_if(&handle.record_id(), |_, task| {
                task.generation == handle.generation()
            });
        match removed {
            Some((record_id, task)) => {
                task.token.cancel();
                debug!(record_id = %record_id, "Capture scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// Stop whatever capture task runs for a record
    pub fn stop_record(&self, record_id: Uuid) -> bool {
        match self.tasks.remove(&record_id) {
            Some((_, task)) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Capture immediately, outside the cadence
    pub async fn capture_now(&self, handle: &SurfaceHandle, trigger: CaptureTrigger) -> CaptureOutcome {
        let state = self
            .tasks
            .get(&handle.record_id())
            .filter(|task| task.generation == handle.generation())
            .map(|task| task.state.clone());

        let outcome = self.capturer.capture(handle, handle.token(), trigger).await;
        if let Some(state) = state {
            state.note(outcome);
        }
        outcome
    }

    /// Whether a capture task runs for a record
    #[must_use]
    pub fn is_running(&self, record_id: Uuid) -> bool {
        self.tasks
            .get(&record_id)
            .is_some_and(|task| !task.token.is_cancelled())
    }

    /// Counters for a record's current task
    #[must_use]
    pub fn stats(&self, record_id: Uuid) -> Option<CaptureStats> {
        self.tasks.get(&record_id).map(|task| task.state.snapshot())
    }
}

async fn run_capture_loop(
    capturer: Arc<Capturer>,
    handle: SurfaceHandle,
    token: CancellationToken,
    state: Arc<CaptureState>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        state.ticks.fetch_add(1, Ordering::Relaxed);
        if handle.is_loading() {
            state.skipped_loading.fetch_add(1, Ordering::Relaxed);
            debug!(record_id = %handle.record_id(), "Document loading, skipping tick");
            continue;
        }
        if state.in_flight.swap(true, Ordering::SeqCst) {
            state.skipped_in_flight.fetch_add(1, Ordering::Relaxed);
            debug!(record_id = %handle.record_id(), "Previous capture still in flight, skipping tick");
            continue;
        }

        let capturer = capturer.clone();
        let handle = handle.clone();
        let token = token.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let outcome = capturer
                .capture(&handle, &token, CaptureTrigger::Interval)
                .await;
            state.note(outcome);
            state.in_flight.store(false, Ordering::SeqCst);
        });
    }

    debug!(record_id = %handle.record_id(), "Capture loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSurfaceBackend;
    use crate::record::{Position, ScrollOffset};
    use crate::store::InMemoryDocumentStore;
    use crate::surface::SandboxPolicy;

    const TICK: Duration = Duration::from_millis(750);

    struct Fixture {
        backend: Arc<MockSurfaceBackend>,
        store: Arc<InMemoryDocumentStore>,
        bridge: Arc<SyncBridge>,
        recorder: Arc<SyncEventRecorder>,
        scheduler: CaptureScheduler,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MockSurfaceBackend::new());
        let store = Arc::new(InMemoryDocumentStore::new());
        let bridge = Arc::new(SyncBridge::new(store.clone()));
        let recorder = Arc::new(SyncEventRecorder::default());
        let scheduler = CaptureScheduler::new(backend.clone(), bridge.clone(), recorder.clone())
            .with_interval(TICK);
        Fixture {
            backend,
            store,
            bridge,
            recorder,
            scheduler,
        }
    }

    async fn surface(f: &Fixture) -> SurfaceHandle {
        let id = f
            .bridge
            .create_live_object(Some("https://a.example"), Position::default())
            .await
            .unwrap();
        let surface = f
            .backend
            .create("https://a.example", &SandboxPolicy::default())
            .await
            .unwrap()
            .id;
        SurfaceHandle::new(id, surface, CancellationToken::new())
    }

    async fn advance(ticks: u32) {
        for _ in 0..ticks {
            tokio::time::sleep(TICK).await;
        }
        // let spawned captures run
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commits_scroll_changes() {
        let f = fixture();
        let handle = surface(&f).await;
        assert!(f.scheduler.start(&handle));

        f.backend.set_scroll(handle.surface_id(), 0.0, 320.0);
        advance(1).await;

        let record = f.bridge.record(handle.record_id()).await.unwrap();
        assert_eq!(record.scroll_offset(), ScrollOffset::new(0.0, 320.0));
        assert!(record.snapshot().is_some());

        // Nothing changes on later ticks
        advance(3).await;
        assert_eq!(f.store.update_count(), 1);
        let stats = f.scheduler.stats(handle.record_id()).unwrap();
        assert_eq!(stats.commits, 1);
        assert!(stats.unchanged >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let f = fixture();
        let handle = surface(&f).await;
        assert!(f.scheduler.start(&handle));
        assert!(!f.scheduler.start(&handle));
        assert!(f.scheduler.is_running(handle.record_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_writes_nothing_and_keeps_ticking() {
        let f = fixture();
        let handle = surface(&f).await;
        f.backend.set_scroll(handle.surface_id(), 0.0, 50.0);
        f.backend.fail_next("capture_state", 1);

        f.scheduler.start(&handle);
        advance(1).await;

        assert_eq!(f.store.update_count(), 0);
        assert_eq!(
            f.recorder
                .count_of(handle.record_id(), SyncEventType::CaptureSkipped)
                .await,
            1
        );

        advance(1).await;
        assert_eq!(f.store.update_count(), 1);
        let stats = f.scheduler.stats(handle.record_id()).unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.commits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_query_blocks_next_tick() {
        let f = fixture();
        let handle = surface(&f).await;
        f.backend.hold_captures();

        f.scheduler.start(&handle);
        advance(3).await;

        let stats = f.scheduler.stats(handle.record_id()).unwrap();
        assert_eq!(f.backend.held_captures(), 1);
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.skipped_in_flight, 2);

        f.backend.release_captures();
        advance(0).await;
        advance(1).await;
        assert!(f.backend.held_captures() == 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let f = fixture();
        let handle = surface(&f).await;
        f.backend.set_scroll(handle.surface_id(), 0.0, 999.0);
        f.backend.hold_captures();

        f.scheduler.start(&handle);
        advance(1).await;
        assert_eq!(f.backend.held_captures(), 1);

        assert!(f.scheduler.stop(&handle));
        f.backend.release_captures();
        advance(2).await;

        assert_eq!(f.store.update_count(), 0);
        assert!(!f.scheduler.is_running(handle.record_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_capture_while_loading() {
        let f = fixture();
        let handle = surface(&f).await;
        f.backend.set_scroll(handle.surface_id(), 0.0, 75.0);
        handle.set_loading(true);

        f.scheduler.start(&handle);
        advance(2).await;
        assert_eq!(
            f.scheduler.capture_now(&handle, CaptureTrigger::Manual).await,
            CaptureOutcome::Deferred
        );
        assert_eq!(f.store.update_count(), 0);
        let stats = f.scheduler.stats(handle.record_id()).unwrap();
        assert_eq!(stats.skipped_loading, 2);

        handle.set_loading(false);
        advance(1).await;
        assert_eq!(f.store.update_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_now_ignores_cadence() {
        let f = fixture();
        let handle = surface(&f).await;
        f.backend.set_scroll(handle.surface_id(), 10.0, 20.0);

        let outcome = f
            .scheduler
            .capture_now(&handle, CaptureTrigger::Manual)
            .await;
        assert_eq!(outcome, CaptureOutcome::Committed);
        assert_eq!(
            f.scheduler
                .capture_now(&handle, CaptureTrigger::Manual)
                .await,
            CaptureOutcome::Unchanged
        );
        assert_eq!(f.store.update_count(), 1);
    }
}
