//! Fixed-cadence mirroring of a list endpoint into a [`LiveView`].
//!
//! Each mount gets an id and each cycle a sequence number. A response is
//! applied only while its mount is current and only if no later cycle has
//! already been applied, so the view never moves backwards and never changes
//! after unmount.

use crate::api::{ApiClient, ApiRequest, Transport};
use crate::feeds::Feed;
use crate::query::{compile, FilterState};
use crate::session::SessionReader;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What subscribers see.
#[derive(Debug, Clone)]
pub struct ViewState<R> {
    pub records: Arc<Vec<R>>,
    pub refreshed_at: Option<DateTime<Utc>>,
    mount: Option<u64>,
    last_seq: u64,
}

impl<R> Default for ViewState<R> {
    fn default() -> Self {
        Self {
            records: Arc::new(Vec::new()),
            refreshed_at: None,
            mount: None,
            last_seq: 0,
        }
    }
}

impl<R> ViewState<R> {
    pub fn is_mounted(&self) -> bool {
        self.mount.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A later cycle already landed.
    Stale,
    /// The mount that issued the cycle is gone.
    Unmounted,
}

impl ApplyOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Stale => "stale",
            Self::Unmounted => "unmounted",
        }
    }
}

/// The record list of one view. Updates replace the list wholesale.
pub struct LiveView<R> {
    tx: watch::Sender<ViewState<R>>,
    mounts: AtomicU64,
}

impl<R> Default for LiveView<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> LiveView<R> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ViewState::default());
        Self {
            tx,
            mounts: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState<R>> {
        self.tx.subscribe()
    }

    pub fn records(&self) -> Arc<Vec<R>> {
        Arc::clone(&self.tx.borrow().records)
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.tx.borrow().refreshed_at
    }

    pub fn is_mounted(&self) -> bool {
        self.tx.borrow().is_mounted()
    }

    /// Starts a new mount, invalidating every cycle of earlier ones.
    pub(crate) fn begin_mount(&self) -> u64 {
        let id = self.mounts.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_if_modified(|s| {
            s.mount = Some(id);
            s.last_seq = 0;
            false
        });
        id
    }

    pub(crate) fn end_mount(&self, id: u64) {
        self.tx.send_if_modified(|s| {
            if s.mount == Some(id) {
                s.mount = None;
            }
            false
        });
    }

    pub(crate) fn apply(&self, mount_id: u64, seq: u64, records: Vec<R>) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::Unmounted;
        self.tx.send_if_modified(|s| {
            if s.mount != Some(mount_id) {
                return false;
            }
            if seq <= s.last_seq {
                outcome = ApplyOutcome::Stale;
                return false;
            }
            s.records = Arc::new(records);
            s.last_seq = seq;
            s.refreshed_at = Some(Utc::now());
            outcome = ApplyOutcome::Applied;
            true
        });
        outcome
    }
}

/// Stops its poll loop when dropped.
pub struct PollerHandle<R> {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    view: Arc<LiveView<R>>,
    mount_id: u64,
}

impl<R> PollerHandle<R> {
    pub fn unmount(self) {
        drop(self);
    }

    /// Unmounts and waits for the loop task to exit.
    pub async fn shutdown(mut self) {
        self.detach();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "poll loop task failed");
            }
        }
    }

    fn detach(&self) {
        self.cancel.cancel();
        self.view.end_mount(self.mount_id);
    }
}

impl<R> Drop for PollerHandle<R> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Polls one [`Feed`] at a fixed period into a shared [`LiveView`].
pub struct Poller<F: Feed, T> {
    feed: Arc<F>,
    api: ApiClient<T>,
    session: SessionReader,
    view: Arc<LiveView<F::Record>>,
    period: Duration,
}

impl<F: Feed, T: Transport> Poller<F, T> {
    pub fn new(feed: F, api: ApiClient<T>, session: SessionReader, period: Duration) -> Self {
        Self {
            feed: Arc::new(feed),
            api,
            session,
            view: Arc::new(LiveView::new()),
            period,
        }
    }

    pub fn view(&self) -> &Arc<LiveView<F::Record>> {
        &self.view
    }

    pub fn name(&self) -> &'static str {
        self.feed.name()
    }

    /// Runs one cycle immediately, then one per period until the handle drops.
    pub fn mount(&self, filter: &FilterState) -> PollerHandle<F::Record> {
        let mount_id = self.view.begin_mount();
        let query = if self.feed.uses_filters() {
            compile(filter).to_owned_pairs()
        } else {
            Vec::new()
        };
        info!(view = self.feed.name(), mount_id, params = query.len(), "view mounted");

        let cancel = CancellationToken::new();
        let cycle = Arc::new(Cycle {
            feed: Arc::clone(&self.feed),
            api: self.api.clone(),
            session: self.session.clone(),
            view: Arc::clone(&self.view),
            query,
            mount_id,
        });
        let task = tokio::spawn(run_loop(cycle, self.period, cancel.clone()));

        PollerHandle {
            cancel,
            task: Some(task),
            view: Arc::clone(&self.view),
            mount_id,
        }
    }
}

struct Cycle<F: Feed, T> {
    feed: Arc<F>,
    api: ApiClient<T>,
    session: SessionReader,
    view: Arc<LiveView<F::Record>>,
    query: Vec<(String, String)>,
    mount_id: u64,
}

async fn run_loop<F: Feed, T: Transport>(
    cycle: Arc<Cycle<F, T>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let view = cycle.feed.name();
    let mut seq = 1;
    tokio::spawn(Arc::clone(&cycle).run(seq));

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                seq += 1;
                // Cycles overlap when a response takes longer than the period.
                tokio::spawn(Arc::clone(&cycle).run(seq));
            }
        }
    }

    info!(view, mount_id = cycle.mount_id, cycles = seq, "view unmounted");
}

impl<F: Feed, T: Transport> Cycle<F, T> {
    /// An in-flight request outlives unmount; its result is then discarded
    /// by [`LiveView::apply`].
    async fn run(self: Arc<Self>, seq: u64) -> &'static str {
        let view = self.feed.name();
        let request = ApiRequest::get(view, self.feed.path())
            .with_query(self.query.clone())
            .with_bearer(self.session.bearer());

        let outcome = match self.api.json(request).await {
            Err(e) => {
                warn!(view, seq, error = %e, "poll failed, keeping last data");
                "failed"
            }
            Ok(payload) => match self.feed.decode(payload) {
                Err(e) => {
                    warn!(view, seq, error = %e, "poll returned unusable payload");
                    "failed"
                }
                Ok(records) => {
                    let count = records.len();
                    let outcome = self.view.apply(self.mount_id, seq, records);
                    debug!(view, seq, count, outcome = outcome.label(), "poll completed");
                    outcome.label()
                }
            },
        };
        metrics::counter!("dashboard_poll_cycles_total", "view" => view, "outcome" => outcome)
            .increment(1);
        outcome
    }
}

/// A poller plus the filter it is mounted with.
pub struct FilteredView<F: Feed, T> {
    poller: Poller<F, T>,
    filter: FilterState,
    handle: Option<PollerHandle<F::Record>>,
}

impl<F: Feed, T: Transport> FilteredView<F, T> {
    pub fn new(poller: Poller<F, T>) -> Self {
        Self {
            poller,
            filter: FilterState::default(),
            handle: None,
        }
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn view(&self) -> &Arc<LiveView<F::Record>> {
        self.poller.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState<F::Record>> {
        self.poller.view().subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.handle.is_some()
    }

    pub fn mount(&mut self) {
        self.handle = None;
        self.handle = Some(self.poller.mount(&self.filter));
    }

    pub fn unmount(&mut self) {
        self.handle = None;
    }

    /// Stores `filter`. A mounted view restarts its polling when the filter
    /// actually changed; returns whether it did.
    pub fn set_filter(&mut self, filter: FilterState) -> bool {
        if filter == self.filter {
            return false;
        }
        self.filter = filter;
        if self.is_mounted() {
            self.mount();
            return true;
        }
        false
    }
}
