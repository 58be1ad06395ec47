//! Scheduler background loop.
//!
//! [`Scheduler::reschedule`] replaces the shared timer whenever surface
//! configuration changes. The timer drives [`Scheduler::tick`] through a
//! [`PeriodicJob`], which bounds every attempt and retries transient
//! failures. Ticks are serialized: there is a single execution slot.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{DEFAULT_TICK_TIMEOUT, PeriodicJob};
use super::report::{SurfaceOutcome, TickReport};
use super::retry::RetryPolicy;
use super::SchedulerState;
use crate::content::ContentStore;
use crate::criteria::CriteriaStore;
use crate::dispatch::UpdateDispatcher;
use crate::error::Result;
use crate::surface::SurfaceRegistry;

/// The registered shared timer.
struct Timer {
    interval_minutes: u32,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Orchestrates due checks, selection and dispatch across surfaces.
///
/// Cheap to clone; clones share the timer and state.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<SurfaceRegistry>,
    content: Arc<ContentStore>,
    criteria: Arc<CriteriaStore>,
    dispatcher: UpdateDispatcher,
    retry: RetryPolicy,
    tick_timeout: Duration,
    state: Arc<watch::Sender<SchedulerState>>,
    timer: Arc<Mutex<Option<Timer>>>,
    tick_slot: Arc<AsyncMutex<()>>,
    report_tx: Option<mpsc::UnboundedSender<TickReport>>,
}

impl Scheduler {
    /// Create an idle scheduler.
    pub fn new(
        registry: Arc<SurfaceRegistry>,
        content: Arc<ContentStore>,
        criteria: Arc<CriteriaStore>,
        dispatcher: UpdateDispatcher,
    ) -> Self {
        let (state, _rx) = watch::channel(SchedulerState::Idle);
        Self {
            registry,
            content,
            criteria,
            dispatcher,
            retry: RetryPolicy::default(),
            tick_timeout: DEFAULT_TICK_TIMEOUT,
            state: Arc::new(state),
            timer: Arc::new(Mutex::new(None)),
            tick_slot: Arc::new(AsyncMutex::new(())),
            report_tx: None,
        }
    }

    /// Retry policy for failed ticks.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Wall-clock budget per tick attempt.
    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    /// Forward every tick report to `tx`.
    pub fn with_report_channel(mut self, tx: mpsc::UnboundedSender<TickReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<SurfaceRegistry> {
        &self.registry
    }

    pub fn content(&self) -> &Arc<ContentStore> {
        &self.content
    }

    pub fn criteria(&self) -> &Arc<CriteriaStore> {
        &self.criteria
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// State change notifications.
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Interval of the registered timer, `None` when idle.
    pub fn active_interval_minutes(&self) -> Option<u32> {
        self.lock_timer().as_ref().map(|t| t.interval_minutes)
    }

    /// Recompute the shared interval and replace the timer.
    ///
    /// The old timer is cancelled before the new one is spawned, both under
    /// the registry write mutex, so no timer with a stale interval survives.
    /// The new timer ticks once immediately. Returns the new interval, or
    /// `None` (and state `Idle`) when no surface is registered.
    pub async fn reschedule(&self) -> Option<u32> {
        let _registry_guard = self.registry.write_lock().await;
        let interval = self.registry.shared_interval_minutes();

        let mut slot = self.lock_timer();
        if let Some(old) = slot.take() {
            old.cancel.cancel();
            debug!(interval_minutes = old.interval_minutes, "cancelled previous timer");
        }

        let Some(minutes) = interval else {
            info!("no surfaces registered, scheduler idle");
            self.state.send_replace(SchedulerState::Idle);
            return None;
        };

        let job = PeriodicJob::new(minutes, self.retry.clone()).with_tick_timeout(self.tick_timeout);
        let interval_minutes = job.interval_minutes();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().timer_loop(job, cancel.clone()));

        *slot = Some(Timer {
            interval_minutes,
            cancel,
            handle,
        });
        self.state
            .send_replace(SchedulerState::Scheduled { interval_minutes });
        info!(interval_minutes, "delivery timer scheduled");
        Some(interval_minutes)
    }

    /// Cancel the timer and return to `Idle`.
    pub async fn stop(&self) {
        let timer = {
            let _registry_guard = self.registry.write_lock().await;
            let timer = self.lock_timer().take();
            self.state.send_replace(SchedulerState::Idle);
            timer
        };
        if let Some(timer) = timer {
            timer.cancel.cancel();
            if let Err(e) = timer.handle.await {
                warn!("delivery timer task ended abnormally: {e}");
            }
            info!("delivery timer stopped");
        }
    }

    /// Drive rescheduling from configuration changes until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut changes = self.registry.subscribe();
        self.reschedule().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => {
                        debug!(?change, "surface configuration changed");
                        self.reschedule().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed surface changes, rescheduling");
                        self.reschedule().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.stop().await;
    }

    /// Run one tick against the current wall clock.
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(crate::now_epoch_millis()).await
    }

    /// Run one tick, evaluating due-ness at `now_ms`.
    ///
    /// Fails fast with a validation error, touching no surface, when the
    /// criteria are not configured. Any failed surface fails the whole tick
    /// with [`crate::PhrasecastError::PartialDispatch`]; surfaces that were
    /// updated keep their new timestamp so a retry skips them.
    pub async fn tick_at(&self, now_ms: u64) -> Result<TickReport> {
        let _slot = self.tick_slot.lock().await;
        self.state.send_replace(SchedulerState::Tick);
        let result = self.process(now_ms).await;
        self.state.send_replace(self.resting_state());
        result
    }

    async fn process(&self, now_ms: u64) -> Result<TickReport> {
        let criteria = self.criteria.current();
        criteria.validate()?;

        let calculator = *self.registry.calculator();
        let mut report = TickReport::new(now_ms);

        for config in self.registry.configs() {
            let key = config.key.clone();
            if !config.is_due(&calculator, now_ms) {
                debug!(surface = %key, next_due_at = config.next_due_at(&calculator), "not due");
                report.push(
                    key,
                    SurfaceOutcome::NotDue {
                        next_due_at: config.next_due_at(&calculator),
                    },
                );
                continue;
            }

            let Some(item) = self.content.select_for_criteria(&criteria) else {
                info!(surface = %key, "no content matches criteria, skipping");
                report.push(key, SurfaceOutcome::NoContent);
                continue;
            };

            match self.dispatcher.dispatch(&key, &item).await {
                Ok(outcome) => {
                    self.registry.record_update(&key, now_ms)?;
                    report.push(
                        key,
                        SurfaceOutcome::Updated {
                            item_id: item.id,
                            instances: outcome.updated,
                        },
                    );
                }
                Err(e) => {
                    warn!(surface = %key, error = %e, "dispatch failed");
                    report.push(
                        key,
                        SurfaceOutcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        let flushed = self.registry.flush().await;

        if let Some(tx) = &self.report_tx {
            if tx.send(report.clone()).is_err() {
                debug!("tick report channel closed");
            }
        }

        flushed?;
        report.into_result()
    }

    async fn timer_loop(self, job: PeriodicJob, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(job.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Cancellation is polled first everywhere: a replaced timer must not
        // start or finish a tick, even when its ticker is ready too.
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = job.execute(|| self.tick()) => outcome,
            };

            match outcome.result {
                Ok(report) => debug!(
                    attempts = outcome.attempts,
                    updated = report.updated().len(),
                    "tick complete"
                ),
                Err(e) => error!(attempts = outcome.attempts, error = %e, "tick failed"),
            }
        }
        debug!(interval_minutes = job.interval_minutes(), "timer loop exited");
    }

    fn resting_state(&self) -> SchedulerState {
        match self.lock_timer().as_ref() {
            Some(timer) => SchedulerState::Scheduled {
                interval_minutes: timer.interval_minutes,
            },
            None => SchedulerState::Idle,
        }
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::content::{ContentItem, Tier};
    use crate::dispatch::{InstanceId, RenderingBoundary};
    use crate::error::PhrasecastError;
    use crate::interval::IntervalCalculator;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::surface::SurfaceKey;

    const T0: u64 = 1_700_000_000_000;
    const MINUTE_MS: u64 = 60_000;

    /// Boundary with one instance per surface that records renders.
    #[derive(Default)]
    struct CountingBoundary {
        renders: AtomicUsize,
        failing: Mutex<BTreeSet<SurfaceKey>>,
    }

    #[async_trait]
    impl RenderingBoundary for CountingBoundary {
        async fn instances(&self, _surface: &SurfaceKey) -> Result<Vec<InstanceId>> {
            Ok(vec![InstanceId::new("only")])
        }

        async fn render(
            &self,
            surface: &SurfaceKey,
            instances: &[InstanceId],
            _item: &ContentItem,
        ) -> Result<usize> {
            if self.failing.lock().unwrap().contains(surface) {
                return Err(PhrasecastError::Dispatch {
                    surface: surface.clone(),
                    reason: "host unavailable".to_owned(),
                });
            }
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(instances.len())
        }
    }

    fn make_scheduler(
        surfaces: &[(&str, i64)],
        onboarded: bool,
    ) -> (Scheduler, Arc<CountingBoundary>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let defaults: Vec<(SurfaceKey, i64)> = surfaces
            .iter()
            .map(|(k, n)| (SurfaceKey::new(*k), *n))
            .collect();
        let registry = Arc::new(
            SurfaceRegistry::load(Arc::clone(&store), IntervalCalculator::default(), &defaults)
                .unwrap(),
        );
        let criteria = Arc::new(CriteriaStore::load(Arc::clone(&store)).unwrap());
        if onboarded {
            criteria.complete_onboarding(
                BTreeSet::from([Tier::A1, Tier::A2]),
                Tier::A1,
                BTreeSet::from(["Greetings".to_owned(), "Daily Life".to_owned()]),
            );
        }
        let content = Arc::new(ContentStore::bundled().unwrap());
        let boundary = Arc::new(CountingBoundary::default());
        let dispatcher = UpdateDispatcher::new(boundary.clone());
        (
            Scheduler::new(registry, content, criteria, dispatcher),
            boundary,
        )
    }

    #[tokio::test]
    async fn first_tick_updates_every_surface() {
        let (scheduler, boundary) = make_scheduler(&[("main", 1), ("list", 3)], true);
        let report = scheduler.tick_at(T0).await.unwrap();

        assert_eq!(report.updated(), vec![SurfaceKey::list(), SurfaceKey::main()]);
        assert_eq!(boundary.renders.load(Ordering::SeqCst), 2);
        let main = scheduler.registry().config_for(&SurfaceKey::main()).unwrap();
        assert_eq!(main.last_update, T0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn surfaces_are_skipped_until_due() {
        let (scheduler, boundary) = make_scheduler(&[("main", 1), ("hero", 10)], true);
        scheduler.tick_at(T0).await.unwrap();

        // hero: 96 min, main: 960 min.
        let report = scheduler.tick_at(T0 + 95 * MINUTE_MS).await.unwrap();
        assert!(report.is_noop());

        let report = scheduler.tick_at(T0 + 96 * MINUTE_MS).await.unwrap();
        assert_eq!(report.updated(), vec![SurfaceKey::hero()]);
        assert!(matches!(
            report.outcome_for(&SurfaceKey::main()),
            Some(SurfaceOutcome::NotDue { next_due_at }) if *next_due_at == T0 + 960 * MINUTE_MS
        ));
        assert_eq!(boundary.renders.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unconfigured_criteria_fail_fast() {
        let (scheduler, boundary) = make_scheduler(&[("main", 4)], false);
        let err = scheduler.tick_at(T0).await.unwrap_err();

        assert!(matches!(err, PhrasecastError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(boundary.renders.load(Ordering::SeqCst), 0);
        let main = scheduler.registry().config_for(&SurfaceKey::main()).unwrap();
        assert_eq!(main.last_update, 0);
    }

    #[tokio::test]
    async fn no_matching_content_is_a_soft_skip() {
        let (scheduler, boundary) = make_scheduler(&[("main", 4)], true);
        scheduler.criteria().update(|c| {
            c.selected_topics = BTreeSet::from(["Astrophysics".to_owned()]);
        });

        let report = scheduler.tick_at(T0).await.unwrap();
        assert_eq!(
            report.outcome_for(&SurfaceKey::main()),
            Some(&SurfaceOutcome::NoContent)
        );
        assert_eq!(boundary.renders.load(Ordering::SeqCst), 0);
        let main = scheduler.registry().config_for(&SurfaceKey::main()).unwrap();
        assert_eq!(main.last_update, 0);
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_timestamps() {
        let (scheduler, boundary) = make_scheduler(&[("main", 4), ("list", 4)], true);
        boundary.failing.lock().unwrap().insert(SurfaceKey::list());

        let err = scheduler.tick_at(T0).await.unwrap_err();
        match &err {
            PhrasecastError::PartialDispatch { failed, updated } => {
                assert_eq!(failed, &vec![SurfaceKey::list()]);
                assert_eq!(updated, &vec![SurfaceKey::main()]);
            }
            other => panic!("expected PartialDispatch, got {other:?}"),
        }
        assert!(err.is_retryable());

        // Retry after the host recovers only touches the failed surface.
        boundary.failing.lock().unwrap().clear();
        let report = scheduler.tick_at(T0 + MINUTE_MS).await.unwrap();
        assert_eq!(report.updated(), vec![SurfaceKey::list()]);
        assert_eq!(
            scheduler
                .registry()
                .config_for(&SurfaceKey::main())
                .unwrap()
                .last_update,
            T0
        );
    }

    #[tokio::test]
    async fn reports_are_forwarded() {
        let (scheduler, _boundary) = make_scheduler(&[("hero", 2)], true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = scheduler.with_report_channel(tx);

        scheduler.tick_at(T0).await.unwrap();
        let report = rx.try_recv().expect("report");
        assert_eq!(report.at, T0);
        assert_eq!(report.updated(), vec![SurfaceKey::hero()]);
    }

    #[tokio::test]
    async fn reschedule_uses_shortest_interval() {
        let (scheduler, _boundary) =
            make_scheduler(&[("main", 1), ("list", 4), ("hero", 10)], true);

        assert_eq!(scheduler.reschedule().await, Some(96));
        assert_eq!(
            scheduler.state(),
            SchedulerState::Scheduled {
                interval_minutes: 96
            }
        );

        scheduler
            .registry()
            .set_items_per_day(&SurfaceKey::hero(), 1)
            .unwrap();
        assert_eq!(scheduler.reschedule().await, Some(240));
        assert_eq!(scheduler.active_interval_minutes(), Some(240));

        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.active_interval_minutes(), None);
    }

    #[tokio::test]
    async fn reschedule_without_surfaces_is_idle() {
        let (scheduler, _boundary) = make_scheduler(&[], true);
        assert_eq!(scheduler.reschedule().await, None);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_immediately_then_on_interval() {
        let (scheduler, boundary) = make_scheduler(&[("hero", 10)], true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = scheduler.with_report_channel(tx);

        scheduler.reschedule().await;
        let first = rx.recv().await.expect("first tick");
        assert_eq!(first.updated(), vec![SurfaceKey::hero()]);

        // The next timer tick fires after 96 minutes of tokio time.
        let second = rx.recv().await.expect("second tick");
        assert_eq!(second.surfaces.len(), 1);
        assert!(boundary.renders.load(Ordering::SeqCst) >= 1);

        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_timer_never_runs_a_queued_tick() {
        for round in 0..20 {
            let (scheduler, _boundary) = make_scheduler(&[("hero", 10)], true);
            let (tx, mut rx) = mpsc::unbounded_channel();
            let scheduler = scheduler.with_report_channel(tx);

            scheduler.reschedule().await;
            rx.recv().await.expect("immediate tick");

            // Park the old timer's next tick behind a held execution slot.
            let slot = scheduler.tick_slot.lock().await;
            tokio::time::advance(Duration::from_secs(96 * 60)).await;
            settle().await;

            scheduler.reschedule().await;
            settle().await;
            drop(slot);

            rx.recv().await.expect("replacement timer tick");
            settle().await;
            scheduler.stop().await;

            let mut stale = 0;
            while rx.try_recv().is_ok() {
                stale += 1;
            }
            assert_eq!(stale, 0, "cancelled timer ran a tick in round {round}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_reschedules_on_configuration_change() {
        let (scheduler, _boundary) = make_scheduler(&[("main", 1)], true);
        let mut states = scheduler.subscribe_state();
        let cancel = CancellationToken::new();

        let runner = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        states
            .wait_for(|s| *s == SchedulerState::Scheduled { interval_minutes: 960 })
            .await
            .unwrap();

        scheduler
            .registry()
            .set_items_per_day(&SurfaceKey::main(), 8)
            .unwrap();
        states
            .wait_for(|s| *s == SchedulerState::Scheduled { interval_minutes: 120 })
            .await
            .unwrap();

        cancel.cancel();
        runner.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
