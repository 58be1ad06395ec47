//! End-to-end scheduler behaviour across several surfaces.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use phrasecast::dispatch::{InstanceId, RenderingBoundary, UpdateDispatcher};
use phrasecast::interval::{IntervalCalculator, minutes_between_updates};
use phrasecast::scheduler::{PeriodicJob, RetryPolicy, SurfaceOutcome};
use phrasecast::storage::{KeyValueStore, MemoryStore, NS_SURFACES};
use phrasecast::{
    ContentItem, ContentStore, CriteriaStore, PhrasecastError, Result, Scheduler, SchedulerState,
    SurfaceKey, SurfaceRegistry, Tier,
};

const T0: u64 = 1_710_000_000_000;

/// Boundary with a configurable instance count per surface and a number of
/// scripted failures before each surface starts accepting renders.
#[derive(Default)]
struct FlakyBoundary {
    instances: HashMap<SurfaceKey, usize>,
    failures_left: Mutex<HashMap<SurfaceKey, u32>>,
    renders: Mutex<Vec<(SurfaceKey, u64)>>,
}

impl FlakyBoundary {
    fn with_instances(pairs: &[(&str, usize)]) -> Self {
        Self {
            instances: pairs
                .iter()
                .map(|(k, n)| (SurfaceKey::new(*k), *n))
                .collect(),
            ..Self::default()
        }
    }

    fn fail_next(&self, surface: &str, times: u32) {
        self.failures_left
            .lock()
            .unwrap()
            .insert(SurfaceKey::new(surface), times);
    }

    fn renders_for(&self, surface: &str) -> usize {
        let key = SurfaceKey::new(surface);
        self.renders
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .count()
    }
}

#[async_trait]
impl RenderingBoundary for FlakyBoundary {
    async fn instances(&self, surface: &SurfaceKey) -> Result<Vec<InstanceId>> {
        let count = self.instances.get(surface).copied().unwrap_or(1);
        Ok((0..count)
            .map(|i| InstanceId::new(format!("{surface}-{i}")))
            .collect())
    }

    async fn render(
        &self,
        surface: &SurfaceKey,
        instances: &[InstanceId],
        item: &ContentItem,
    ) -> Result<usize> {
        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(surface) {
                if *left > 0 {
                    *left -= 1;
                    return Err(PhrasecastError::Dispatch {
                        surface: surface.clone(),
                        reason: "renderer busy".to_owned(),
                    });
                }
            }
        }
        self.renders.lock().unwrap().push((surface.clone(), item.id));
        Ok(instances.len())
    }
}

struct Harness {
    store: Arc<dyn KeyValueStore>,
    scheduler: Scheduler,
    boundary: Arc<FlakyBoundary>,
}

fn harness(surfaces: &[(&str, i64)], boundary: FlakyBoundary, onboarded: bool) -> Harness {
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
            BTreeSet::from([Tier::A1, Tier::B1]),
            Tier::A1,
            BTreeSet::from(["Food".to_owned(), "Travel".to_owned()]),
        );
    }
    let boundary = Arc::new(boundary);
    let scheduler = Scheduler::new(
        registry,
        Arc::new(ContentStore::bundled().unwrap()),
        criteria,
        UpdateDispatcher::new(boundary.clone()),
    );
    Harness {
        store,
        scheduler,
        boundary,
    }
}

#[tokio::test]
async fn shared_interval_follows_most_frequent_surface() {
    let h = harness(
        &[("main", 1), ("list", 4), ("hero", 10)],
        FlakyBoundary::default(),
        true,
    );

    let expected = minutes_between_updates(10).max(15);
    assert_eq!(h.scheduler.registry().shared_interval_minutes(), Some(expected));
    assert_eq!(h.scheduler.reschedule().await, Some(expected));
    assert_eq!(
        h.scheduler.state(),
        SchedulerState::Scheduled {
            interval_minutes: expected
        }
    );

    h.scheduler.stop().await;
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn empty_criteria_fail_without_touching_surfaces() {
    let h = harness(
        &[("main", 1), ("list", 4), ("hero", 10)],
        FlakyBoundary::default(),
        false,
    );

    let err = h.scheduler.tick_at(T0).await.unwrap_err();
    assert!(matches!(err, PhrasecastError::Validation(_)));
    assert!(!err.is_retryable());

    for config in h.scheduler.registry().configs() {
        assert_eq!(config.last_update, 0, "{} was touched", config.key);
        let durable = h
            .store
            .get(NS_SURFACES, &format!("last_update_{}", config.key))
            .unwrap();
        assert!(durable.is_none());
    }
    assert!(h.boundary.renders.lock().unwrap().is_empty());
}

#[tokio::test]
async fn retried_tick_only_redelivers_failed_surfaces() {
    let boundary = FlakyBoundary::default();
    boundary.fail_next("list", 1);
    let h = harness(&[("main", 4), ("list", 4)], boundary, true);

    let job = PeriodicJob::new(
        15,
        RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, 1.0),
    );
    let outcome = job.execute(|| h.scheduler.tick_at(T0)).await;

    let report = outcome.result.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert_eq!(report.updated(), vec![SurfaceKey::list()]);
    assert!(matches!(
        report.outcome_for(&SurfaceKey::main()),
        Some(SurfaceOutcome::NotDue { .. })
    ));
    assert_eq!(h.boundary.renders_for("main"), 1);
    assert_eq!(h.boundary.renders_for("list"), 1);

    for config in h.scheduler.registry().configs() {
        assert_eq!(config.last_update, T0);
    }
}

#[tokio::test]
async fn exhausted_retries_leave_failed_surface_due() {
    let boundary = FlakyBoundary::default();
    boundary.fail_next("hero", 10);
    let h = harness(&[("main", 2), ("hero", 2)], boundary, true);

    let job = PeriodicJob::new(
        15,
        RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, 1.0),
    );
    let outcome = job.execute(|| h.scheduler.tick_at(T0)).await;

    assert_eq!(outcome.attempts, 3);
    assert!(matches!(
        outcome.result,
        Err(PhrasecastError::PartialDispatch { .. })
    ));
    let registry = h.scheduler.registry();
    assert_eq!(registry.config_for(&SurfaceKey::main()).unwrap().last_update, T0);
    assert_eq!(registry.config_for(&SurfaceKey::hero()).unwrap().last_update, 0);
    assert!(registry.is_due(&SurfaceKey::hero(), T0 + 1).unwrap());
}

#[tokio::test]
async fn surface_without_instances_counts_as_updated() {
    let h = harness(
        &[("main", 1), ("hero", 1)],
        FlakyBoundary::with_instances(&[("hero", 0)]),
        true,
    );

    let report = h.scheduler.tick_at(T0).await.unwrap();
    match report.outcome_for(&SurfaceKey::hero()) {
        Some(SurfaceOutcome::Updated { instances, .. }) => assert_eq!(*instances, 0),
        other => panic!("expected hero to be updated, got {other:?}"),
    }
    assert_eq!(h.boundary.renders_for("hero"), 0);
    assert_eq!(
        h.scheduler
            .registry()
            .config_for(&SurfaceKey::hero())
            .unwrap()
            .last_update,
        T0
    );
}

#[tokio::test]
async fn delivered_items_match_criteria() {
    let h = harness(&[("main", 10)], FlakyBoundary::default(), true);
    let content = ContentStore::bundled().unwrap();

    let interval_ms = u64::from(minutes_between_updates(10)) * 60_000;
    for n in 0..20 {
        h.scheduler.tick_at(T0 + n * interval_ms).await.unwrap();
    }

    let renders = h.boundary.renders.lock().unwrap().clone();
    assert_eq!(renders.len(), 20);
    for (_, id) in renders {
        let item = content.get(id).unwrap();
        assert!(matches!(item.tier, Tier::A1 | Tier::B1));
        assert!(item.topic == "Food" || item.topic == "Travel");
    }
}
