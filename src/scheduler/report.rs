//! Per-tick results.

use serde::Serialize;

use crate::error::{PhrasecastError, Result};
use crate::surface::SurfaceKey;

/// What happened to one surface during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SurfaceOutcome {
    /// Item delivered; `instances` is the acknowledged instance count.
    Updated { item_id: u64, instances: usize },
    /// Interval not yet elapsed.
    NotDue { next_due_at: u64 },
    /// No catalog item matches the current criteria.
    NoContent,
    /// Dispatch failed; the surface stays due.
    Failed { reason: String },
}

/// One line of a [`TickReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceReport {
    pub surface: SurfaceKey,
    #[serde(flatten)]
    pub outcome: SurfaceOutcome,
}

/// Outcome of one scheduler tick across all surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Epoch milliseconds the tick evaluated due-ness against.
    pub at: u64,
    pub surfaces: Vec<SurfaceReport>,
}

impl TickReport {
    pub fn new(at: u64) -> Self {
        Self {
            at,
            surfaces: Vec::new(),
        }
    }

    pub fn push(&mut self, surface: SurfaceKey, outcome: SurfaceOutcome) {
        self.surfaces.push(SurfaceReport { surface, outcome });
    }

    /// Surfaces that received an item.
    pub fn updated(&self) -> Vec<SurfaceKey> {
        self.filter(|o| matches!(o, SurfaceOutcome::Updated { .. }))
    }

    /// Surfaces whose dispatch failed.
    pub fn failed(&self) -> Vec<SurfaceKey> {
        self.filter(|o| matches!(o, SurfaceOutcome::Failed { .. }))
    }

    /// Outcome recorded for `surface`, if it was visited.
    pub fn outcome_for(&self, surface: &SurfaceKey) -> Option<&SurfaceOutcome> {
        self.surfaces
            .iter()
            .find(|r| &r.surface == surface)
            .map(|r| &r.outcome)
    }

    /// `true` when nothing was delivered and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.surfaces.iter().all(|r| {
            matches!(
                r.outcome,
                SurfaceOutcome::NotDue { .. } | SurfaceOutcome::NoContent
            )
        })
    }

    /// The tick's overall result: any failed surface fails the tick.
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(PhrasecastError::PartialDispatch {
                failed,
                updated: self.updated(),
            })
        }
    }

    fn filter(&self, pred: impl Fn(&SurfaceOutcome) -> bool) -> Vec<SurfaceKey> {
        self.surfaces
            .iter()
            .filter(|r| pred(&r.outcome))
            .map(|r| r.surface.clone())
            .collect()
    }
}
