//! Update dispatch to the rendering boundary.
//!
//! The [`RenderingBoundary`] is whatever actually draws a surface (a home
//! screen widget host, a terminal, a test double). [`UpdateDispatcher`]
//! hands it the selected item, bounds the call with a timeout and turns the
//! acknowledgement into a [`DispatchOutcome`].

pub mod channel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::content::ContentItem;
use crate::error::{PhrasecastError, Result};
use crate::surface::SurfaceKey;

pub use channel::{ChannelBoundary, RenderRequest};

/// Default per-dispatch timeout.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque identifier of one placed instance of a surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External collaborator that draws surfaces.
#[async_trait]
pub trait RenderingBoundary: Send + Sync {
    /// Currently placed instances of `surface`.
    async fn instances(&self, surface: &SurfaceKey) -> Result<Vec<InstanceId>>;

    /// Render `item` on `instances`; returns how many were updated.
    async fn render(
        &self,
        surface: &SurfaceKey,
        instances: &[InstanceId],
        item: &ContentItem,
    ) -> Result<usize>;
}

/// Acknowledged result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Surface addressed.
    pub surface: SurfaceKey,
    /// Item delivered.
    pub item_id: u64,
    /// Instances the boundary reported as placed.
    pub instances: usize,
    /// Instances actually updated.
    pub updated: usize,
}

/// Delivers selected items to the rendering boundary.
#[derive(Clone)]
pub struct UpdateDispatcher {
    boundary: Arc<dyn RenderingBoundary>,
    timeout: Duration,
}

impl UpdateDispatcher {
    /// Create a dispatcher with [`DEFAULT_DISPATCH_TIMEOUT`].
    pub fn new(boundary: Arc<dyn RenderingBoundary>) -> Self {
        Self {
            boundary,
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Override the per-dispatch timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Push `item` to every instance of `surface`.
    ///
    /// Zero placed instances is a success with a zero count. Instances
    /// present but none updated is a [`PhrasecastError::Dispatch`] failure.
    pub async fn dispatch(&self, surface: &SurfaceKey, item: &ContentItem) -> Result<DispatchOutcome> {
        let instances = self.bounded(surface, self.boundary.instances(surface)).await?;
        if instances.is_empty() {
            debug!(surface = %surface, "no placed instances, nothing to update");
            return Ok(DispatchOutcome {
                surface: surface.clone(),
                item_id: item.id,
                instances: 0,
                updated: 0,
            });
        }

        let updated = self
            .bounded(surface, self.boundary.render(surface, &instances, item))
            .await?;

        if updated == 0 {
            return Err(PhrasecastError::Dispatch {
                surface: surface.clone(),
                reason: format!("0 of {} instances updated", instances.len()),
            });
        }
        if updated < instances.len() {
            warn!(
                surface = %surface,
                updated,
                instances = instances.len(),
                "partial surface update acknowledged"
            );
        }

        debug!(surface = %surface, item = item.id, updated, "dispatched");
        Ok(DispatchOutcome {
            surface: surface.clone(),
            item_id: item.id,
            instances: instances.len(),
            updated: updated.min(instances.len()),
        })
    }

    async fn bounded<T>(
        &self,
        surface: &SurfaceKey,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PhrasecastError::DispatchTimeout {
                surface: surface.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::content::Tier;

    /// Boundary with a fixed instance count and scripted acknowledgement.
    struct ScriptedBoundary {
        instances: usize,
        ack: std::result::Result<usize, String>,
        delay: Duration,
    }

    #[async_trait]
    impl RenderingBoundary for ScriptedBoundary {
        async fn instances(&self, _surface: &SurfaceKey) -> Result<Vec<InstanceId>> {
            Ok((0..self.instances)
                .map(|i| InstanceId::new(format!("w{i}")))
                .collect())
        }

        async fn render(
            &self,
            surface: &SurfaceKey,
            _instances: &[InstanceId],
            _item: &ContentItem,
        ) -> Result<usize> {
            tokio::time::sleep(self.delay).await;
            self.ack.clone().map_err(|reason| PhrasecastError::Dispatch {
                surface: surface.clone(),
                reason,
            })
        }
    }

    fn dispatcher(instances: usize, ack: std::result::Result<usize, String>) -> UpdateDispatcher {
        UpdateDispatcher::new(Arc::new(ScriptedBoundary {
            instances,
            ack,
            delay: Duration::ZERO,
        }))
    }

    fn item() -> ContentItem {
        ContentItem {
            id: 5,
            text: "Hola".to_owned(),
            translation: "Hi".to_owned(),
            tier: Tier::A1,
            topic: "Greetings".to_owned(),
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn zero_instances_is_success() {
        let outcome = dispatcher(0, Ok(0))
            .dispatch(&SurfaceKey::hero(), &item())
            .await
            .unwrap();
        assert_eq!(outcome.instances, 0);
        assert_eq!(outcome.updated, 0);
    }

    #[tokio::test]
    async fn all_instances_updated() {
        let outcome = dispatcher(3, Ok(3))
            .dispatch(&SurfaceKey::main(), &item())
            .await
            .unwrap();
        assert_eq!(outcome.updated, 3);
        assert_eq!(outcome.item_id, 5);
    }

    #[tokio::test]
    async fn partial_acknowledgement_is_success() {
        let outcome = dispatcher(3, Ok(1))
            .dispatch(&SurfaceKey::main(), &item())
            .await
            .unwrap();
        assert_eq!(outcome.updated, 1);
    }

    #[tokio::test]
    async fn nothing_updated_is_a_failure() {
        let err = dispatcher(2, Ok(0))
            .dispatch(&SurfaceKey::list(), &item())
            .await
            .unwrap_err();
        assert!(matches!(err, PhrasecastError::Dispatch { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn boundary_errors_propagate() {
        let err = dispatcher(1, Err("host gone".to_owned()))
            .dispatch(&SurfaceKey::list(), &item())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("host gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_boundary_times_out() {
        let dispatcher = UpdateDispatcher::new(Arc::new(ScriptedBoundary {
            instances: 1,
            ack: Ok(1),
            delay: Duration::from_secs(60),
        }))
        .with_timeout(Duration::from_secs(5));

        let err = dispatcher
            .dispatch(&SurfaceKey::main(), &item())
            .await
            .unwrap_err();
        assert!(matches!(err, PhrasecastError::DispatchTimeout { .. }));
    }
}
