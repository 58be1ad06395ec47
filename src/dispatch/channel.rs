//! Channel-backed rendering boundary.
//!
//! [`ChannelBoundary`] keeps the set of placed instances per surface and
//! forwards each render as a [`RenderRequest`] to whichever task owns the
//! actual drawing. The owner answers through the request's `ack` channel
//! with the number of instances it updated.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{InstanceId, RenderingBoundary};
use crate::content::ContentItem;
use crate::error::{PhrasecastError, Result};
use crate::surface::SurfaceKey;

/// One render job for the drawing side.
#[derive(Debug)]
pub struct RenderRequest {
    pub surface: SurfaceKey,
    pub instances: Vec<InstanceId>,
    pub item: ContentItem,
    /// Reply with the number of instances updated.
    pub ack: oneshot::Sender<usize>,
}

/// Rendering boundary that hands work to a receiver over mpsc.
pub struct ChannelBoundary {
    placed: RwLock<BTreeMap<SurfaceKey, BTreeSet<InstanceId>>>,
    request_tx: mpsc::UnboundedSender<RenderRequest>,
}

impl ChannelBoundary {
    /// Create a boundary and the receiving end for render requests.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RenderRequest>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        (
            Self {
                placed: RwLock::new(BTreeMap::new()),
                request_tx,
            },
            request_rx,
        )
    }

    /// Record a newly placed instance of `surface`.
    pub fn place(&self, surface: &SurfaceKey, instance: InstanceId) {
        let mut placed = self.placed.write().unwrap_or_else(|e| e.into_inner());
        placed.entry(surface.clone()).or_default().insert(instance);
    }

    /// Forget an instance. Returns `false` if it was not placed.
    pub fn remove(&self, surface: &SurfaceKey, instance: &InstanceId) -> bool {
        let mut placed = self.placed.write().unwrap_or_else(|e| e.into_inner());
        match placed.get_mut(surface) {
            Some(set) => set.remove(instance),
            None => false,
        }
    }

    /// Number of placed instances of `surface`.
    pub fn placed_count(&self, surface: &SurfaceKey) -> usize {
        let placed = self.placed.read().unwrap_or_else(|e| e.into_inner());
        placed.get(surface).map_or(0, BTreeSet::len)
    }
}

#[async_trait]
impl RenderingBoundary for ChannelBoundary {
    async fn instances(&self, surface: &SurfaceKey) -> Result<Vec<InstanceId>> {
        let placed = self.placed.read().unwrap_or_else(|e| e.into_inner());
        Ok(placed
            .get(surface)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn render(
        &self,
        surface: &SurfaceKey,
        instances: &[InstanceId],
        item: &ContentItem,
    ) -> Result<usize> {
        let (ack, ack_rx) = oneshot::channel();
        let request = RenderRequest {
            surface: surface.clone(),
            instances: instances.to_vec(),
            item: item.clone(),
            ack,
        };

        if self.request_tx.send(request).is_err() {
            warn!(surface = %surface, "render channel closed");
            return Err(PhrasecastError::Dispatch {
                surface: surface.clone(),
                reason: "render channel closed".to_owned(),
            });
        }

        match ack_rx.await {
            Ok(updated) => {
                debug!(surface = %surface, updated, "render acknowledged");
                Ok(updated)
            }
            Err(_) => Err(PhrasecastError::Dispatch {
                surface: surface.clone(),
                reason: "render request dropped without acknowledgement".to_owned(),
            }),
        }
    }
}
