//! User selection criteria: selected tiers, primary tier, topics.
//!
//! Persisted layout (namespace `criteria`):
//!
//! | Key | Type |
//! |-----|------|
//! | `selected_tiers` | set of tier labels |
//! | `primary_tier` | tier label |
//! | `selected_topics` | set of strings |
//! | `onboarding_completed` | bool |
//! | `proficiency_level` | legacy single tier, migrated on load |
//!
//! [`UserCriteria::with_safe_defaults`] is applied on every load and every
//! update so call sites never see an inconsistent combination.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::content::Tier;
use crate::error::{PhrasecastError, Result};
use crate::storage::{KeyValueStore, NS_CRITERIA, WriteBehind, encode_json, get_json, put_json};

/// Topic used when a completed onboarding left the topic set empty.
pub const DEFAULT_TOPIC: &str = "Daily Life";

const KEY_SELECTED_TIERS: &str = "selected_tiers";
const KEY_PRIMARY_TIER: &str = "primary_tier";
const KEY_SELECTED_TOPICS: &str = "selected_topics";
const KEY_ONBOARDING_COMPLETED: &str = "onboarding_completed";
const KEY_LEGACY_TIER: &str = "proficiency_level";

/// What content the user wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCriteria {
    /// Tiers content may be drawn from.
    pub selected_tiers: BTreeSet<Tier>,
    /// Favoured tier; a member of `selected_tiers` once repaired.
    pub primary_tier: Tier,
    /// Topics content may be drawn from.
    pub selected_topics: BTreeSet<String>,
    /// Whether first-run onboarding has finished.
    pub onboarding_completed: bool,
}

impl Default for UserCriteria {
    fn default() -> Self {
        Self {
            selected_tiers: BTreeSet::new(),
            primary_tier: Tier::LOWEST,
            selected_topics: BTreeSet::new(),
            onboarding_completed: false,
        }
    }
}

impl UserCriteria {
    /// Criteria for exactly one tier.
    #[must_use]
    pub fn single_tier(tier: Tier, topics: impl IntoIterator<Item = String>) -> Self {
        Self {
            selected_tiers: BTreeSet::from([tier]),
            primary_tier: tier,
            selected_topics: topics.into_iter().collect(),
            onboarding_completed: true,
        }
    }

    /// Repair corrupt or incomplete combinations.
    ///
    /// - post-onboarding empty tier set becomes `{lowest tier}`
    /// - a primary tier outside the selected set becomes the lowest selected tier
    /// - post-onboarding empty topic set becomes `{DEFAULT_TOPIC}`
    #[must_use]
    pub fn with_safe_defaults(mut self) -> Self {
        self.selected_topics = self
            .selected_topics
            .into_iter()
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect();

        if self.onboarding_completed && self.selected_tiers.is_empty() {
            self.selected_tiers.insert(Tier::LOWEST);
        }
        if !self.selected_tiers.contains(&self.primary_tier) {
            if let Some(lowest) = self.selected_tiers.first().copied() {
                self.primary_tier = lowest;
            }
        }
        if self.onboarding_completed && self.selected_topics.is_empty() {
            self.selected_topics.insert(DEFAULT_TOPIC.to_owned());
        }
        self
    }

    /// `true` when both the tier and topic sets are non-empty.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.selected_tiers.is_empty() && !self.selected_topics.is_empty()
    }

    /// Fail with [`PhrasecastError::Validation`] unless configured.
    pub fn validate(&self) -> Result<()> {
        if self.selected_tiers.is_empty() {
            return Err(PhrasecastError::Validation(
                "no proficiency tier selected".to_owned(),
            ));
        }
        if self.selected_topics.is_empty() {
            return Err(PhrasecastError::Validation("no topic selected".to_owned()));
        }
        Ok(())
    }
}

/// Pure repair function applied on every load.
#[must_use]
pub fn repair(criteria: UserCriteria) -> UserCriteria {
    criteria.with_safe_defaults()
}

/// Persisted, observable user criteria.
pub struct CriteriaStore {
    state: watch::Sender<UserCriteria>,
    writer: WriteBehind,
}

impl CriteriaStore {
    /// Load criteria, migrating the legacy single-tier key when needed.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let criteria = repair(read_criteria(store.as_ref())?);
        let (state, _rx) = watch::channel(criteria);
        Ok(Self {
            state,
            writer: WriteBehind::new(store, NS_CRITERIA),
        })
    }

    /// Snapshot of the current criteria.
    pub fn current(&self) -> UserCriteria {
        self.state.borrow().clone()
    }

    /// Change notifications.
    pub fn subscribe(&self) -> watch::Receiver<UserCriteria> {
        self.state.subscribe()
    }

    /// Mutate, repair, publish and persist. Returns the repaired criteria.
    pub fn update<F>(&self, mutate: F) -> UserCriteria
    where
        F: FnOnce(&mut UserCriteria),
    {
        self.state.send_modify(|criteria| {
            let mut next = criteria.clone();
            mutate(&mut next);
            *criteria = repair(next);
        });
        self.persist_all();
        self.current()
    }

    /// Record the onboarding choices and mark onboarding complete.
    pub fn complete_onboarding(
        &self,
        tiers: BTreeSet<Tier>,
        primary: Tier,
        topics: BTreeSet<String>,
    ) -> UserCriteria {
        let criteria = self.update(|c| {
            c.selected_tiers = tiers;
            c.primary_tier = primary;
            c.selected_topics = topics;
            c.onboarding_completed = true;
        });
        info!(
            tiers = ?criteria.selected_tiers,
            primary = %criteria.primary_tier,
            topics = criteria.selected_topics.len(),
            "onboarding completed"
        );
        criteria
    }

    /// Wait for pending durable writes.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    fn persist_all(&self) {
        let rx = self.state.subscribe();
        self.writer.persist(KEY_SELECTED_TIERS, move || {
            encode_json(&tier_labels(&rx.borrow().selected_tiers))
        });
        let rx = self.state.subscribe();
        self.writer.persist(KEY_PRIMARY_TIER, move || {
            encode_json(rx.borrow().primary_tier.as_str())
        });
        let rx = self.state.subscribe();
        self.writer.persist(KEY_SELECTED_TOPICS, move || {
            encode_json(&rx.borrow().selected_topics)
        });
        let rx = self.state.subscribe();
        self.writer.persist(KEY_ONBOARDING_COMPLETED, move || {
            encode_json(&rx.borrow().onboarding_completed)
        });
    }
}

fn tier_labels(tiers: &BTreeSet<Tier>) -> BTreeSet<&'static str> {
    tiers.iter().map(|t| t.as_str()).collect()
}

fn parse_tiers(labels: BTreeSet<String>) -> BTreeSet<Tier> {
    labels
        .into_iter()
        .filter_map(|label| {
            let parsed = Tier::parse(&label);
            if parsed.is_none() {
                warn!(label, "ignoring unknown persisted tier");
            }
            parsed
        })
        .collect()
}

fn read_criteria(store: &dyn KeyValueStore) -> Result<UserCriteria> {
    let onboarding_completed: bool =
        get_json(store, NS_CRITERIA, KEY_ONBOARDING_COMPLETED)?.unwrap_or(false);
    let selected_topics: BTreeSet<String> =
        get_json(store, NS_CRITERIA, KEY_SELECTED_TOPICS)?.unwrap_or_default();
    let stored_tiers: Option<BTreeSet<String>> = get_json(store, NS_CRITERIA, KEY_SELECTED_TIERS)?;
    let stored_primary: Option<String> = get_json(store, NS_CRITERIA, KEY_PRIMARY_TIER)?;

    let (selected_tiers, primary_tier) = match stored_tiers {
        Some(labels) => (
            parse_tiers(labels),
            stored_primary.as_deref().and_then(Tier::parse),
        ),
        None => match migrate_legacy_tier(store)? {
            Some(tier) => (BTreeSet::from([tier]), Some(tier)),
            None => (BTreeSet::new(), None),
        },
    };

    Ok(UserCriteria {
        selected_tiers,
        primary_tier: primary_tier.unwrap_or(Tier::LOWEST),
        selected_topics,
        onboarding_completed,
    })
}

/// Convert `proficiency_level` into the multi-tier keys, then drop it.
fn migrate_legacy_tier(store: &dyn KeyValueStore) -> Result<Option<Tier>> {
    let Some(label) = get_json::<String>(store, NS_CRITERIA, KEY_LEGACY_TIER)? else {
        return Ok(None);
    };
    let Some(tier) = Tier::parse(&label) else {
        warn!(label, "ignoring unparseable legacy proficiency level");
        return Ok(None);
    };

    put_json(store, NS_CRITERIA, KEY_SELECTED_TIERS, &BTreeSet::from([tier.as_str()]))?;
    put_json(store, NS_CRITERIA, KEY_PRIMARY_TIER, tier.as_str())?;
    store.remove(NS_CRITERIA, KEY_LEGACY_TIER)?;
    info!(tier = %tier, "migrated legacy proficiency level");
    Ok(Some(tier))
}
