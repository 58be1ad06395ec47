//! Sentence catalog and selection.

pub mod catalog;
pub mod item;
pub mod store;

pub use item::{ContentItem, Tier};
pub use store::{ContentStore, PRIMARY_TIER_WEIGHT, SECONDARY_TIER_WEIGHT};
