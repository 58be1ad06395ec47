//! Catalog loading.
//!
//! A catalog is a JSON array of [`ContentItem`]s. Items are normalized and
//! validated once at load time; the catalog is static afterwards.

use std::collections::HashSet;
use std::path::Path;

use super::item::ContentItem;
use crate::error::{PhrasecastError, Result};

/// Catalog compiled into the binary.
pub const BUNDLED_CATALOG: &str = include_str!("../../assets/sentences.json");

/// Parse, normalize and validate a JSON catalog.
pub fn parse_catalog(json: &str) -> Result<Vec<ContentItem>> {
    let raw: Vec<ContentItem> = serde_json::from_str(json)
        .map_err(|e| PhrasecastError::Catalog(format!("cannot parse catalog: {e}")))?;
    normalize_catalog(raw)
}

/// Read and parse a catalog file.
pub fn load_catalog_file(path: &Path) -> Result<Vec<ContentItem>> {
    let json = std::fs::read_to_string(path)?;
    parse_catalog(&json)
}

/// Normalize every item and reject invalid or duplicate entries.
pub fn normalize_catalog(raw: Vec<ContentItem>) -> Result<Vec<ContentItem>> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut items = Vec::with_capacity(raw.len());
    for item in raw {
        let item = item.normalized();
        item.validate()?;
        if !seen.insert(item.id) {
            return Err(PhrasecastError::Catalog(format!(
                "duplicate item id {}",
                item.id
            )));
        }
        items.push(item);
    }
    Ok(items)
}
