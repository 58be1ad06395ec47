//! Content item and proficiency tier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PhrasecastError;

/// Ordered proficiency tier (CEFR levels, tier 1..6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 6] = [Tier::A1, Tier::A2, Tier::B1, Tier::B2, Tier::C1, Tier::C2];

    /// The lowest tier.
    pub const LOWEST: Tier = Tier::A1;

    /// Canonical string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }

    /// Numeric rank, 1 for A1 through 6 for C2.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::A1 => 1,
            Self::A2 => 2,
            Self::B1 => 3,
            Self::B2 => 4,
            Self::C1 => 5,
            Self::C2 => 6,
        }
    }

    /// Parse `"A1"`, `"a1"` or the numeric rank `"1"`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A1" | "1" => Some(Self::A1),
            "A2" | "2" => Some(Self::A2),
            "B1" | "3" => Some(Self::B1),
            "B2" | "4" => Some(Self::B2),
            "C1" | "5" => Some(Self::C1),
            "C2" | "6" => Some(Self::C2),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PhrasecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| PhrasecastError::Validation(format!("unknown tier '{s}'")))
    }
}

/// A single sentence with its translation.
///
/// Immutable once the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Unique catalog identifier.
    pub id: u64,
    /// Sentence in the target language.
    pub text: String,
    /// Translation into the user's language.
    pub translation: String,
    /// Proficiency tier.
    pub tier: Tier,
    /// Topic label, e.g. `"Greetings"`.
    pub topic: String,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

impl ContentItem {
    /// Copy with surrounding whitespace trimmed. Identity is unchanged.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            id: self.id,
            text: self.text.trim().to_owned(),
            translation: self.translation.trim().to_owned(),
            tier: self.tier,
            topic: self.topic.trim().to_owned(),
            created_at: self.created_at,
        }
    }

    /// Check the post-normalization invariants.
    pub fn validate(&self) -> crate::Result<()> {
        let problem = if self.text.is_empty() {
            Some("empty text")
        } else if self.translation.is_empty() {
            Some("empty translation")
        } else if self.topic.is_empty() {
            Some("empty topic")
        } else if self.created_at == 0 {
            Some("missing creation timestamp")
        } else {
            None
        };
        match problem {
            Some(p) => Err(PhrasecastError::Catalog(format!("item {}: {p}", self.id))),
            None => Ok(()),
        }
    }
}
