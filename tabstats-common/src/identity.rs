//! Player identifiers and provenance classification
//!
//! An [`Identifier`] is a 128-bit UUID whose version nibble doubles as a
//! provenance tag. The tag decides whether an observed entity is a real
//! player, an ephemeral lobby entity, a disguised ("nicked") player, or
//! something that must never enter the cache at all.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Label prefix carried by non-participant entities (shopkeepers, holograms)
pub const NON_PARTICIPANT_MARKER: &str = "[NPC]";

/// Formatting-code prefix used in display labels
const COLOR_CHAR: char = '§';

/// Player identifier (cache key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Uuid);

impl Identifier {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Build an identifier from a raw value, forcing its provenance tag.
    ///
    /// Only the version nibble is overwritten; all other bits of `value`
    /// are kept as-is.
    pub fn from_parts(value: u128, tag: u8) -> Self {
        let mut bytes = value.to_be_bytes();
        bytes[6] = (bytes[6] & 0x0f) | ((tag & 0x0f) << 4);
        Self(Uuid::from_bytes(bytes))
    }

    /// Generate a random identifier with the given provenance tag
    pub fn random(tag: u8) -> Self {
        Self::from_parts(Uuid::new_v4().as_u128(), tag)
    }

    /// Provenance tag (UUID version nibble)
    pub fn tag(&self) -> u8 {
        self.0.get_version_num() as u8
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// 32-char lowercase hex form, as expected by the profile service
    pub fn compact(&self) -> String {
        self.0.simple().to_string()
    }

    /// Classify this identifier by its provenance tag
    pub fn kind(&self) -> IdentityKind {
        classify(*self)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Identifier {
    type Err = Error;

    /// Accepts both the hyphenated and the compact 32-char form
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("Invalid identifier '{}': {}", s, e)))
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Provenance class of an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Tag 4: a real player account
    Real,
    /// Tag 2: lobby / replay entity, may or may not be backed by a profile
    Ephemeral,
    /// Tag 1: disguised player, no enrichment is attempted
    Nicked,
    /// Tag 3 (and anything unrecognised): filtered out upstream
    Ignored,
}

/// Classify an identifier purely from its provenance tag
pub fn classify(id: Identifier) -> IdentityKind {
    match id.tag() {
        4 => IdentityKind::Real,
        2 => IdentityKind::Ephemeral,
        1 => IdentityKind::Nicked,
        _ => IdentityKind::Ignored,
    }
}

/// Player names are 3-16 characters of `[A-Za-z0-9_]`
pub fn is_valid_name(name: &str) -> bool {
    (3..=16).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Remove `§x` formatting codes from a label
pub fn strip_color(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut chars = label.chars();
    while let Some(c) = chars.next() {
        if c == COLOR_CHAR {
            // Drop the code character that follows, if any
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

/// True when a display label marks a non-participant entity
pub fn is_non_participant(display_label: &str) -> bool {
    strip_color(display_label)
        .trim()
        .starts_with(NON_PARTICIPANT_MARKER)
}

/// Discovery guard applied before classification.
///
/// Entities failing it are never classified, fetched or cached.
pub fn passes_discovery_guard(name: &str, display_label: Option<&str>) -> bool {
    if !is_valid_name(name) {
        return false;
    }
    !display_label.is_some_and(is_non_participant)
}
