//! Cached record types and discovery input
//!
//! An [`EnrichedRecord`] is an immutable snapshot. Correcting a display
//! name or attaching stats means building a new record and committing it
//! under the same identifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tabstats_common::Identifier;

/// Neutral colour tag used when a profile carries no rank
pub const DEFAULT_RANK_LABEL: &str = "§7";

/// Prefix rendered in front of a disguised player's rank
pub const NICKED_MARKER: &str = "§f[§cNICKED§f] ";

/// One game statistic value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i64),
    Double(f64),
    Text(String),
}

/// Named statistic inside a game module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedStat {
    pub name: String,
    pub value: StatValue,
}

impl NamedStat {
    pub fn new(name: impl Into<String>, value: StatValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// How a record came to be cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Disguised identity; never carries stats
    Nicked,
    /// Profile fetched successfully
    Enriched,
    /// Retries exhausted; name only
    Bare,
}

/// Enriched player record (cache value)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    id: Identifier,
    display_name: String,
    rank_label: String,
    state: RecordState,
    game_stats: BTreeMap<String, Vec<NamedStat>>,
}

impl EnrichedRecord {
    /// Record for a disguised identity
    pub fn nicked(id: Identifier, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            rank_label: DEFAULT_RANK_LABEL.to_string(),
            state: RecordState::Nicked,
            game_stats: BTreeMap::new(),
        }
    }

    /// Name-only record committed after the retry budget ran out
    pub fn bare(id: Identifier, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            rank_label: DEFAULT_RANK_LABEL.to_string(),
            state: RecordState::Bare,
            game_stats: BTreeMap::new(),
        }
    }

    /// Fully enriched record
    pub fn enriched(
        id: Identifier,
        display_name: impl Into<String>,
        rank_label: impl Into<String>,
        game_stats: BTreeMap<String, Vec<NamedStat>>,
    ) -> Self {
        let rank_label = rank_label.into();
        Self {
            id,
            display_name: display_name.into(),
            rank_label: if rank_label.is_empty() {
                DEFAULT_RANK_LABEL.to_string()
            } else {
                rank_label
            },
            state: RecordState::Enriched,
            game_stats,
        }
    }

    /// Same record re-keyed under another identifier
    pub fn with_id(&self, id: Identifier) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Rank label as rendered, including the nick marker for disguised players
    pub fn rank_label(&self) -> String {
        if self.is_nicked() {
            format!("{}{}", NICKED_MARKER, self.rank_label)
        } else {
            self.rank_label.clone()
        }
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_nicked(&self) -> bool {
        self.state == RecordState::Nicked
    }

    /// Stats for one game module; empty when the module is absent
    pub fn stats(&self, game: &str) -> &[NamedStat] {
        self.game_stats
            .get(game)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn game_stats(&self) -> &BTreeMap<String, Vec<NamedStat>> {
        &self.game_stats
    }
}

/// Entity observed in the current tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Identifier,
    pub name: String,
    #[serde(default)]
    pub display_label: Option<String>,
}

impl Candidate {
    pub fn new(id: Identifier, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            display_label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.display_label = Some(label.into());
        self
    }
}

fn colour_code(name: &str) -> Option<&'static str> {
    let code = match name.to_ascii_uppercase().as_str() {
        "BLACK" => "§0",
        "DARK_BLUE" => "§1",
        "DARK_GREEN" => "§2",
        "DARK_AQUA" => "§3",
        "DARK_RED" => "§4",
        "DARK_PURPLE" => "§5",
        "GOLD" => "§6",
        "GRAY" => "§7",
        "DARK_GRAY" => "§8",
        "BLUE" => "§9",
        "GREEN" => "§a",
        "AQUA" => "§b",
        "RED" => "§c",
        "LIGHT_PURPLE" => "§d",
        "YELLOW" => "§e",
        "WHITE" => "§f",
        _ => return None,
    };
    Some(code)
}

/// Build the rank label from a profile payload.
///
/// Staff ranks win over the monthly package rank, which wins over the
/// regular package rank. Profiles without any rank get [`DEFAULT_RANK_LABEL`].
pub fn rank_label_from_profile(player: &Value) -> String {
    let field = |key: &str| player.get(key).and_then(Value::as_str).unwrap_or("");
    let staff = field("rank");
    let monthly = field("monthlyPackageRank");
    let package = field("newPackageRank");
    let plus = colour_code(field("rankPlusColor")).unwrap_or("§c");

    let eq = |a: &str, b: &str| a.eq_ignore_ascii_case(b);

    if eq(staff, "HELPER") {
        "§9[HELPER] ".to_string()
    } else if eq(staff, "MODERATOR") {
        "§2[MODERATOR] ".to_string()
    } else if eq(staff, "ADMIN") {
        "§c[ADMIN] ".to_string()
    } else if eq(staff, "YOUTUBER") {
        "§c[§fYOUTUBE§c] ".to_string()
    } else if eq(monthly, "SUPERSTAR") {
        format!("§6[MVP{}++§6] ", plus)
    } else if eq(package, "MVP_PLUS") {
        format!("§b[MVP{}+§b] ", plus)
    } else if eq(package, "MVP") {
        "§b[MVP] ".to_string()
    } else if eq(package, "VIP_PLUS") {
        "§a[VIP§6+§a] ".to_string()
    } else if eq(package, "VIP") {
        "§a[VIP] ".to_string()
    } else {
        DEFAULT_RANK_LABEL.to_string()
    }
}
