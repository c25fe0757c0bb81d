//! Per-game stat extraction
//!
//! Each game module reads its own block out of a profile payload and turns
//! it into a list of [`NamedStat`]s. Modules are independent: one game's
//! block being absent or malformed never affects another.

mod bedwars;
mod duels;
mod skywars;

pub use bedwars::Bedwars;
pub use duels::Duels;
pub use skywars::SkyWars;

use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{NamedStat, StatValue};

/// Stat extractor for one game
pub trait GameModule: Send + Sync {
    /// Key under which the stats are stored on the record
    fn key(&self) -> &'static str;

    /// Extract stats from the `player` object of a profile payload.
    ///
    /// Returns `None` when the payload has no block for this game.
    fn extract(&self, player: &Value) -> Option<Vec<NamedStat>>;
}

/// All game modules known to the pipeline
pub fn default_modules() -> Vec<Box<dyn GameModule>> {
    vec![Box::new(Bedwars), Box::new(Duels), Box::new(SkyWars)]
}

/// Run every module over a profile and collect the non-empty results
pub fn extract_all(
    modules: &[Box<dyn GameModule>],
    player: &Value,
) -> BTreeMap<String, Vec<NamedStat>> {
    modules
        .iter()
        .filter_map(|module| {
            module
                .extract(player)
                .filter(|stats| !stats.is_empty())
                .map(|stats| (module.key().to_string(), stats))
        })
        .collect()
}

/// `player.stats.<name>` object, if present
pub(crate) fn stats_block<'a>(player: &'a Value, name: &str) -> Option<&'a Value> {
    player
        .get("stats")
        .and_then(|stats| stats.get(name))
        .filter(|block| block.is_object())
}

/// Integer field, accepting numbers and numeric strings
pub(crate) fn int_field(block: &Value, key: &str) -> Option<i64> {
    match block.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn text_field(block: &Value, key: &str) -> Option<String> {
    block.get(key).and_then(Value::as_str).map(str::to_string)
}

/// `a / b` rounded to two decimals; a zero divisor yields `a`
pub(crate) fn ratio(a: i64, b: i64) -> f64 {
    if b == 0 {
        return a as f64;
    }
    ((a as f64 / b as f64) * 100.0).round() / 100.0
}

/// Collects stats in display order, skipping absent fields
#[derive(Default)]
pub(crate) struct StatList {
    stats: Vec<NamedStat>,
}

impl StatList {
    pub(crate) fn int(&mut self, name: &str, value: Option<i64>) -> &mut Self {
        if let Some(v) = value {
            self.stats.push(NamedStat::new(name, StatValue::Int(v)));
        }
        self
    }

    pub(crate) fn text(&mut self, name: &str, value: Option<String>) -> &mut Self {
        if let Some(v) = value {
            self.stats.push(NamedStat::new(name, StatValue::Text(v)));
        }
        self
    }

    /// Derived ratio, only when both operands are present
    pub(crate) fn ratio(&mut self, name: &str, a: Option<i64>, b: Option<i64>) -> &mut Self {
        if let (Some(a), Some(b)) = (a, b) {
            self.stats
                .push(NamedStat::new(name, StatValue::Double(ratio(a, b))));
        }
        self
    }

    pub(crate) fn finish(&mut self) -> Vec<NamedStat> {
        std::mem::take(&mut self.stats)
    }
}
