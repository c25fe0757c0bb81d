use serde_json::Value;

use super::{int_field, stats_block, text_field, GameModule, StatList};
use crate::models::NamedStat;

pub struct Duels;

impl GameModule for Duels {
    fn key(&self) -> &'static str {
        "DUELS"
    }

    fn extract(&self, player: &Value) -> Option<Vec<NamedStat>> {
        let block = stats_block(player, "Duels")?;
        let wins = int_field(block, "wins");
        let losses = int_field(block, "losses");

        Some(
            StatList::default()
                .text("title", text_field(block, "active_cosmetictitle"))
                .int("winstreak", int_field(block, "current_winstreak"))
                .int("best_winstreak", int_field(block, "best_overall_winstreak"))
                .int("wins", wins)
                .int("losses", losses)
                .int("kills", int_field(block, "kills"))
                .ratio("wlr", wins, losses)
                .finish(),
        )
    }
}
