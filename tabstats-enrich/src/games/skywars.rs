use serde_json::Value;

use super::{int_field, stats_block, text_field, GameModule, StatList};
use crate::models::NamedStat;

pub struct SkyWars;

impl GameModule for SkyWars {
    fn key(&self) -> &'static str {
        "SKYWARS"
    }

    fn extract(&self, player: &Value) -> Option<Vec<NamedStat>> {
        let block = stats_block(player, "SkyWars")?;
        let wins = int_field(block, "wins");
        let losses = int_field(block, "losses");
        let kills = int_field(block, "kills");
        let deaths = int_field(block, "deaths");

        Some(
            StatList::default()
                .text("level", text_field(block, "levelFormatted"))
                .int("wins", wins)
                .int("losses", losses)
                .int("kills", kills)
                .int("deaths", deaths)
                .ratio("kdr", kills, deaths)
                .ratio("wlr", wins, losses)
                .finish(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatValue;
    use serde_json::json;

    #[test]
    fn test_ratio_needs_both_operands() {
        let player = json!({"stats": {"SkyWars": {"kills": 12, "wins": 3, "losses": 0}}});
        let stats = SkyWars.extract(&player).unwrap();
        assert!(stats.iter().all(|s| s.name != "kdr"));
        let wlr = stats.iter().find(|s| s.name == "wlr").unwrap();
        assert_eq!(wlr.value, StatValue::Double(3.0));
    }
}
