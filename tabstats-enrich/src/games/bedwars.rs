use serde_json::Value;

use super::{int_field, stats_block, GameModule, StatList};
use crate::models::NamedStat;

pub struct Bedwars;

impl GameModule for Bedwars {
    fn key(&self) -> &'static str {
        "BEDWARS"
    }

    fn extract(&self, player: &Value) -> Option<Vec<NamedStat>> {
        let block = stats_block(player, "Bedwars")?;

        // Star level lives under achievements, not the stats block
        let star = player
            .get("achievements")
            .and_then(|a| int_field(a, "bedwars_level"));

        let wins = int_field(block, "wins_bedwars");
        let losses = int_field(block, "losses_bedwars");
        let final_kills = int_field(block, "final_kills_bedwars");
        let final_deaths = int_field(block, "final_deaths_bedwars");
        let beds_broken = int_field(block, "beds_broken_bedwars");
        let beds_lost = int_field(block, "beds_lost_bedwars");

        Some(
            StatList::default()
                .int("star", star)
                .int("wins", wins)
                .int("losses", losses)
                .int("final_kills", final_kills)
                .int("final_deaths", final_deaths)
                .int("beds_broken", beds_broken)
                .int("beds_lost", beds_lost)
                .int("winstreak", int_field(block, "winstreak"))
                .ratio("fkdr", final_kills, final_deaths)
                .ratio("wlr", wins, losses)
                .ratio("bblr", beds_broken, beds_lost)
                .finish(),
        )
    }
}
