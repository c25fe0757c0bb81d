//! Report service client
//!
//! Looks up community reports for one or more players in a single POST.
//! Only the report categories in [`ReportType`] are kept; anything else the
//! service returns is dropped during parsing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tabstats_common::config::EnrichmentSettings;

use crate::error::{FetchError, FetchResult};
use crate::services::profile_client::USER_AGENT;

/// Report category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Sniper,
    PossibleSniper,
    LegitSniper,
    ConfirmedCheater,
    BlatantCheater,
    ClosetCheater,
    Caution,
    Account,
    Info,
}

impl ReportType {
    /// Surfacing order when a player has several reports
    pub const PRIORITY: [ReportType; 9] = [
        ReportType::ConfirmedCheater,
        ReportType::BlatantCheater,
        ReportType::ClosetCheater,
        ReportType::Sniper,
        ReportType::PossibleSniper,
        ReportType::LegitSniper,
        ReportType::Caution,
        ReportType::Account,
        ReportType::Info,
    ];

    /// Parse a wire value (trimmed, case-insensitive); unknown values yield `None`
    pub fn from_wire(value: &str) -> Option<Self> {
        let kind = match value.trim().to_ascii_lowercase().as_str() {
            "sniper" => ReportType::Sniper,
            "possible_sniper" => ReportType::PossibleSniper,
            "legit_sniper" => ReportType::LegitSniper,
            "confirmed_cheater" => ReportType::ConfirmedCheater,
            "blatant_cheater" => ReportType::BlatantCheater,
            "closet_cheater" => ReportType::ClosetCheater,
            "caution" => ReportType::Caution,
            "account" => ReportType::Account,
            "info" => ReportType::Info,
            _ => return None,
        };
        Some(kind)
    }

    pub fn wire_value(&self) -> &'static str {
        match self {
            ReportType::Sniper => "sniper",
            ReportType::PossibleSniper => "possible_sniper",
            ReportType::LegitSniper => "legit_sniper",
            ReportType::ConfirmedCheater => "confirmed_cheater",
            ReportType::BlatantCheater => "blatant_cheater",
            ReportType::ClosetCheater => "closet_cheater",
            ReportType::Caution => "caution",
            ReportType::Account => "account",
            ReportType::Info => "info",
        }
    }

    /// Position in [`ReportType::PRIORITY`]; lower wins
    pub fn priority(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    /// Compact tab-list label
    pub fn short_label(&self) -> &'static str {
        match self {
            ReportType::Sniper => "§4S",
            ReportType::PossibleSniper => "§cPS",
            ReportType::LegitSniper => "§cLS",
            ReportType::ConfirmedCheater => "§5CC",
            ReportType::BlatantCheater => "§6BC",
            ReportType::ClosetCheater => "§6CC",
            ReportType::Caution => "§eC",
            ReportType::Account => "§3A",
            ReportType::Info => "§8I",
        }
    }

    /// Label used in chat announcements
    pub fn chat_label(&self) -> &'static str {
        match self {
            ReportType::Sniper => "§4Sniper",
            ReportType::PossibleSniper => "§cPossible Sniper",
            ReportType::LegitSniper => "§cLegit Sniper",
            ReportType::ConfirmedCheater => "§5Confirmed Cheater",
            ReportType::BlatantCheater => "§6Blatant Cheater",
            ReportType::ClosetCheater => "§6Closet Cheater",
            ReportType::Caution => "§eCaution",
            ReportType::Account => "§3Account",
            ReportType::Info => "§8Info",
        }
    }
}

/// One report entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub kind: ReportType,
    pub reason: String,
    pub added_on: String,
}

impl Report {
    pub fn new(kind: ReportType, reason: impl Into<String>, added_on: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            added_on: added_on.into(),
        }
    }
}

/// Normalized lookup identity: trimmed and lowercased
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

/// Source of player reports
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Look up reports for several identities in one call.
    ///
    /// The result is keyed by normalized identity. Every requested identity
    /// has an entry; an empty list means the service holds no report.
    async fn fetch_reports(
        &self,
        key: &str,
        identities: &[String],
    ) -> FetchResult<HashMap<String, Vec<Report>>>;
}

/// HTTP client for the report service
pub struct ReportClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ReportClient {
    pub fn new(settings: &EnrichmentSettings) -> FetchResult<Self> {
        let timeout = Duration::from_millis(settings.request_timeout_ms);
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.report_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReportSource for ReportClient {
    async fn fetch_reports(
        &self,
        key: &str,
        identities: &[String],
    ) -> FetchResult<HashMap<String, Vec<Report>>> {
        let mut requested: Vec<String> = Vec::with_capacity(identities.len());
        for identity in identities.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
            if !requested.iter().any(|r| r == identity) {
                requested.push(identity.to_string());
            }
        }

        let key = key.trim();
        if key.is_empty() || requested.is_empty() {
            return Ok(HashMap::new());
        }

        tracing::debug!(count = requested.len(), "Querying report service");

        let response = self
            .http_client
            .post(format!("{}/player", self.base_url))
            .query(&[("key", key)])
            .header("Accept", "application/json")
            .json(&json!({ "usernames": requested }))
            .send()
            .await
            .map_err(|e| FetchError::RequestFailed(format!("Unable to reach the report service: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        let payload: Value = if body.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&body).map_err(|e| FetchError::MalformedResponse(e.to_string()))?
        };

        if !status.is_success() {
            let message = ["message", "error"]
                .iter()
                .find_map(|k| payload.get(*k).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Report service returned status code {}", status.as_u16()));
            return Err(FetchError::RequestFailed(message));
        }

        Ok(parse_reports(&payload, &requested))
    }
}

/// Parse a report response body.
///
/// Every requested identity gets an entry (empty when absent from the
/// response). Entries with unknown report types are dropped.
pub fn parse_reports(payload: &Value, requested: &[String]) -> HashMap<String, Vec<Report>> {
    let mut results: HashMap<String, Vec<Report>> = requested
        .iter()
        .map(|name| (normalize_identity(name), Vec::new()))
        .collect();

    let Some(players) = payload.get("players").and_then(Value::as_object) else {
        return results;
    };

    for (name, entries) in players {
        let Some(entries) = entries.as_array() else {
            continue;
        };
        let reports = entries.iter().filter_map(to_report).collect();
        results.insert(normalize_identity(name), reports);
    }

    results
}

fn to_report(entry: &Value) -> Option<Report> {
    let kind = ReportType::from_wire(entry.get("type")?.as_str()?)?;
    let text = |key: &str| entry.get(key).and_then(primitive_string);
    let added_on = text("added_on").or_else(|| text("addedOn")).unwrap_or_default();
    let reason = text("reason").unwrap_or_default();
    Some(Report::new(kind, reason, added_on))
}

fn primitive_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        for kind in ReportType::PRIORITY {
            assert_eq!(ReportType::from_wire(kind.wire_value()), Some(kind));
        }
        assert_eq!(ReportType::from_wire(" Blatant_Cheater "), Some(ReportType::BlatantCheater));
        assert_eq!(ReportType::from_wire("griefer"), None);
    }

    #[test]
    fn test_priority_order() {
        assert!(ReportType::ConfirmedCheater.priority() < ReportType::Sniper.priority());
        assert!(ReportType::Sniper.priority() < ReportType::Caution.priority());
        assert_eq!(ReportType::Info.priority(), 8);
    }

    #[test]
    fn test_parse_reports() {
        let payload = serde_json::json!({
            "players": {
                "Steve": [
                    {"type": "sniper", "reason": "queue dodging", "added_on": "2024-01-02"},
                    {"type": "griefer", "reason": "dropped"},
                    {"type": "caution", "addedOn": 1700000000}
                ],
                "Alex": "not a list"
            }
        });
        let requested = vec!["Steve".to_string(), "Alex".to_string(), "Notch".to_string()];
        let reports = parse_reports(&payload, &requested);

        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports["steve"],
            vec![
                Report::new(ReportType::Sniper, "queue dodging", "2024-01-02"),
                Report::new(ReportType::Caution, "", "1700000000"),
            ]
        );
        assert!(reports["alex"].is_empty());
        assert!(reports["notch"].is_empty());
    }

    #[test]
    fn test_parse_reports_without_players() {
        let reports = parse_reports(&serde_json::json!({"success": true}), &["Steve".to_string()]);
        assert_eq!(reports.len(), 1);
        assert!(reports["steve"].is_empty());
    }
}
