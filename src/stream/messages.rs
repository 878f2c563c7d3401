use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::snapshot::{Delta, RefreshReason};
use crate::types::Match;

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WelcomeData {
    pub connection_id: u64,
    pub league_keys: Vec<String>,
    pub subscribed_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribedData {
    pub league_keys: Vec<String>,
    pub subscribed_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsUpdateData {
    pub matches: Vec<Match>,
    pub removed_ids: Vec<String>,
    pub league_keys: Vec<String>,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsRefreshData {
    pub reason: RefreshReason,
    pub count: usize,
    pub last_updated: String,
}

/// Every frame the server pushes: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(WelcomeData),
    Subscribed(SubscribedData),
    OddsUpdate(OddsUpdateData),
    OddsRefresh(OddsRefreshData),
}

impl ServerMessage {
    pub fn from_delta(delta: Delta, last_updated: String) -> Self {
        match delta {
            Delta::Partial { changed, removed_ids, league_keys } => {
                ServerMessage::OddsUpdate(OddsUpdateData {
                    matches: changed,
                    removed_ids,
                    league_keys,
                    last_updated,
                })
            }
            Delta::FullRefresh { reason, count } => ServerMessage::OddsRefresh(OddsRefreshData {
                reason,
                count,
                last_updated,
            }),
        }
    }

    /// League keys used for subscription filtering. Empty means "deliver to everyone".
    pub fn league_keys(&self) -> &[String] {
        match self {
            ServerMessage::OddsUpdate(data) => &data.league_keys,
            _ => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::Subscribed(_) => "subscribed",
            ServerMessage::OddsUpdate(_) => "odds_update",
            ServerMessage::OddsRefresh(_) => "odds_refresh",
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawSubscribeData {
    league_keys: Option<Vec<String>>,
}

/// Accepts both `{"type":"subscribe","data":{"league_keys":[...]}}` and the
/// flat `{"type":"subscribe","league_keys":[...]}`.
#[derive(Debug, Deserialize)]
struct RawClientMsg {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    data: Option<RawSubscribeData>,
    league_keys: Option<Vec<String>>,
}

/// Parses a client frame. Returns the requested league keys for a subscribe
/// message (empty = everything), `None` for anything else.
pub fn parse_subscribe(raw: &str) -> Option<Vec<String>> {
    let msg: RawClientMsg = serde_json::from_str(raw).ok()?;
    if msg.msg_type.as_deref() != Some("subscribe") {
        return None;
    }
    let keys = msg
        .data
        .and_then(|d| d.league_keys)
        .or(msg.league_keys)
        .unwrap_or_default();
    Some(normalize_league_keys(keys))
}

/// Trims, lowercases and de-duplicates league keys, dropping empty entries.
pub fn normalize_league_keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Splits a comma-separated query value (`league_keys=a,b,c`).
pub fn parse_league_keys_csv(raw: Option<&str>) -> Vec<String> {
    normalize_league_keys(raw.unwrap_or_default().split(','))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_serializes_with_type_and_data() {
        let msg = ServerMessage::OddsUpdate(OddsUpdateData {
            matches: vec![],
            removed_ids: vec!["x".to_string()],
            league_keys: vec!["premier".to_string()],
            last_updated: "t".to_string(),
        });
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "odds_update");
        assert_eq!(json["data"]["removed_ids"][0], "x");
        assert_eq!(json["data"]["league_keys"][0], "premier");
    }

    #[test]
    fn refresh_carries_reason_and_no_keys() {
        let msg = ServerMessage::from_delta(
            Delta::FullRefresh { reason: RefreshReason::DeltaTooLarge, count: 400 },
            "t".to_string(),
        );
        assert!(msg.league_keys().is_empty());
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "odds_refresh");
        assert_eq!(json["data"]["reason"], "delta_too_large");
        assert_eq!(json["data"]["count"], 400);
    }

    #[test]
    fn parses_nested_and_flat_subscribe() {
        let nested = r#"{"type":"subscribe","data":{"league_keys":["Premier"," laliga ",""]}}"#;
        assert_eq!(
            parse_subscribe(nested),
            Some(vec!["laliga".to_string(), "premier".to_string()])
        );
        let flat = r#"{"type":"subscribe","league_keys":["ucl"]}"#;
        assert_eq!(parse_subscribe(flat), Some(vec!["ucl".to_string()]));
        let reset = r#"{"type":"subscribe","data":{"league_keys":[]}}"#;
        assert_eq!(parse_subscribe(reset), Some(vec![]));
    }

    #[test]
    fn ignores_other_frames() {
        assert_eq!(parse_subscribe(r#"{"type":"ping"}"#), None);
        assert_eq!(parse_subscribe("garbage"), None);
    }

    #[test]
    fn csv_keys_are_normalized() {
        assert_eq!(
            parse_league_keys_csv(Some("premier, LALIGA,,premier")),
            vec!["laliga".to_string(), "premier".to_string()]
        );
        assert!(parse_league_keys_csv(None).is_empty());
    }
}
