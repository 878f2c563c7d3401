use serde::{Deserialize, Serialize};

use crate::league::slug;

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// One bookmaker's quoted prices for a match. A price <= 1.0 means "no price".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BookmakerOdds {
    #[serde(default, alias = "bookmaker")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_odds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_odds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_odds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl BookmakerOdds {
    /// Filters out sentinel prices (<= 1.0) that scrapers emit for missing quotes.
    pub fn valid_price(price: Option<f64>) -> Option<f64> {
        price.filter(|p| p.is_finite() && *p > 1.0)
    }
}

// ---------------------------------------------------------------------------
// Match / league group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Match {
    /// Explicit id from the scraper. Filled with the derived identity on ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub home_team: String,
    #[serde(default)]
    pub away_team: String,
    #[serde(default)]
    pub league: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub league_key: Option<String>,
    /// Kickoff, epoch seconds.
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub bookmakers: Vec<BookmakerOdds>,
}

impl Match {
    /// Stable identity: the explicit id when present, otherwise derived from
    /// teams and kickoff so the same fixture always maps to the same key.
    pub fn identity(&self) -> String {
        match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => derive_match_id(&self.home_team, &self.away_team, self.start_time),
        }
    }
}

pub fn derive_match_id(home_team: &str, away_team: &str, start_time: i64) -> String {
    format!("{}_vs_{}_{}", slug(home_team), slug(away_team), start_time)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LeagueGroup {
    #[serde(default)]
    pub league: String,
    #[serde(default)]
    pub league_key: Option<String>,
    #[serde(default)]
    pub matches: Vec<Match>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Timestamps and TTLs of the two inputs of a merged response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceMeta {
    pub full_last_updated: Option<String>,
    pub fast_last_updated: Option<String>,
    pub full_cache_ttl: Option<u64>,
    pub fast_cache_ttl: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
    pub returned: usize,
    pub has_more: bool,
}

/// Full odds state at one point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OddsResponse {
    #[serde(default)]
    pub leagues: Vec<LeagueGroup>,
    #[serde(default)]
    pub total_matches: usize,
    #[serde(default)]
    pub bookmakers_count: usize,
    /// ISO-8601 UTC. Comparable as a string.
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub cache_ttl: u64,
    /// Set when the full snapshot came from the durable backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<SourceMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl OddsResponse {
    pub fn iter_matches(&self) -> impl Iterator<Item = &Match> {
        self.leagues.iter().flat_map(|g| g.matches.iter())
    }

    /// Recomputes `total_matches` and `bookmakers_count` from `leagues`.
    pub fn recount(&mut self) {
        let mut names = std::collections::HashSet::new();
        let mut total = 0usize;
        for m in self.iter_matches() {
            total += 1;
            for b in &m.bookmakers {
                names.insert(b.name.as_str());
            }
        }
        let bookmakers = names.len();
        self.total_matches = total;
        self.bookmakers_count = bookmakers;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Exhaustive full scan.
    Full,
    /// Additive overlay from the fast scraper.
    Fast,
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SnapshotKind::Full => "full",
            SnapshotKind::Fast => "fast",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_explicit_id() {
        let m = Match {
            id: Some("abc".to_string()),
            home_team: "Arsenal".to_string(),
            away_team: "Chelsea".to_string(),
            start_time: 100,
            ..Default::default()
        };
        assert_eq!(m.identity(), "abc");
    }

    #[test]
    fn identity_is_derived_deterministically() {
        let a = Match {
            home_team: "Manchester United".to_string(),
            away_team: "Chelsea FC".to_string(),
            start_time: 1_700_000_000,
            ..Default::default()
        };
        let b = Match { id: Some("  ".to_string()), league: "other label".to_string(), ..a.clone() };
        assert_eq!(a.identity(), "manchester-united_vs_chelsea-fc_1700000000");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn bookmaker_accepts_legacy_field_name_and_missing_prices() {
        let b: BookmakerOdds =
            serde_json::from_str(r#"{"bookmaker":"Bet365","home_odds":1.8}"#).unwrap();
        assert_eq!(b.name, "Bet365");
        assert_eq!(b.draw_odds, None);
        assert_eq!(BookmakerOdds::valid_price(Some(1.0)), None);
        assert_eq!(BookmakerOdds::valid_price(Some(1.8)), Some(1.8));
    }

    #[test]
    fn recount_counts_distinct_bookmakers() {
        let bm = |n: &str| BookmakerOdds { name: n.to_string(), ..Default::default() };
        let mut resp = OddsResponse {
            leagues: vec![LeagueGroup {
                league: "X".to_string(),
                league_key: None,
                matches: vec![
                    Match { bookmakers: vec![bm("a"), bm("b")], ..Default::default() },
                    Match { bookmakers: vec![bm("b"), bm("c")], ..Default::default() },
                ],
            }],
            ..Default::default()
        };
        resp.recount();
        assert_eq!(resp.total_matches, 2);
        assert_eq!(resp.bookmakers_count, 3);
    }
}
