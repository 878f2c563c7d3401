use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{SCOREBOARD_CACHE_TTL_SECS, SCOREBOARD_TIMEOUT_SECS};
use crate::error::Result;

/// Scoreboard path segments (`{sport}/{league}`) per league key.
const SCOREBOARD_PATHS: &[(&str, &str, &str)] = &[
    ("premier", "soccer", "eng.1"),
    ("championship", "soccer", "eng.2"),
    ("laliga", "soccer", "esp.1"),
    ("seriea", "soccer", "ita.1"),
    ("bundesliga", "soccer", "ger.1"),
    ("bundesliga2", "soccer", "ger.2"),
    ("ligue1", "soccer", "fra.1"),
    ("eredivisie", "soccer", "ned.1"),
    ("primeira", "soccer", "por.1"),
    ("scottish", "soccer", "sco.1"),
    ("austria", "soccer", "aut.1"),
    ("rpl", "soccer", "rus.1"),
    ("brasileirao", "soccer", "bra.1"),
    ("mls", "soccer", "usa.1"),
    ("ucl", "soccer", "uefa.champions"),
    ("uel", "soccer", "uefa.europa"),
    ("uecl", "soccer", "uefa.europa.conf"),
    ("afcl", "soccer", "afc.champions"),
    ("nba", "basketball", "nba"),
    ("ncaab", "basketball", "mens-college-basketball"),
    ("nfl", "football", "nfl"),
    ("ncaaf", "football", "college-football"),
    ("nhl", "hockey", "nhl"),
    ("mlb", "baseball", "mlb"),
];

pub fn scoreboard_path(league_key: &str) -> Option<(&'static str, &'static str)> {
    SCOREBOARD_PATHS
        .iter()
        .find(|(key, _, _)| *key == league_key)
        .map(|(_, sport, league)| (*sport, *league))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamScore {
    pub name: String,
    pub score: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveScore {
    pub id: String,
    pub name: String,
    /// `pre`, `in` or `post`.
    pub state: String,
    pub detail: Option<String>,
    pub start_time: Option<String>,
    pub home: TeamScore,
    pub away: TeamScore,
}

/// Which events to return. Anything unrecognised means all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    All,
    Pre,
    In,
    Post,
}

impl StateFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("pre") => StateFilter::Pre,
            Some("in") => StateFilter::In,
            Some("post") => StateFilter::Post,
            _ => StateFilter::All,
        }
    }

    fn keeps(self, state: &str) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Pre => state == "pre",
            StateFilter::In => state == "in",
            StateFilter::Post => state == "post",
        }
    }
}

struct CachedBoard {
    fetched_at: Instant,
    events: Arc<Vec<LiveScore>>,
}

/// Thin client over the public scoreboard API with a short per-league cache.
pub struct ScoreboardClient {
    http: reqwest::Client,
    base_url: String,
    ttl: Duration,
    cache: DashMap<String, CachedBoard>,
}

impl ScoreboardClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SCOREBOARD_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl: Duration::from_secs(SCOREBOARD_CACHE_TTL_SECS),
            cache: DashMap::new(),
        })
    }

    /// Fetches every requested league concurrently. Unknown keys and failed
    /// fetches are left out of the result.
    pub async fn live_scores(&self, league_keys: &[String], filter: StateFilter) -> BTreeMap<String, Vec<LiveScore>> {
        let fetches = league_keys.iter().filter_map(|key| {
            let (sport, league) = scoreboard_path(key)?;
            Some(async move { (key.clone(), self.league_events(key, sport, league).await) })
        });

        let mut out = BTreeMap::new();
        for (key, result) in join_all(fetches).await {
            match result {
                Ok(events) => {
                    let kept = events.iter().filter(|e| filter.keeps(&e.state)).cloned().collect();
                    out.insert(key, kept);
                }
                Err(e) => warn!(league_key = %key, "scoreboard fetch failed: {e}"),
            }
        }
        out
    }

    async fn league_events(&self, key: &str, sport: &str, league: &str) -> Result<Arc<Vec<LiveScore>>> {
        if let Some(cached) = self.cache.get(key) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.events));
            }
        }

        let url = format!("{}/{}/{}/scoreboard", self.base_url, sport, league);
        let body: serde_json::Value = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let events = Arc::new(parse_scoreboard(&body));
        debug!(league_key = key, events = events.len(), "scoreboard refreshed");

        self.cache.insert(
            key.to_string(),
            CachedBoard {
                fetched_at: Instant::now(),
                events: Arc::clone(&events),
            },
        );
        Ok(events)
    }
}

/// Reduces a scoreboard payload to the fields the frontend renders. Events
/// without both competitors are skipped.
pub fn parse_scoreboard(body: &serde_json::Value) -> Vec<LiveScore> {
    let Some(events) = body["events"].as_array() else {
        return Vec::new();
    };
    events.iter().filter_map(parse_event).collect()
}

fn parse_event(event: &serde_json::Value) -> Option<LiveScore> {
    let competitors = event["competitions"].get(0)?["competitors"].as_array()?;
    let side = |which: &str| {
        competitors
            .iter()
            .find(|c| c["homeAway"].as_str() == Some(which))
            .map(|c| TeamScore {
                name: c["team"]["displayName"]
                    .as_str()
                    .or_else(|| c["team"]["name"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: c["score"].as_str().map(str::to_string),
            })
    };
    let status = &event["status"]["type"];

    Some(LiveScore {
        id: event["id"].as_str().unwrap_or_default().to_string(),
        name: event["name"].as_str().unwrap_or_default().to_string(),
        state: status["state"].as_str().unwrap_or("pre").to_string(),
        detail: status["shortDetail"]
            .as_str()
            .or_else(|| status["detail"].as_str())
            .map(str::to_string),
        start_time: event["date"].as_str().map(str::to_string),
        home: side("home")?,
        away: side("away")?,
    })
}
