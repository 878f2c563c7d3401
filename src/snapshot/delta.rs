use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::types::{Match, OddsResponse, SnapshotKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    NoPreviousCache,
    DeltaTooLarge,
}

impl std::fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefreshReason::NoPreviousCache => "no_previous_cache",
            RefreshReason::DeltaTooLarge => "delta_too_large",
        };
        write!(f, "{s}")
    }
}

/// Result of diffing two snapshots of the same kind. "No change" is `None`
/// from [`compute_delta`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Clients must refetch everything.
    FullRefresh { reason: RefreshReason, count: usize },
    Partial {
        changed: Vec<Match>,
        removed_ids: Vec<String>,
        /// Empty when any affected match has no resolved key; subscribers then
        /// cannot be filtered and everyone receives the update.
        league_keys: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    /// The next snapshot is complete: anything missing from it was removed.
    Exhaustive,
    /// The next snapshot only adds or corrects; nothing is ever removed.
    Additive,
}

impl From<SnapshotKind> for DeltaMode {
    fn from(kind: SnapshotKind) -> Self {
        match kind {
            SnapshotKind::Full => DeltaMode::Exhaustive,
            SnapshotKind::Fast => DeltaMode::Additive,
        }
    }
}

/// Content signature of a match. Equal signatures mean "unchanged".
/// Bookmaker order does not matter.
pub fn match_signature(m: &Match) -> String {
    let mut books: Vec<String> = m
        .bookmakers
        .iter()
        .map(|b| {
            format!(
                "{}:{}:{}:{}",
                b.name,
                fmt_price(b.home_odds),
                fmt_price(b.draw_odds),
                fmt_price(b.away_odds)
            )
        })
        .collect();
    books.sort();
    format!(
        "{}|{}|{}|{}|{}",
        m.home_team,
        m.away_team,
        m.start_time,
        m.league,
        books.join(";")
    )
}

fn fmt_price(price: Option<f64>) -> String {
    price.map(|p| p.to_string()).unwrap_or_default()
}

/// Diffs `next` against `previous`.
///
/// Returns `None` when nothing changed, `FullRefresh` when there is nothing to
/// diff against or when `changed + removed` exceeds `max_changes`.
pub fn compute_delta(
    previous: Option<&OddsResponse>,
    next: &OddsResponse,
    max_changes: usize,
    mode: DeltaMode,
) -> Option<Delta> {
    let previous = match previous {
        Some(p) if p.iter_matches().next().is_some() => p,
        _ => {
            return Some(Delta::FullRefresh {
                reason: RefreshReason::NoPreviousCache,
                count: next.iter_matches().count(),
            })
        }
    };

    // identity -> (signature, league key)
    let mut index: HashMap<String, (String, Option<String>)> = HashMap::new();
    for group in &previous.leagues {
        for m in &group.matches {
            let key = m.league_key.clone().or_else(|| group.league_key.clone());
            index.insert(m.identity(), (match_signature(m), key));
        }
    }

    let mut changed: Vec<Match> = Vec::new();
    let mut league_keys: BTreeSet<String> = BTreeSet::new();
    let mut unresolved = false;

    for group in &next.leagues {
        for m in &group.matches {
            let identity = m.identity();
            let is_changed = match index.remove(&identity) {
                Some((signature, _)) => signature != match_signature(m),
                None => true,
            };
            if !is_changed {
                continue;
            }
            match m.league_key.as_ref().or(group.league_key.as_ref()) {
                Some(key) => {
                    league_keys.insert(key.clone());
                }
                None => unresolved = true,
            }
            let mut m = m.clone();
            m.id = Some(identity);
            changed.push(m);
        }
    }

    let mut removed_ids: Vec<String> = Vec::new();
    if mode == DeltaMode::Exhaustive {
        for (identity, (_, key)) in index {
            match key {
                Some(key) => {
                    league_keys.insert(key);
                }
                None => unresolved = true,
            }
            removed_ids.push(identity);
        }
        removed_ids.sort();
    }

    let total = changed.len() + removed_ids.len();
    if total == 0 {
        return None;
    }
    if total > max_changes {
        return Some(Delta::FullRefresh {
            reason: RefreshReason::DeltaTooLarge,
            count: total,
        });
    }

    let league_keys = if unresolved {
        Vec::new()
    } else {
        league_keys.into_iter().collect()
    };
    Some(Delta::Partial {
        changed,
        removed_ids,
        league_keys,
    })
}
