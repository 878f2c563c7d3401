use std::collections::HashMap;

use tracing::debug;

use crate::league::{resolve, slug};
use crate::types::{LeagueGroup, OddsResponse, SourceMeta};

/// Fills in missing league keys on groups and their matches.
///
/// A match without its own label inherits the group label; a match whose
/// label does not resolve inherits the group key.
pub fn resolve_league_keys(groups: &mut [LeagueGroup]) {
    for group in groups.iter_mut() {
        if group.league_key.as_deref().map_or(true, str::is_empty) {
            group.league_key = resolve(&group.league).map(str::to_string);
        }
        for m in group.matches.iter_mut() {
            if m.league.trim().is_empty() {
                m.league = group.league.clone();
            }
            if m.league_key.as_deref().map_or(true, str::is_empty) {
                m.league_key = resolve(&m.league)
                    .map(str::to_string)
                    .or_else(|| group.league_key.clone());
            }
        }
    }
}

/// Grouping key used when merging: the resolved league key, or a slug of the
/// label for unresolved leagues. Two unresolved labels with the same slug
/// collapse into one group.
pub fn group_key(group: &LeagueGroup) -> String {
    match group.league_key.as_deref() {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => format!("label:{}", slug(&group.league)),
    }
}

/// Builds a stored snapshot from an ingest body.
///
/// Resolves league keys, stamps every match with its identity, keeps only the
/// last occurrence of a duplicated identity and drops groups left empty.
pub fn build_snapshot(mut groups: Vec<LeagueGroup>, last_updated: String, cache_ttl: u64) -> OddsResponse {
    resolve_league_keys(&mut groups);

    let mut last_seen: HashMap<String, (usize, usize)> = HashMap::new();
    for (gi, group) in groups.iter_mut().enumerate() {
        for (mi, m) in group.matches.iter_mut().enumerate() {
            let identity = m.identity();
            m.id = Some(identity.clone());
            last_seen.insert(identity, (gi, mi));
        }
    }

    let mut duplicates = 0usize;
    for (gi, group) in groups.iter_mut().enumerate() {
        let mut mi = 0usize;
        group.matches.retain(|m| {
            let keep = m.id.as_ref().and_then(|id| last_seen.get(id)) == Some(&(gi, mi));
            mi += 1;
            if !keep {
                duplicates += 1;
            }
            keep
        });
    }
    if duplicates > 0 {
        debug!(duplicates, "dropped duplicate match identities from ingest body");
    }
    groups.retain(|g| !g.matches.is_empty());

    let mut snapshot = OddsResponse {
        leagues: groups,
        last_updated,
        cache_ttl,
        ..Default::default()
    };
    snapshot.recount();
    snapshot
}

/// Merges the full snapshot with the overlay. Overlay matches replace full
/// matches of the same identity in place; new overlay matches are appended to
/// the group with the same grouping key (created if missing).
pub fn merge(full: &OddsResponse, overlay: &OddsResponse) -> OddsResponse {
    let mut full_groups = full.leagues.clone();
    let mut overlay_groups = overlay.leagues.clone();
    resolve_league_keys(&mut full_groups);
    resolve_league_keys(&mut overlay_groups);

    let mut merged: Vec<LeagueGroup> = Vec::with_capacity(full_groups.len());
    let mut group_index: HashMap<String, usize> = HashMap::new();
    let mut match_index: HashMap<String, (usize, usize)> = HashMap::new();

    for group in full_groups.into_iter().chain(overlay_groups) {
        let key = group_key(&group);
        let gi = *group_index.entry(key).or_insert_with(|| {
            merged.push(LeagueGroup {
                league: group.league.clone(),
                league_key: group.league_key.clone(),
                matches: Vec::new(),
            });
            merged.len() - 1
        });

        for mut m in group.matches {
            let identity = m.identity();
            m.id = Some(identity.clone());
            match match_index.get(&identity).copied() {
                Some((existing_gi, mi)) => merged[existing_gi].matches[mi] = m,
                None => {
                    let target = &mut merged[gi].matches;
                    target.push(m);
                    match_index.insert(identity, (gi, target.len() - 1));
                }
            }
        }
    }
    // An overlay group whose matches all replaced fixtures elsewhere ends up empty.
    merged.retain(|g| !g.matches.is_empty());

    let last_updated = if overlay.last_updated > full.last_updated {
        overlay.last_updated.clone()
    } else {
        full.last_updated.clone()
    };

    let mut out = OddsResponse {
        leagues: merged,
        last_updated,
        cache_ttl: full.cache_ttl.min(overlay.cache_ttl),
        stale: full.stale,
        sources: Some(SourceMeta {
            full_last_updated: Some(full.last_updated.clone()),
            fast_last_updated: Some(overlay.last_updated.clone()),
            full_cache_ttl: Some(full.cache_ttl),
            fast_cache_ttl: Some(overlay.cache_ttl),
        }),
        ..Default::default()
    };
    out.recount();
    out
}

/// Merges whichever of the two stored snapshots exist.
pub fn merge_sources(full: Option<OddsResponse>, overlay: Option<OddsResponse>) -> Option<OddsResponse> {
    match (full, overlay) {
        (Some(full), Some(overlay)) => Some(merge(&full, &overlay)),
        (Some(mut full), None) => {
            resolve_league_keys(&mut full.leagues);
            full.sources = Some(SourceMeta {
                full_last_updated: Some(full.last_updated.clone()),
                full_cache_ttl: Some(full.cache_ttl),
                ..Default::default()
            });
            full.recount();
            Some(full)
        }
        (None, Some(mut overlay)) => {
            resolve_league_keys(&mut overlay.leagues);
            overlay.sources = Some(SourceMeta {
                fast_last_updated: Some(overlay.last_updated.clone()),
                fast_cache_ttl: Some(overlay.cache_ttl),
                ..Default::default()
            });
            overlay.recount();
            Some(overlay)
        }
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookmakerOdds, Match};

    fn odds(name: &str, home: f64) -> BookmakerOdds {
        BookmakerOdds {
            name: name.to_string(),
            home_odds: Some(home),
            draw_odds: Some(3.4),
            away_odds: Some(4.2),
            ..Default::default()
        }
    }

    fn fixture(home: &str, away: &str, start: i64, home_price: f64) -> Match {
        Match {
            home_team: home.to_string(),
            away_team: away.to_string(),
            start_time: start,
            bookmakers: vec![odds("Bet365", home_price)],
            ..Default::default()
        }
    }

    fn group(label: &str, matches: Vec<Match>) -> LeagueGroup {
        LeagueGroup { league: label.to_string(), league_key: None, matches }
    }

    fn snapshot(groups: Vec<LeagueGroup>, updated: &str, ttl: u64) -> OddsResponse {
        build_snapshot(groups, updated.to_string(), ttl)
    }

    #[test]
    fn build_snapshot_resolves_keys_and_stamps_ids() {
        let snap = snapshot(
            vec![group("England. Premier League", vec![fixture("Arsenal", "Chelsea", 100, 1.8)])],
            "2026-01-01T00:00:00Z",
            900,
        );
        let group = &snap.leagues[0];
        assert_eq!(group.league_key.as_deref(), Some("premier"));
        let m = &group.matches[0];
        assert_eq!(m.league, "England. Premier League");
        assert_eq!(m.league_key.as_deref(), Some("premier"));
        assert_eq!(m.id.as_deref(), Some("arsenal_vs_chelsea_100"));
        assert_eq!(snap.total_matches, 1);
        assert_eq!(snap.bookmakers_count, 1);
    }

    #[test]
    fn build_snapshot_keeps_last_duplicate() {
        let snap = snapshot(
            vec![
                group("EPL", vec![fixture("Arsenal", "Chelsea", 100, 1.8)]),
                group("Other Label", vec![fixture("Arsenal", "Chelsea", 100, 2.1)]),
            ],
            "2026-01-01T00:00:00Z",
            900,
        );
        assert_eq!(snap.total_matches, 1);
        assert_eq!(snap.leagues.len(), 1);
        assert_eq!(snap.leagues[0].league, "Other Label");
        assert_eq!(snap.leagues[0].matches[0].bookmakers[0].home_odds, Some(2.1));
    }

    #[test]
    fn overlay_replaces_and_adds_matches() {
        let full = snapshot(
            vec![
                group("England. Premier League", vec![
                    fixture("Arsenal", "Chelsea", 100, 1.8),
                    fixture("Everton", "Fulham", 200, 2.5),
                ]),
                group("Spain. La Liga", vec![fixture("Barcelona", "Sevilla", 300, 1.4)]),
            ],
            "2026-01-01T00:00:00Z",
            900,
        );
        let overlay = snapshot(
            vec![group("EPL", vec![
                fixture("Arsenal", "Chelsea", 100, 1.95),
                fixture("Leeds", "Wolves", 400, 2.2),
            ])],
            "2026-01-01T00:05:00Z",
            180,
        );

        let merged = merge(&full, &overlay);
        assert_eq!(merged.total_matches, 4);
        assert_eq!(merged.leagues.len(), 2);
        let premier = &merged.leagues[0];
        assert_eq!(premier.league, "England. Premier League");
        assert_eq!(premier.matches.len(), 3);
        assert_eq!(premier.matches[0].bookmakers[0].home_odds, Some(1.95));
        assert_eq!(premier.matches[2].home_team, "Leeds");
        assert_eq!(merged.last_updated, "2026-01-01T00:05:00Z");
    }

    #[test]
    fn merged_ttl_is_minimum_and_sources_are_kept() {
        let full = snapshot(vec![group("EPL", vec![fixture("A", "B", 1, 1.5)])], "2026-01-01T00:10:00Z", 900);
        let overlay = snapshot(vec![group("EPL", vec![fixture("C", "D", 2, 1.5)])], "2026-01-01T00:05:00Z", 180);
        let merged = merge(&full, &overlay);
        assert_eq!(merged.cache_ttl, 180);
        assert_eq!(merged.last_updated, "2026-01-01T00:10:00Z");
        let sources = merged.sources.expect("sources");
        assert_eq!(sources.full_cache_ttl, Some(900));
        assert_eq!(sources.fast_cache_ttl, Some(180));
        assert_eq!(sources.fast_last_updated.as_deref(), Some("2026-01-01T00:05:00Z"));

        let reversed = merge(&overlay, &full);
        assert_eq!(reversed.cache_ttl, 180);
    }

    #[test]
    fn merge_is_idempotent_for_same_overlay() {
        let full = snapshot(
            vec![
                group("EPL", vec![fixture("Arsenal", "Chelsea", 100, 1.8)]),
                group("Mystery Cup", vec![fixture("X", "Y", 5, 3.0)]),
            ],
            "2026-01-01T00:00:00Z",
            900,
        );
        let overlay = snapshot(
            vec![
                group("EPL", vec![fixture("Arsenal", "Chelsea", 100, 1.9)]),
                group("Serie A", vec![fixture("Roma", "Lazio", 50, 2.0)]),
            ],
            "2026-01-01T00:01:00Z",
            180,
        );

        let once = merge(&full, &overlay);
        let twice = merge(&once, &overlay);
        assert_eq!(once.leagues, twice.leagues);
        assert_eq!(once.total_matches, twice.total_matches);
        assert_eq!(once.last_updated, twice.last_updated);
        assert_eq!(once.cache_ttl, twice.cache_ttl);
    }

    #[test]
    fn unresolved_labels_with_same_slug_share_a_group() {
        let full = snapshot(vec![group("Mystery Cup", vec![fixture("A", "B", 1, 1.5)])], "t1", 900);
        let overlay = snapshot(vec![group("mystery-cup!", vec![fixture("C", "D", 2, 1.5)])], "t2", 180);
        let merged = merge(&full, &overlay);
        assert_eq!(merged.leagues.len(), 1);
        assert_eq!(merged.leagues[0].matches.len(), 2);
        assert_eq!(merged.leagues[0].league_key, None);
    }

    #[test]
    fn overlay_group_emptied_by_replacements_is_dropped() {
        let full = snapshot(vec![group("EPL", vec![fixture("A", "B", 1, 1.5)])], "t1", 900);
        let overlay = snapshot(vec![group("Mystery Cup", vec![fixture("A", "B", 1, 1.7)])], "t2", 180);
        let merged = merge(&full, &overlay);
        assert_eq!(merged.leagues.len(), 1);
        assert_eq!(merged.leagues[0].league, "EPL");
        assert_eq!(merged.leagues[0].matches[0].bookmakers[0].home_odds, Some(1.7));
        assert_eq!(merged.total_matches, 1);
    }

    #[test]
    fn merge_sources_handles_missing_sides() {
        assert!(merge_sources(None, None).is_none());

        let full = snapshot(vec![group("EPL", vec![fixture("A", "B", 1, 1.5)])], "t1", 900);
        let only_full = merge_sources(Some(full.clone()), None).expect("full");
        assert_eq!(only_full.total_matches, 1);
        assert_eq!(only_full.cache_ttl, 900);

        let only_overlay = merge_sources(None, Some(full)).expect("overlay");
        assert_eq!(only_overlay.sources.and_then(|s| s.fast_cache_ttl), Some(900));
    }
}
