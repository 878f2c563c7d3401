//! Maps free-text league labels from bookmaker scrapes to canonical short keys.
//!
//! Matching works on normalised text (lowercase, alphanumeric words separated by
//! single spaces). Exclusions and keywords are plain substrings of that text:
//! `"premier league u21"` excludes `"premier league u21s"` and `"laliga"` fires
//! inside `"laliga2"`.

/// Sub-competitions that would otherwise match their parent league.
const EXCLUSIONS: &[&str] = &[
    "premier league cup",
    "premier league u21",
    "premier league u23",
    "premier league 2",
    "premier league international cup",
    "premier league other",
    "premier league women",
    "champions league women",
    "la liga 2",
    "serie a women",
];

/// `(key, keywords)`. Among all keywords found in the label the longest wins;
/// on equal length the earlier rule wins.
const RULES: &[(&str, &[&str])] = &[
    ("premier", &["premier league", "english premier league", "england premier league", "epl"]),
    ("championship", &["efl championship", "english championship", "england championship"]),
    ("laliga", &["la liga", "laliga", "spain primera division", "primera division"]),
    ("seriea", &["serie a", "italy serie a"]),
    ("bundesliga", &["bundesliga", "germany bundesliga"]),
    ("bundesliga2", &["2 bundesliga", "bundesliga 2", "germany 2 bundesliga"]),
    ("ligue1", &["ligue 1", "france ligue 1"]),
    ("eredivisie", &["eredivisie", "netherlands eredivisie"]),
    ("primeira", &["primeira liga", "liga portugal", "portugal primeira liga"]),
    ("scottish", &["scottish premiership", "scotland premiership"]),
    ("ucl", &["champions league", "uefa champions league"]),
    ("uel", &["europa league", "uefa europa league"]),
    ("uecl", &["conference league", "europa conference league", "uefa conference league"]),
    ("afcl", &["afc champions league"]),
    ("rpl", &["russian premier league", "russia premier league"]),
    ("brasileirao", &["brasileirao", "brazil serie a"]),
    ("austria", &["austria bundesliga", "austrian bundesliga"]),
    ("mls", &["mls", "major league soccer"]),
    ("nba", &["nba"]),
    ("nfl", &["nfl"]),
    ("nhl", &["nhl"]),
    ("mlb", &["mlb"]),
    ("ncaaf", &["ncaaf", "college football", "ncaa football"]),
    ("ncaab", &["ncaab", "college basketball", "ncaa basketball"]),
];

/// Lowercases and collapses every non-alphanumeric run into a single space.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// URL-safe slug of a label: normalised words joined by `-`.
pub fn slug(text: &str) -> String {
    normalize(text).replace(' ', "-")
}

/// Resolves a league label to its canonical key, or `None` when the label is
/// an excluded sub-competition or matches no rule.
pub fn resolve(label: &str) -> Option<&'static str> {
    let normalized = normalize(label);
    if normalized.is_empty() {
        return None;
    }
    if EXCLUSIONS.iter().any(|phrase| normalized.contains(phrase)) {
        return None;
    }

    let mut best: Option<(usize, &'static str)> = None;
    for (key, keywords) in RULES {
        for keyword in keywords.iter() {
            if !normalized.contains(keyword) {
                continue;
            }
            if best.map_or(true, |(len, _)| keyword.len() > len) {
                best = Some((keyword.len(), *key));
            }
        }
    }
    best.map(|(_, key)| key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_punctuation() {
        assert_eq!(normalize("  England. Premier-League!! "), "england premier league");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn premier_league_spellings_resolve_to_same_key() {
        assert_eq!(resolve("England. Premier League"), Some("premier"));
        assert_eq!(resolve("EPL"), Some("premier"));
        assert_eq!(resolve("premier league"), Some("premier"));
    }

    #[test]
    fn excluded_sub_competitions_resolve_to_none() {
        assert_eq!(resolve("Premier League 2"), None);
        assert_eq!(resolve("England. Premier League Cup"), None);
        assert_eq!(resolve("Premier League U21"), None);
        assert_eq!(resolve("England - Premier League - Other"), None);
        assert_eq!(resolve("England. Premier League U21s"), None);
    }

    #[test]
    fn exclusions_match_as_substrings() {
        // "premier league 2024 25" contains "premier league 2".
        assert_eq!(resolve("Premier League 2024/25"), None);
        assert_eq!(resolve("Premier League Women's"), None);
    }

    #[test]
    fn longest_keyword_wins() {
        assert_eq!(resolve("UEFA Champions League Qualifiers"), Some("ucl"));
        assert_eq!(resolve("AFC Champions League"), Some("afcl"));
        assert_eq!(resolve("Russia. Premier League"), Some("rpl"));
        assert_eq!(resolve("Brazil Serie A"), Some("brasileirao"));
        assert_eq!(resolve("Italy. Serie A"), Some("seriea"));
        assert_eq!(resolve("Germany. 2. Bundesliga"), Some("bundesliga2"));
    }

    #[test]
    fn keywords_match_as_substrings() {
        assert_eq!(resolve("Spain. LaLiga2"), Some("laliga"));
        assert_eq!(resolve("NBA Playoffs"), Some("nba"));
        assert_eq!(resolve("Unknown Regional League"), None);
        assert_eq!(resolve(""), None);
    }

    #[test]
    fn slug_joins_words() {
        assert_eq!(slug("Some League / Group A"), "some-league-group-a");
    }
}
