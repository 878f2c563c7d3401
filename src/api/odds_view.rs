//! Read-side shaping of the merged snapshot: time windows, pagination and
//! HTTP cache validators.

use std::collections::HashMap;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};

use crate::config::{
    ETAG_PREFIX, MAX_HTTP_CACHE_SECS, MAX_PAGE_SIZE, MAX_WINDOW_HOURS, STALE_WHILE_REVALIDATE_SECS,
    WINDOW_LOOKBACK_SECS,
};
use crate::error::{AppError, Result};
use crate::types::{LeagueGroup, OddsResponse, Pagination};

/// Granularity of the "now" component of relative-window cache keys.
const WINDOW_BUCKET_SECS: i64 = 60;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OddsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub window_hours: Option<i64>,
    pub start_time_from: Option<i64>,
    pub start_time_to: Option<i64>,
}

impl OddsQuery {
    /// Parses raw query parameters, rejecting non-numeric or out-of-range values.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let query = Self {
            limit: parse_param(params, "limit")?,
            offset: parse_param(params, "offset")?,
            window_hours: parse_param(params, "window_hours")?,
            start_time_from: parse_param(params, "start_time_from")?,
            start_time_to: parse_param(params, "start_time_to")?,
        };
        if let Some(hours) = query.window_hours {
            if !(0..=MAX_WINDOW_HOURS).contains(&hours) {
                return Err(AppError::Validation(format!(
                    "window_hours must be between 0 and {MAX_WINDOW_HOURS}"
                )));
            }
        }
        if let (Some(from), Some(to)) = (query.start_time_from, query.start_time_to) {
            if from > to {
                return Err(AppError::Validation(
                    "start_time_from must not be after start_time_to".to_string(),
                ));
            }
        }
        Ok(query)
    }

    /// Kickoff bounds (inclusive, epoch seconds). Explicit bounds win over
    /// `window_hours`; `window_hours=0` means no filter.
    pub fn time_bounds(&self, now: i64) -> Option<(i64, i64)> {
        if self.start_time_from.is_some() || self.start_time_to.is_some() {
            return Some((
                self.start_time_from.unwrap_or(i64::MIN),
                self.start_time_to.unwrap_or(i64::MAX),
            ));
        }
        match self.window_hours {
            Some(hours) if hours > 0 => Some((now - WINDOW_LOOKBACK_SECS, now + hours * 3600)),
            _ => None,
        }
    }

    pub fn paginates(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Canonical key for the parameters that shape the body.
    pub fn cache_key(&self, scope: &str, now: i64) -> String {
        let mut key = scope.to_string();
        if self.paginates() {
            key.push_str(&format!(
                "-o{}-l{}",
                self.offset.unwrap_or(0),
                self.effective_limit()
            ));
        }
        if self.start_time_from.is_some() || self.start_time_to.is_some() {
            if let Some((from, to)) = self.time_bounds(now) {
                key.push_str(&format!("-f{from}-t{to}"));
            }
        } else if let Some(hours) = self.window_hours.filter(|h| *h > 0) {
            key.push_str(&format!("-w{hours}@{}", now.div_euclid(WINDOW_BUCKET_SECS)));
        }
        key
    }

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE)
    }

    /// Applies the time filter then the page window.
    pub fn apply(&self, snapshot: &mut OddsResponse, now: i64) {
        if let Some((from, to)) = self.time_bounds(now) {
            filter_by_kickoff(snapshot, from, to);
        }
        if self.paginates() {
            paginate(snapshot, self.offset.unwrap_or(0), self.effective_limit());
        }
    }
}

fn parse_param<T: std::str::FromStr>(params: &HashMap<String, String>, name: &str) -> Result<Option<T>> {
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::Validation(format!("invalid {name}: {raw}"))),
    }
}

/// Drops matches whose kickoff falls outside `[from, to]`, then empty groups.
pub fn filter_by_kickoff(snapshot: &mut OddsResponse, from: i64, to: i64) {
    for group in &mut snapshot.leagues {
        group.matches.retain(|m| m.start_time >= from && m.start_time <= to);
    }
    snapshot.leagues.retain(|g| !g.matches.is_empty());
    snapshot.recount();
}

/// Keeps the contiguous window `[offset, offset + limit)` of the flattened
/// match list, preserving group and match order. `total_matches` keeps the
/// pre-slice count so clients can page.
pub fn paginate(snapshot: &mut OddsResponse, offset: usize, limit: usize) {
    let total = snapshot.total_matches;
    let end = offset.saturating_add(limit);
    let mut index = 0usize;
    let mut page: Vec<LeagueGroup> = Vec::new();

    for group in std::mem::take(&mut snapshot.leagues) {
        let len = group.matches.len();
        let (start, stop) = (index, index + len);
        index = stop;
        if stop <= offset || start >= end {
            continue;
        }
        let lo = offset.saturating_sub(start);
        let hi = (end - start).min(len);
        if hi <= lo {
            continue;
        }
        let LeagueGroup { league, league_key, matches } = group;
        page.push(LeagueGroup {
            league,
            league_key,
            matches: matches.into_iter().skip(lo).take(hi - lo).collect(),
        });
    }

    let returned = page.iter().map(|g| g.matches.len()).sum::<usize>();
    snapshot.leagues = page;
    snapshot.pagination = Some(Pagination {
        offset,
        limit,
        returned,
        has_more: offset.saturating_add(returned) < total,
    });
}

// ---------------------------------------------------------------------------
// HTTP caching
// ---------------------------------------------------------------------------

pub fn etag(cache_key: &str, last_updated: &str) -> String {
    format!("W/\"{ETAG_PREFIX}-{cache_key}-{last_updated}\"")
}

fn if_none_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Weak comparison against a possibly comma-separated `If-None-Match` list.
pub fn etag_matches(header_value: &str, etag: &str) -> bool {
    let opaque = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let wanted = opaque(etag);
    header_value
        .split(',')
        .any(|candidate| candidate.trim() == "*" || opaque(candidate) == wanted)
}

/// RFC 7231 date for `Last-Modified`; `None` when the stamp is not RFC 3339.
pub fn http_date(last_updated: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(last_updated)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

fn put_cache_headers(headers: &mut HeaderMap, ttl_secs: u64, etag: &str, last_updated: &str) {
    let max_age = ttl_secs.min(MAX_HTTP_CACHE_SECS);
    let control = format!("public, max-age={max_age}, stale-while-revalidate={STALE_WHILE_REVALIDATE_SECS}");
    if let Ok(value) = HeaderValue::from_str(&control) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
    if let Some(value) = http_date(last_updated).and_then(|d| HeaderValue::from_str(&d).ok()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// Serializes a shaped snapshot with validators, or answers 304 when the
/// client already holds this version.
pub fn cached_response(snapshot: OddsResponse, cache_key: &str, request_headers: &HeaderMap) -> Response {
    let tag = etag(cache_key, &snapshot.last_updated);
    let fresh = if_none_match(request_headers).is_some_and(|v| etag_matches(&v, &tag));

    let mut resp = if fresh {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Json(&snapshot).into_response()
    };
    put_cache_headers(resp.headers_mut(), snapshot.cache_ttl, &tag, &snapshot.last_updated);
    resp
}
