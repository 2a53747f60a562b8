use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::ApiError;
use crate::models::*;
use crate::repo::Repo;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 50;

/// Start of the trending window: 1/7/30 days back, truncated to midnight UTC.
pub fn window_start(period: TrendPeriod, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days = match period {
        TrendPeriod::Day => 1,
        TrendPeriod::Week => 7,
        TrendPeriod::Month => 30,
        TrendPeriod::All => return None,
    };
    let day = (now - Duration::days(days)).date_naive();
    day.and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc())
}

/// Group approved comments by incident and rank them. Used by the in-memory
/// store; the Postgres store runs the same aggregation in SQL.
pub fn rank<'a>(
    comments: impl IntoIterator<Item = &'a Comment>,
    query: &TrendQuery,
    since: Option<DateTime<Utc>>,
) -> Vec<TrendingEntry> {
    let mut groups: HashMap<&str, (i64, DateTime<Utc>)> = HashMap::new();
    for c in comments {
        if c.status != CommentStatus::Approved || since.map(|s| c.created_at < s).unwrap_or(false) {
            continue;
        }
        let weight = match query.kind {
            TrendKind::Comments => 1,
            TrendKind::Likes => c.likes.len() as i64,
            TrendKind::Dislikes => c.dislikes.len() as i64,
        };
        let entry = groups.entry(c.incident_id.as_str()).or_insert((0, c.created_at));
        entry.0 += weight;
        if c.created_at > entry.1 {
            entry.1 = c.created_at;
        }
    }
    let mut ranked: Vec<TrendingEntry> = groups
        .into_iter()
        .map(|(incident_id, (count, latest_comment))| TrendingEntry {
            incident_id: incident_id.to_string(),
            count,
            latest_comment,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.latest_comment.cmp(&a.latest_comment))
            .then(a.incident_id.cmp(&b.incident_id))
    });
    ranked.truncate(query.limit.max(0) as usize);
    ranked
}

/// Parse the public query parameters into a `TrendQuery`.
pub fn parse_query(params: &TrendingParams) -> Result<TrendQuery, ApiError> {
    let kind = match params.kind.as_deref() {
        Some(k) => k.parse().map_err(|_| ApiError::bad_request("type must be comments, likes or dislikes."))?,
        None => TrendKind::default(),
    };
    let period = match params.period.as_deref() {
        Some(p) => p.parse().map_err(|_| ApiError::bad_request("period must be day, week, month or all."))?,
        None => TrendPeriod::default(),
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(TrendQuery { kind, period, limit })
}

/// Rank incidents and resolve them; ids that no longer resolve are dropped.
pub async fn trending(repo: &dyn Repo, query: &TrendQuery, now: DateTime<Utc>) -> Result<Vec<TrendingIncident>, ApiError> {
    let since = window_start(query.period, now);
    let entries = repo.trending(query, since).await?;
    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        match repo.get_incident(&e.incident_id).await {
            Ok(incident) => out.push(TrendingIncident { incident, count: e.count, latest_comment: e.latest_comment }),
            Err(crate::repo::RepoError::NotFound) => {
                tracing::debug!(incident_id = %e.incident_id, "trending incident no longer resolves");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}
