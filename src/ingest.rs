use crate::error::ApiError;
use crate::models::*;
use crate::opendata::{normalize, IncidentSource, RawIncident, SourceQuery};
use crate::repo::Repo;
use crate::validation::validate_zip;

pub const DEFAULT_DAYS: u32 = 30;
pub const DEFAULT_LIMIT: u32 = 1000;
/// Longest lookback an admin ingest may ask for, about a century.
pub const MAX_DAYS: u32 = 36_500;
pub const PAGE_SIZE: i64 = 10;
/// Lookback windows tried, in order, when a ZIP has nothing cached.
pub const FALLBACK_WINDOWS: [u32; 4] = [30, 90, 180, 365];

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Normalize and store fetched rows. Duplicates are skipped by the store.
async fn persist(repo: &dyn Repo, rows: &[RawIncident]) -> Result<u64, ApiError> {
    metrics::counter!("incidents_fetched_total", rows.len() as u64);
    let docs: Vec<NewIncident> = rows.iter().filter_map(normalize).collect();
    if docs.is_empty() {
        return Ok(0);
    }
    let saved = repo.insert_incidents(docs).await?;
    metrics::counter!("incidents_saved_total", saved);
    Ok(saved)
}

/// Admin-triggered ingestion: one fetch with the given filters, then persist.
/// `days == 0` asks for the full history.
pub async fn ingest(repo: &dyn Repo, source: &dyn IncidentSource, req: &IngestRequest) -> Result<IngestReport, ApiError> {
    let zip = non_blank(&req.zip).map(|z| validate_zip(&z)).transpose()?;
    let days = req.days.unwrap_or(DEFAULT_DAYS);
    if days > MAX_DAYS {
        return Err(ApiError::bad_request(format!("days must be at most {MAX_DAYS}.")));
    }
    let query = SourceQuery {
        zip: zip.clone(),
        days: (days > 0).then_some(days),
        limit: req.limit.unwrap_or(DEFAULT_LIMIT),
        status: non_blank(&req.status),
        complaint_type: non_blank(&req.complaint_type),
        agency: non_blank(&req.agency),
    };
    let rows = source.fetch(&query).await?;
    let saved = persist(repo, &rows).await?;
    tracing::info!(fetched = rows.len(), saved, zip = ?zip, days = ?query.days, "ingestion finished");
    Ok(IngestReport { fetched: rows.len(), saved, zip, days: query.days })
}

/// Widen the lookback for a ZIP until a window yields a full page, falling
/// back to one unbounded fetch when every window is empty. The last
/// non-empty window is persisted.
pub async fn backfill(repo: &dyn Repo, source: &dyn IncidentSource, zip: &str) -> Result<IngestReport, ApiError> {
    let mut found: Option<(u32, Vec<RawIncident>)> = None;
    for days in FALLBACK_WINDOWS {
        let rows = source.fetch(&SourceQuery::for_zip(zip, Some(days), DEFAULT_LIMIT)).await?;
        tracing::debug!(zip, days, rows = rows.len(), "fallback window fetched");
        if rows.is_empty() {
            continue;
        }
        let full_page = rows.len() >= PAGE_SIZE as usize;
        found = Some((days, rows));
        if full_page {
            break;
        }
    }
    let (days, rows) = match found {
        Some((days, rows)) => (Some(days), rows),
        None => (None, source.fetch(&SourceQuery::for_zip(zip, None, DEFAULT_LIMIT)).await?),
    };
    let saved = persist(repo, &rows).await?;
    tracing::info!(zip, days = ?days, fetched = rows.len(), saved, "feed backfill finished");
    Ok(IngestReport { fetched: rows.len(), saved, zip: Some(zip.to_string()), days })
}

/// One page of the ZIP feed from the cache, backfilling from the source when
/// an unfiltered first page comes back empty.
pub async fn feed_page(repo: &dyn Repo, source: &dyn IncidentSource, params: &FeedParams) -> Result<FeedPage, ApiError> {
    let zip = validate_zip(&params.zip)?;
    let page = params.page.unwrap_or(1).max(1);
    let sort = match non_blank(&params.sort) {
        Some(s) => s.parse().map_err(|_| ApiError::bad_request("sort must be newest or oldest."))?,
        None => SortOrder::Newest,
    };
    let skip = (page - 1)
        .checked_mul(PAGE_SIZE)
        .ok_or_else(|| ApiError::bad_request("page is out of range."))?;
    let filter = IncidentFilter {
        zip,
        skip,
        // one extra row tells us whether another page exists
        limit: PAGE_SIZE + 1,
        status: non_blank(&params.status),
        complaint_type: non_blank(&params.complaint_type),
        agency: non_blank(&params.agency),
        sort,
    };
    let mut incidents = repo.list_incidents(&filter).await?;
    if incidents.is_empty() && page == 1 && !filter.has_extra_filters() {
        backfill(repo, source, &filter.zip).await?;
        incidents = repo.list_incidents(&filter).await?;
    }
    let has_more = incidents.len() as i64 > PAGE_SIZE;
    incidents.truncate(PAGE_SIZE as usize);
    Ok(FeedPage { zip: filter.zip, page, has_more, incidents })
}
