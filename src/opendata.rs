//! Client for the city open-data (Socrata) 311 endpoint and the row
//! normalization applied before incidents are cached.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::NewIncident;

pub const DEFAULT_OPEN_DATA_URL: &str = "https://data.cityofnewyork.us/resource/erm2-nwe9.json";
pub const MAX_ROWS: u32 = 5000;

const SOCRATA_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// One request against the source. `days: None` means no date bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub zip: Option<String>,
    pub days: Option<u32>,
    pub limit: u32,
    pub status: Option<String>,
    pub complaint_type: Option<String>,
    pub agency: Option<String>,
}

impl SourceQuery {
    pub fn for_zip(zip: &str, days: Option<u32>, limit: u32) -> Self {
        Self {
            zip: Some(zip.to_string()),
            days,
            limit,
            status: None,
            complaint_type: None,
            agency: None,
        }
    }

    pub fn row_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_ROWS)
    }

    /// SoQL `$where` expression, or `None` when nothing constrains the query.
    pub fn where_clause(&self, now: DateTime<Utc>) -> Option<String> {
        let mut parts = Vec::new();
        // a lookback past the calendar's range constrains nothing
        if let Some(since) = self.days.and_then(|d| now.checked_sub_signed(chrono::Duration::days(i64::from(d)))) {
            parts.push(format!("created_date >= '{}'", since.naive_utc().format(SOCRATA_TIMESTAMP)));
        }
        if let Some(zip) = &self.zip {
            parts.push(format!("incident_zip = {}", soql_literal(zip)));
        }
        if let Some(status) = &self.status {
            parts.push(format!("status = {}", soql_literal(status)));
        }
        if let Some(ct) = &self.complaint_type {
            parts.push(format!("upper(complaint_type) like {}", soql_literal(&format!("%{}%", ct.to_uppercase()))));
        }
        if let Some(agency) = &self.agency {
            parts.push(format!("upper(agency) like {}", soql_literal(&format!("%{}%", agency.to_uppercase()))));
        }
        (!parts.is_empty()).then(|| parts.join(" AND "))
    }
}

fn soql_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// A row as the API returns it. Socrata sends most values as strings, but
/// numbers show up in exports and mocks, so the loose fields stay `Value`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIncident {
    #[serde(default)]
    pub unique_key: Option<Value>,
    #[serde(default)]
    pub complaint_type: Option<String>,
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub incident_zip: Option<Value>,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn non_blank(s: &Option<String>) -> Option<String> {
    s.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

/// Left-pad a ZIP to five digits; a ZIP+4 suffix is dropped.
pub fn normalize_zip(raw: &str) -> Option<String> {
    let base = raw.trim().split('-').next().unwrap_or_default().trim();
    if base.is_empty() || base.len() > 5 || !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{base:0>5}"))
}

/// Accepts Socrata floating timestamps (read as UTC), RFC 3339 and bare dates.
pub fn parse_created_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Map an API row to a cacheable incident; rows without `unique_key` are dropped.
pub fn normalize(raw: &RawIncident) -> Option<NewIncident> {
    let open_data_id = raw.unique_key.as_ref().and_then(value_text)?;
    Some(NewIncident {
        open_data_id,
        complaint_type: non_blank(&raw.complaint_type),
        descriptor: non_blank(&raw.descriptor),
        incident_zip: raw.incident_zip.as_ref().and_then(value_text).and_then(|z| normalize_zip(&z)),
        agency: non_blank(&raw.agency),
        status: non_blank(&raw.status),
        created_date: raw.created_date.as_deref().and_then(parse_created_date),
        latitude: raw.latitude.as_ref().and_then(value_number),
        longitude: raw.longitude.as_ref().and_then(value_number),
    })
}

#[async_trait]
pub trait IncidentSource: Send + Sync {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawIncident>, SourceError>;
}

pub struct OpenDataClient {
    http: reqwest::Client,
    base_url: String,
    app_token: Option<String>,
}

impl OpenDataClient {
    pub fn new(base_url: impl Into<String>, app_token: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.into(), app_token })
    }
}

#[async_trait]
impl IncidentSource for OpenDataClient {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawIncident>, SourceError> {
        let mut params = vec![
            ("$order", "created_date DESC".to_string()),
            ("$limit", query.row_limit().to_string()),
        ];
        if let Some(clause) = query.where_clause(Utc::now()) {
            params.push(("$where", clause));
        }
        let mut req = self.http.get(&self.base_url).query(&params);
        if let Some(token) = &self.app_token {
            req = req.header("X-App-Token", token);
        }
        tracing::debug!(url = %self.base_url, ?query, "fetching open data rows");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let rows = resp
            .json::<Vec<RawIncident>>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        tracing::info!(rows = rows.len(), zip = ?query.zip, days = ?query.days, "open data rows fetched");
        Ok(rows)
    }
}
