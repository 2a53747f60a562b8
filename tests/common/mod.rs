#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use civic_feed::auth::{create_jwt, Role};
use civic_feed::models::NewIncident;
use civic_feed::opendata::{IncidentSource, RawIncident, SourceError, SourceQuery};
use serde_json::json;

pub const TEST_SECRET: &str = "test-secret-must-be-32-bytes-long!!";

pub fn set_secret() {
    std::env::set_var("JWT_SECRET", TEST_SECRET);
}

pub fn token(user_id: i64, username: &str, role: Role) -> String {
    set_secret();
    create_jwt(user_id, username, vec![role]).unwrap()
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

/// A source row as the city API would return it.
pub fn raw_row(key: u64, zip: &str, minute: u32) -> RawIncident {
    serde_json::from_value(json!({
        "unique_key": key.to_string(),
        "complaint_type": "Noise - Residential",
        "descriptor": "Loud Music/Party",
        "incident_zip": zip,
        "agency": "NYPD",
        "status": "Open",
        "created_date": format!("2024-03-01T10:{:02}:00.000", minute % 60),
        "latitude": "40.6693",
        "longitude": "-73.9425"
    }))
    .unwrap()
}

pub fn rows(first_key: u64, count: u64, zip: &str) -> Vec<RawIncident> {
    (0..count).map(|i| raw_row(first_key + i, zip, i as u32)).collect()
}

pub fn incident(id: &str, zip: &str) -> NewIncident {
    NewIncident {
        open_data_id: id.into(),
        complaint_type: Some("Noise - Residential".into()),
        descriptor: None,
        incident_zip: Some(zip.into()),
        agency: Some("NYPD".into()),
        status: Some("Open".into()),
        created_date: Some(chrono::Utc::now()),
        latitude: None,
        longitude: None,
    }
}

/// Canned source: answers by lookback window and records every query.
#[derive(Default)]
pub struct StubSource {
    by_days: HashMap<Option<u32>, Vec<RawIncident>>,
    pub calls: Mutex<Vec<SourceQuery>>,
    pub fail_with: Option<u16>,
}

impl StubSource {
    pub fn with(mut self, days: Option<u32>, rows: Vec<RawIncident>) -> Self {
        self.by_days.insert(days, rows);
        self
    }

    pub fn failing(status: u16) -> Self {
        Self { fail_with: Some(status), ..Self::default() }
    }

    pub fn windows_asked(&self) -> Vec<Option<u32>> {
        self.calls.lock().unwrap().iter().map(|q| q.days).collect()
    }
}

#[async_trait]
impl IncidentSource for StubSource {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawIncident>, SourceError> {
        self.calls.lock().unwrap().push(query.clone());
        if let Some(status) = self.fail_with {
            return Err(SourceError::Status(status));
        }
        Ok(self.by_days.get(&query.days).cloned().unwrap_or_default())
    }
}
