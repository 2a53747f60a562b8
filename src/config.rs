use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::opendata::DEFAULT_OPEN_DATA_URL;

pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Account promoted to admin at startup, created first when missing.
#[derive(Debug, Clone)]
pub struct AdminAccount {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub data_dir: Option<PathBuf>,
    pub frontend_url: Option<String>,
    pub enable_hsts: bool,
    pub open_data_url: String,
    pub open_data_app_token: Option<String>,
    pub open_data_timeout: Duration,
    pub admin: Option<AdminAccount>,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn flag(name: &str) -> bool {
    optional(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name) {
        Some(v) => v.parse().with_context(|| format!("{name} is not valid: {v}")),
        None => Ok(default),
    }
}

fn admin_account() -> Result<Option<AdminAccount>> {
    match (optional("ADMIN_EMAIL"), optional("ADMIN_USERNAME"), env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty())) {
        (Some(email), Some(username), Some(password)) => Ok(Some(AdminAccount { email, username, password })),
        (None, None, None) => Ok(None),
        _ => bail!("ADMIN_EMAIL, ADMIN_USERNAME and ADMIN_PASSWORD must be set together"),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long");
        }
        Ok(Self {
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            database_url: optional("DATABASE_URL"),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 5)?,
            data_dir: optional("DATA_DIR").map(PathBuf::from),
            frontend_url: optional("FRONTEND_URL"),
            enable_hsts: flag("ENABLE_HSTS"),
            open_data_url: optional("OPEN_DATA_URL").unwrap_or_else(|| DEFAULT_OPEN_DATA_URL.to_string()),
            open_data_app_token: optional("OPEN_DATA_APP_TOKEN"),
            open_data_timeout: Duration::from_secs(parsed("OPEN_DATA_TIMEOUT_SECS", 20)?),
            admin: admin_account()?,
        })
    }
}
