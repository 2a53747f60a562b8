use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::Id;

/// Sliding-window limiter kept in process memory.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Records a hit and returns true while `key` is under `limit` for the window.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut hits = self.store.entry(key.to_string()).or_default();
        while let Some(front) = hits.front() {
            if now.duration_since(*front) >= window {
                hits.pop_front();
            } else {
                break;
            }
        }
        if hits.len() < limit {
            hits.push_back(now);
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub vote_limit: usize,
    pub vote_window: Duration,
    pub report_limit: usize,
    pub report_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            comment_limit: 5,
            comment_window: Duration::from_secs(60),
            vote_limit: 30,
            vote_window: Duration::from_secs(60),
            report_limit: 10,
            report_window: Duration::from_secs(3600),
        }
    }
}

impl RateLimitConfig {
    /// Reads `RL_{COMMENT,VOTE,REPORT}_{LIMIT,WINDOW}`; windows are seconds.
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        }
        let d = Self::default();
        Self {
            comment_limit: usize_env("RL_COMMENT_LIMIT", d.comment_limit),
            comment_window: dur_env("RL_COMMENT_WINDOW", d.comment_window),
            vote_limit: usize_env("RL_VOTE_LIMIT", d.vote_limit),
            vote_window: dur_env("RL_VOTE_WINDOW", d.vote_window),
            report_limit: usize_env("RL_REPORT_LIMIT", d.report_limit),
            report_window: dur_env("RL_REPORT_WINDOW", d.report_window),
        }
    }
}

/// Per-action guard used by the comment handlers, keyed by user id.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }

    pub fn allow_comment(&self, user: Id) -> bool {
        self.limiter.check(&format!("comment:{user}"), self.cfg.comment_limit, self.cfg.comment_window)
    }

    pub fn allow_vote(&self, user: Id) -> bool {
        self.limiter.check(&format!("vote:{user}"), self.cfg.vote_limit, self.cfg.vote_window)
    }

    pub fn allow_report(&self, user: Id) -> bool {
        self.limiter.check(&format!("report:{user}"), self.cfg.report_limit, self.cfg.report_window)
    }
}
