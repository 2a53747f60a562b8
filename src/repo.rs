use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::Role;
use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("{0}")] Conflict(String),
    #[error("storage error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

pub const DUPLICATE_ACCOUNT: &str = "Email or username already exists (case-insensitive).";
pub const ALREADY_REPORTED: &str = "You have already reported this comment.";

#[async_trait]
pub trait IncidentRepo: Send + Sync {
    /// Insert-if-absent keyed on `open_data_id`; returns how many rows were new.
    async fn insert_incidents(&self, docs: Vec<NewIncident>) -> RepoResult<u64>;
    async fn get_incident(&self, open_data_id: &str) -> RepoResult<Incident>;
    async fn list_incidents_by_zip(&self, zip: &str, skip: i64, limit: i64) -> RepoResult<Vec<Incident>>;
    async fn list_incidents(&self, filter: &IncidentFilter) -> RepoResult<Vec<Incident>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    /// Approved comments of one incident, newest first.
    async fn list_comments(&self, incident_id: &str) -> RepoResult<Vec<Comment>>;
    async fn vote_comment(&self, id: Id, user_id: Id, kind: VoteKind) -> RepoResult<VoteCounts>;
    async fn report_comment(&self, id: Id, user_id: Id, reason: String) -> RepoResult<Comment>;
    async fn list_for_moderation(&self, filter: &ModerationFilter) -> RepoResult<Vec<Comment>>;
    async fn set_comment_status(&self, id: Id, status: CommentStatus, moderator: Id) -> RepoResult<Comment>;
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
    /// Approved comments created at or after `since` (all when `None`),
    /// grouped per incident and ranked.
    async fn trending(&self, query: &TrendQuery, since: Option<DateTime<Utc>>) -> RepoResult<Vec<TrendingEntry>>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    /// Case-insensitive match on email or username.
    async fn find_user_by_identifier(&self, identifier: &str) -> RepoResult<User>;
    async fn record_login_success(&self, id: Id, at: DateTime<Utc>) -> RepoResult<()>;
    /// Bumps the failure counter; once it reaches `max_failures` the account
    /// is locked until `lock_until`.
    async fn record_login_failure(&self, id: Id, max_failures: i32, lock_until: DateTime<Utc>) -> RepoResult<AuthMeta>;
    async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User>;
    async fn set_user_status(&self, id: Id, status: AccountStatus) -> RepoResult<User>;
}

pub trait Repo: IncidentRepo + CommentRepo + UserRepo {}

impl<T> Repo for T where T: IncidentRepo + CommentRepo + UserRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;
