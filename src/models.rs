use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::Role;

// Users and comments are keyed by a database-assigned integer.
pub type Id = i64;

/// Returned by `FromStr` impls for the string-backed enums below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self { $($ty::$variant => $text),+ }
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ---------------- Users ---------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
}
string_enum!(AccountStatus { Active => "active", Suspended => "suspended" });

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub zip: String,
    pub borough: String,
    pub notify_on_replies: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthMeta {
    pub failed_login_count: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl AuthMeta {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub email_lower: String,
    pub username: String,
    pub username_lower: String,
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub profile: Profile,
    pub auth_meta: AuthMeta,
}

/// Insert payload for the user store; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub profile: Profile,
}

/// What API clients get to see of an account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicUser {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    pub profile: Profile,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role.clone(),
            status: u.status,
            profile: u.profile.clone(),
        }
    }
}

// ---------------- Incidents -----------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Incident {
    pub open_data_id: String,
    pub complaint_type: Option<String>,
    pub descriptor: Option<String>,
    pub incident_zip: Option<String>,
    pub agency: Option<String>,
    pub status: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub ingested_at: DateTime<Utc>,
}

/// A normalized external row ready for insert-if-absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NewIncident {
    pub open_data_id: String,
    pub complaint_type: Option<String>,
    pub descriptor: Option<String>,
    pub incident_zip: Option<String>,
    pub agency: Option<String>,
    pub status: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}
string_enum!(SortOrder { Newest => "newest", Oldest => "oldest" });

#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub zip: String,
    pub skip: i64,
    pub limit: i64,
    pub status: Option<String>,
    pub complaint_type: Option<String>,
    pub agency: Option<String>,
    pub sort: SortOrder,
}

impl IncidentFilter {
    /// True when any filter beyond the ZIP itself is set.
    pub fn has_extra_filters(&self) -> bool {
        self.status.is_some() || self.complaint_type.is_some() || self.agency.is_some()
    }
}

// ---------------- Comments ------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    #[default]
    Approved,
    Rejected,
}
string_enum!(CommentStatus { Approved => "approved", Rejected => "rejected" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Like,
    Dislike,
}
string_enum!(VoteKind { Like => "like", Dislike => "dislike" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Reject,
    Delete,
}
string_enum!(ModerationAction { Approve => "approve", Reject => "reject", Delete => "delete" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub user_id: Id,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub id: Id,
    pub incident_id: String,
    pub user_id: Id,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: CommentStatus,
    pub moderated_by: Option<Id>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub likes: Vec<Id>,
    pub dislikes: Vec<Id>,
    pub reports: Vec<Report>,
}

impl Comment {
    pub fn counts(&self) -> VoteCounts {
        VoteCounts { likes: self.likes.len() as i64, dislikes: self.dislikes.len() as i64 }
    }

    /// Toggle-with-exclusivity: repeating a vote removes it, casting the
    /// other kind moves the user across.
    pub fn apply_vote(&mut self, user_id: Id, kind: VoteKind) {
        let (same, opposite) = match kind {
            VoteKind::Like => (&mut self.likes, &mut self.dislikes),
            VoteKind::Dislike => (&mut self.dislikes, &mut self.likes),
        };
        if same.contains(&user_id) {
            same.retain(|u| *u != user_id);
        } else {
            same.push(user_id);
            opposite.retain(|u| *u != user_id);
        }
    }

    pub fn reported_by(&self, user_id: Id) -> bool {
        self.reports.iter().any(|r| r.user_id == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub incident_id: String,
    pub user_id: Id,
    pub username: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct VoteCounts {
    pub likes: i64,
    pub dislikes: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ModerationFilter {
    pub status: Option<CommentStatus>,
    /// `None` = any, `Some(true)` = at least one report, `Some(false)` = none.
    pub has_reports: Option<bool>,
    pub skip: i64,
    pub limit: i64,
}

impl ModerationFilter {
    pub fn matches(&self, c: &Comment) -> bool {
        self.status.map(|s| s == c.status).unwrap_or(true)
            && self.has_reports.map(|want| want == !c.reports.is_empty()).unwrap_or(true)
    }
}

// ---------------- Trending ------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrendKind {
    #[default]
    Comments,
    Likes,
    Dislikes,
}
string_enum!(TrendKind { Comments => "comments", Likes => "likes", Dislikes => "dislikes" });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrendPeriod {
    Day,
    #[default]
    Week,
    Month,
    All,
}
string_enum!(TrendPeriod { Day => "day", Week => "week", Month => "month", All => "all" });

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendQuery {
    pub kind: TrendKind,
    pub period: TrendPeriod,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct TrendingEntry {
    pub incident_id: String,
    pub count: i64,
    pub latest_comment: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrendingIncident {
    pub incident: Incident,
    pub count: i64,
    pub latest_comment: DateTime<Utc>,
}

// ---------------- Request / response bodies -------------------------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub borough: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VoteRequest {
    #[serde(rename = "type")]
    pub vote_type: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReportRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetRoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct FeedParams {
    pub zip: String,
    pub page: Option<i64>,
    pub status: Option<String>,
    pub complaint_type: Option<String>,
    pub agency: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeedPage {
    pub zip: String,
    pub page: i64,
    pub has_more: bool,
    pub incidents: Vec<Incident>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct TrendingParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub period: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ModerationParams {
    pub status: Option<String>,
    pub has_reports: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModerationItem {
    #[serde(flatten)]
    pub comment: Comment,
    pub incident: Option<Incident>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IngestRequest {
    pub zip: Option<String>,
    pub days: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
    pub complaint_type: Option<String>,
    pub agency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestReport {
    pub fetched: usize,
    pub saved: u64,
    pub zip: Option<String>,
    /// Lookback that produced the rows; `None` for an unbounded fetch.
    pub days: Option<u32>,
}
