use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, QueryBuilder};

use super::*;

// Bind parameters per statement stay well under Postgres' 65535 limit.
const INSERT_CHUNK: usize = 1000;

const INCIDENT_COLS: &str = "open_data_id, complaint_type, descriptor, incident_zip, agency, status, \
     created_date, latitude, longitude, ingested_at";
const COMMENT_COLS: &str = "id, incident_id, user_id, username, content, created_at, status, \
     moderated_by, moderated_at, likes, dislikes, reports";
const USER_COLS: &str = "id, email, email_lower, username, username_lower, password_hash, role, status, \
     created_at, last_login_at, first_name, last_name, zip, borough, notify_on_replies, \
     failed_login_count, locked_until";

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict(db.message().to_string()),
            other => RepoError::Internal(other.to_string()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Id,
    incident_id: String,
    user_id: Id,
    username: String,
    content: String,
    created_at: DateTime<Utc>,
    status: String,
    moderated_by: Option<Id>,
    moderated_at: Option<DateTime<Utc>>,
    likes: Vec<Id>,
    dislikes: Vec<Id>,
    reports: Json<Vec<Report>>,
}

impl TryFrom<CommentRow> for Comment {
    type Error = RepoError;
    fn try_from(r: CommentRow) -> Result<Self, Self::Error> {
        let status = r
            .status
            .parse()
            .map_err(|e| RepoError::Internal(format!("comment {}: {e}", r.id)))?;
        Ok(Comment {
            id: r.id,
            incident_id: r.incident_id,
            user_id: r.user_id,
            username: r.username,
            content: r.content,
            created_at: r.created_at,
            status,
            moderated_by: r.moderated_by,
            moderated_at: r.moderated_at,
            likes: r.likes,
            dislikes: r.dislikes,
            reports: r.reports.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Id,
    email: String,
    email_lower: String,
    username: String,
    username_lower: String,
    password_hash: String,
    role: String,
    status: String,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
    first_name: String,
    last_name: String,
    zip: String,
    borough: String,
    notify_on_replies: bool,
    failed_login_count: i32,
    locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;
    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&r.role).ok_or_else(|| RepoError::Internal(format!("user {}: bad role '{}'", r.id, r.role)))?;
        let status = r
            .status
            .parse()
            .map_err(|e| RepoError::Internal(format!("user {}: {e}", r.id)))?;
        Ok(User {
            id: r.id,
            email: r.email,
            email_lower: r.email_lower,
            username: r.username,
            username_lower: r.username_lower,
            password_hash: r.password_hash,
            role,
            status,
            created_at: r.created_at,
            last_login_at: r.last_login_at,
            profile: Profile {
                first_name: r.first_name,
                last_name: r.last_name,
                zip: r.zip,
                borough: r.borough,
                notify_on_replies: r.notify_on_replies,
            },
            auth_meta: AuthMeta { failed_login_count: r.failed_login_count, locked_until: r.locked_until },
        })
    }
}

fn comments_from(rows: Vec<CommentRow>) -> RepoResult<Vec<Comment>> {
    rows.into_iter().map(Comment::try_from).collect()
}

/// Wrap a user-supplied fragment for a case-insensitive substring match.
fn like_pattern(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 2);
    escaped.push('%');
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn comment_exists(&self, id: Id) -> RepoResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM comments WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl IncidentRepo for PgRepo {
    async fn insert_incidents(&self, docs: Vec<NewIncident>) -> RepoResult<u64> {
        let mut inserted = 0;
        for chunk in docs.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO incidents (open_data_id, complaint_type, descriptor, incident_zip, agency, status, created_date, latitude, longitude) ",
            );
            qb.push_values(chunk, |mut b, d| {
                b.push_bind(d.open_data_id.clone())
                    .push_bind(d.complaint_type.clone())
                    .push_bind(d.descriptor.clone())
                    .push_bind(d.incident_zip.clone())
                    .push_bind(d.agency.clone())
                    .push_bind(d.status.clone())
                    .push_bind(d.created_date)
                    .push_bind(d.latitude)
                    .push_bind(d.longitude);
            });
            qb.push(" ON CONFLICT (open_data_id) DO NOTHING");
            let res = qb.build().execute(&self.pool).await?;
            inserted += res.rows_affected();
        }
        Ok(inserted)
    }

    async fn get_incident(&self, open_data_id: &str) -> RepoResult<Incident> {
        let rec = sqlx::query_as::<_, Incident>(&format!("SELECT {INCIDENT_COLS} FROM incidents WHERE open_data_id = $1"))
            .bind(open_data_id)
            .fetch_optional(&self.pool)
            .await?;
        rec.ok_or(RepoError::NotFound)
    }

    async fn list_incidents_by_zip(&self, zip: &str, skip: i64, limit: i64) -> RepoResult<Vec<Incident>> {
        let recs = sqlx::query_as::<_, Incident>(&format!(
            "SELECT {INCIDENT_COLS} FROM incidents WHERE incident_zip = $1 \
             ORDER BY created_date DESC NULLS LAST, open_data_id OFFSET $2 LIMIT $3"
        ))
        .bind(zip)
        .bind(skip.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }

    async fn list_incidents(&self, f: &IncidentFilter) -> RepoResult<Vec<Incident>> {
        let direction = match f.sort {
            SortOrder::Newest => "DESC",
            SortOrder::Oldest => "ASC",
        };
        let recs = sqlx::query_as::<_, Incident>(&format!(
            r#"SELECT {INCIDENT_COLS} FROM incidents
               WHERE incident_zip = $1 AND created_date IS NOT NULL
                 AND ($2::TEXT IS NULL OR status = $2)
                 AND ($3::TEXT IS NULL OR complaint_type ILIKE $3)
                 AND ($4::TEXT IS NULL OR agency ILIKE $4)
               ORDER BY created_date {direction}, open_data_id
               OFFSET $5 LIMIT $6"#
        ))
        .bind(&f.zip)
        .bind(f.status.as_deref())
        .bind(f.complaint_type.as_deref().map(like_pattern))
        .bind(f.agency.as_deref().map(like_pattern))
        .bind(f.skip.max(0))
        .bind(f.limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }
}

#[async_trait]
impl CommentRepo for PgRepo {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            "INSERT INTO comments (incident_id, user_id, username, content) VALUES ($1, $2, $3, $4) RETURNING {COMMENT_COLS}"
        ))
        .bind(&new.incident_id)
        .bind(new.user_id)
        .bind(&new.username)
        .bind(&new.content)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(&format!("SELECT {COMMENT_COLS} FROM comments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;
        row.try_into()
    }

    async fn list_comments(&self, incident_id: &str) -> RepoResult<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            "SELECT {COMMENT_COLS} FROM comments WHERE incident_id = $1 AND status = 'approved' \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;
        comments_from(rows)
    }

    async fn vote_comment(&self, id: Id, user_id: Id, kind: VoteKind) -> RepoResult<VoteCounts> {
        let (same, opposite) = match kind {
            VoteKind::Like => ("likes", "dislikes"),
            VoteKind::Dislike => ("dislikes", "likes"),
        };
        // Single statement: the row lock makes the toggle atomic. SET
        // expressions all see the pre-update row.
        let counts = sqlx::query_as::<_, VoteCounts>(&format!(
            r#"UPDATE comments SET
                 {same} = CASE WHEN $2 = ANY({same}) THEN array_remove({same}, $2)
                               ELSE array_append({same}, $2) END,
                 {opposite} = array_remove({opposite}, $2)
               WHERE id = $1
               RETURNING cardinality(likes)::BIGINT AS likes, cardinality(dislikes)::BIGINT AS dislikes"#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        counts.ok_or(RepoError::NotFound)
    }

    async fn report_comment(&self, id: Id, user_id: Id, reason: String) -> RepoResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            r#"UPDATE comments
               SET reports = reports || jsonb_build_array(jsonb_build_object(
                     'user_id', $2::BIGINT, 'reason', $3::TEXT, 'created_at', $4::TEXT))
               WHERE id = $1
                 AND NOT (reports @> jsonb_build_array(jsonb_build_object('user_id', $2::BIGINT)))
               RETURNING {COMMENT_COLS}"#
        ))
        .bind(id)
        .bind(user_id)
        .bind(&reason)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row.try_into(),
            None if self.comment_exists(id).await? => Err(RepoError::Conflict(ALREADY_REPORTED.into())),
            None => Err(RepoError::NotFound),
        }
    }

    async fn list_for_moderation(&self, filter: &ModerationFilter) -> RepoResult<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            r#"SELECT {COMMENT_COLS} FROM comments
               WHERE ($1::TEXT IS NULL OR status = $1)
                 AND ($2::BOOLEAN IS NULL OR (jsonb_array_length(reports) > 0) = $2)
               ORDER BY created_at DESC, id DESC
               OFFSET $3 LIMIT $4"#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.has_reports)
        .bind(filter.skip.max(0))
        .bind(filter.limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        comments_from(rows)
    }

    async fn set_comment_status(&self, id: Id, status: CommentStatus, moderator: Id) -> RepoResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            "UPDATE comments SET status = $2, moderated_by = $3, moderated_at = now() WHERE id = $1 RETURNING {COMMENT_COLS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(moderator)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound)?;
        row.try_into()
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn trending(&self, query: &TrendQuery, since: Option<DateTime<Utc>>) -> RepoResult<Vec<TrendingEntry>> {
        let tally = match query.kind {
            TrendKind::Comments => "COUNT(*)",
            TrendKind::Likes => "COALESCE(SUM(cardinality(likes)), 0)",
            TrendKind::Dislikes => "COALESCE(SUM(cardinality(dislikes)), 0)",
        };
        let recs = sqlx::query_as::<_, TrendingEntry>(&format!(
            r#"SELECT incident_id, {tally}::BIGINT AS count, MAX(created_at) AS latest_comment
               FROM comments
               WHERE status = 'approved' AND ($1::TIMESTAMPTZ IS NULL OR created_at >= $1)
               GROUP BY incident_id
               ORDER BY count DESC, latest_comment DESC, incident_id
               LIMIT $2"#
        ))
        .bind(since)
        .bind(query.limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        let res = sqlx::query_as::<_, UserRow>(&format!(
            r#"INSERT INTO users (email, email_lower, username, username_lower, password_hash,
                                  first_name, last_name, zip, borough, notify_on_replies)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING {USER_COLS}"#
        ))
        .bind(&new.email)
        .bind(new.email.to_lowercase())
        .bind(&new.username)
        .bind(new.username.to_lowercase())
        .bind(&new.password_hash)
        .bind(&new.profile.first_name)
        .bind(&new.profile.last_name)
        .bind(&new.profile.zip)
        .bind(&new.profile.borough)
        .bind(new.profile.notify_on_replies)
        .fetch_one(&self.pool)
        .await;
        match res {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(RepoError::Conflict(DUPLICATE_ACCOUNT.into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;
        row.try_into()
    }

    async fn find_user_by_identifier(&self, identifier: &str) -> RepoResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLS} FROM users WHERE email_lower = $1 OR username_lower = $1 LIMIT 1"
        ))
        .bind(identifier.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound)?;
        row.try_into()
    }

    async fn record_login_success(&self, id: Id, at: DateTime<Utc>) -> RepoResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $2, failed_login_count = 0, locked_until = NULL WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_login_failure(&self, id: Id, max_failures: i32, lock_until: DateTime<Utc>) -> RepoResult<AuthMeta> {
        let rec: Option<(i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"UPDATE users SET
                 failed_login_count = failed_login_count + 1,
                 locked_until = CASE WHEN failed_login_count + 1 >= $2 THEN $3 ELSE NULL END
               WHERE id = $1
               RETURNING failed_login_count, locked_until"#,
        )
        .bind(id)
        .bind(max_failures)
        .bind(lock_until)
        .fetch_optional(&self.pool)
        .await?;
        let (failed_login_count, locked_until) = rec.ok_or(RepoError::NotFound)?;
        Ok(AuthMeta { failed_login_count, locked_until })
    }

    async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLS}"))
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;
        row.try_into()
    }

    async fn set_user_status(&self, id: Id, status: AccountStatus) -> RepoResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!("UPDATE users SET status = $2 WHERE id = $1 RETURNING {USER_COLS}"))
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;
        row.try_into()
    }
}
