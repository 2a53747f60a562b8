use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::{Auth, Role};
use crate::error::ApiError;
use crate::models::*;
use crate::opendata::IncidentSource;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::validation::parse_id;
use crate::{accounts, comments, ingest, trending};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/incidents").route(web::get().to(list_incidents)))
            .service(web::resource("/incidents/{id}").route(web::get().to(get_incident)))
            .service(
                web::resource("/incidents/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/comments/{id}/vote").route(web::post().to(vote_comment)))
            .service(web::resource("/comments/{id}/report").route(web::post().to(report_comment)))
            .service(web::resource("/trending").route(web::get().to(get_trending)))
            // Admin
            .service(web::resource("/admin/moderation/comments").route(web::get().to(moderation_queue)))
            .service(
                web::resource("/admin/moderation/comments/{id}/{action}").route(web::post().to(moderate_comment)),
            )
            .service(web::resource("/admin/ingest").route(web::post().to(run_ingest)))
            .service(web::resource("/admin/users/{id}/role").route(web::put().to(set_user_role)))
            .service(web::resource("/admin/users/{id}/status").route(web::put().to(set_user_status))),
    );
    cfg.route("/healthz", web::get().to(healthz));
    cfg.route("/metrics", web::get().to(metrics));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub source: Arc<dyn IncidentSource>,
    pub rate_limiter: Option<RateLimiterFacade>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, source: Arc<dyn IncidentSource>) -> Self {
        Self { repo, source, rate_limiter: None, metrics: None }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn throttle(&self, allow: impl FnOnce(&RateLimiterFacade) -> bool) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(rl) if !allow(rl) => Err(ApiError::TooManyRequests),
            _ => Ok(()),
        }
    }
}

// ---------------- Auth ----------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email or username taken")
    )
)]
pub async fn register(data: web::Data<AppState>, payload: web::Json<RegisterRequest>) -> Result<HttpResponse, ApiError> {
    let resp = accounts::register(data.repo.as_ref(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(resp))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials or account locked")
    )
)]
pub async fn login(data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let resp = accounts::login(data.repo.as_ref(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(resp))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    pub id: Id,
    pub username: String,
    pub role: Role,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    let role = if auth.is_admin() { Role::Admin } else { Role::User };
    Ok(HttpResponse::Ok().json(MeResponse { id: auth.user_id()?, username: auth.username().to_string(), role }))
}

// ---------------- Incidents -----------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/incidents",
    params(FeedParams),
    responses(
        (status = 200, description = "One page of incidents for a ZIP", body = FeedPage),
        (status = 400, description = "Invalid ZIP or sort"),
        (status = 502, description = "Open data API failed during backfill")
    )
)]
pub async fn list_incidents(data: web::Data<AppState>, query: web::Query<FeedParams>) -> Result<HttpResponse, ApiError> {
    let page = ingest::feed_page(data.repo.as_ref(), data.source.as_ref(), &query).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}",
    params(("id" = String, Path, description = "Open data id")),
    responses(
        (status = 200, description = "Incident", body = Incident),
        (status = 404, description = "Incident not found")
    )
)]
pub async fn get_incident(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let incident = data.repo.get_incident(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(incident))
}

#[utoipa::path(
    get,
    path = "/api/v1/incidents/{id}/comments",
    params(("id" = String, Path, description = "Open data id")),
    responses(
        (status = 200, description = "Approved comments, newest first", body = [Comment]),
        (status = 404, description = "Incident not found")
    )
)]
pub async fn list_comments(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let list = comments::list_comments(data.repo.as_ref(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[utoipa::path(
    post,
    path = "/api/v1/incidents/{id}/comments",
    params(("id" = String, Path, description = "Open data id")),
    request_body = NewCommentRequest,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Empty or oversized comment"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Incident not found"),
        (status = 429, description = "Too many comments")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewCommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = auth.user_id()?;
    data.throttle(|rl| rl.allow_comment(user_id))?;
    let comment =
        comments::create_comment(data.repo.as_ref(), &path.into_inner(), user_id, auth.username(), &payload.content).await?;
    Ok(HttpResponse::Created().json(comment))
}

// ---------------- Comments ------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/comments/{id}/vote",
    params(("id" = Id, Path, description = "Comment id")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Updated counts", body = VoteCounts),
        (status = 400, description = "Bad id or vote type"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn vote_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<VoteRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = auth.user_id()?;
    data.throttle(|rl| rl.allow_vote(user_id))?;
    let counts = comments::vote(data.repo.as_ref(), &path.into_inner(), user_id, &payload.vote_type).await?;
    Ok(HttpResponse::Ok().json(counts))
}

#[utoipa::path(
    post,
    path = "/api/v1/comments/{id}/report",
    params(("id" = Id, Path, description = "Comment id")),
    request_body = ReportRequest,
    responses(
        (status = 200, description = "Report recorded", body = Comment),
        (status = 400, description = "Bad id or reason"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Comment not found"),
        (status = 409, description = "Already reported by this user")
    )
)]
pub async fn report_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = auth.user_id()?;
    data.throttle(|rl| rl.allow_report(user_id))?;
    let comment = comments::report(data.repo.as_ref(), &path.into_inner(), user_id, &payload.reason).await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/v1/trending",
    params(TrendingParams),
    responses(
        (status = 200, description = "Ranked incidents", body = [TrendingIncident]),
        (status = 400, description = "Unknown type or period")
    )
)]
pub async fn get_trending(data: web::Data<AppState>, query: web::Query<TrendingParams>) -> Result<HttpResponse, ApiError> {
    let q = trending::parse_query(&query)?;
    let ranked = trending::trending(data.repo.as_ref(), &q, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ranked))
}

// ---------------- Admin ---------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/admin/moderation/comments",
    params(ModerationParams),
    responses(
        (status = 200, description = "Moderation queue", body = [ModerationItem]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn moderation_queue(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<ModerationParams>,
) -> Result<HttpResponse, ApiError> {
    accounts::require_admin(data.repo.as_ref(), &auth).await?;
    let items = comments::list_for_moderation(data.repo.as_ref(), &query).await?;
    Ok(HttpResponse::Ok().json(items))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/moderation/comments/{id}/{action}",
    params(
        ("id" = Id, Path, description = "Comment id"),
        ("action" = String, Path, description = "approve, reject or delete")
    ),
    responses(
        (status = 200, description = "Comment after approve/reject", body = Comment),
        (status = 204, description = "Comment deleted"),
        (status = 400, description = "Unknown action"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn moderate_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let moderator = accounts::require_admin(data.repo.as_ref(), &auth).await?;
    let (id, action) = path.into_inner();
    match comments::moderate(data.repo.as_ref(), &id, &action, moderator).await? {
        Some(comment) => Ok(HttpResponse::Ok().json(comment)),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/ingest",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Ingestion summary", body = IngestReport),
        (status = 403, description = "Admins only"),
        (status = 502, description = "Open data API failed")
    )
)]
pub async fn run_ingest(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<IngestRequest>,
) -> Result<HttpResponse, ApiError> {
    accounts::require_admin(data.repo.as_ref(), &auth).await?;
    let report = ingest::ingest(data.repo.as_ref(), data.source.as_ref(), &payload).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/role",
    params(("id" = Id, Path, description = "User id")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = PublicUser),
        (status = 400, description = "Invalid role"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found")
    )
)]
pub async fn set_user_role(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<SetRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    accounts::require_admin(data.repo.as_ref(), &auth).await?;
    let user_id = parse_id(&path.into_inner(), "User")?;
    let user = accounts::set_role(data.repo.as_ref(), user_id, &payload.role).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/status",
    params(("id" = Id, Path, description = "User id")),
    request_body = SetStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = PublicUser),
        (status = 400, description = "Invalid status"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found")
    )
)]
pub async fn set_user_status(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<SetStatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin_id = accounts::require_admin(data.repo.as_ref(), &auth).await?;
    let user_id = parse_id(&path.into_inner(), "User")?;
    if user_id == admin_id {
        return Err(ApiError::bad_request("Admins cannot change their own status."));
    }
    let user = accounts::set_status(data.repo.as_ref(), user_id, &payload.status).await?;
    Ok(HttpResponse::Ok().json(user))
}

// ---------------- Service -------------------------------------------------

pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub async fn metrics(data: web::Data<AppState>) -> HttpResponse {
    match &data.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
