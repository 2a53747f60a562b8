use crate::models::{
    AuthResponse, Comment, CommentStatus, FeedPage, Incident, IngestReport, IngestRequest, LoginRequest, ModerationItem,
    NewCommentRequest, Profile, PublicUser, RegisterRequest, Report, ReportRequest, SetRoleRequest, SetStatusRequest, TrendingIncident,
    VoteCounts, VoteRequest,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::list_incidents,
        crate::routes::get_incident,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::vote_comment,
        crate::routes::report_comment,
        crate::routes::get_trending,
        crate::routes::moderation_queue,
        crate::routes::moderate_comment,
        crate::routes::run_ingest,
        crate::routes::set_user_role,
        crate::routes::set_user_status,
    ),
    components(schemas(
        RegisterRequest, LoginRequest, AuthResponse, PublicUser, Profile, crate::auth::Role,
        crate::routes::MeResponse,
        Incident, FeedPage, Comment, CommentStatus, Report, NewCommentRequest, VoteRequest, VoteCounts,
        ReportRequest, TrendingIncident, ModerationItem, IngestRequest, IngestReport, SetRoleRequest,
        SetStatusRequest, crate::models::AccountStatus
    )),
    tags(
        (name = "incidents", description = "ZIP feed and incident detail"),
        (name = "comments", description = "Comments, votes and reports"),
        (name = "admin", description = "Moderation, ingestion and roles"),
    )
)]
pub struct ApiDoc;
