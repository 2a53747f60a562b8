use crate::error::ApiError;
use crate::models::*;
use crate::repo::{Repo, RepoError};
use crate::validation::{parse_id, validate_comment, validate_reason};

pub const DEFAULT_MODERATION_LIMIT: i64 = 50;
pub const MAX_MODERATION_LIMIT: i64 = 200;

pub async fn create_comment(repo: &dyn Repo, incident_id: &str, user_id: Id, username: &str, content: &str) -> Result<Comment, ApiError> {
    let content = validate_comment(content)?;
    let incident = repo.get_incident(incident_id).await?;
    let comment = repo
        .create_comment(NewComment {
            incident_id: incident.open_data_id,
            user_id,
            username: username.to_string(),
            content,
        })
        .await?;
    metrics::increment_counter!("comments_created_total");
    tracing::info!(comment_id = comment.id, incident_id = %comment.incident_id, user_id, "comment created");
    Ok(comment)
}

pub async fn list_comments(repo: &dyn Repo, incident_id: &str) -> Result<Vec<Comment>, ApiError> {
    repo.get_incident(incident_id).await?;
    Ok(repo.list_comments(incident_id).await?)
}

pub async fn vote(repo: &dyn Repo, comment_id: &str, user_id: Id, vote_type: &str) -> Result<VoteCounts, ApiError> {
    let id = parse_id(comment_id, "Comment")?;
    let kind: VoteKind = vote_type
        .parse()
        .map_err(|_| ApiError::bad_request("Vote type must be like or dislike."))?;
    let counts = repo.vote_comment(id, user_id, kind).await?;
    metrics::increment_counter!("comment_votes_total", "type" => kind.as_str());
    tracing::debug!(comment_id = id, user_id, kind = %kind, ?counts, "vote recorded");
    Ok(counts)
}

pub async fn report(repo: &dyn Repo, comment_id: &str, user_id: Id, reason: &str) -> Result<Comment, ApiError> {
    let id = parse_id(comment_id, "Comment")?;
    let reason = validate_reason(reason)?;
    let comment = repo.report_comment(id, user_id, reason).await?;
    metrics::increment_counter!("comment_reports_total");
    tracing::info!(comment_id = id, user_id, reports = comment.reports.len(), "comment reported");
    Ok(comment)
}

/// Apply an admin action. `delete` removes the comment and returns `None`.
pub async fn moderate(repo: &dyn Repo, comment_id: &str, action: &str, moderator: Id) -> Result<Option<Comment>, ApiError> {
    let id = parse_id(comment_id, "Comment")?;
    let action: ModerationAction = action
        .parse()
        .map_err(|_| ApiError::bad_request("Action must be approve, reject or delete."))?;
    let out = match action {
        ModerationAction::Approve => Some(repo.set_comment_status(id, CommentStatus::Approved, moderator).await?),
        ModerationAction::Reject => Some(repo.set_comment_status(id, CommentStatus::Rejected, moderator).await?),
        ModerationAction::Delete => {
            repo.delete_comment(id).await?;
            None
        }
    };
    metrics::increment_counter!("comment_moderations_total", "action" => action.as_str());
    tracing::info!(comment_id = id, moderator, action = %action, "comment moderated");
    Ok(out)
}

/// `has_reports` accepts `true`/`false`; anything else (or absent) means any.
pub fn parse_moderation_filter(params: &ModerationParams) -> Result<ModerationFilter, ApiError> {
    let status = match params.status.as_deref().map(str::trim).filter(|s| !s.is_empty() && *s != "any") {
        Some(s) => Some(
            s.parse::<CommentStatus>()
                .map_err(|_| ApiError::bad_request("status must be approved or rejected."))?,
        ),
        None => None,
    };
    let has_reports = match params.has_reports.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" => Some(true),
        Some(v) if v == "false" => Some(false),
        _ => None,
    };
    Ok(ModerationFilter {
        status,
        has_reports,
        skip: params.skip.unwrap_or(0).max(0),
        limit: params.limit.unwrap_or(DEFAULT_MODERATION_LIMIT).clamp(1, MAX_MODERATION_LIMIT),
    })
}

/// Moderation queue, newest first, each comment paired with its incident
/// when that still resolves.
pub async fn list_for_moderation(repo: &dyn Repo, params: &ModerationParams) -> Result<Vec<ModerationItem>, ApiError> {
    let filter = parse_moderation_filter(params)?;
    let comments = repo.list_for_moderation(&filter).await?;
    let mut items = Vec::with_capacity(comments.len());
    for comment in comments {
        let incident = match repo.get_incident(&comment.incident_id).await {
            Ok(i) => Some(i),
            Err(RepoError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        items.push(ModerationItem { comment, incident });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(status: Option<&str>, has_reports: Option<&str>) -> ModerationParams {
        ModerationParams {
            status: status.map(str::to_string),
            has_reports: has_reports.map(str::to_string),
            skip: None,
            limit: None,
        }
    }

    #[test]
    fn moderation_filter_defaults() {
        let f = parse_moderation_filter(&params(None, None)).unwrap();
        assert_eq!(f.status, None);
        assert_eq!(f.has_reports, None);
        assert_eq!(f.limit, DEFAULT_MODERATION_LIMIT);

        let f = parse_moderation_filter(&params(Some("Rejected"), Some("true"))).unwrap();
        assert_eq!(f.status, Some(CommentStatus::Rejected));
        assert_eq!(f.has_reports, Some(true));

        let f = parse_moderation_filter(&params(Some("any"), Some("whatever"))).unwrap();
        assert_eq!(f.status, None);
        assert_eq!(f.has_reports, None);
    }

    #[test]
    fn moderation_filter_rejects_unknown_status() {
        assert!(matches!(
            parse_moderation_filter(&params(Some("pending"), None)),
            Err(ApiError::BadRequest(_))
        ));
    }
}
