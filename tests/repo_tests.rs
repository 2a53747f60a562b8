#![cfg(feature = "inmem-store")]

mod common;

use chrono::{Duration, Utc};
use civic_feed::{
    auth::Role,
    models::*,
    repo::{inmem::InMemRepo, RepoError, ALREADY_REPORTED},
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use civic_feed::repo::{CommentRepo, IncidentRepo, UserRepo};

use common::incident;

fn new_user(email: &str, username: &str) -> NewUser {
    NewUser {
        email: email.into(),
        username: username.into(),
        password_hash: "$argon2id$placeholder".into(),
        profile: Profile::default(),
    }
}

async fn seeded_comment(r: &InMemRepo, incident_id: &str) -> Comment {
    r.create_comment(NewComment {
        incident_id: incident_id.into(),
        user_id: 1,
        username: "demoUser".into(),
        content: "Still broken".into(),
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn incident_insert_skips_duplicates() {
    let r = InMemRepo::new();
    let saved = r
        .insert_incidents(vec![incident("1", "11213"), incident("2", "11213"), incident("1", "11213")])
        .await
        .unwrap();
    assert_eq!(saved, 2);
    assert_eq!(r.insert_incidents(vec![incident("2", "11213")]).await.unwrap(), 0);
    assert!(matches!(r.get_incident("3").await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn filtered_listing_excludes_undated_and_sorts() {
    let r = InMemRepo::new();
    let now = Utc::now();
    let mut older = incident("older", "11213");
    older.created_date = Some(now - Duration::days(2));
    let mut newer = incident("newer", "11213");
    newer.created_date = Some(now);
    newer.agency = Some("DOT".into());
    let mut undated = incident("undated", "11213");
    undated.created_date = None;
    r.insert_incidents(vec![older, newer, undated, incident("elsewhere", "10001")]).await.unwrap();

    let mut f = IncidentFilter { zip: "11213".into(), limit: 10, ..Default::default() };
    let ids: Vec<_> = r.list_incidents(&f).await.unwrap().into_iter().map(|i| i.open_data_id).collect();
    assert_eq!(ids, vec!["newer", "older"]);

    f.sort = SortOrder::Oldest;
    let ids: Vec<_> = r.list_incidents(&f).await.unwrap().into_iter().map(|i| i.open_data_id).collect();
    assert_eq!(ids, vec!["older", "newer"]);

    f.agency = Some("dot".into());
    let ids: Vec<_> = r.list_incidents(&f).await.unwrap().into_iter().map(|i| i.open_data_id).collect();
    assert_eq!(ids, vec!["newer"]);

    // plain ZIP listing keeps undated rows, last
    let by_zip = r.list_incidents_by_zip("11213", 0, 10).await.unwrap();
    assert_eq!(by_zip.len(), 3);
    assert_eq!(by_zip[2].open_data_id, "undated");
}

#[tokio::test]
async fn only_approved_comments_are_listed() {
    let r = InMemRepo::new();
    let first = seeded_comment(&r, "A").await;
    let second = seeded_comment(&r, "A").await;
    r.set_comment_status(first.id, CommentStatus::Rejected, 99).await.unwrap();

    let listed = r.list_comments("A").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, second.id);

    let rejected = r.get_comment(first.id).await.unwrap();
    assert_eq!(rejected.moderated_by, Some(99));
    assert!(rejected.moderated_at.is_some());
}

#[tokio::test]
async fn votes_toggle_and_stay_exclusive() {
    let r = InMemRepo::new();
    let c = seeded_comment(&r, "A").await;

    let counts = r.vote_comment(c.id, 7, VoteKind::Like).await.unwrap();
    assert_eq!(counts, VoteCounts { likes: 1, dislikes: 0 });
    let counts = r.vote_comment(c.id, 7, VoteKind::Dislike).await.unwrap();
    assert_eq!(counts, VoteCounts { likes: 0, dislikes: 1 });
    let counts = r.vote_comment(c.id, 7, VoteKind::Dislike).await.unwrap();
    assert_eq!(counts, VoteCounts { likes: 0, dislikes: 0 });

    assert!(matches!(r.vote_comment(404, 7, VoteKind::Like).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn second_report_from_same_user_conflicts() {
    let r = InMemRepo::new();
    let c = seeded_comment(&r, "A").await;
    let reported = r.report_comment(c.id, 5, "spam".into()).await.unwrap();
    assert_eq!(reported.reports.len(), 1);

    match r.report_comment(c.id, 5, "again".into()).await {
        Err(RepoError::Conflict(msg)) => assert_eq!(msg, ALREADY_REPORTED),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(r.report_comment(c.id, 6, "rude".into()).await.unwrap().reports.len(), 2);
}

#[tokio::test]
async fn moderation_filter_and_delete() {
    let r = InMemRepo::new();
    let quiet = seeded_comment(&r, "A").await;
    let noisy = seeded_comment(&r, "B").await;
    r.report_comment(noisy.id, 3, "abuse".into()).await.unwrap();

    let reported = r
        .list_for_moderation(&ModerationFilter { has_reports: Some(true), limit: 50, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(reported.iter().map(|c| c.id).collect::<Vec<_>>(), vec![noisy.id]);

    let clean = r
        .list_for_moderation(&ModerationFilter { has_reports: Some(false), limit: 50, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(clean.iter().map(|c| c.id).collect::<Vec<_>>(), vec![quiet.id]);

    r.delete_comment(noisy.id).await.unwrap();
    assert!(matches!(r.get_comment(noisy.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.delete_comment(noisy.id).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn trending_counts_comments_per_incident() {
    let r = InMemRepo::new();
    seeded_comment(&r, "A").await;
    seeded_comment(&r, "A").await;
    seeded_comment(&r, "B").await;
    let q = TrendQuery { kind: TrendKind::Comments, period: TrendPeriod::All, limit: 10 };
    let ranked = r.trending(&q, None).await.unwrap();
    assert_eq!(ranked[0].incident_id, "A");
    assert_eq!(ranked[0].count, 2);
    assert_eq!(ranked[1].incident_id, "B");
}

#[tokio::test]
async fn users_unique_case_insensitively() {
    let r = InMemRepo::new();
    let u = r.create_user(new_user("Demo@Example.com", "demoUser")).await.unwrap();
    assert_eq!(u.role, Role::User);
    assert_eq!(u.status, AccountStatus::Active);

    assert!(matches!(r.create_user(new_user("demo@example.com", "other")).await, Err(RepoError::Conflict(_))));
    assert!(matches!(r.create_user(new_user("x@example.com", "DEMOUSER")).await, Err(RepoError::Conflict(_))));

    assert_eq!(r.find_user_by_identifier("DEMO@example.COM").await.unwrap().id, u.id);
    assert_eq!(r.find_user_by_identifier("demouser").await.unwrap().id, u.id);
}

#[tokio::test]
async fn login_failures_lock_then_success_resets() {
    let r = InMemRepo::new();
    let u = r.create_user(new_user("a@b.co", "alice")).await.unwrap();
    let until = Utc::now() + Duration::minutes(10);
    for n in 1..5 {
        let meta = r.record_login_failure(u.id, 5, until).await.unwrap();
        assert_eq!(meta.failed_login_count, n);
        assert!(meta.locked_until.is_none());
    }
    let meta = r.record_login_failure(u.id, 5, until).await.unwrap();
    assert_eq!(meta.locked_until, Some(until));

    r.record_login_success(u.id, Utc::now()).await.unwrap();
    let u = r.get_user(u.id).await.unwrap();
    assert_eq!(u.auth_meta, AuthMeta::default());
    assert!(u.last_login_at.is_some());

    let promoted = r.set_user_role(u.id, Role::Admin).await.unwrap();
    assert_eq!(promoted.role, Role::Admin);
}

#[tokio::test]
async fn snapshot_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    {
        let r = InMemRepo::with_snapshot(dir.path());
        r.insert_incidents(vec![incident("1", "11213")]).await.unwrap();
        let c = seeded_comment(&r, "1").await;
        r.vote_comment(c.id, 2, VoteKind::Like).await.unwrap();
    }
    let reloaded = InMemRepo::with_snapshot(dir.path());
    assert!(reloaded.get_incident("1").await.is_ok());
    let comments = reloaded.list_comments("1").await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].likes, vec![2]);

    // ids keep counting after a reload
    let next = seeded_comment(&reloaded, "1").await;
    assert!(next.id > comments[0].id);
}

#[tokio::test]
async fn unwritable_snapshot_dir_does_not_fail_writes() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let r = InMemRepo::with_snapshot(blocker.join("nested"));
    assert_eq!(r.insert_incidents(vec![incident("1", "11213")]).await.unwrap(), 1);
    assert!(r.get_incident("1").await.is_ok());
    assert!(!blocker.join("nested").exists());
}
