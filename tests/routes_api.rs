#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;

use actix_web::{test, App};
use civic_feed::accounts;
use civic_feed::auth::Role;
use civic_feed::models::PublicUser;
use civic_feed::repo::inmem::InMemRepo;
use civic_feed::{config, AdminAccount, AppState, SecurityHeaders};
use serde_json::{json, Value};
use serial_test::serial;

use common::{bearer, rows, token, StubSource};

async fn seed_admin(repo: &InMemRepo) -> PublicUser {
    let admin = AdminAccount {
        email: "admin@example.com".into(),
        username: "admin".into(),
        password: "AdminPass123".into(),
    };
    accounts::ensure_admin(repo, &admin).await.unwrap()
}

#[actix_web::test]
#[serial]
async fn test_incident_comment_moderation_flow_routes() {
    common::set_secret();
    let source = StubSource::default().with(Some(30), rows(58_000_000, 12, "11213"));
    let repo = Arc::new(InMemRepo::new());
    let admin_user = seed_admin(&repo).await;
    let state = AppState::new(repo.clone(), Arc::new(source));
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    // register
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"email": "demo@example.com", "username": "demoUser", "password": "DemoPass123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let auth: Value = test::read_body_json(resp).await;
    let user_token = auth["token"].as_str().unwrap().to_string();
    let user_id = auth["user"]["id"].as_i64().unwrap();
    assert!(auth["user"].get("password_hash").is_none());

    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(bearer(&user_token)).to_request();
    let me: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(me["username"], "demoUser");
    assert_eq!(me["role"], "user");

    // feed page backfills from the source
    let req = test::TestRequest::get().uri("/api/v1/incidents?zip=11213").to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["incidents"].as_array().unwrap().len(), 10);
    assert_eq!(page["has_more"], true);
    let incident_id = page["incidents"][0]["open_data_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri(&format!("/api/v1/incidents/{incident_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get().uri("/api/v1/incidents/nope").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not found");

    // commenting needs a token
    let comments_uri = format!("/api/v1/incidents/{incident_id}/comments");
    let req = test::TestRequest::post().uri(&comments_uri).set_json(json!({"content": "Loud all night"})).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri(&comments_uri)
        .insert_header(bearer(&user_token))
        .set_json(json!({"content": "Loud all night"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let comment: Value = test::read_body_json(resp).await;
    let comment_id = comment["id"].as_i64().unwrap();
    assert_eq!(comment["username"], "demoUser");

    // vote
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/comments/{comment_id}/vote"))
        .insert_header(bearer(&user_token))
        .set_json(json!({"type": "like"}))
        .to_request();
    let counts: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(counts, json!({"likes": 1, "dislikes": 0}));

    let req = test::TestRequest::post()
        .uri("/api/v1/comments/abc/vote")
        .insert_header(bearer(&user_token))
        .set_json(json!({"type": "like"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // report twice
    let report_uri = format!("/api/v1/comments/{comment_id}/report");
    let req = test::TestRequest::post()
        .uri(&report_uri)
        .insert_header(bearer(&user_token))
        .set_json(json!({"reason": "spam"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::post()
        .uri(&report_uri)
        .insert_header(bearer(&user_token))
        .set_json(json!({"reason": "spam"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "You have already reported this comment.");

    // trending
    let req = test::TestRequest::get().uri("/api/v1/trending?type=likes&period=all").to_request();
    let ranked: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(ranked[0]["incident"]["open_data_id"], incident_id.as_str());
    assert_eq!(ranked[0]["count"], 1);
    let req = test::TestRequest::get().uri("/api/v1/trending?period=year").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // admin surface
    let admin = token(admin_user.id, "admin", Role::Admin);
    let req = test::TestRequest::get()
        .uri("/api/v1/admin/moderation/comments?has_reports=true")
        .insert_header(bearer(&user_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/moderation/comments?has_reports=true")
        .insert_header(bearer(&admin))
        .to_request();
    let queue: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["id"], comment_id);
    assert_eq!(queue[0]["incident"]["open_data_id"], incident_id.as_str());

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/moderation/comments/{comment_id}/reject"))
        .insert_header(bearer(&admin))
        .to_request();
    let rejected: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["moderated_by"], admin_user.id);

    let req = test::TestRequest::get().uri(&comments_uri).to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert!(listed.as_array().unwrap().is_empty());

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/moderation/comments/{comment_id}/delete"))
        .insert_header(bearer(&admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/admin/users/{user_id}/role"))
        .insert_header(bearer(&admin))
        .set_json(json!({"role": "admin"}))
        .to_request();
    let promoted: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(promoted["role"], "admin");
}

#[actix_web::test]
#[serial]
async fn login_and_lockout_over_http() {
    common::set_secret();
    let state = AppState::new(Arc::new(InMemRepo::new()), Arc::new(StubSource::default()));
    let app = test::init_service(App::new().app_data(actix_web::web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"email": "demo@example.com", "username": "demoUser", "password": "DemoPass123"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"email": "DEMO@example.com", "username": "other", "password": "DemoPass123"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"identifier": "demouser", "password": "DemoPass123"}))
        .to_request();
    let ok: Value = test::call_and_read_body_json(&app, req).await;
    assert!(ok["token"].as_str().is_some());

    for _ in 0..5 {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .set_json(json!({"identifier": "demouser", "password": "nope12345"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);
    }
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"identifier": "demouser", "password": "DemoPass123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Account locked. Try again later.");
}

#[actix_web::test]
#[serial]
async fn admin_ingest_and_upstream_errors() {
    common::set_secret();
    let source = StubSource::default().with(Some(7), rows(1, 3, "10001"));
    let repo = Arc::new(InMemRepo::new());
    let admin_user = seed_admin(&repo).await;
    let state = AppState::new(repo.clone(), Arc::new(source));
    let app = test::init_service(App::new().app_data(actix_web::web::Data::new(state)).configure(config)).await;
    let admin = token(admin_user.id, "admin", Role::Admin);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/ingest")
        .insert_header(bearer(&admin))
        .set_json(json!({"zip": "10001", "days": 7}))
        .to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report, json!({"fetched": 3, "saved": 3, "zip": "10001", "days": 7}));

    let req = test::TestRequest::post().uri("/api/v1/admin/ingest").set_json(json!({})).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let failing = AppState::new(Arc::new(InMemRepo::new()), Arc::new(StubSource::failing(500)));
    let app = test::init_service(App::new().app_data(actix_web::web::Data::new(failing)).configure(config)).await;
    let req = test::TestRequest::get().uri("/api/v1/incidents?zip=10001").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 502);
}

#[actix_web::test]
async fn health_and_metrics_endpoints() {
    let state = AppState::new(Arc::new(InMemRepo::new()), Arc::new(StubSource::default()));
    let app = test::init_service(App::new().app_data(actix_web::web::Data::new(state)).configure(config)).await;
    let req = test::TestRequest::get().uri("/healthz").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    // no recorder installed in tests
    let req = test::TestRequest::get().uri("/metrics").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}
