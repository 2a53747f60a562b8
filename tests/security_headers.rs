#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;

use actix_web::{test, web, App, HttpResponse};
use civic_feed::repo::inmem::InMemRepo;
use civic_feed::{config, AppState, SecurityHeaders};

fn state() -> AppState {
    AppState::new(Arc::new(InMemRepo::new()), Arc::new(common::StubSource::default()))
}

#[actix_web::test]
async fn test_security_headers_present() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(web::Data::new(state()))
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/healthz").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let headers = resp.headers();
    let csp = headers.get("content-security-policy").unwrap().to_str().unwrap();
    assert!(csp.contains("https://*.tile.openstreetmap.org"));
    assert!(csp.contains("style-src 'self' 'unsafe-inline'"));
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("strict-transport-security").is_none()); // not enabled
}

#[actix_web::test]
async fn test_headers_also_on_errors() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(web::Data::new(state()))
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/v1/incidents/missing").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().get("referrer-policy").is_some());
}

#[actix_web::test]
async fn test_hsts_when_enabled() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::new(true))
            .app_data(web::Data::new(state()))
            .configure(config),
    )
    .await;
    let req = test::TestRequest::get().uri("/healthz").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.headers().get("strict-transport-security").is_some());
}

#[actix_web::test]
async fn test_handler_headers_are_kept() {
    let app = test::init_service(App::new().wrap(SecurityHeaders::default()).route(
        "/custom",
        web::get().to(|| async { HttpResponse::Ok().insert_header(("X-Frame-Options", "SAMEORIGIN")).finish() }),
    ))
    .await;
    let req = test::TestRequest::get().uri("/custom").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.headers().get("x-frame-options").unwrap(), "SAMEORIGIN");
}
