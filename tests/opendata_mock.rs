use std::time::Duration;

use civic_feed::opendata::{IncidentSource, OpenDataClient, SourceError, SourceQuery};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, token: Option<&str>) -> OpenDataClient {
    OpenDataClient::new(
        format!("{}/resource/erm2-nwe9.json", server.uri()),
        token.map(str::to_string),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn sends_soql_params_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/erm2-nwe9.json"))
        .and(query_param("$order", "created_date DESC"))
        .and(query_param("$limit", "25"))
        .and(query_param("$where", "incident_zip = '11213'"))
        .and(header("X-App-Token", "app-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"unique_key": "58123456", "incident_zip": "11213", "created_date": "2024-03-01T23:15:00.000"},
            {"unique_key": 58123457, "incident_zip": 11213}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client(&server, Some("app-token"))
        .fetch(&SourceQuery::for_zip("11213", None, 25))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].created_date.as_deref(), Some("2024-03-01T23:15:00.000"));
}

#[tokio::test]
async fn row_limit_is_capped_at_5000() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("$limit", "5000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client(&server, None)
        .fetch(&SourceQuery::for_zip("11213", Some(30), 99_999))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server, None).fetch(&SourceQuery::for_zip("11213", Some(30), 10)).await.unwrap_err();
    assert!(matches!(err, SourceError::Status(503)));
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client(&server, None).fetch(&SourceQuery::for_zip("11213", Some(30), 10)).await.unwrap_err();
    assert!(matches!(err, SourceError::Decode(_)));
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let err = client(&server, None).fetch(&SourceQuery::for_zip("11213", None, 10)).await.unwrap_err();
    assert!(matches!(err, SourceError::Timeout));
}
