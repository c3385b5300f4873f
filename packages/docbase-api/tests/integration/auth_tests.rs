use docbase_api::router::{APPLICATION_ID_HEADER, MASTER_KEY_HEADER};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Request;
use serde_json::json;

use super::helpers::{app, Caller, APP_ID};

#[tokio::test]
async fn test_application_id_is_required() {
    let app = app().await;
    let missing = app
        .send(Request::get("/classes/Game").body(Full::new(Bytes::new())).unwrap())
        .await;
    assert_eq!(missing.status, 403);
    assert_eq!(missing.body, json!({"error": "unauthorized"}));

    let wrong = app
        .send(
            Request::get("/classes/Game")
                .header(APPLICATION_ID_HEADER, "other")
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
        .await;
    assert_eq!(wrong.status, 403);
}

#[tokio::test]
async fn test_wrong_master_key_is_rejected() {
    let app = app().await;
    let response = app
        .send(
            Request::get("/schemas")
                .header(APPLICATION_ID_HEADER, APP_ID)
                .header(MASTER_KEY_HEADER, "guess")
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn test_invalid_session_token() {
    let app = app().await;
    let response = app.get("/classes/Game", Caller::Session("r:nobody")).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body["code"], 209);
}

#[tokio::test]
async fn test_routing_errors() {
    let app = app().await;
    let unknown = app.get("/nowhere", Caller::Public).await;
    assert_eq!(unknown.status, 404);
    assert_eq!(unknown.body["error"], "Cannot GET /nowhere");

    let not_allowed = app.delete("/classes/Game", Caller::Public).await;
    assert_eq!(not_allowed.status, 405);
}
