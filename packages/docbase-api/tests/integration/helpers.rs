//! Shared fixtures for REST API integration tests.

use docbase_api::router::{APPLICATION_ID_HEADER, MASTER_KEY_HEADER, SESSION_TOKEN_HEADER};
use docbase_api::{AppState, Router};
use docbase_core::config::DbConfig;
use docbase_core::context::AppContext;
use docbase_core::database::Access;
use docbase_core::pubsub::after_save_channel;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const APP_ID: &str = "rest";
pub const MASTER_KEY: &str = "secret";

/// Who a request is sent as.
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    Public,
    Master,
    Session(&'a str),
}

pub struct TestApp {
    pub router: Router,
}

pub async fn app() -> TestApp {
    let ctx = AppContext::from_config(DbConfig {
        app_id: APP_ID.to_string(),
        master_key: Some(MASTER_KEY.to_string()),
        live_query_class_names: vec!["Game".to_string()],
        ..Default::default()
    })
    .unwrap();
    ctx.initialize().await.unwrap();
    let router = Router::new(AppState {
        ctx,
        request_timeout_ms: 1000,
    });
    TestApp { router }
}

/// Status and JSON body of a response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Value,
}

impl TestApp {
    pub fn ctx(&self) -> &AppContext {
        &self.router.state().ctx
    }

    pub fn after_save_events(&self) -> broadcast::Receiver<String> {
        self.ctx().pubsub.subscribe(&after_save_channel(APP_ID))
    }

    pub async fn request(&self, method: Method, uri: &str, caller: Caller<'_>, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(APPLICATION_ID_HEADER, APP_ID);
        builder = match caller {
            Caller::Public => builder,
            Caller::Master => builder.header(MASTER_KEY_HEADER, MASTER_KEY),
            Caller::Session(token) => builder.header(SESSION_TOKEN_HEADER, token),
        };
        let body = body.map(|b| Bytes::from(b.to_string())).unwrap_or_default();
        let request = builder.body(Full::new(body)).unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Full<Bytes>>) -> TestResponse {
        let response = self.router.handle(request).await;
        let location = response
            .headers()
            .get(hyper::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = if response.body().is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(response.body()).unwrap()
        };
        TestResponse {
            status: response.status().as_u16(),
            location,
            body,
        }
    }

    pub async fn post(&self, uri: &str, caller: Caller<'_>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, caller, Some(body)).await
    }

    pub async fn get(&self, uri: &str, caller: Caller<'_>) -> TestResponse {
        self.request(Method::GET, uri, caller, None).await
    }

    pub async fn put(&self, uri: &str, caller: Caller<'_>, body: Value) -> TestResponse {
        self.request(Method::PUT, uri, caller, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, caller: Caller<'_>) -> TestResponse {
        self.request(Method::DELETE, uri, caller, None).await
    }

    /// Creates a user with a session token directly in the database.
    pub async fn sign_up(&self, user_id: &str, token: &str) {
        let db = &self.ctx().database;
        let user = json!({"objectId": user_id, "username": user_id});
        db.create("_User", user.as_object().cloned().unwrap(), &Access::Master)
            .await
            .unwrap();
        let session = json!({
            "sessionToken": token,
            "user": {"__type": "Pointer", "className": "_User", "objectId": user_id}
        });
        db.create("_Session", session.as_object().cloned().unwrap(), &Access::Master)
            .await
            .unwrap();
    }
}

/// Percent-encodes a `where` clause for a query string.
pub fn where_param(value: Value) -> String {
    percent_encoding::utf8_percent_encode(&value.to_string(), percent_encoding::NON_ALPHANUMERIC).to_string()
}
