use serde_json::{json, Value};

use super::helpers::{app, where_param, Caller};

#[tokio::test]
async fn test_create_get_update_delete_cycle() {
    let app = app().await;

    let created = app
        .post("/classes/Game", Caller::Public, json!({"name": "chess", "score": 10}))
        .await;
    assert_eq!(created.status, 201);
    let object_id = created.body["objectId"].as_str().unwrap().to_string();
    assert_eq!(object_id.len(), 10);
    assert!(created.body["createdAt"].is_string());
    assert_eq!(created.location.as_deref(), Some(format!("/classes/Game/{}", object_id).as_str()));

    let fetched = app.get(&format!("/classes/Game/{}", object_id), Caller::Public).await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.body["name"], "chess");
    assert_eq!(fetched.body["score"], 10);

    let updated = app
        .put(
            &format!("/classes/Game/{}", object_id),
            Caller::Public,
            json!({"score": {"__op": "Increment", "amount": 5}}),
        )
        .await;
    assert_eq!(updated.status, 200);
    assert!(updated.body["updatedAt"].is_string());
    assert_eq!(updated.body["score"], 15);

    let deleted = app.delete(&format!("/classes/Game/{}", object_id), Caller::Public).await;
    assert_eq!(deleted.status, 200);
    assert_eq!(deleted.body, json!({}));

    let missing = app.get(&format!("/classes/Game/{}", object_id), Caller::Public).await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.body["code"], 101);
}

#[tokio::test]
async fn test_find_with_where_order_limit_and_count() {
    let app = app().await;
    for (name, score) in [("a", 1), ("b", 5), ("c", 9), ("d", 3)] {
        let response = app
            .post("/classes/Game", Caller::Public, json!({"name": name, "score": score}))
            .await;
        assert_eq!(response.status, 201);
    }

    let uri = format!(
        "/classes/Game?where={}&order=-score&limit=2&count=1&keys=name",
        where_param(json!({"score": {"$gte": 3}}))
    );
    let found = app.get(&uri, Caller::Public).await;
    assert_eq!(found.status, 200);
    let names: Vec<&str> = found.body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["c", "b"]);
    assert_eq!(found.body["count"], 3);
    assert!(found.body["results"][0].get("score").is_none());

    let only_count = app.get("/classes/Game?limit=0&count=1", Caller::Public).await;
    assert_eq!(only_count.body["results"], json!([]));
    assert_eq!(only_count.body["count"], 4);
}

#[tokio::test]
async fn test_acl_hides_objects_from_other_users() {
    let app = app().await;
    app.sign_up("alice", "r:alice").await;
    app.sign_up("bob", "r:bob").await;

    let created = app
        .post(
            "/classes/Note",
            Caller::Session("r:alice"),
            json!({"text": "private", "ACL": {"alice": {"read": true, "write": true}}}),
        )
        .await;
    assert_eq!(created.status, 201);
    let uri = format!("/classes/Note/{}", created.body["objectId"].as_str().unwrap());

    assert_eq!(app.get(&uri, Caller::Session("r:alice")).await.status, 200);
    assert_eq!(app.get(&uri, Caller::Session("r:bob")).await.status, 404);
    assert_eq!(app.get(&uri, Caller::Public).await.status, 404);
    assert_eq!(app.get(&uri, Caller::Master).await.status, 200);

    let listed = app.get("/classes/Note", Caller::Session("r:bob")).await;
    assert_eq!(listed.body["results"], json!([]));

    let denied = app.put(&uri, Caller::Session("r:bob"), json!({"text": "mine"})).await;
    assert_eq!(denied.status, 404);
    assert_eq!(denied.body["code"], 101);
}

#[tokio::test]
async fn test_writes_publish_change_events_for_watched_classes() {
    let app = app().await;
    let mut events = app.after_save_events();

    let created = app.post("/classes/Game", Caller::Public, json!({"score": 1})).await;
    let object_id = created.body["objectId"].as_str().unwrap().to_string();
    let event: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
    assert_eq!(event["currentParseObject"]["objectId"], object_id.as_str());
    assert_eq!(event["currentParseObject"]["className"], "Game");
    assert!(event.get("originalParseObject").map_or(true, Value::is_null));

    app.put(&format!("/classes/Game/{}", object_id), Caller::Public, json!({"score": 2}))
        .await;
    let event: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
    assert_eq!(event["currentParseObject"]["score"], 2);
    assert_eq!(event["originalParseObject"]["score"], 1);

    // Unwatched classes publish nothing.
    app.post("/classes/Other", Caller::Public, json!({"score": 1})).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_invalid_requests() {
    let app = app().await;

    let bad_json = app
        .send(
            hyper::Request::builder()
                .method("POST")
                .uri("/classes/Game")
                .header("x-parse-application-id", super::helpers::APP_ID)
                .body(http_body_util::Full::new(hyper::body::Bytes::from_static(b"{nope")))
                .unwrap(),
        )
        .await;
    assert_eq!(bad_json.status, 400);
    assert_eq!(bad_json.body["code"], 107);

    let bad_where = app.get("/classes/Game?where=%5B%5D", Caller::Public).await;
    assert_eq!(bad_where.status, 400);
    assert_eq!(bad_where.body["code"], 102);

    let wrong_type = {
        app.post("/classes/Game", Caller::Public, json!({"score": 1})).await;
        app.post("/classes/Game", Caller::Public, json!({"score": "high"})).await
    };
    assert_eq!(wrong_type.status, 400);
    assert_eq!(wrong_type.body["code"], 111);
}
