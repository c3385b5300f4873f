use serde_json::json;

use super::helpers::{app, Caller};

#[tokio::test]
async fn test_schema_endpoints_require_master_key() {
    let app = app().await;
    let response = app.get("/schemas", Caller::Public).await;
    assert_eq!(response.status, 403);
    assert_eq!(response.body["code"], 119);

    let response = app
        .post("/schemas/Game", Caller::Public, json!({"className": "Game"}))
        .await;
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn test_create_update_and_delete_schema() {
    let app = app().await;

    let created = app
        .post(
            "/schemas",
            Caller::Master,
            json!({
                "className": "Game",
                "fields": {"score": {"type": "Number"}, "owner": {"type": "Pointer", "targetClass": "_User"}},
                "classLevelPermissions": {"find": {"*": true}, "get": {"*": true}}
            }),
        )
        .await;
    assert_eq!(created.status, 200);
    assert_eq!(created.body["className"], "Game");
    assert_eq!(created.body["fields"]["score"]["type"], "Number");
    assert_eq!(created.body["fields"]["owner"]["targetClass"], "_User");

    let duplicate = app.post("/schemas/Game", Caller::Master, json!({})).await;
    assert_eq!(duplicate.status, 400);
    assert_eq!(duplicate.body["code"], 103);

    let updated = app
        .put(
            "/schemas/Game",
            Caller::Master,
            json!({"fields": {"name": {"type": "String"}, "score": {"__op": "Delete"}}}),
        )
        .await;
    assert_eq!(updated.status, 200);
    assert_eq!(updated.body["fields"]["name"]["type"], "String");
    assert!(updated.body["fields"].get("score").is_none());

    let fetched = app.get("/schemas/Game", Caller::Master).await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.body["fields"]["name"]["type"], "String");

    let listed = app.get("/schemas", Caller::Master).await;
    let names: Vec<&str> = listed.body["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["className"].as_str())
        .collect();
    assert!(names.contains(&"Game"));
    assert!(names.contains(&"_User"));

    let deleted = app.delete("/schemas/Game", Caller::Master).await;
    assert_eq!(deleted.status, 200);
    let missing = app.get("/schemas/Game", Caller::Master).await;
    assert_eq!(missing.status, 400);
    assert_eq!(missing.body["code"], 103);
}

#[tokio::test]
async fn test_schema_class_name_rules() {
    let app = app().await;

    let mismatch = app
        .post("/schemas/Game", Caller::Master, json!({"className": "Other"}))
        .await;
    assert_eq!(mismatch.status, 400);
    assert_eq!(mismatch.body["error"], "Class name mismatch between Other and Game.");

    let nameless = app.post("/schemas", Caller::Master, json!({})).await;
    assert_eq!(nameless.status, 400);
    assert_eq!(nameless.body["code"], 135);

    let update_missing = app
        .put("/schemas/Missing", Caller::Master, json!({"fields": {}}))
        .await;
    assert_eq!(update_missing.body["code"], 103);
}

#[tokio::test]
async fn test_cannot_drop_non_empty_class() {
    let app = app().await;
    app.post("/classes/Game", Caller::Public, json!({"score": 1})).await;

    let response = app.delete("/schemas/Game", Caller::Master).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body["code"], 255);
    assert_eq!(
        response.body["error"],
        "Class Game is not empty, contains 1 objects, cannot drop schema."
    );
}
