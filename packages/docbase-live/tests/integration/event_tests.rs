//! Events produced by writes made through the database controller.

use docbase_core::database::Access;
use docbase_live::config::MASTER_KEY;
use docbase_live::LiveQueryConfig;
use serde_json::json;

use super::helpers::{doc, fixture, pointer};

#[tokio::test]
async fn test_query_transitions_produce_typed_events() {
    let fx = fixture(LiveQueryConfig::default()).await;
    let mut client = fx.client(json!({})).await;
    client
        .subscribe(1, json!({"className": "Game", "where": {"age": {"$gt": 18}}}))
        .await;

    fx.create("Game", json!({"objectId": "g1", "age": 15})).await;
    assert!(client.is_idle().await);

    fx.update("Game", "g1", json!({"age": 20})).await;
    let event = client.next_json().await;
    assert_eq!(event["op"], json!("enter"));
    assert_eq!(event["object"]["age"], json!(20));
    assert_eq!(event["original"]["age"], json!(15));

    fx.update("Game", "g1", json!({"age": 25})).await;
    assert_eq!(client.next_json().await["op"], json!("update"));

    fx.update("Game", "g1", json!({"age": 15})).await;
    assert_eq!(client.next_json().await["op"], json!("leave"));

    fx.create("Game", json!({"objectId": "g2", "age": 30})).await;
    let event = client.next_json().await;
    assert_eq!(event["op"], json!("create"));
    assert_eq!(event["object"]["objectId"], json!("g2"));
    assert_eq!(event["clientId"], json!(client.client_id.to_string()));

    fx.destroy("Game", "g2").await;
    assert_eq!(client.next_json().await["op"], json!("delete"));

    fx.destroy("Game", "g1").await;
    assert!(client.is_idle().await);
}

#[tokio::test]
async fn test_acl_gates_events_per_viewer() {
    let mut live_config = LiveQueryConfig::default();
    live_config
        .key_pairs
        .insert("clientKey".to_string(), "client".to_string());
    live_config
        .key_pairs
        .insert(MASTER_KEY.to_string(), "master".to_string());
    let fx = fixture(live_config).await;
    let db = &fx.ctx.database;

    for (user, token) in [("u1", "r:u1"), ("u2", "r:u2")] {
        db.create("_User", doc(json!({"objectId": user, "username": user})), &Access::Master)
            .await
            .unwrap();
        db.create(
            "_Session",
            doc(json!({"sessionToken": token, "user": pointer("_User", user)})),
            &Access::Master,
        )
        .await
        .unwrap();
    }
    db.create(
        "_Role",
        doc(json!({
            "name": "referees",
            "ACL": {"*": {"read": true}},
            "users": {"__op": "AddRelation", "objects": [pointer("_User", "u2")]}
        })),
        &Access::Master,
    )
    .await
    .unwrap();

    let query = json!({"className": "Game", "where": {}});
    let mut anonymous = fx.client(json!({"clientKey": "client"})).await;
    let mut master = fx.client(json!({"masterKey": "master"})).await;
    let mut owner = fx
        .client(json!({"clientKey": "client", "sessionToken": "r:u1"}))
        .await;
    let mut referee = fx.client(json!({"clientKey": "client"})).await;
    anonymous.subscribe(1, query.clone()).await;
    master.subscribe(1, query.clone()).await;
    owner.subscribe(1, query.clone()).await;
    referee.send(json!({"op": "subscribe", "requestId": 9, "query": query, "sessionToken": "r:u2"}));
    referee.next().await;

    fx.create(
        "Game",
        json!({
            "objectId": "secret",
            "ACL": {"u1": {"read": true, "write": true}, "role:referees": {"read": true}}
        }),
    )
    .await;

    assert_eq!(master.next_json().await["op"], json!("create"));
    assert_eq!(owner.next_json().await["op"], json!("create"));
    let event = referee.next_json().await;
    assert_eq!(event["op"], json!("create"));
    assert_eq!(event["requestId"], json!(9));
    assert!(anonymous.is_idle().await);
}

#[tokio::test]
async fn test_unwatched_classes_and_closed_clients_get_nothing() {
    let fx = fixture(LiveQueryConfig::default()).await;
    let mut watcher = fx.client(json!({})).await;
    watcher
        .subscribe(1, json!({"className": "Other", "where": {}}))
        .await;
    fx.create("Other", json!({"objectId": "o1"})).await;
    assert!(watcher.is_idle().await);

    let mut leaving = fx.client(json!({})).await;
    leaving
        .subscribe(1, json!({"className": "Game", "where": {}}))
        .await;
    leaving.disconnect();
    let stats = fx.handle.stats().await.unwrap();
    assert_eq!(stats.clients, 1);
    assert_eq!(stats.subscriptions, 1);

    fx.create("Game", json!({"objectId": "g1"})).await;
    assert!(watcher.is_idle().await);
}

#[tokio::test]
async fn test_field_projection() {
    let fx = fixture(LiveQueryConfig::default()).await;
    let mut client = fx.client(json!({})).await;
    client
        .subscribe(
            1,
            json!({"className": "Game", "where": {"score": {"$gte": 0}}, "fields": ["score"]}),
        )
        .await;

    fx.create("Game", json!({"objectId": "g1", "score": 3, "player": "ann"}))
        .await;
    let event = client.next_json().await;
    assert_eq!(event["object"]["score"], json!(3));
    assert_eq!(event["object"]["objectId"], json!("g1"));
    assert_eq!(event["object"]["className"], json!("Game"));
    assert!(event["object"].get("player").is_none());
    assert!(event["object"]["createdAt"].is_string());
}
