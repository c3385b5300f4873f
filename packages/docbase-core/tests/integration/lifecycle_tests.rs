//! Object lifecycle through the database controller with real callers.

use docbase_core::database::{Access, FindOptions, UpdateOptions};
use docbase_core::storage::SortDirection;
use docbase_core::ErrorCode;
use serde_json::json;

use super::helpers::{context, doc, pointer};

#[tokio::test]
async fn test_session_user_reads_role_protected_objects() {
    let ctx = context().await;
    let db = &ctx.database;

    db.create("_User", doc(json!({"objectId": "u1", "username": "ann"})), &Access::Master)
        .await
        .unwrap();
    db.create(
        "_Session",
        doc(json!({"sessionToken": "r:ann", "user": pointer("_User", "u1")})),
        &Access::Master,
    )
    .await
    .unwrap();
    db.create(
        "_Role",
        doc(json!({
            "objectId": "mods",
            "name": "moderators",
            "ACL": {"*": {"read": true}},
            "users": {"__op": "AddRelation", "objects": [pointer("_User", "u1")]}
        })),
        &Access::Master,
    )
    .await
    .unwrap();
    db.create(
        "Report",
        doc(json!({"objectId": "r1", "title": "spam", "ACL": {"role:moderators": {"read": true}}})),
        &Access::Master,
    )
    .await
    .unwrap();

    let auth = ctx.auth.resolve(Some("r:ann")).await.unwrap();
    assert_eq!(auth.user_id.as_deref(), Some("u1"));
    assert_eq!(auth.user_roles, vec!["role:moderators"]);

    let visible = db
        .find("Report", &doc(json!({})), &auth.access(), FindOptions::default())
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(db.count("Report", &doc(json!({})), &Access::public()).await.unwrap(), 0);

    let err = ctx.auth.resolve(Some("r:nobody")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSessionToken);
}

#[tokio::test]
async fn test_create_update_destroy_cycle() {
    let ctx = context().await;
    let db = &ctx.database;
    let owner = Access::Group(vec!["*".to_string(), "u1".to_string()]);

    db.create(
        "Score",
        doc(json!({
            "objectId": "s1",
            "points": 10,
            "ACL": {"*": {"read": true}, "u1": {"read": true, "write": true}}
        })),
        &owner,
    )
    .await
    .unwrap();

    let err = db
        .update(
            "Score",
            &doc(json!({"objectId": "s1"})),
            doc(json!({"points": 0})),
            &Access::public(),
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);

    let echoed = db
        .update(
            "Score",
            &doc(json!({"objectId": "s1"})),
            doc(json!({"points": {"__op": "Increment", "amount": 5}})),
            &owner,
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(echoed, doc(json!({"points": 15})));

    let fetched = db.get("Score", "s1", &Access::public()).await.unwrap();
    assert_eq!(fetched["points"], json!(15));
    assert!(fetched["updatedAt"].is_string());

    db.destroy("Score", &doc(json!({"objectId": "s1"})), &owner)
        .await
        .unwrap();
    let err = db.get("Score", "s1", &Access::Master).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);
}

#[tokio::test]
async fn test_or_queries_with_siblings() {
    let ctx = context().await;
    let db = &ctx.database;
    for (id, age, team) in [("a", 5, "red"), ("b", 50, "red"), ("c", 95, "red"), ("d", 95, "blue")] {
        db.create(
            "Player",
            doc(json!({"objectId": id, "age": age, "team": team})),
            &Access::Master,
        )
        .await
        .unwrap();
    }

    let found = db
        .find(
            "Player",
            &doc(json!({"$or": [{"age": {"$lt": 10}}, {"age": {"$gt": 90}}], "team": "red"})),
            &Access::public(),
            FindOptions {
                sort: vec![("age".to_string(), SortDirection::Descending)],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let ids: Vec<_> = found.iter().map(|p| p["objectId"].clone()).collect();
    assert_eq!(ids, vec![json!("c"), json!("a")]);

    let page = db
        .find(
            "Player",
            &doc(json!({})),
            &Access::public(),
            FindOptions {
                sort: vec![("objectId".to_string(), SortDirection::Ascending)],
                skip: Some(1),
                limit: Some(2),
                keys: Some(vec!["team".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["objectId"], json!("b"));
    assert!(page[0].get("age").is_none());
}

#[tokio::test]
async fn test_relations_across_classes() {
    let ctx = context().await;
    let db = &ctx.database;
    for id in ["p1", "p2"] {
        db.create("Player", doc(json!({"objectId": id})), &Access::Master)
            .await
            .unwrap();
    }
    db.create(
        "Team",
        doc(json!({
            "objectId": "t1",
            "players": {"__op": "AddRelation", "objects": [pointer("Player", "p1"), pointer("Player", "p2")]}
        })),
        &Access::Master,
    )
    .await
    .unwrap();
    db.update(
        "Team",
        &doc(json!({"objectId": "t1"})),
        doc(json!({"players": {"__op": "RemoveRelation", "objects": [pointer("Player", "p2")]}})),
        &Access::Master,
        UpdateOptions::default(),
    )
    .await
    .unwrap();

    let members = db
        .find(
            "Player",
            &doc(json!({"$relatedTo": {"object": pointer("Team", "t1"), "key": "players"}})),
            &Access::public(),
            FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["objectId"], json!("p1"));

    let err = db
        .find(
            "Player",
            &doc(json!({"$relatedTo": {"key": "players"}})),
            &Access::public(),
            FindOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidQuery);
}
