use super::*;
use crate::schema::cache::InMemorySchemaCache;
use crate::schema::ClassLevelPermissions;
use crate::storage::MemoryStorageAdapter;
use ntest::timeout;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::time::Duration;

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn controller() -> DatabaseController {
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryStorageAdapter::new());
    let cache = Arc::new(InMemorySchemaCache::new(Duration::from_secs(5)));
    let schema = SchemaController::new(Arc::clone(&adapter), cache);
    DatabaseController::new(adapter, schema)
}

fn user(id: &str) -> Access {
    Access::Group(vec!["*".to_string(), id.to_string()])
}

fn pointer(class_name: &str, id: &str) -> Value {
    json!({"__type": "Pointer", "className": class_name, "objectId": id})
}

#[tokio::test]
async fn test_add_class_has_only_default_columns() {
    let db = controller();
    db.load_schema(false).await.unwrap();
    let schema = db
        .schema()
        .add_class_if_not_exists("Test", BTreeMap::new(), Some(ClassLevelPermissions::default()))
        .await
        .unwrap();
    let fields: Vec<&str> = schema.fields.keys().map(String::as_str).collect();
    assert_eq!(fields, vec!["ACL", "createdAt", "objectId", "updatedAt"]);
    assert_eq!(schema.class_level_permissions, ClassLevelPermissions::default());

    let err = db
        .schema()
        .add_class_if_not_exists("Test", BTreeMap::new(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidClassName);
    assert_eq!(err.message, "Class Test already exists.");
}

#[tokio::test]
async fn test_find_on_missing_class() {
    let db = controller();
    let found = db
        .find("Test", &Query::new(), &Access::Master, FindOptions::default())
        .await
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(db.count("Test", &Query::new(), &Access::public()).await.unwrap(), 0);

    let err = db
        .find("Test", &doc(json!({"objectId": "abc"})), &Access::Master, FindOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);
}

#[tokio::test]
async fn test_create_grows_schema_and_applies_acl() {
    let db = controller();
    db.create(
        "Game",
        doc(json!({"objectId": "g1", "score": 10, "ACL": {"u1": {"read": true, "write": true}}})),
        &Access::Master,
    )
    .await
    .unwrap();
    db.create("Game", doc(json!({"objectId": "g2", "score": 3})), &Access::public())
        .await
        .unwrap();

    assert_eq!(db.schema().get_expected_type("Game", "score"), Some(FieldType::Number));

    let public = db
        .find("Game", &Query::new(), &Access::public(), FindOptions::default())
        .await
        .unwrap();
    assert_eq!(public.len(), 1);
    assert_eq!(public[0]["objectId"], json!("g2"));

    let owned = db
        .find("Game", &doc(json!({"objectId": "g1"})), &user("u1"), FindOptions::default())
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0]["ACL"], json!({"u1": {"read": true, "write": true}}));
    assert!(owned[0].get("_rperm").is_none());
    assert!(owned[0]["createdAt"].is_string());
}

#[tokio::test]
async fn test_create_rejects_type_mismatch() {
    let db = controller();
    db.create("Game", doc(json!({"score": 1})), &Access::Master)
        .await
        .unwrap();
    let err = db
        .create("Game", doc(json!({"score": "high"})), &Access::Master)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::IncorrectType);
    assert_eq!(err.message, "schema mismatch for Game.score; expected Number but got String");
}

#[tokio::test]
async fn test_operator_results_are_echoed() {
    let db = controller();
    let created = db
        .create(
            "Game",
            doc(json!({"objectId": "g1", "n": {"__op": "Increment", "amount": 5}, "name": "x"})),
            &Access::Master,
        )
        .await
        .unwrap();
    assert_eq!(created, doc(json!({"n": 5})));

    let updated = db
        .update(
            "Game",
            &doc(json!({"objectId": "g1"})),
            doc(json!({"n": {"__op": "Increment", "amount": 2}, "tags": {"__op": "AddUnique", "objects": ["a"]}})),
            &Access::Master,
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated, doc(json!({"n": 7, "tags": ["a"]})));
}

#[test]
fn test_nested_operator_results_are_echoed_by_path() {
    let original = doc(json!({
        "stats.level": {"__op": "Increment", "amount": 1},
        "stats.badges": {"__op": "AddUnique", "objects": ["gold"]},
        "name": "x"
    }));
    let stored = doc(json!({"stats": {"level": 4, "badges": ["gold"], "xp": 10}, "name": "x"}));
    assert_eq!(
        sanitize_database_result(&original, &stored),
        doc(json!({"stats": {"level": 4, "badges": ["gold"]}}))
    );
}

#[tokio::test]
async fn test_update_of_unreachable_object_is_not_found() {
    let db = controller();
    db.create(
        "Game",
        doc(json!({"objectId": "g1", "ACL": {"u1": {"read": true, "write": true}}})),
        &Access::Master,
    )
    .await
    .unwrap();
    let err = db
        .update(
            "Game",
            &doc(json!({"objectId": "g1"})),
            doc(json!({"name": "x"})),
            &user("u2"),
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);

    db.update(
        "Game",
        &doc(json!({"objectId": "g1"})),
        doc(json!({"name": "x"})),
        &user("u1"),
        UpdateOptions::default(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_update_key_validation() {
    let db = controller();
    db.create("_User", doc(json!({"objectId": "u1", "username": "a"})), &Access::Master)
        .await
        .unwrap();
    let err = db
        .update(
            "_User",
            &doc(json!({"objectId": "u1"})),
            doc(json!({"authData.facebook.id": "1"})),
            &Access::Master,
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidKeyName);
    assert_eq!(err.message, "Invalid field name for update: authData.facebook.id");

    let err = db
        .update(
            "_User",
            &doc(json!({"objectId": "u1"})),
            doc(json!({"profile": {"$bad": 1}})),
            &Access::Master,
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidNestedKey);
}

#[tokio::test]
async fn test_relation_round_trip() {
    let db = controller();
    db.add_relation("players", "Team", "t1", "p1").await.unwrap();
    db.add_relation("players", "Team", "t1", "p1").await.unwrap();
    db.add_relation("players", "Team", "t1", "p2").await.unwrap();
    assert_eq!(db.related_ids("Team", "players", "t1").await.unwrap(), vec!["p1", "p2"]);

    db.remove_relation("players", "Team", "t1", "p1").await.unwrap();
    assert_eq!(db.related_ids("Team", "players", "t1").await.unwrap(), vec!["p2"]);
    db.remove_relation("players", "Team", "t1", "p1").await.unwrap();
}

fn add_player(id: &str) -> Value {
    json!({"__op": "AddRelation", "objects": [pointer("_User", id)]})
}

#[tokio::test]
async fn test_denied_update_leaves_relations_untouched() {
    let db = controller();
    db.create(
        "Game",
        doc(json!({"objectId": "g1", "ACL": {"u1": {"read": true, "write": true}}})),
        &Access::Master,
    )
    .await
    .unwrap();

    let err = db
        .update(
            "Game",
            &doc(json!({"objectId": "g1"})),
            doc(json!({"players": add_player("intruder")})),
            &user("u2"),
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);
    assert!(db.related_ids("Game", "players", "g1").await.unwrap().is_empty());

    db.update(
        "Game",
        &doc(json!({"objectId": "g1"})),
        doc(json!({"players": add_player("p1")})),
        &user("u1"),
        UpdateOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(db.related_ids("Game", "players", "g1").await.unwrap(), vec!["p1"]);
}

#[tokio::test]
async fn test_failed_create_leaves_relations_untouched() {
    let db = controller();
    db.create("Game", doc(json!({"objectId": "g1"})), &Access::Master)
        .await
        .unwrap();

    let err = db
        .create(
            "Game",
            doc(json!({"objectId": "g1", "players": add_player("intruder")})),
            &user("u2"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DuplicateValue);
    assert!(db.related_ids("Game", "players", "g1").await.unwrap().is_empty());

    db.create(
        "Game",
        doc(json!({"objectId": "g2", "players": add_player("p1")})),
        &user("u2"),
    )
    .await
    .unwrap();
    assert_eq!(db.related_ids("Game", "players", "g2").await.unwrap(), vec!["p1"]);
}

#[tokio::test]
async fn test_relation_update_resolves_owner_from_any_query_shape() {
    let db = controller();
    db.create("Game", doc(json!({"objectId": "g1", "name": "a"})), &Access::Master)
        .await
        .unwrap();

    db.update(
        "Game",
        &doc(json!({"objectId": {"$eq": "g1"}})),
        doc(json!({"players": add_player("p1")})),
        &Access::Master,
        UpdateOptions::default(),
    )
    .await
    .unwrap();
    db.update(
        "Game",
        &doc(json!({"name": "a"})),
        doc(json!({"players": add_player("p2")})),
        &Access::Master,
        UpdateOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(db.related_ids("Game", "players", "g1").await.unwrap(), vec!["p1", "p2"]);

    let err = db
        .update(
            "Game",
            &doc(json!({"name": "a"})),
            doc(json!({"players": add_player("p3")})),
            &Access::Master,
            UpdateOptions {
                many: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingObjectId);

    db.update(
        "Game",
        &doc(json!({"objectId": {"$eq": "g1"}})),
        doc(json!({"players": add_player("p3")})),
        &Access::Master,
        UpdateOptions {
            many: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(
        db.related_ids("Game", "players", "g1").await.unwrap(),
        vec!["p1", "p2", "p3"]
    );
}

#[tokio::test]
async fn test_relation_queries() {
    let db = controller();
    for id in ["p1", "p2", "p3"] {
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
    db.create("Team", doc(json!({"objectId": "t2"})), &Access::Master)
        .await
        .unwrap();
    assert_eq!(
        db.schema().get_expected_type("Team", "players"),
        Some(FieldType::relation("Player"))
    );

    let related = db
        .find(
            "Player",
            &doc(json!({"$relatedTo": {"object": pointer("Team", "t1"), "key": "players"}})),
            &Access::Master,
            FindOptions {
                sort: vec![("objectId".to_string(), SortDirection::Ascending)],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let ids: Vec<&Value> = related.iter().map(|o| &o["objectId"]).collect();
    assert_eq!(ids, vec!["p1", "p2"]);

    let owners = db
        .find(
            "Team",
            &doc(json!({"players": {"$in": [pointer("Player", "p2")]}})),
            &Access::Master,
            FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0]["objectId"], json!("t1"));

    let others = db
        .find(
            "Team",
            &doc(json!({"players": {"$nin": [pointer("Player", "p2")]}})),
            &Access::Master,
            FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0]["objectId"], json!("t2"));

    let by_pointer = db
        .find(
            "Team",
            &doc(json!({"players": pointer("Player", "p1")})),
            &Access::Master,
            FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_pointer.len(), 1);

    db.update(
        "Team",
        &doc(json!({"objectId": "t1"})),
        doc(json!({"players": {"__op": "RemoveRelation", "objects": [pointer("Player", "p1")]}})),
        &Access::Master,
        UpdateOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(db.related_ids("Team", "players", "t1").await.unwrap(), vec!["p2"]);
}

#[test]
#[timeout(5000)]
fn test_in_object_ids_small_and_big_paths_agree() {
    let query = doc(json!({"objectId": {"$in": ["a", "b", "c", "a"]}}));
    let small = add_in_object_ids_ids(Some(&["c".to_string(), "a".to_string()]), &query);
    assert_eq!(small["objectId"], json!({"$in": ["a", "c"]}));

    let many: Vec<String> = (0..200).map(|i| format!("id{}", i)).collect();
    let mut listed: Vec<Value> = many.iter().rev().map(|id| json!(id)).collect();
    listed.push(json!("id5"));
    let mut big_query = Query::new();
    big_query.insert("objectId".to_string(), json!({"$in": listed}));
    let big = add_in_object_ids_ids(Some(&many[..10]), &big_query);
    let expected: Vec<String> = (0..10).rev().map(|i| format!("id{}", i)).collect();
    assert_eq!(big["objectId"]["$in"], json!(expected));

    let eq = add_in_object_ids_ids(Some(&["x".to_string()]), &doc(json!({"objectId": "x"})));
    assert_eq!(eq["objectId"], json!({"$eq": "x", "$in": ["x"]}));
}

#[test]
fn test_not_in_object_ids_union() {
    let query = doc(json!({"objectId": {"$nin": ["a", "b"]}}));
    let result = add_not_in_object_ids_ids(&["b".to_string(), "c".to_string()], &query);
    assert_eq!(result["objectId"], json!({"$nin": ["a", "b", "c"]}));
}

#[test]
fn test_sort_key_normalization() {
    let sort = normalize_sort(
        "Game",
        &[
            ("_created_at".to_string(), SortDirection::Descending),
            ("createdAt".to_string(), SortDirection::Ascending),
            ("score".to_string(), SortDirection::Ascending),
        ],
    )
    .unwrap();
    assert_eq!(
        sort,
        vec![
            ("createdAt".to_string(), SortDirection::Descending),
            ("score".to_string(), SortDirection::Ascending)
        ]
    );
    let err = normalize_sort("_User", &[("authData.facebook.id".to_string(), SortDirection::Ascending)])
        .unwrap_err();
    assert_eq!(err.message, "Cannot sort by authData.facebook.id");
    let err = normalize_sort("Game", &[("$bad".to_string(), SortDirection::Ascending)]).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidKeyName);
}

#[tokio::test]
async fn test_class_level_permissions_are_enforced() {
    let db = controller();
    db.create("Game", doc(json!({"objectId": "g1"})), &Access::Master)
        .await
        .unwrap();
    let clp = ClassLevelPermissions::from_json(&json!({
        "find": {"role:admin": true},
        "create": {"requiresAuthentication": true}
    }))
    .unwrap();
    db.schema()
        .update_class("Game", &Map::new(), Some(clp), None)
        .await
        .unwrap();

    let err = db
        .find("Game", &Query::new(), &Access::public(), FindOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::OperationForbidden);
    assert_eq!(err.message, "Permission denied for action find on class Game.");

    let admin = Access::Group(vec!["*".to_string(), "u1".to_string(), "role:admin".to_string()]);
    assert_eq!(
        db.find("Game", &Query::new(), &admin, FindOptions::default()).await.unwrap().len(),
        1
    );

    let err = db
        .create("Game", doc(json!({"name": "x"})), &Access::public())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);
    assert_eq!(err.message, "Permission denied, user needs to be authenticated.");
    db.create("Game", doc(json!({"name": "x"})), &user("u1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pointer_permissions_restrict_reads() {
    let db = controller();
    db.create("Note", doc(json!({"objectId": "n1", "owner": pointer("_User", "u1")})), &Access::Master)
        .await
        .unwrap();
    db.create("Note", doc(json!({"objectId": "n2", "owner": pointer("_User", "u2")})), &Access::Master)
        .await
        .unwrap();
    let clp = ClassLevelPermissions::from_json(&json!({
        "find": {}, "get": {}, "update": {}, "delete": {},
        "readUserFields": ["owner"], "writeUserFields": ["owner"]
    }))
    .unwrap();
    db.schema()
        .update_class("Note", &Map::new(), Some(clp), None)
        .await
        .unwrap();

    let mine = db
        .find("Note", &Query::new(), &user("u1"), FindOptions::default())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["objectId"], json!("n1"));

    let anonymous = db
        .find("Note", &Query::new(), &Access::public(), FindOptions::default())
        .await
        .unwrap();
    assert!(anonymous.is_empty());

    let err = db
        .get("Note", "n2", &user("u1"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);

    let err = db
        .destroy("Note", &doc(json!({"objectId": "n2"})), &user("u1"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);
    db.destroy("Note", &doc(json!({"objectId": "n1"})), &user("u1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_protected_fields_are_hidden() {
    let db = controller();
    db.create("Profile", doc(json!({"objectId": "p1", "email": "a@b.c", "name": "a"})), &Access::Master)
        .await
        .unwrap();
    let clp = ClassLevelPermissions::from_json(&json!({"protectedFields": {"*": ["email"]}})).unwrap();
    db.schema()
        .update_class("Profile", &Map::new(), Some(clp), None)
        .await
        .unwrap();

    let public = db.get("Profile", "p1", &Access::public()).await.unwrap();
    assert!(public.get("email").is_none());
    assert_eq!(public["name"], json!("a"));
    let master = db.get("Profile", "p1", &Access::Master).await.unwrap();
    assert_eq!(master["email"], json!("a@b.c"));
}

#[tokio::test]
async fn test_destroy_session_without_match_is_ok() {
    let db = controller();
    db.create("_Session", doc(json!({"objectId": "s1", "sessionToken": "r:1"})), &Access::Master)
        .await
        .unwrap();
    db.destroy("_Session", &doc(json!({"objectId": "nope"})), &Access::Master)
        .await
        .unwrap();

    db.create("Game", doc(json!({"objectId": "g1"})), &Access::Master)
        .await
        .unwrap();
    let err = db
        .destroy("Game", &doc(json!({"objectId": "nope"})), &Access::Master)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ObjectNotFound);
}

#[tokio::test]
async fn test_delete_schema() {
    let db = controller();
    db.create(
        "Team",
        doc(json!({
            "objectId": "t1",
            "players": {"__op": "AddRelation", "objects": [pointer("Player", "p1")]}
        })),
        &Access::Master,
    )
    .await
    .unwrap();
    let err = db.delete_schema("Team").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSchemaOperation);
    assert_eq!(err.message, "Class Team is not empty, contains 1 objects, cannot drop schema.");

    db.destroy("Team", &doc(json!({"objectId": "t1"})), &Access::Master)
        .await
        .unwrap();
    db.delete_schema("Team").await.unwrap();
    assert!(db.schema().snapshot().get("Team").is_none());
    assert!(db.related_ids("Team", "players", "t1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_perform_initialization() {
    let db = controller();
    db.perform_initialization().await.unwrap();
    db.perform_initialization().await.unwrap();
    assert!(db.schema().snapshot().get("_User").is_some());
    assert!(db.schema().snapshot().get("_Role").is_some());

    db.create("_User", doc(json!({"username": "ann"})), &Access::Master)
        .await
        .unwrap();
    let err = db
        .create("_User", doc(json!({"username": "ann"})), &Access::Master)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DuplicateValue);
}

#[tokio::test]
async fn test_role_requires_name() {
    let db = controller();
    let err = db
        .create("_Role", doc(json!({"ACL": {"*": {"read": true}}})), &Access::Master)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::IncorrectType);
    assert_eq!(err.message, "name is required.");
}
