//! Snapshot persistence across context restarts.

use docbase_core::config::DbConfig;
use docbase_core::database::Access;
use docbase_core::schema::FieldType;
use serde_json::json;
use tempfile::tempdir;

use super::helpers::{context_with, doc, pointer};

#[tokio::test]
async fn test_objects_schema_and_relations_survive_restart() {
    let dir = tempdir().unwrap();
    let config = DbConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };

    {
        let ctx = context_with(config.clone()).await;
        ctx.database
            .create("Player", doc(json!({"objectId": "p1", "name": "ann"})), &Access::Master)
            .await
            .unwrap();
        ctx.database
            .create(
                "Team",
                doc(json!({
                    "objectId": "t1",
                    "players": {"__op": "AddRelation", "objects": [pointer("Player", "p1")]}
                })),
                &Access::Master,
            )
            .await
            .unwrap();
        assert!(ctx.flush().unwrap());
        assert!(!ctx.flush().unwrap());
    }

    let ctx = context_with(config).await;
    let player = ctx.database.get("Player", "p1", &Access::Master).await.unwrap();
    assert_eq!(player["name"], json!("ann"));
    assert_eq!(
        ctx.database.schema().get_expected_type("Team", "players"),
        Some(FieldType::relation("Player"))
    );
    assert_eq!(
        ctx.database.related_ids("Team", "players", "t1").await.unwrap(),
        vec!["p1"]
    );
}

#[tokio::test]
async fn test_unflushed_changes_are_lost() {
    let dir = tempdir().unwrap();
    let config = DbConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    {
        let ctx = context_with(config.clone()).await;
        ctx.database
            .create("Player", doc(json!({"objectId": "p1"})), &Access::Master)
            .await
            .unwrap();
    }
    let ctx = context_with(config).await;
    let err = ctx.database.get("Player", "p1", &Access::Master).await.unwrap_err();
    assert_eq!(err.code, docbase_core::ErrorCode::ObjectNotFound);
}
