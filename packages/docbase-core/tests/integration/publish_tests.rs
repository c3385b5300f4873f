//! Change events published for live queries.

use docbase_core::config::DbConfig;
use docbase_core::pubsub::{after_delete_channel, after_save_channel, ChangeMessage};
use serde_json::json;

use super::helpers::{context_with, doc};

#[tokio::test]
async fn test_context_publishes_only_watched_classes() {
    let ctx = context_with(DbConfig {
        app_id: "game".to_string(),
        live_query_class_names: vec!["Score".to_string()],
        ..Default::default()
    })
    .await;
    let mut saves = ctx.pubsub.subscribe(&after_save_channel("game"));
    let mut deletes = ctx.pubsub.subscribe(&after_delete_channel("game"));

    let original = doc(json!({"objectId": "s1", "points": 1}));
    let current = doc(json!({"objectId": "s1", "points": 2}));
    assert_eq!(ctx.publisher.after_save("Ignored", &current, None), 0);
    assert_eq!(ctx.publisher.after_save("Score", &current, Some(&original)), 1);
    assert_eq!(ctx.publisher.after_delete("Score", &current), 1);

    let saved: ChangeMessage = serde_json::from_str(&saves.recv().await.unwrap()).unwrap();
    assert_eq!(saved.class_name(), Some("Score"));
    assert_eq!(saved.current_parse_object["points"], json!(2));
    assert_eq!(saved.original_parse_object.unwrap()["points"], json!(1));

    let deleted: ChangeMessage = serde_json::from_str(&deletes.recv().await.unwrap()).unwrap();
    assert!(deleted.original_parse_object.is_none());
}
