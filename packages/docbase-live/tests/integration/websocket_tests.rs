//! The LiveQuery protocol over a real WebSocket.

use std::time::Duration;

use docbase_live::websocket::serve;
use docbase_live::LiveQueryConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use super::helpers::fixture;

async fn next_json<S>(read: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let fx = fixture(LiveQueryConfig::default()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, fx.handle.clone(), Duration::from_secs(10)));

    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    let (mut write, mut read) = socket.split();

    write
        .send(Message::Text("{\"op\": \"nope\"}".to_string()))
        .await
        .unwrap();
    let error = next_json(&mut read).await;
    assert_eq!(error["op"], json!("error"));
    assert_eq!(error["code"], json!(1));

    write
        .send(Message::Text(json!({"op": "connect", "applicationId": "live"}).to_string()))
        .await
        .unwrap();
    let connected = next_json(&mut read).await;
    assert_eq!(connected["op"], json!("connected"));

    let subscribe = json!({"op": "subscribe", "requestId": 2, "query": {"className": "Game", "where": {}}});
    write.send(Message::Text(subscribe.to_string())).await.unwrap();
    assert_eq!(next_json(&mut read).await["op"], json!("subscribed"));

    fx.create("Game", json!({"objectId": "g1", "score": 1})).await;
    let event = next_json(&mut read).await;
    assert_eq!(event["op"], json!("create"));
    assert_eq!(event["clientId"], connected["clientId"]);
    assert_eq!(event["object"]["score"], json!(1));

    write.send(Message::Close(None)).await.unwrap();
    let mut clients = usize::MAX;
    for _ in 0..40 {
        clients = fx.handle.stats().await.unwrap().clients;
        if clients == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(clients, 0);
}
