//! REST listener over a real socket.

use docbase_api::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use super::helpers::{app, APP_ID};

async fn raw_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nX-Parse-Application-Id: {}\r\nConnection: close\r\n\r\n",
        path, APP_ID
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_serves_until_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = Server::from_listener(listener, app().await.router);
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let response = raw_get(addr, "/classes/Game").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains(r#"{"results":[]}"#), "{}", response);

    let response = raw_get(addr, "/nowhere").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
