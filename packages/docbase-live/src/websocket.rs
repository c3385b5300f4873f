//! WebSocket transport for the LiveQuery protocol.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::message::ServerMessage;
use crate::runtime::LiveQueryHandle;
use crate::server::ConnectionId;
use crate::Result;

/// Accepts WebSocket connections until the listener fails.
///
/// # Arguments
/// * `listener` - Bound TCP listener
/// * `handle` - Running LiveQuery runtime
/// * `keepalive` - Interval between pings sent to each client
pub async fn serve(listener: TcpListener, handle: LiveQueryHandle, keepalive: Duration) -> Result<()> {
    info!("LiveQuery listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, handle, keepalive).await {
                warn!("LiveQuery connection {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, handle: LiveQueryHandle, keepalive: Duration) -> Result<()> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    let (sink, outbound) = mpsc::unbounded_channel();
    let connection = handle.register(sink).await?;
    debug!("Opened LiveQuery connection {}", connection);

    let result = pump(socket, connection, &handle, outbound, keepalive).await;
    handle.disconnect(connection)?;
    result
}

/// Moves frames between the socket and the runtime until either side closes.
async fn pump(
    socket: WebSocketStream<TcpStream>,
    connection: ConnectionId,
    handle: &LiveQueryHandle,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
    keepalive: Duration,
) -> Result<()> {
    let (mut write, mut read) = socket.split();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle.message(connection, text)?,
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            message = outbound.recv() => match message {
                Some(message) => write.send(Message::Text(serde_json::to_string(&message)?)).await?,
                None => return Ok(()),
            },
            _ = ping.tick() => write.send(Message::Ping(Vec::new())).await?,
        }
    }
}
