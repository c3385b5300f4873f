//! The task that owns the LiveQuery registry.
//!
//! Sockets talk to the registry through [`LiveQueryHandle`]; change events
//! arrive from the pub/sub channels. Matching happens on this task, ACL
//! checks and pushes on spawned tasks.

use std::sync::Arc;
use std::time::Duration;

use docbase_core::auth::AuthResolver;
use docbase_core::pubsub::{after_delete_channel, after_save_channel, ChangeMessage, PubSub};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::ClientSink;
use crate::server::{ConnectionId, EventPlan, LiveQueryServer, ServerStats};
use crate::session_token_cache::SessionTokenCache;
use crate::{LiveError, Result};

/// Request to the runtime task.
#[derive(Debug)]
pub enum Command {
    /// Register a new socket
    Register {
        sink: ClientSink,
        response: oneshot::Sender<ConnectionId>,
    },
    /// Raw text frame from a socket
    Message { connection: ConnectionId, raw: String },
    /// Socket closed
    Disconnect { connection: ConnectionId },
    /// Current registry sizes
    Stats { response: oneshot::Sender<ServerStats> },
}

/// Cloneable entry point to a running LiveQuery server.
#[derive(Clone)]
pub struct LiveQueryHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl LiveQueryHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LiveError::RuntimeClosed)
    }

    pub async fn register(&self, sink: ClientSink) -> Result<ConnectionId> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Register { sink, response })?;
        rx.await.map_err(|_| LiveError::RuntimeClosed)
    }

    pub fn message(&self, connection: ConnectionId, raw: impl Into<String>) -> Result<()> {
        self.send(Command::Message {
            connection,
            raw: raw.into(),
        })
    }

    pub fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        self.send(Command::Disconnect { connection })
    }

    pub async fn stats(&self) -> Result<ServerStats> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Stats { response })?;
        rx.await.map_err(|_| LiveError::RuntimeClosed)
    }
}

/// Starts the runtime task.
///
/// The change channels are subscribed before this returns, so every event
/// published afterwards is seen. The task ends once every handle is dropped
/// or a change channel closes.
///
/// # Arguments
/// * `server` - Registry to drive
/// * `pubsub` - Transport carrying `<appId>afterSave` and `<appId>afterDelete`
/// * `resolver` - Session token and role lookups for ACL checks
pub fn spawn(
    server: LiveQueryServer,
    pubsub: Arc<dyn PubSub>,
    resolver: Arc<dyn AuthResolver>,
) -> (LiveQueryHandle, JoinHandle<()>) {
    let config = server.config().clone();
    let after_save = pubsub.subscribe(&after_save_channel(&config.app_id));
    let after_delete = pubsub.subscribe(&after_delete_channel(&config.app_id));
    let sessions = Arc::new(SessionTokenCache::new(
        resolver,
        config.cache_max_size,
        Duration::from_millis(config.cache_ttl_ms),
    ));
    let (commands, command_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(run(server, command_rx, after_save, after_delete, sessions));
    info!("LiveQuery runtime started for {}", config.app_id);
    (LiveQueryHandle { commands }, task)
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Save,
    Delete,
}

async fn run(
    mut server: LiveQueryServer,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut after_save: broadcast::Receiver<String>,
    mut after_delete: broadcast::Receiver<String>,
    sessions: Arc<SessionTokenCache>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => apply(&mut server, command),
                None => break,
            },
            received = after_save.recv() => {
                if !on_change(&server, Change::Save, received, &sessions) {
                    break;
                }
            }
            received = after_delete.recv() => {
                if !on_change(&server, Change::Delete, received, &sessions) {
                    break;
                }
            }
        }
    }
    info!("LiveQuery runtime stopped");
}

fn apply(server: &mut LiveQueryServer, command: Command) {
    match command {
        Command::Register { sink, response } => {
            let connection = server.register_socket(sink);
            if response.send(connection).is_err() {
                server.handle_disconnect(connection);
            }
        }
        Command::Message { connection, raw } => server.handle_message(connection, &raw),
        Command::Disconnect { connection } => server.handle_disconnect(connection),
        Command::Stats { response } => {
            let _ = response.send(server.stats());
        }
    }
}

/// Plans and dispatches one change event. Returns false once the channel is closed.
fn on_change(
    server: &LiveQueryServer,
    change: Change,
    received: std::result::Result<String, RecvError>,
    sessions: &Arc<SessionTokenCache>,
) -> bool {
    let raw = match received {
        Ok(raw) => raw,
        Err(RecvError::Lagged(skipped)) => {
            warn!("LiveQuery fell behind and skipped {} {:?} events", skipped, change);
            return true;
        }
        Err(RecvError::Closed) => return false,
    };
    let message: ChangeMessage = match serde_json::from_str(&raw) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring malformed {:?} event: {}", change, e);
            return true;
        }
    };
    let plan = match change {
        Change::Save => server.plan_after_save(message),
        Change::Delete => server.plan_after_delete(message),
    };
    if let Some(plan) = plan.filter(|p| !p.is_empty()) {
        dispatch(plan, sessions.clone());
    }
    true
}

fn dispatch(plan: EventPlan, sessions: Arc<SessionTokenCache>) {
    tokio::spawn(async move {
        let pushed = plan.execute(&sessions).await;
        debug!("Pushed {} LiveQuery events", pushed);
    });
}
