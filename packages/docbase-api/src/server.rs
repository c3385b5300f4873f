//! REST listener: accepts connections and dispatches them to the router.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming as IncomingBody};
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::router::Router;

/// How long open connections may keep running once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound REST endpoint of one application.
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
}

impl Server {
    /// Binds `addr` for `router`.
    pub async fn bind(addr: SocketAddr, router: Router) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, router))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener, router: Router) -> Self {
        Self {
            listener,
            router: Arc::new(router),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then gives open connections
    /// [`DRAIN_TIMEOUT`] to finish before dropping them.
    ///
    /// Per-connection accept failures (reset or aborted handshakes, file
    /// descriptor exhaustion) are logged and the loop keeps accepting.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let app_id = self.router.state().ctx.config.app_id.clone();
        info!("REST API for {} listening on http://{}", app_id, self.local_addr()?);

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) if is_connection_error(&e) => {
                            debug!("Dropped connection during accept: {}", e);
                            continue;
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };
                    let router = Arc::clone(&self.router);
                    connections.spawn(serve_connection(TokioIo::new(stream), peer, router));
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!("REST API shutting down, {} open connections", connections.len());
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Dropping {} connections still open after drain", connections.len());
            connections.shutdown().await;
        }
        Ok(())
    }
}

async fn serve_connection(io: TokioIo<tokio::net::TcpStream>, peer: SocketAddr, router: Arc<Router>) {
    let service = hyper::service::service_fn(move |req| handle_request(req, Arc::clone(&router)));
    if let Err(err) = ConnectionBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        warn!("Error serving connection from {}: {}", peer, err);
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

async fn handle_request(
    req: Request<IncomingBody>,
    router: Arc<Router>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(router.handle(req).await.map(Full::new))
}
