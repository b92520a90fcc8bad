//! Socket setup and the accept loop.

use crate::{
    errors::ServerError,
    pool::ObjectPool,
    server::{
        connection::ConnectionManager,
        pipeline::{Outcome, Pipeline},
    },
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

// Back-off after a failed accept, e.g. when the process is out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Binds a non-blocking listening socket with `SO_REUSEADDR` set.
///
/// Must be called from within a tokio runtime.
pub(crate) fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let bind_error = |source: io::Error| ServerError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;

    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(bind_error)?;

    TcpListener::from_std(socket.into()).map_err(bind_error)
}

/// Everything a connection task needs, shared by all of them.
#[derive(Debug, Clone)]
pub(crate) struct Shared {
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) pipelines: Arc<ObjectPool<Pipeline>>,
}

/// Accepts connections until `token` is cancelled.
///
/// Each connection runs on its own task registered with `tracker`, so the
/// caller can wait for in-flight requests after the loop returns.
pub(crate) async fn accept_loop(listener: TcpListener, shared: Shared, tracker: TaskTracker, token: CancellationToken) {
    info!(addr = ?listener.local_addr().ok(), "accepting connections");

    loop {
        let accepted = tokio::select! {
            biased;

            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(%peer, %err, "failed to set TCP_NODELAY");
                }
                tracker.spawn(serve(shared.clone(), stream, peer));
            }
            Err(err) => {
                warn!(%err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    info!(in_flight = tracker.len(), "stopped accepting connections");
}

/// One connection: first receive, one request, one response, close.
async fn serve(shared: Shared, stream: TcpStream, peer: SocketAddr) {
    let Ok(mut ctx) = shared.manager.receive_from(stream, peer).await else {
        return;
    };

    let mut pipeline = shared.pipelines.acquire_owned();

    match pipeline.process_request(&mut ctx, &shared.manager).await {
        // Send failures are logged by the manager.
        Outcome::Respond => {
            let _ = shared.manager.send_response(ctx).await;
        }
        Outcome::Abort => shared.manager.close(ctx).await,
    }
}
