//! Per-connection I/O: pooled buffers, connection ids and the active table.

use crate::{
    http::context::HttpContext,
    limits::ServerLimits,
    pool::{ObjectPool, Pooled},
    server::heartbeat::HeartbeatHandler,
};
use crossbeam::utils::CachePadded;
use dashmap::DashMap;
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, trace};

/// The last I/O operation issued on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Receive,
    Send,
}

/// A reusable receive/send buffer.
///
/// The same buffer first holds the most recently received chunk and then the
/// serialized response.
#[derive(Debug)]
pub struct IoSlot {
    buffer: Vec<u8>,
    last_operation: Option<IoOperation>,
}

impl IoSlot {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            last_operation: None,
        }
    }

    // A response can grow the buffer past its nominal size; oversized buffers
    // are replaced rather than kept in the pool.
    fn prepare(&mut self, capacity: usize) {
        if self.buffer.capacity() > capacity.saturating_mul(4) {
            self.buffer = Vec::with_capacity(capacity);
        } else {
            self.buffer.clear();
            self.buffer.reserve(capacity);
        }
        self.last_operation = None;
    }

    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    #[inline]
    pub fn last_operation(&self) -> Option<IoOperation> {
        self.last_operation
    }
}

type ActiveTable = Arc<DashMap<u64, ActiveConnection>>;

/// State of one accepted connection, from accept to teardown.
///
/// Owning the context is the right to tear the connection down; both
/// [`ConnectionManager::send_response`] and [`ConnectionManager::close`]
/// consume it, so teardown happens exactly once. A context dropped without
/// either, e.g. when its task is aborted, still leaves the active table.
#[derive(Debug)]
pub struct ConnectionContext {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    slot: Pooled<IoSlot>,
    pub(crate) request: Option<HttpContext>,
    active: ActiveTable,
    registered: bool,
}

impl ConnectionContext {
    /// Unique id, assigned from a monotonically increasing counter.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes of the last receive, or the response once one was built.
    #[inline]
    pub fn buffer(&self) -> &[u8] {
        self.slot.buffer()
    }

    /// The parsed request, once the pipeline has completed parsing.
    #[inline]
    pub fn request(&self) -> Option<&HttpContext> {
        self.request.as_ref()
    }

    #[inline]
    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.slot.buffer
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        if self.registered && self.active.remove(&self.id).is_some() {
            debug!(connection_id = self.id, peer = %self.peer, "connection dropped without teardown");
        }
    }
}

#[derive(Debug)]
struct ActiveConnection {
    peer: SocketAddr,
    accepted_at: Instant,
}

/// Owns the active-connection table and the pool of I/O slots.
///
/// # Connection lifecycle
/// ```text
/// receive_from ──> [ registered ] ──receive*──> send_response ──> [ removed ]
///                        │                                            ^
///                        └────────────────── close ───────────────────┘
/// ```
///
/// Every registered id is removed exactly once. Registering an id twice or
/// removing an unknown id is a bug and panics.
#[derive(Debug)]
pub struct ConnectionManager {
    slots: Arc<ObjectPool<IoSlot>>,
    active: ActiveTable,
    next_id: CachePadded<AtomicU64>,
    buffer_size: usize,
}

impl ConnectionManager {
    /// Creates the manager and prefills `preallocated_slots` buffers.
    pub fn new(limits: &ServerLimits) -> Self {
        let buffer_size = limits.buffer_size;

        Self {
            slots: Arc::new(ObjectPool::with_prefill(limits.preallocated_slots, move || {
                IoSlot::new(buffer_size)
            })),
            active: Arc::new(DashMap::new()),
            next_id: CachePadded::new(AtomicU64::new(1)),
            buffer_size,
        }
    }

    /// Registers an accepted socket and performs the first receive.
    ///
    /// On success the returned context holds the first chunk in its buffer
    /// (empty if the peer closed without sending). On a transport failure
    /// the connection is already torn down.
    pub async fn receive_from(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<ConnectionContext> {
        let mut slot = self.slots.acquire_owned();
        slot.prepare(self.buffer_size);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.register(id, peer);

        let mut ctx = ConnectionContext {
            id,
            peer,
            stream,
            slot,
            request: None,
            active: self.active.clone(),
            registered: true,
        };

        match self.receive(&mut ctx).await {
            Ok(_) => Ok(ctx),
            Err(err) => {
                self.close(ctx).await;
                Err(err)
            }
        }
    }

    /// Replaces the buffer contents with the next chunk from the peer.
    ///
    /// Returns the number of bytes read; `0` means the peer closed its side.
    pub async fn receive(&self, ctx: &mut ConnectionContext) -> io::Result<usize> {
        ctx.slot.buffer.clear();
        let result = ctx.stream.read_buf(&mut ctx.slot.buffer).await;

        self.complete(ctx, IoOperation::Receive, &result);
        result
    }

    /// Sends the buffer contents, then tears the connection down.
    pub async fn send_response(&self, mut ctx: ConnectionContext) -> io::Result<()> {
        let result = ctx
            .stream
            .write_all(&ctx.slot.buffer)
            .await
            .map(|()| ctx.slot.buffer.len());

        self.complete(&mut ctx, IoOperation::Send, &result);
        self.close(ctx).await;
        result.map(drop)
    }

    /// Tears the connection down without sending anything.
    ///
    /// Removes it from the active table, shuts the socket down and returns
    /// the slot to the pool.
    pub async fn close(&self, mut ctx: ConnectionContext) {
        self.unregister(ctx.id);
        ctx.registered = false;

        if let Err(err) = ctx.stream.shutdown().await {
            trace!(connection_id = ctx.id, %err, "socket shutdown failed");
        }
        // Dropping the context releases the slot back to the pool.
    }

    /// Number of connections currently registered.
    #[inline]
    pub fn active_connections(&self) -> usize {
        self.active.len()
    }

    /// Number of slots waiting in the pool.
    #[inline]
    pub fn idle_slots(&self) -> usize {
        self.slots.idle_count()
    }

    fn complete(&self, ctx: &mut ConnectionContext, operation: IoOperation, result: &io::Result<usize>) {
        ctx.slot.last_operation = Some(operation);

        match (operation, result) {
            (IoOperation::Receive, Ok(bytes)) => {
                trace!(connection_id = ctx.id, bytes, "receive completed");
            }
            (IoOperation::Send, Ok(bytes)) => {
                trace!(connection_id = ctx.id, bytes, "send completed");
            }
            (operation, Err(err)) => {
                debug!(connection_id = ctx.id, peer = %ctx.peer, ?operation, %err, "transport failure");
            }
        }
    }

    #[track_caller]
    fn register(&self, id: u64, peer: SocketAddr) {
        let entry = ActiveConnection {
            peer,
            accepted_at: Instant::now(),
        };

        if self.active.insert(id, entry).is_some() {
            panic!("connection id {id} registered twice");
        }
        trace!(connection_id = id, %peer, "connection registered");
    }

    #[track_caller]
    fn unregister(&self, id: u64) {
        match self.active.remove(&id) {
            Some((_, entry)) => {
                trace!(connection_id = id, peer = %entry.peer, "connection removed");
            }
            None => panic!("connection id {id} is not registered"),
        }
    }

    fn oldest_connection_age(&self) -> Option<Duration> {
        self.active
            .iter()
            .map(|entry| entry.value().accepted_at)
            .min()
            .map(|accepted_at| accepted_at.elapsed())
    }
}

impl HeartbeatHandler for ConnectionManager {
    fn on_heartbeat(&self) {
        debug!(
            active = self.active_connections(),
            oldest_ms = self.oldest_connection_age().map(|age| age.as_millis() as u64),
            idle_slots = self.idle_slots(),
            "connection manager heartbeat"
        );
    }
}
