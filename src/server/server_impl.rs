use crate::{
    errors::{ConfigError, ServerError},
    http::{
        context::HttpContext,
        response::{ActionResult, HostConfig, Responder},
        router::{RouteTable, RouteTableBuilder},
    },
    limits::{ConnLimits, ServerLimits},
    pool::ObjectPool,
    server::{
        connection::ConnectionManager,
        heartbeat::Heartbeat,
        listener::{self, Shared},
        pipeline::Pipeline,
    },
};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tokio::{runtime, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

/// Default bind address: `127.0.0.1`.
pub const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// A configured HTTP server, ready to bind.
///
/// Routes are frozen when the server is built; nothing can be registered
/// afterwards.
///
/// # Examples
///
/// ```no_run
/// use spindle_web::{ActionResult, Server, StatusCode};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let token = CancellationToken::new();
///
///     let server = Server::builder()
///         .port(8080)
///         .map_get("/", || ActionResult::with_payload(StatusCode::Ok, "Hello world!"))
///         .build()
///         .unwrap();
///
///     // Stop after an hour; requests already being served are completed.
///     let stop = token.clone();
///     tokio::spawn(async move {
///         tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
///         stop.cancel();
///     });
///
///     server.run(token).await.unwrap();
/// }
/// ```
pub struct Server {
    host: Arc<HostConfig>,
    routes: Arc<RouteTable>,
    server_limits: ServerLimits,
    connection_limits: ConnLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use spindle_web::{ActionResult, Server, StatusCode};
    /// use std::net::Ipv4Addr;
    ///
    /// let server = Server::builder()
    ///     .address(Ipv4Addr::UNSPECIFIED.into())
    ///     .port(3000)
    ///     .workers_count(4)
    ///     .map_get("/health", || ActionResult::new(StatusCode::NoContent))
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(server.host().address().to_string(), "0.0.0.0:3000");
    /// assert_eq!(server.routes().len(), 1);
    /// ```
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// The address the server binds to and reports in the `Host` header.
    ///
    /// It can be changed with [`HostConfig::set_address`] until the server
    /// starts listening.
    #[inline]
    pub fn host(&self) -> &Arc<HostConfig> {
        &self.host
    }

    #[inline]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[inline]
    pub fn server_limits(&self) -> &ServerLimits {
        &self.server_limits
    }

    #[inline]
    pub fn connection_limits(&self) -> &ConnLimits {
        &self.connection_limits
    }

    /// Binds the listener and starts accepting connections in the background.
    ///
    /// When port `0` was configured the OS picks a free port; the `Host`
    /// header reports the real one from the first response on.
    ///
    /// Cancelling `token` stops the accept loop. Connections already accepted
    /// are served to completion before [`ServerHandle::wait`] returns.
    ///
    /// # Errors
    /// - [`ServerError::Bind`] if the address cannot be bound
    /// - [`ServerError::Heartbeat`] if the maintenance thread cannot start
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use spindle_web::{ActionResult, Server, StatusCode};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// let token = CancellationToken::new();
    /// let handle = Server::builder()
    ///     .port(0)
    ///     .map_get("/", || ActionResult::new(StatusCode::Ok))
    ///     .build()
    ///     .unwrap()
    ///     .start(token.clone())
    ///     .await
    ///     .unwrap();
    ///
    /// println!("listening on {}", handle.local_addr());
    ///
    /// token.cancel();
    /// handle.wait().await.unwrap();
    /// # }
    /// ```
    pub async fn start(self, token: CancellationToken) -> Result<ServerHandle, ServerError> {
        let Server {
            host,
            routes,
            server_limits,
            connection_limits: _,
        } = self;

        let manager = Arc::new(ConnectionManager::new(&server_limits));
        let responder = Arc::new(Responder::new(host.clone()));
        let pipelines = Arc::new(ObjectPool::with_prefill(server_limits.preallocated_slots, move || {
            Pipeline::new(routes.clone(), responder.clone())
        }));

        let requested = host.address();
        let listener = listener::bind(requested, server_limits.listen_backlog)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr: requested, source })?;

        // Started last: nothing may fail after the thread exists, since
        // dropping the guard joins it.
        let mut heartbeat = Heartbeat::new(server_limits.heartbeat_interval);
        heartbeat.register(manager.clone());
        let heartbeat = heartbeat.start().map_err(ServerError::Heartbeat)?;

        if local_addr != requested {
            host.refresh(local_addr);
        }
        host.set_listening(true);
        info!(%local_addr, workers = server_limits.workers_count, "server listening");

        let task = tokio::spawn({
            let host = host.clone();
            let tracker = TaskTracker::new();
            let shared = Shared { manager, pipelines };

            async move {
                listener::accept_loop(listener, shared, tracker.clone(), token).await;

                tracker.close();
                tracker.wait().await;

                // Joining the heartbeat thread waits for its current tick.
                if tokio::task::spawn_blocking(move || drop(heartbeat)).await.is_err() {
                    error!("heartbeat shutdown failed");
                }

                host.set_listening(false);
                info!(%local_addr, "server stopped");
            }
        });

        Ok(ServerHandle { local_addr, host, task })
    }

    /// Starts the server and runs it until `token` is cancelled and every
    /// in-flight connection has been served.
    ///
    /// # Errors
    /// See [`start`](Self::start) and [`ServerHandle::wait`].
    pub async fn run(self, token: CancellationToken) -> Result<(), ServerError> {
        self.start(token).await?.wait().await
    }

    /// Builds a multi-threaded runtime with
    /// [`workers_count`](ServerLimits::workers_count) workers and runs the
    /// server on it, blocking the calling thread.
    ///
    /// Must not be called from within an async context.
    ///
    /// # Errors
    /// [`ServerError::Runtime`] if the runtime cannot be built, otherwise see
    /// [`run`](Self::run).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use spindle_web::{ActionResult, Server, StatusCode};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// fn main() {
    ///     Server::builder()
    ///         .workers_count(2)
    ///         .map_get("/", || ActionResult::new(StatusCode::Ok))
    ///         .build()
    ///         .unwrap()
    ///         .run_blocking(CancellationToken::new())
    ///         .unwrap();
    /// }
    /// ```
    pub fn run_blocking(self, token: CancellationToken) -> Result<(), ServerError> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(self.server_limits.workers_count)
            .thread_name("spindle-worker")
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        runtime.block_on(self.run(token))
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.host.address())
            .field("routes", &self.routes.len())
            .field("server_limits", &self.server_limits)
            .field("connection_limits", &self.connection_limits)
            .finish()
    }
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    host: Arc<HostConfig>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is actually bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The live host configuration; address changes are rejected while the
    /// server is listening.
    #[inline]
    pub fn host(&self) -> &Arc<HostConfig> {
        &self.host
    }

    /// Waits until the server has stopped: the token was cancelled and all
    /// in-flight connections are done.
    ///
    /// # Errors
    /// [`ServerError::AcceptLoop`] if the background task panicked or was
    /// aborted.
    pub async fn wait(self) -> Result<(), ServerError> {
        self.task.await.map_err(|err| {
            error!(%err, "server task failed");
            ServerError::AcceptLoop
        })
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// | Option                | Default                      |
/// |-----------------------|------------------------------|
/// | `address`             | `127.0.0.1`                  |
/// | `port`                | `8080`                       |
/// | `workers_count`       | available parallelism        |
/// | `server_limits`       | [`ServerLimits::default()`]  |
/// | `connection_limits`   | [`ConnLimits::default()`]    |
///
/// Logging goes through [`tracing`]; install any subscriber to see it.
#[derive(Default)]
pub struct ServerBuilder {
    address: Option<IpAddr>,
    port: Option<u16>,
    workers_count: Option<usize>,
    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    routes: RouteTableBuilder,
}

impl ServerBuilder {
    /// Sets the IP address to bind and to report in the `Host` header.
    #[inline(always)]
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the port to bind. `0` lets the OS choose one.
    #[inline(always)]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the number of runtime worker threads used by
    /// [`Server::run_blocking`].
    ///
    /// Takes precedence over [`ServerLimits::workers_count`] regardless of
    /// call order.
    #[inline(always)]
    pub fn workers_count(mut self, workers_count: usize) -> Self {
        self.workers_count = Some(workers_count);
        self
    }

    /// Configures pooling and maintenance limits.
    ///
    /// # Examples
    ///
    /// ```
    /// use spindle_web::{Server, limits::ServerLimits};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .server_limits(ServerLimits {
    ///         buffer_size: 8 * 1024,
    ///         heartbeat_interval: Duration::from_millis(500),
    ///         ..ServerLimits::default()
    ///     })
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(server.server_limits().buffer_size, 8192);
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection limits. These are validated but not enforced
    /// yet; see [`ConnLimits`].
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Registers a handler that reads the request.
    ///
    /// # Examples
    ///
    /// ```
    /// use spindle_web::{ActionResult, HttpContext, Server, StatusCode};
    ///
    /// let server = Server::builder()
    ///     .map("POST", "/echo", |req: &HttpContext| {
    ///         ActionResult::with_payload(StatusCode::Ok, req.body().unwrap_or_default())
    ///     })
    ///     .build()
    ///     .unwrap();
    ///
    /// assert!(server.routes().lookup(b"POST", b"/echo").is_some());
    /// ```
    pub fn map<F>(mut self, method: impl AsRef<[u8]>, path: impl AsRef<[u8]>, handler: F) -> Self
    where
        F: Fn(&HttpContext) -> ActionResult + Send + Sync + 'static,
    {
        self.routes.map(method, path, handler);
        self
    }

    pub fn map_get<F>(mut self, path: impl AsRef<[u8]>, handler: F) -> Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.routes.map_get(path, handler);
        self
    }

    pub fn map_post<F>(mut self, path: impl AsRef<[u8]>, handler: F) -> Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.routes.map_post(path, handler);
        self
    }

    pub fn map_put<F>(mut self, path: impl AsRef<[u8]>, handler: F) -> Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.routes.map_put(path, handler);
        self
    }

    pub fn map_patch<F>(mut self, path: impl AsRef<[u8]>, handler: F) -> Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.routes.map_patch(path, handler);
        self
    }

    pub fn map_delete<F>(mut self, path: impl AsRef<[u8]>, handler: F) -> Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        self.routes.map_delete(path, handler);
        self
    }

    /// Merges routes collected elsewhere. Routes already registered on this
    /// builder win over duplicates.
    pub fn routes(mut self, routes: RouteTableBuilder) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Validates the configuration and freezes the routes.
    ///
    /// # Errors
    /// - [`ConfigError::InvalidWorkersCount`] if `workers_count` is `0`
    /// - [`ConfigError::InvalidLimit`] for any out-of-range limit
    ///
    /// # Examples
    ///
    /// ```
    /// use spindle_web::{Server, errors::ConfigError};
    ///
    /// let err = Server::builder().workers_count(0).build().unwrap_err();
    /// assert_eq!(err, ConfigError::InvalidWorkersCount);
    /// ```
    pub fn build(self) -> Result<Server, ConfigError> {
        let mut server_limits = self.server_limits.unwrap_or_default();
        if let Some(workers_count) = self.workers_count {
            server_limits.workers_count = workers_count;
        }
        server_limits.validate()?;

        let connection_limits = self.connection_limits.unwrap_or_default();
        connection_limits.validate()?;

        let addr = SocketAddr::new(
            self.address.unwrap_or(DEFAULT_ADDRESS),
            self.port.unwrap_or(DEFAULT_PORT),
        );

        Ok(Server {
            host: Arc::new(HostConfig::new(addr)),
            routes: Arc::new(self.routes.freeze()),
            server_limits,
            connection_limits,
        })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("workers_count", &self.workers_count)
            .field("server_limits", &self.server_limits)
            .field("connection_limits", &self.connection_limits)
            .field("routes", &self.routes.len())
            .finish()
    }
}
