//! Server configuration limits and timeouts
//!
//! # Memory Consumption
//!
//! Each active connection holds exactly one pooled I/O slot whose buffer is
//! [`ServerLimits::buffer_size`] bytes. Slots are created on demand and
//! recycled, so steady-state memory is roughly
//! `peak concurrent connections × buffer_size`.
//!
//! # Examples
//!
//! ```no_run
//! use spindle_web::{ActionResult, Server, StatusCode, limits::{ConnLimits, ServerLimits}};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .port(8080)
//!         .map_get("/", || ActionResult::new(StatusCode::Ok))
//!         .server_limits(ServerLimits {
//!             preallocated_slots: 512, // Warm pool for bursty traffic
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             max_request_header_count: 32,
//!             ..ConnLimits::default()
//!         })
//!         .build()
//!         .unwrap();
//!
//!     server.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

use crate::errors::ConfigError;
use std::{num::NonZeroUsize, thread, time::Duration};

/// Size of the receive/send buffer owned by every pooled I/O slot.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Controls server-level concurrency, pooling, and maintenance behavior.
///
/// # Connection management
/// ```text
///                     [------------]
///                     [ Tcp accept ]
///                     [------------]
///                           ||
///                           || TCP_STREAM
///                           \/
/// [----------------]  /----------------\  No   [---------------]
/// [ Reuse the slot ] <| Is a slot idle? |=====> [ Create a slot ]
/// [----------------]  \----------------/       [---------------]
///        ||                                           ||
///        \=================\\       //=================/
///                           V       V
///               [ receive -> parse -> route -> send ]
/// ```
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of runtime worker threads (default: available parallelism).
    ///
    /// Only used by [`Server::run_blocking`](crate::Server::run_blocking),
    /// which owns its runtime. Must be at least `1`.
    pub workers_count: usize,

    /// Size of each pooled receive/send buffer in bytes (default: `4096`).
    ///
    /// A request larger than the buffer is received in several chunks; the
    /// incremental parser stitches them together.
    pub buffer_size: usize,

    /// Number of I/O slots and pipelines created before the first connection
    /// is accepted (default: `64`).
    ///
    /// Creation is sequential. Slots beyond this number are created on demand.
    pub preallocated_slots: usize,

    /// Backlog passed to `listen(2)` (default: `1024`).
    pub listen_backlog: u32,

    /// Interval between heartbeat ticks (default: `1 second`).
    pub heartbeat_interval: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            workers_count: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            buffer_size: DEFAULT_BUFFER_SIZE,
            preallocated_slots: 64,
            listen_backlog: 1024,
            heartbeat_interval: Duration::from_secs(1),

            _priv: (),
        }
    }
}

impl ServerLimits {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.workers_count == 0 {
            return Err(ConfigError::InvalidWorkersCount);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::limit("buffer_size", "must be at least 1"));
        }
        if self.listen_backlog == 0 {
            return Err(ConfigError::limit("listen_backlog", "must be at least 1"));
        }
        check_timeout("heartbeat_interval", self.heartbeat_interval)
    }
}

/// Connection-level limits and timeouts.
///
/// **Not enforced yet.** Values are accepted and validated so that
/// configuration written today keeps working once enforcement lands. A
/// stalled client can currently hold its connection (and pooled slot)
/// indefinitely.
///
/// # Validation
/// - timeouts must be greater than zero and at most one day
/// - sizes and counts must be at least `1`
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Idle time allowed between requests on one connection (default: `130 seconds`).
    pub keep_alive_timeout: Duration,

    /// Time allowed to receive the full header block (default: `30 seconds`).
    pub request_headers_timeout: Duration,

    /// Maximum accepted `Content-Length` (default: `Some(30_000_000)`).
    ///
    /// `None` means unlimited.
    pub max_request_body_size: Option<usize>,

    /// Maximum number of headers per request (default: `100`).
    pub max_request_header_count: usize,

    /// Maximum request line length in bytes (default: `8 KiB`).
    pub max_request_line_size: usize,

    /// Maximum size of the whole header block in bytes (default: `32 KiB`).
    pub max_request_headers_total_size: usize,

    /// Maximum number of simultaneously open connections (default: `None`).
    ///
    /// `None` means unlimited.
    pub max_concurrent_connections: Option<usize>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(130),
            request_headers_timeout: Duration::from_secs(30),
            max_request_body_size: Some(30_000_000),
            max_request_header_count: 100,
            max_request_line_size: 8 * 1024,
            max_request_headers_total_size: 32 * 1024,
            max_concurrent_connections: None,

            _priv: (),
        }
    }
}

impl ConnLimits {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("keep_alive_timeout", self.keep_alive_timeout)?;
        check_timeout("request_headers_timeout", self.request_headers_timeout)?;

        check_size("max_request_body_size", self.max_request_body_size)?;
        check_size("max_request_header_count", Some(self.max_request_header_count))?;
        check_size("max_request_line_size", Some(self.max_request_line_size))?;
        check_size(
            "max_request_headers_total_size",
            Some(self.max_request_headers_total_size),
        )?;
        check_size("max_concurrent_connections", self.max_concurrent_connections)
    }
}

#[inline]
fn check_timeout(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    match value {
        Duration::ZERO => Err(ConfigError::limit(field, "must be greater than zero")),
        value if value > MAX_TIMEOUT => Err(ConfigError::limit(field, "must not exceed one day")),
        _ => Ok(()),
    }
}

#[inline]
fn check_size(field: &'static str, value: Option<usize>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::limit(field, "must be at least 1")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(ServerLimits::default().validate(), Ok(()));
        assert_eq!(ConnLimits::default().validate(), Ok(()));
        assert_eq!(ServerLimits::default().buffer_size, 4096);
        assert!(ServerLimits::default().workers_count >= 1);
    }

    #[test]
    fn server_limits() {
        #[rustfmt::skip]
        let cases = [
            (ServerLimits { workers_count: 0, ..Default::default() },
                Err(ConfigError::InvalidWorkersCount)),
            (ServerLimits { buffer_size: 0, ..Default::default() },
                Err(ConfigError::limit("buffer_size", "must be at least 1"))),
            (ServerLimits { listen_backlog: 0, ..Default::default() },
                Err(ConfigError::limit("listen_backlog", "must be at least 1"))),
            (ServerLimits { heartbeat_interval: Duration::ZERO, ..Default::default() },
                Err(ConfigError::limit("heartbeat_interval", "must be greater than zero"))),
            (ServerLimits { workers_count: 1, preallocated_slots: 0, ..Default::default() },
                Ok(())),
        ];

        for (limits, expected) in cases {
            assert_eq!(limits.validate(), expected);
        }
    }

    #[test]
    fn conn_limits() {
        #[rustfmt::skip]
        let cases = [
            (ConnLimits { keep_alive_timeout: Duration::ZERO, ..Default::default() },
                Err(ConfigError::limit("keep_alive_timeout", "must be greater than zero"))),
            (ConnLimits { request_headers_timeout: Duration::from_secs(86_401), ..Default::default() },
                Err(ConfigError::limit("request_headers_timeout", "must not exceed one day"))),
            (ConnLimits { max_request_body_size: Some(0), ..Default::default() },
                Err(ConfigError::limit("max_request_body_size", "must be at least 1"))),
            (ConnLimits { max_request_header_count: 0, ..Default::default() },
                Err(ConfigError::limit("max_request_header_count", "must be at least 1"))),
            (ConnLimits { max_concurrent_connections: Some(0), ..Default::default() },
                Err(ConfigError::limit("max_concurrent_connections", "must be at least 1"))),
            (ConnLimits { max_request_body_size: None, ..Default::default() },
                Ok(())),
            (ConnLimits { keep_alive_timeout: Duration::from_secs(86_400), ..Default::default() },
                Ok(())),
        ];

        for (limits, expected) in cases {
            assert_eq!(limits.validate(), expected);
        }
    }
}
