//! spindle_web - Embeddable HTTP/1.1 server engine
//!
//! A small request/response server built from a few reusable pieces: pooled
//! I/O buffers, an incremental parser that survives arbitrary TCP chunking,
//! an exact-match router and a byte-exact response builder.
//!
//! # Request lifecycle
//!
//! Every connection carries exactly one request:
//!
//! ```text
//! accept -> receive -> parse (receive more while partial) -> route -> handler -> build -> send -> close
//! ```
//!
//! | Situation                    | Response                     |
//! |------------------------------|------------------------------|
//! | malformed request            | `400 Bad Request`            |
//! | no route for method and path | `404 Not Found`              |
//! | handler panicked             | `500 Internal Server Error`  |
//! | handler returned             | the handler's [`ActionResult`] |
//!
//! Responses always carry a `Host` header with the configured address. Bodies
//! are sent as `text/plain` with an explicit `Content-Length`.
//!
//! # Limitations
//!
//! - **No keep-alive** - the connection is closed after one response
//! - **No chunked transfer encoding** - bodies are read by `Content-Length`
//! - **No TLS, no HTTP/2**
//! - **Exact-match routing** - no wildcards or path parameters
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use spindle_web::{ActionResult, Server, StatusCode};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .port(8080)
//!         .map_get("/", || ActionResult::with_payload(StatusCode::Ok, "Hello, World!"))
//!         .build()
//!         .unwrap()
//!         .run(CancellationToken::new())
//!         .await
//!         .unwrap();
//! }
//! ```
//! Reading the request:
//! ```no_run
//! use spindle_web::{ActionResult, HttpContext, Server, StatusCode};
//! use tokio_util::sync::CancellationToken;
//!
//! fn main() {
//!     Server::builder()
//!         .map("POST", "/echo", |req: &HttpContext| {
//!             ActionResult::with_payload(StatusCode::Ok, req.body().unwrap_or_default())
//!         })
//!         .map("GET", "/agent", |req: &HttpContext| match req.header_str("User-Agent") {
//!             Some(agent) => ActionResult::with_body(StatusCode::Ok, |body| {
//!                 body.write("You are ");
//!                 body.write(agent);
//!             }),
//!             None => ActionResult::new(StatusCode::BadRequest),
//!         })
//!         .build()
//!         .unwrap()
//!         .run_blocking(CancellationToken::new())
//!         .unwrap();
//! }
//! ```
//!
//! # Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber.
//! Connection-level events are at `debug`/`trace`, handler panics at `error`.

pub(crate) mod http {
    pub mod context;
    pub mod parser;
    pub mod response;
    pub mod router;
    pub mod types;
}
pub(crate) mod server {
    pub mod connection;
    pub mod heartbeat;
    pub(crate) mod listener;
    pub mod pipeline;
    pub mod server_impl;
}
pub mod errors;
pub mod limits;
pub mod pool;

pub use crate::{
    errors::{BuildError, ConfigError, ErrorCode, ParseError, PoolError, ServerError},
    http::{
        context::{HeaderMap, HeaderName, HttpContext},
        parser::{ParseStatus, Parser, ParserState},
        response::{
            write::{BodyWriter, WriteBuffer},
            ActionResult, HostConfig, Responder,
        },
        router::{Endpoint, Handler, RouteTable, RouteTableBuilder},
        types::StatusCode,
    },
    pool::{ObjectPool, Pooled},
    server::{
        connection::{ConnectionContext, ConnectionManager, IoOperation, IoSlot},
        heartbeat::{Heartbeat, HeartbeatGuard, HeartbeatHandler},
        pipeline::{Outcome, Pipeline},
        server_impl::{Server, ServerBuilder, ServerHandle, DEFAULT_ADDRESS, DEFAULT_PORT},
    },
};
