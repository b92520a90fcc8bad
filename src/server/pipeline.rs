//! Request processing for one connection: parse, route, execute, respond.

use crate::{
    http::{
        parser::{ParseStatus, Parser},
        response::{ActionResult, Responder},
        router::RouteTable,
        types::StatusCode,
    },
    server::{
        connection::{ConnectionContext, ConnectionManager},
        heartbeat::panic_message,
    },
};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, error};

/// What the caller should do with the connection after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A response is in the connection buffer; send it.
    Respond,
    /// The request never completed; close without sending.
    Abort,
}

/// Per-connection request processor.
///
/// Owns its parser, so one instance must serve one connection at a time.
/// Instances are pooled and reused; the routing table and responder are
/// shared.
#[derive(Debug)]
pub struct Pipeline {
    parser: Parser,
    routes: Arc<RouteTable>,
    responder: Arc<Responder>,
}

impl Pipeline {
    pub fn new(routes: Arc<RouteTable>, responder: Arc<Responder>) -> Self {
        Self {
            parser: Parser::new(),
            routes,
            responder,
        }
    }

    /// Processes the request whose first chunk is in `ctx`'s buffer.
    ///
    /// Receives further chunks through `manager` while the request is
    /// incomplete. On [`Outcome::Respond`] the buffer holds the full
    /// response:
    ///
    /// | Situation                    | Response                     |
    /// |------------------------------|------------------------------|
    /// | malformed request            | `400 Bad Request`            |
    /// | no route for method and path | `404 Not Found`              |
    /// | handler panicked             | `500 Internal Server Error`  |
    /// | handler returned             | the handler's `ActionResult` |
    ///
    /// [`Outcome::Abort`] is returned when the peer closes or the transport
    /// fails before the request is complete.
    pub async fn process_request(&mut self, ctx: &mut ConnectionContext, manager: &ConnectionManager) -> Outcome {
        self.parser.reset();

        loop {
            if ctx.buffer().is_empty() {
                debug!(connection_id = ctx.id(), "peer closed before the request was complete");
                return Outcome::Abort;
            }

            match self.parser.parse(ctx.buffer()) {
                Ok(ParseStatus::Complete) => break,
                Ok(ParseStatus::Partial) => {
                    if manager.receive(ctx).await.is_err() {
                        return Outcome::Abort;
                    }
                }
                Err(err) => {
                    debug!(
                        connection_id = ctx.id(),
                        code = err.code().as_u16(),
                        message = err.message(),
                        "rejecting malformed request"
                    );
                    self.respond(ctx, &ActionResult::new(StatusCode::BadRequest));
                    return Outcome::Respond;
                }
            }
        }

        let id = ctx.id();
        let request = &*ctx.request.insert(self.parser.take_context());

        let result = match self.routes.get_action(request) {
            None => ActionResult::new(StatusCode::NotFound),
            Some(handler) => match catch_unwind(AssertUnwindSafe(|| handler(request))) {
                Ok(result) => result,
                Err(panic) => {
                    error!(
                        connection_id = id,
                        method = %String::from_utf8_lossy(request.method()),
                        route = %String::from_utf8_lossy(request.route()),
                        panic = panic_message(&*panic),
                        "route handler panicked"
                    );
                    ActionResult::new(StatusCode::InternalServerError)
                }
            },
        };

        self.respond(ctx, &result);
        Outcome::Respond
    }

    fn respond(&self, ctx: &mut ConnectionContext, result: &ActionResult) {
        debug!(connection_id = ctx.id(), status = result.status().as_u16(), "response built");

        let out = ctx.buffer_mut();
        out.clear();
        self.responder.build(result, out);
    }
}
