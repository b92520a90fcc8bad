use spindle_web::{ActionResult, HttpContext, Server, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn echo(req: &HttpContext) -> ActionResult {
    match req.body() {
        Some(body) => ActionResult::with_payload(StatusCode::Ok, body),
        None => ActionResult::new(StatusCode::NoContent),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    Server::builder()
        .port(8080)
        .workers_count(2)
        .map("POST", "/echo", echo)
        .map("PUT", "/echo", echo)
        .build()
        .unwrap()
        .run_blocking(CancellationToken::new())
        .unwrap();
}
