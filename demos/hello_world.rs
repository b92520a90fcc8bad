use spindle_web::{ActionResult, Server, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Server::builder()
        .port(8080)
        .map_get("/", || ActionResult::with_payload(StatusCode::Ok, "Hello, world!"))
        .build()
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();
}
