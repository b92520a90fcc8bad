use spindle_web::{ActionResult, HttpContext, Server, StatusCode};
use std::{fmt::Write, net::Ipv4Addr};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn inspect(req: &HttpContext) -> ActionResult {
    let mut report = String::new();

    let _ = writeln!(report, "method:  {}", String::from_utf8_lossy(req.method()));
    let _ = writeln!(report, "route:   {}", String::from_utf8_lossy(req.route()));
    let _ = writeln!(report, "version: {}", String::from_utf8_lossy(req.version()));

    for (name, value) in req.headers().iter() {
        let _ = writeln!(
            report,
            "header:  {}: {}",
            String::from_utf8_lossy(name.as_bytes()),
            String::from_utf8_lossy(value)
        );
    }
    if let Some(body) = req.body() {
        let _ = writeln!(report, "body:    {} bytes", body.len());
    }

    ActionResult::with_payload(StatusCode::Ok, report)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let token = CancellationToken::new();

    // Every method the router knows about goes to the same inspector.
    let mut builder = Server::builder().address(Ipv4Addr::UNSPECIFIED.into()).port(8080);
    for method in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
        builder = builder.map(method, "/inspect", inspect);
    }

    let handle = builder.build().unwrap().start(token.clone()).await.unwrap();
    tracing::info!("try: curl -d 'hello' http://{}/inspect", handle.local_addr());

    handle.wait().await.unwrap();
}
