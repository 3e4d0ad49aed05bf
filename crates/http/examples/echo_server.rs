use std::error::Error;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use keepalive_http::handler::make_handler;
use keepalive_http::protocol::body::ReqBody;
use keepalive_http::{Server, ServerConfig};
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let server = Server::builder().config(ServerConfig::default()).build();
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server.serve(listener, Arc::new(make_handler(echo))).await;
}

async fn echo(request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, BoxError> {
    let (parts, body) = request.into_parts();
    let collected = body.collect().await?;
    if let Some(trailers) = collected.trailers() {
        info!(?trailers, "receive trailers");
    }

    let body = collected.to_bytes();
    info!(method = %parts.method, path = parts.uri.path(), len = body.len(), "echo request body");

    let response = Response::builder().status(StatusCode::OK).body(Full::new(body))?;
    Ok(response)
}
