//! Fetches the URLs given on the command line over one pooled client.
//!
//! ```text
//! cargo run --example get -- http://127.0.0.1:8080/a http://127.0.0.1:8080/b
//! ```

use std::time::Duration;

use http::Request;
use http::header::USER_AGENT;
use http_body_util::BodyExt;
use keepalive_client::middleware::{DefaultHeader, Middleware, Middlewares, SendRequest};
use keepalive_client::{Client, ClientConfig, PoolConfig, RequestBody};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = ClientConfig::default()
        .attempt_timeout(Duration::from_secs(10))
        .idle_sweep_interval(Duration::from_secs(2))
        .pool(PoolConfig::default().max_connections_per_key(2));
    let client = Client::builder().config(config).build();

    let sender = Middlewares::default()
        .and_then(DefaultHeader::new(USER_AGENT, http::HeaderValue::from_static("keepalive-example")))
        .wrap(client.clone());

    for url in std::env::args().skip(1) {
        let request = match Request::get(url.as_str()).body(RequestBody::Empty) {
            Ok(request) => request,
            Err(e) => {
                error!(%url, cause = %e, "invalid request");
                continue;
            }
        };

        let response = match sender.send_request(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(%url, kind = ?e.kind(), cause = %e, "request failed");
                continue;
            }
        };

        let status = response.status();
        match response.into_body().collect().await {
            Ok(collected) => info!(%url, %status, len = collected.to_bytes().len(), "fetched"),
            Err(e) => error!(%url, cause = %e, "read body failed"),
        }
    }

    info!(stats = ?client.pool().stats(), "done");
    client.close();
}
