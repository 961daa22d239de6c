//! Compose auth, smart retry, cache and observability over the reqwest
//! transport, against a throwaway local server.
//!
//! Run with: `cargo run -p httpward-http --example compose`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use httpward_core::policy::{
    with_auth, with_cache, with_observability, with_redaction, with_retry_smart, AuthConfig,
    CacheConfig, ObservabilityConfig, RedactionConfig, RetryConfig,
};
use httpward_core::{BoxPlugin, Config, HttpError};
use httpward_http::{create_client, init_tracing, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&LogConfig::debug())?;

    let server = MockServer::start().await;
    let flaky = Arc::new(AtomicUsize::new(0));
    let seen = flaky.clone();
    Mock::given(method("GET"))
        .and(path("/report"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(move |_req: &wiremock::Request| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "rows": 3 }))
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/report"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let token = Arc::new(parking_lot::Mutex::new("expired".to_string()));
    let (read, write) = (token.clone(), token.clone());

    let plugins: Vec<BoxPlugin> = vec![
        Box::new(with_redaction(RedactionConfig::default())),
        Box::new(with_auth(
            move || {
                let current = read.lock().clone();
                async move { Ok::<_, HttpError>(current) }
            },
            move || {
                *write.lock() = "fresh".to_string();
                async { Ok::<_, HttpError>(()) }
            },
            AuthConfig::default(),
        )),
        Box::new(with_retry_smart(RetryConfig::default())),
        Box::new(with_cache(CacheConfig::default())),
        Box::new(with_observability(
            ObservabilityConfig::new().on_success(|e| {
                println!("{} {} -> {:?} in {:?}", e.method, e.url, e.status, e.duration)
            }),
        )),
    ];

    let client = create_client(Config::new().with_base_url(server.uri()), plugins)?;

    let report: serde_json::Value = client.get("report").json().await.context("first call")?;
    println!("report: {report}");

    let cached: serde_json::Value = client.get("report").json().await.context("cached call")?;
    println!("cached: {cached} (server saw {} authorised calls)", flaky.load(Ordering::SeqCst));

    Ok(())
}
