//! Fetch a few pages through a local Tor client, rotating identity as we go.
//!
//! Needs tor running with `SocksPort 9050` and `ControlPort 9051`.

use reqwest_middleware::ClientBuilder;
use reqwest_tor_rotator::{HandlerConfig, ProxyTransport, RequestHandler, TorRotationMiddleware};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = HandlerConfig::builder()
        .proxy_transport(ProxyTransport::Socks5)
        .proxy_port(9050)
        .control_port(9051)
        .request_timeout(Duration::from_secs(10))
        // rotate often so the exit address visibly changes
        .requests_before_rotation(2)
        .failures_before_rotation(3)
        .build()?;

    let mut handler = RequestHandler::new(config.clone())?
        .with_autosave(|| println!("Rotation failed, saving progress..."));

    for i in 1..=4 {
        let response = handler.get("https://check.torproject.org/api/ip").await?;
        println!("#{} status: {}", i, response.status());
        println!("#{} body: {}", i, response.text().await?);
    }

    println!("Sending request via middleware...");
    let client = ClientBuilder::new(reqwest::Client::new())
        .with(TorRotationMiddleware::new(config)?)
        .build();
    let response = client.get("https://httpbin.org/headers").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);

    Ok(())
}
