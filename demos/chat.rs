//! Minimal chat client over a multiplexed connection.
//!
//! Connects to a device, authenticates with the session credential from a
//! cookie-like store, then joins two protocol channels on the one socket.
//!
//! Run with: cargo run --example chat -- ws://192.168.1.1:81

use std::time::Duration;

use chanmux::{Connection, KeyValueStore, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chanmux=debug".into()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://192.168.1.1:81".to_string());

    let store = KeyValueStore::parse("session=demo-session-token");

    let connection = Connection::builder()
        .url(url)
        .credentials(store)
        .connect_timeout(Duration::from_secs(10))
        .build()?
        .connect()
        .await?;

    connection
        .ready(|| println!("* authenticated"))
        .error(|message| eprintln!("* connection error: {message}"));

    let chat = connection.channel("chat");
    chat.on("msg", |body| println!("<chat> {body}"))
        .send("join", "general")?;

    connection
        .channel("telemetry")
        .on("status", |body| println!("<telemetry> {body}"));

    chat.send("msg", "hello from chanmux")?;

    tokio::time::sleep(Duration::from_secs(30)).await;

    connection.leave()?;
    Ok(())
}
