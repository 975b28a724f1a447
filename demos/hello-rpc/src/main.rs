//! Runs a packwire server and calls it over TCP, a Unix socket, and UDP.
//!
//! ```text
//! RUST_LOG=packwire=debug,hello_rpc=info cargo run -p hello-rpc
//! ```

use std::time::Duration;

use packwire::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    name: String,
    times: u32,
}

fn handlers() -> Handlers {
    Handlers::new()
        .sync_method("hello", |_| Ok(Value::from("world")))
        .typed("sum", |(a, b): (i64, i64)| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, String>(a + b)
        })
        .typed("greet", |greeting: Greeting| async move {
            if greeting.times == 0 {
                return Err(format!("{} asked for zero greetings", greeting.name));
            }
            Ok(vec![format!("hello, {}", greeting.name); greeting.times as usize])
        })
        .sync_method("throwError", |_| Err(Value::from("boom")))
        .typed("say", |text: String| async move {
            tracing::info!(%text, "say");
            Ok::<_, String>(())
        })
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

async fn exercise<T: ClientTransport>(
    label: &str,
    client: Client<T>,
) -> Result<(), PackwireError> {
    client.connect().await?;

    let hello = client.call("hello", vec![]).await?;
    tracing::info!(transport = label, %hello, "hello()");

    let sum: i64 = client.call_typed("sum", (3, 5)).await?;
    tracing::info!(transport = label, sum, "sum(3, 5)");

    let greetings: Vec<String> = client
        .call_typed(
            "greet",
            Greeting {
                name: "packwire".into(),
                times: 2,
            },
        )
        .await?;
    tracing::info!(transport = label, ?greetings, "greet()");

    match client.call("throwError", vec![]).await {
        Err(CallError::Remote(error)) => {
            tracing::info!(transport = label, %error, "throwError() failed as expected")
        }
        other => tracing::warn!(transport = label, ?other, "throwError() did not fail"),
    }

    match client.call("nope", vec![]).await {
        Err(CallError::NoMethod(message)) => {
            tracing::info!(transport = label, %message, "unknown method rejected")
        }
        other => tracing::warn!(transport = label, ?other, "unknown method accepted"),
    }

    client.notify("say", vec![Value::from(format!("hi over {label}"))])?;

    client.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), PackwireError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = Server::new(handlers());

    let tcp_addr = server.listen_tcp("127.0.0.1:0").await?;
    exercise("tcp", Client::tcp(tcp_addr.to_string())).await?;

    #[cfg(unix)]
    {
        let path = std::env::temp_dir().join(format!("hello-rpc-{}.sock", std::process::id()));
        server.listen_unix(&path).await?;
        exercise("unix", Client::unix(&path)).await?;
    }

    let udp_addr = server.listen_udp("127.0.0.1:0").await?;
    exercise("udp", Client::udp(udp_addr.to_string())).await?;

    // Let the last Notify reach its handler before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.close();
    Ok(())
}
