//! End-to-end tests: a real `Server` and `Client` talking over each
//! transport.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use packwire::prelude::*;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

/// `hello`, async `sum`, `throwError`, and `say` (reported on the channel).
fn scenario_handlers(said: mpsc::UnboundedSender<String>) -> Handlers {
    Handlers::new()
        .sync_method("hello", |_| Ok(Value::from("world")))
        .typed("sum", |(a, b): (i64, i64)| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, String>(a + b)
        })
        .sync_method("throwError", |_| Err(Value::from("boom")))
        .typed("say", move |text: String| {
            let said = said.clone();
            async move {
                let _ = said.send(text);
                Ok::<_, String>(())
            }
        })
}

fn scenario_server() -> (Server, mpsc::UnboundedReceiver<String>) {
    init_tracing();
    let (said, heard) = mpsc::unbounded_channel();
    (Server::new(scenario_handlers(said)), heard)
}

/// Scenarios A to C plus the unknown-method case, over any transport.
async fn run_call_scenarios<T: ClientTransport>(client: &Client<T>) {
    // A: hello() -> "world"
    let hello = within(client.call("hello", vec![])).await.unwrap();
    assert_eq!(hello, Value::from("world"));

    // B: sum(3, 5) -> 8, handler completes asynchronously
    let sum = within(client.call("sum", vec![Value::from(3), Value::from(5)]))
        .await
        .unwrap();
    assert_eq!(sum, Value::from(8));

    // C: handler fault travels back as the call's error
    let err = within(client.call("throwError", vec![])).await.unwrap_err();
    assert_eq!(err.remote_value(), Some(&Value::from("boom")));

    let err = within(client.call("missing", vec![])).await.unwrap_err();
    assert!(matches!(err, CallError::NoMethod(ref msg) if msg.contains("missing")));

    assert_eq!(client.session().pending_calls(), 0);
}

// =========================================================================
// TCP
// =========================================================================

#[tokio::test]
async fn test_tcp_scenarios() {
    let (server, mut heard) = scenario_server();
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));

    let client = Client::tcp(addr.to_string());
    client.connect().await.unwrap();
    run_call_scenarios(&client).await;

    client.notify("say", vec![Value::from("hi")]).unwrap();
    assert_eq!(within(heard.recv()).await.unwrap(), "hi");

    client.close();
    server.close();
}

#[tokio::test]
async fn test_tcp_call_while_disconnected() {
    init_tracing();
    // D: nothing was ever connected, so the call fails right away.
    let client = Client::tcp("127.0.0.1:1");
    let err = within(client.call("hello", vec![])).await.unwrap_err();
    assert!(matches!(
        err,
        CallError::Transport(TransportError::NoConnection(_))
    ));
    assert!(client.notify("say", vec![]).is_err());
    assert_eq!(client.session().pending_calls(), 0);
}

#[tokio::test]
async fn test_tcp_concurrent_calls_resolve_independently() {
    init_tracing();
    let server = Server::new(
        Handlers::new()
            .method("slow", |_| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Value::from("slow"))
            })
            .sync_method("fast", |_| Ok(Value::from("fast"))),
    );
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();
    let client = Client::tcp(addr.to_string());
    client.connect().await.unwrap();

    let (slow, fast) = within(async {
        tokio::join!(client.call("slow", vec![]), client.call("fast", vec![]))
    })
    .await;
    assert_eq!(slow.unwrap(), Value::from("slow"));
    assert_eq!(fast.unwrap(), Value::from("fast"));
    assert_eq!(client.session().pending_calls(), 0);
}

#[tokio::test]
async fn test_tcp_each_client_gets_its_own_answers() {
    let (server, _heard) = scenario_server();
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap().to_string();

    let first = Client::tcp(addr.clone());
    let second = Client::tcp(addr);
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    let (a, b) = within(async {
        tokio::join!(
            first.call_typed::<_, i64>("sum", (1, 2)),
            second.call_typed::<_, i64>("sum", (10, 20)),
        )
    })
    .await;
    assert_eq!(a.unwrap(), 3);
    assert_eq!(b.unwrap(), 30);
}

#[tokio::test]
async fn test_tcp_with_json_codec() {
    let (server, _heard) = scenario_server();
    let config = TransportConfig {
        codec: CodecKind::Json,
        ..TransportConfig::default()
    };
    let addr = server
        .listen_tcp_with_config("127.0.0.1:0", config.clone())
        .await
        .unwrap();

    let client = Client::tcp_with_config(addr.to_string(), config);
    client.connect().await.unwrap();
    run_call_scenarios(&client).await;
}

#[tokio::test]
async fn test_tcp_per_chunk_framing() {
    let (server, _heard) = scenario_server();
    let config = TransportConfig {
        frame_mode: FrameMode::PerChunk,
        ..TransportConfig::default()
    };
    let addr = server
        .listen_tcp_with_config("127.0.0.1:0", config.clone())
        .await
        .unwrap();

    // One call at a time, so every read holds exactly one frame.
    let client = Client::tcp_with_config(addr.to_string(), config);
    client.connect().await.unwrap();
    run_call_scenarios(&client).await;
}

#[tokio::test]
async fn test_serve_adds_methods_while_listening() {
    let (server, _heard) = scenario_server();
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();
    let client = Client::tcp(addr.to_string());
    client.connect().await.unwrap();

    let err = within(client.call("late", vec![])).await.unwrap_err();
    assert!(matches!(err, CallError::NoMethod(_)));

    server.serve(Handlers::new().sync_method("late", |_| Ok(Value::from(true))));
    let value = within(client.call("late", vec![])).await.unwrap();
    assert_eq!(value, Value::from(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_notifies_are_handled_in_send_order() {
    init_tracing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let server = Server::new(Handlers::new().sync_method("push", move |params| {
        let n = params[0].as_i64().ok_or_else(|| Value::from("not an int"))?;
        log.lock().unwrap().push(n);
        Ok(Value::Nil)
    }));
    let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();
    let client = Client::tcp(addr.to_string());
    client.connect().await.unwrap();

    for i in 0..2000 {
        client.notify("push", vec![Value::from(i)]).unwrap();
    }
    within(async {
        while seen.lock().unwrap().len() < 2000 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert_eq!(*seen.lock().unwrap(), (0..2000).collect::<Vec<i64>>());
}

// =========================================================================
// Unix domain sockets
// =========================================================================

#[cfg(unix)]
mod unix {
    use super::*;

    fn socket_path(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir()
            .join(format!("packwire-rpc-{}-{name}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn test_unix_scenarios() {
        let path = socket_path("scenarios");
        let (server, mut heard) = scenario_server();
        server.listen_unix(&path).await.unwrap();
        assert_eq!(server.local_addr(), None);

        let client = Client::unix(&path);
        client.connect().await.unwrap();
        run_call_scenarios(&client).await;

        client.notify_typed("say", "over unix").unwrap();
        assert_eq!(within(heard.recv()).await.unwrap(), "over unix");

        client.close();
        server.close();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unix_listen_on_existing_path() {
        let path = socket_path("taken");
        let (server, _heard) = scenario_server();
        server.listen_unix(&path).await.unwrap();

        let (other, _heard) = scenario_server();
        let err = other.listen_unix(&path).await.unwrap_err();
        assert!(matches!(
            err,
            PackwireError::Transport(TransportError::AddressInUse(_))
        ));

        // The first server still owns the socket.
        let client = Client::unix(&path);
        client.connect().await.unwrap();
        assert_eq!(
            within(client.call("hello", vec![])).await.unwrap(),
            Value::from("world")
        );
        server.close();
    }
}

// =========================================================================
// UDP
// =========================================================================

#[tokio::test]
async fn test_udp_scenarios() {
    let (server, mut heard) = scenario_server();
    let addr = server.listen_udp("127.0.0.1:0").await.unwrap();

    let client = Client::udp(addr.to_string());
    client.connect().await.unwrap();

    // E: a Notify reaches the handler and the client never waits.
    client.notify("say", vec![Value::from("hi")]).unwrap();
    assert_eq!(client.session().pending_calls(), 0);
    assert_eq!(within(heard.recv()).await.unwrap(), "hi");

    run_call_scenarios(&client).await;

    client.close();
    server.close();
}

#[tokio::test]
async fn test_udp_call_with_timeout() {
    init_tracing();
    let server = Server::new(Handlers::new().method("hang", |_| async move {
        std::future::pending::<()>().await;
        Ok(Value::Nil)
    }));
    let addr = server.listen_udp("127.0.0.1:0").await.unwrap();

    let client = Client::udp(addr.to_string());
    client.connect().await.unwrap();
    let err = client
        .call_with_timeout("hang", vec![], Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::TimedOut(_)));
    assert_eq!(client.session().pending_calls(), 0);
}
