//! Integration tests for the stream and datagram transports.
//!
//! These spin up real sockets on ephemeral ports (or temporary socket
//! paths) and check that frames flow both ways, with plain handler structs
//! standing in for the session and dispatcher layers.

use std::sync::Arc;
use std::time::Duration;

use packwire_protocol::{Codec, CodecKind, Message, MsgId, Value};
use packwire_transport::{
    ClientTransport, RequestHandler, Responder, ResponseHandler, ServerTransport,
    TcpClient, TcpServer, TransportConfig, TransportError, UdpClient, UdpServer,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

/// Answers every Request with its own params and records every Notify.
struct Echo {
    notes: mpsc::UnboundedSender<(String, Vec<Value>)>,
}

impl RequestHandler for Echo {
    fn on_request(
        &self,
        id: MsgId,
        _method: String,
        params: Vec<Value>,
        responder: Responder,
    ) {
        responder
            .send(Message::response(id, Ok(Value::Array(params))))
            .expect("peer should still be there");
    }

    fn on_notify(&self, method: String, params: Vec<Value>) {
        let _ = self.notes.send((method, params));
    }
}

/// Forwards every Response into a channel.
struct Collect(mpsc::UnboundedSender<(MsgId, Value, Value)>);

impl ResponseHandler for Collect {
    fn on_response(&self, id: MsgId, error: Value, result: Value) {
        let _ = self.0.send((id, error, result));
    }
}

fn echo() -> (Arc<Echo>, mpsc::UnboundedReceiver<(String, Vec<Value>)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Echo { notes: tx }), rx)
}

fn collect() -> (Arc<Collect>, mpsc::UnboundedReceiver<(MsgId, Value, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collect(tx)), rx)
}

fn frame(message: Message) -> Vec<u8> {
    message.encode(&CodecKind::Msgpack).unwrap()
}

async fn within<T>(fut: impl std::future::Future<Output = Option<T>>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
        .expect("channel closed")
}

// =========================================================================
// TCP
// =========================================================================

#[tokio::test]
async fn test_tcp_request_response_and_notify() {
    let (handler, mut notes) = echo();
    let server = TcpServer::bind("127.0.0.1:0", handler, TransportConfig::default())
        .await
        .expect("should bind");
    let addr = server.local_addr().unwrap().to_string();

    let (sink, mut responses) = collect();
    let client = TcpClient::new(addr, sink, TransportConfig::default());
    client.connect().await.expect("should connect");

    client
        .send_data(frame(Message::request(7, "echo", vec![Value::from(42)])))
        .unwrap();
    let (id, error, result) = within(responses.recv()).await;
    assert_eq!(id, 7);
    assert!(error.is_nil());
    assert_eq!(result, Value::Array(vec![Value::from(42)]));

    client
        .send_data(frame(Message::notify("say", vec![Value::from("hi")])))
        .unwrap();
    let (method, params) = within(notes.recv()).await;
    assert_eq!(method, "say");
    assert_eq!(params, vec![Value::from("hi")]);

    client.close();
    server.close();
}

#[tokio::test]
async fn test_tcp_client_send_before_connect_fails() {
    let (sink, _responses) = collect();
    let client = TcpClient::new("127.0.0.1:1", sink, TransportConfig::default());
    let err = client.send_data(vec![0x90]).unwrap_err();
    assert!(matches!(err, TransportError::NoConnection(_)));
}

#[tokio::test]
async fn test_tcp_connect_refused_then_retry() {
    // Grab a free port, then release it so nothing listens there.
    let vacant = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = vacant.local_addr().unwrap();
    drop(vacant);

    let (sink, mut responses) = collect();
    let client = TcpClient::new(addr.to_string(), sink, TransportConfig::default());
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectFailed(_)));

    let (handler, _notes) = echo();
    let server =
        TcpServer::bind(&addr.to_string(), handler, TransportConfig::default())
            .await
            .expect("port should be free again");

    client.connect().await.expect("retry should connect");
    client
        .send_data(frame(Message::request(1, "echo", vec![])))
        .unwrap();
    let (id, _, _) = within(responses.recv()).await;
    assert_eq!(id, 1);

    server.close();
}

#[tokio::test]
async fn test_tcp_server_send_without_client_fails() {
    let (handler, _notes) = echo();
    let server = TcpServer::bind("127.0.0.1:0", handler, TransportConfig::default())
        .await
        .unwrap();
    let err = server.send_data(vec![0x90]).unwrap_err();
    assert!(matches!(err, TransportError::NoConnection(_)));
    server.close();
    server.close();
}

#[tokio::test]
async fn test_tcp_server_answers_pipelined_and_split_frames() {
    let (handler, _notes) = echo();
    let server = TcpServer::bind("127.0.0.1:0", handler, TransportConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();

    // Two complete frames in one write, then a third split in half.
    let mut burst = frame(Message::request(1, "a", vec![Value::from(1)]));
    burst.extend(frame(Message::request(2, "b", vec![Value::from(2)])));
    raw.write_all(&burst).await.unwrap();

    let third = frame(Message::request(3, "c", vec![Value::from(3)]));
    let (head, tail) = third.split_at(third.len() / 2);
    raw.write_all(head).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    raw.write_all(tail).await.unwrap();

    let mut decoder = packwire_protocol::FrameDecoder::new(CodecKind::Msgpack, 1024);
    let mut ids = Vec::new();
    let mut buf = [0u8; 256];
    while ids.len() < 3 {
        let n = tokio::time::timeout(Duration::from_secs(5), raw.read(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
        assert!(n > 0, "server hung up early");
        decoder.extend(&buf[..n]);
        while let Some(Message::Response { id, .. }) = decoder.next_message().unwrap() {
            ids.push(id);
        }
    }
    assert_eq!(ids, vec![1, 2, 3]);
    server.close();
}

#[tokio::test]
async fn test_tcp_server_drops_connection_on_garbage() {
    let (handler, _notes) = echo();
    let server = TcpServer::bind("127.0.0.1:0", handler, TransportConfig::default())
        .await
        .unwrap();
    let mut raw = tokio::net::TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();

    // A valid msgpack string is not a valid RPC frame.
    let garbage = CodecKind::Msgpack.encode(&Value::from("nope")).unwrap();
    raw.write_all(&garbage).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), raw.read(&mut buf))
        .await
        .expect("timed out")
        .unwrap_or(0);
    assert_eq!(n, 0, "server should hang up on an invalid frame");
    server.close();
}

// =========================================================================
// UDP
// =========================================================================

#[tokio::test]
async fn test_udp_request_response_and_learned_peer() {
    let (handler, mut notes) = echo();
    let server = UdpServer::bind("127.0.0.1:0", handler, TransportConfig::default())
        .await
        .expect("should bind");
    let addr = server.local_addr().unwrap().to_string();
    assert!(server.peer_addr().is_none());
    assert!(matches!(
        server.send_data(vec![0x90]),
        Err(TransportError::NoConnection(_))
    ));

    let (sink, mut responses) = collect();
    let client = UdpClient::new(addr, sink, TransportConfig::default());
    assert!(client.send_data(vec![0x90]).is_err(), "not connected yet");
    client.connect().await.expect("bind should succeed");

    client
        .send_data(frame(Message::notify("say", vec![Value::from("hi")])))
        .unwrap();
    let (method, params) = within(notes.recv()).await;
    assert_eq!(method, "say");
    assert_eq!(params, vec![Value::from("hi")]);
    assert!(server.peer_addr().is_some());

    client
        .send_data(frame(Message::request(5, "echo", vec![Value::from("x")])))
        .unwrap();
    let (id, error, result) = within(responses.recv()).await;
    assert_eq!(id, 5);
    assert!(error.is_nil());
    assert_eq!(result, Value::Array(vec![Value::from("x")]));

    client.close();
    client.close();
    server.close();
}

#[tokio::test]
async fn test_udp_server_replies_only_to_first_peer() {
    let (handler, mut notes) = echo();
    let server = UdpServer::bind("127.0.0.1:0", handler, TransportConfig::default())
        .await
        .expect("should bind");
    let addr = server.local_addr().unwrap().to_string();

    let (first_sink, mut first_responses) = collect();
    let first = UdpClient::new(addr.clone(), first_sink, TransportConfig::default());
    first.connect().await.unwrap();
    first
        .send_data(frame(Message::request(1, "echo", vec![Value::from("a")])))
        .unwrap();
    let (id, _, result) = within(first_responses.recv()).await;
    assert_eq!(id, 1);
    assert_eq!(result, Value::Array(vec![Value::from("a")]));

    let learned = server.peer_addr().expect("peer learned from the first datagram");
    assert_eq!(learned.port(), first.local_addr().unwrap().port());

    let (second_sink, mut second_responses) = collect();
    let second = UdpClient::new(addr, second_sink, TransportConfig::default());
    second.connect().await.unwrap();
    second
        .send_data(frame(Message::notify("say", vec![Value::from("second")])))
        .unwrap();
    let (method, _) = within(notes.recv()).await;
    assert_eq!(method, "say");

    // Served, but the reply goes to the first peer.
    second
        .send_data(frame(Message::request(2, "echo", vec![Value::from("b")])))
        .unwrap();
    let (id, _, result) = within(first_responses.recv()).await;
    assert_eq!(id, 2);
    assert_eq!(result, Value::Array(vec![Value::from("b")]));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), second_responses.recv())
            .await
            .is_err(),
        "the second client should hear nothing"
    );
    assert_eq!(server.peer_addr(), Some(learned));

    first.close();
    second.close();
    server.close();
}

#[tokio::test]
async fn test_udp_server_closes_after_invalid_datagram() {
    let (handler, _notes) = echo();
    let server = UdpServer::bind("127.0.0.1:0", handler, TransportConfig::default())
        .await
        .expect("should bind");
    let addr = server.local_addr().unwrap();

    let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(&[0xc1], addr).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if server.peer_addr().is_some() {
                if let Err(e) = server.send_data(vec![0x90]) {
                    assert!(matches!(e, TransportError::NoConnection(_)));
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server should stop after the bad datagram");

    server.close();
}

// =========================================================================
// Unix domain sockets
// =========================================================================

#[cfg(unix)]
mod unix {
    use super::*;
    use packwire_transport::{UnixClient, UnixServer};

    fn socket_path(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir()
            .join(format!("packwire-transport-{}-{name}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn test_unix_request_response() {
        let path = socket_path("basic");
        let (handler, _notes) = echo();
        let server = UnixServer::bind(&path, handler, TransportConfig::default())
            .await
            .expect("should bind");

        let (sink, mut responses) = collect();
        let client = UnixClient::new(&path, sink, TransportConfig::default());
        client.connect().await.expect("should connect");
        client
            .send_data(frame(Message::request(9, "echo", vec![Value::from(true)])))
            .unwrap();
        let (id, _, result) = within(responses.recv()).await;
        assert_eq!(id, 9);
        assert_eq!(result, Value::Array(vec![Value::from(true)]));

        client.close();
        server.close();
        assert!(!path.exists(), "socket file should be removed on close");
    }

    #[tokio::test]
    async fn test_unix_bind_refuses_existing_path() {
        let path = socket_path("in-use");
        std::fs::write(&path, b"someone else's").unwrap();

        let (handler, _notes) = echo();
        let result = UnixServer::bind(&path, handler, TransportConfig::default()).await;
        assert!(matches!(result, Err(TransportError::AddressInUse(p)) if p == path));
        assert!(path.exists(), "existing file must be left alone");
        std::fs::remove_file(&path).unwrap();
    }
}
