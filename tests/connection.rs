use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use resp_bridge::codec::Reader;
use resp_bridge::parser::{DecodeEngine, ReaderOptions};
use resp_bridge::{Connection, ConnectionConfig, Error, Frame, State};

enum Step {
    Reply(&'static [u8]),
    /// Built at runtime, for replies too large to spell out.
    Generated(Vec<u8>),
    /// Sent after a pause.
    Delayed(Duration, &'static [u8]),
    /// Sent in pieces with a pause in between.
    Chunked(Vec<&'static [u8]>),
    /// Sent, then the connection is dropped.
    HangUp(&'static [u8]),
}

struct FakeServer {
    port: u16,
    commands: UnboundedReceiver<Vec<String>>,
    accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port)
    }

    async fn next_command(&mut self) -> Vec<String> {
        self.commands.recv().await.unwrap()
    }
}

/// Accepts connections one after another and answers each command it receives with the next
/// step of the script. Connections are dropped once the script runs out.
async fn spawn_server(script: Vec<Step>) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let accepted = accepted.clone();
        async move {
            let mut script = script.into_iter();
            while let Ok((mut socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let mut reader = Reader::new(ReaderOptions::default());
                let mut buf = [0u8; 1024];

                'commands: loop {
                    let frame = loop {
                        if let Some(frame) = reader.try_get_reply().unwrap() {
                            break frame;
                        }
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break 'commands;
                        }
                        reader.feed(&buf[..n]);
                    };
                    let _ = commands_tx.send(command_args(frame));

                    match script.next() {
                        Some(Step::Reply(bytes)) => socket.write_all(bytes).await.unwrap(),
                        Some(Step::Generated(bytes)) => socket.write_all(&bytes).await.unwrap(),
                        Some(Step::Delayed(delay, bytes)) => {
                            tokio::time::sleep(delay).await;
                            // The client may have given up on this connection already.
                            let _ = socket.write_all(bytes).await;
                        }
                        Some(Step::Chunked(parts)) => {
                            for part in parts {
                                socket.write_all(part).await.unwrap();
                                // Simulate a delay in sending/receiving the data.
                                tokio::time::sleep(Duration::from_millis(50)).await;
                            }
                        }
                        Some(Step::HangUp(bytes)) => {
                            socket.write_all(bytes).await.unwrap();
                            break 'commands;
                        }
                        None => break 'commands,
                    }
                }
            }
        }
    });

    FakeServer {
        port,
        commands,
        accepted,
    }
}

fn command_args(frame: Frame) -> Vec<String> {
    match frame {
        Frame::Array(parts) => parts
            .into_iter()
            .map(|part| match part {
                Frame::Bulk(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                other => panic!("expected bulk string, got {:?}", other),
            })
            .collect(),
        other => panic!("expected array, got {:?}", other),
    }
}

#[tokio::test]
async fn test_set_and_get() {
    let mut server =
        spawn_server(vec![Step::Reply(b"+OK\r\n"), Step::Reply(b"$5\r\nhello\r\n")]).await;
    let mut conn = Connection::new(server.config());

    let set = conn.execute(["SET", "mykey", "hello"]).await.unwrap();
    let get = conn.execute(["GET", "mykey"]).await.unwrap();

    assert_eq!(set, Frame::Simple("OK".to_string()));
    assert_eq!(get, Frame::Bulk(Bytes::from("hello")));
    assert_eq!(server.next_command().await, vec!["SET", "mykey", "hello"]);
    assert_eq!(server.next_command().await, vec!["GET", "mykey"]);
    assert_eq!(conn.state(), State::Ready);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_auth_and_select_before_first_command() {
    let mut server = spawn_server(vec![
        Step::Reply(b"+OK\r\n"),
        Step::Reply(b"+OK\r\n"),
        Step::Reply(b"$-1\r\n"),
    ])
    .await;
    let config = ConnectionConfig {
        password: Some("secret".to_string()),
        db: 2,
        ..server.config()
    };
    let mut conn = Connection::new(config);

    let reply = conn.execute(["GET", "missing"]).await.unwrap();

    assert_eq!(reply, Frame::Null);
    assert_eq!(server.next_command().await, vec!["AUTH", "secret"]);
    assert_eq!(server.next_command().await, vec!["SELECT", "2"]);
    assert_eq!(server.next_command().await, vec!["GET", "missing"]);
}

#[tokio::test]
async fn test_auth_rejected() {
    let server = spawn_server(vec![Step::Reply(b"-ERR invalid password\r\n")]).await;
    let config = ConnectionConfig {
        password: Some("wrong".to_string()),
        ..server.config()
    };
    let mut conn = Connection::new(config);

    let err = conn.connect().await.unwrap_err();

    assert!(matches!(err, Error::Authentication(ref msg) if msg == "ERR invalid password"));
    assert_eq!(conn.state(), State::Disconnected);
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_select_rejected() {
    let server = spawn_server(vec![Step::Reply(b"-ERR DB index is out of range\r\n")]).await;
    let config = ConnectionConfig {
        db: 99,
        ..server.config()
    };
    let mut conn = Connection::new(config);

    let err = conn.connect().await.unwrap_err();

    assert!(matches!(err, Error::Connection(ref msg) if msg == "Invalid Database"));
    assert_eq!(conn.state(), State::Disconnected);
}

#[tokio::test]
async fn test_error_reply_keeps_connection() {
    let mut server = spawn_server(vec![
        Step::Reply(b"-ERR unknown command 'FOO'\r\n"),
        Step::Reply(b"+PONG\r\n"),
    ])
    .await;
    let mut conn = Connection::new(server.config());

    let err = conn.execute(["FOO"]).await.unwrap_err();
    let pong = conn.execute(["PING"]).await.unwrap();

    assert!(matches!(err, Error::Response(ref msg) if msg == "ERR unknown command 'FOO'"));
    assert!(!err.is_fatal());
    assert_eq!(pong, Frame::Simple("PONG".to_string()));
    assert_eq!(server.next_command().await, vec!["FOO"]);
    assert_eq!(server.next_command().await, vec!["PING"]);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nested_error_is_a_value() {
    let server = spawn_server(vec![Step::Reply(b"*2\r\n+OK\r\n-ERR nested\r\n")]).await;
    let mut conn = Connection::new(server.config());

    let reply = conn.execute(["EXEC"]).await.unwrap();

    assert_eq!(
        reply,
        Frame::Array(vec![
            Frame::Simple("OK".to_string()),
            Frame::Error("ERR nested".to_string())
        ])
    );
}

#[tokio::test]
async fn test_reply_split_across_writes() {
    let server = spawn_server(vec![Step::Chunked(vec![
        &b"*3\r\n$3\r\nSE"[..],
        &b"T\r\n$5\r\nmyke"[..],
        &b"y\r\n$7\r\nmyvalue\r\n"[..],
    ])])
    .await;
    let mut conn = Connection::new(server.config());

    let reply = conn.execute(["LRANGE", "list", "0", "-1"]).await.unwrap();

    assert_eq!(
        reply,
        Frame::Array(vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("mykey")),
            Frame::Bulk(Bytes::from("myvalue")),
        ])
    );
}

#[tokio::test]
async fn test_binary_bulk_with_line_terminators() {
    let server = spawn_server(vec![Step::Reply(b"$8\r\na\r\nb\r\n\x00\xff\r\n")]).await;
    let mut conn = Connection::new(server.config());

    let reply = conn.execute(["GET", "bin"]).await.unwrap();

    assert_eq!(reply, Frame::Bulk(Bytes::from_static(b"a\r\nb\r\n\x00\xff")));
}

#[tokio::test]
async fn test_closed_mid_reply_then_reconnect() {
    let mut server = spawn_server(vec![
        Step::Reply(b"+OK\r\n"),
        Step::HangUp(b"$10\r\nhel"),
        Step::Reply(b"+OK\r\n"),
        Step::Reply(b"+PONG\r\n"),
    ])
    .await;
    let config = ConnectionConfig {
        password: Some("secret".to_string()),
        ..server.config()
    };
    let mut conn = Connection::new(config);

    let err = conn.execute(["GET", "key"]).await.unwrap_err();

    assert!(matches!(err, Error::Connection(ref msg) if msg == "Socket closed on remote end"));
    assert_eq!(conn.state(), State::Disconnected);

    let pong = conn.execute(["PING"]).await.unwrap();

    assert_eq!(pong, Frame::Simple("PONG".to_string()));
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
    assert_eq!(server.next_command().await, vec!["AUTH", "secret"]);
    assert_eq!(server.next_command().await, vec!["GET", "key"]);
    assert_eq!(server.next_command().await, vec!["AUTH", "secret"]);
    assert_eq!(server.next_command().await, vec!["PING"]);
}

#[tokio::test]
async fn test_connect_is_a_no_op_when_connected() {
    let server = spawn_server(vec![Step::Reply(b"+PONG\r\n")]).await;
    let mut conn = Connection::new(server.config());

    conn.connect().await.unwrap();
    conn.connect().await.unwrap();
    conn.execute(["PING"]).await.unwrap();

    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", port));

    let err = conn.execute(["PING"]).await.unwrap_err();

    let msg = match err {
        Error::Connection(msg) => msg,
        other => panic!("expected a connection error, got {:?}", other),
    };
    assert!(msg.starts_with("Error "));
    assert!(msg.contains(&format!("connecting 127.0.0.1:{}. ", port)));
    assert!(!msg.contains("os error"));
    assert!(msg.ends_with('.'));
    assert_eq!(conn.state(), State::Disconnected);
}

#[tokio::test]
async fn test_read_timeout_disconnects() {
    // Accepts and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });
    let config = ConnectionConfig {
        socket_timeout: Some(Duration::from_millis(100)),
        ..ConnectionConfig::new("127.0.0.1", port)
    };
    let mut conn = Connection::new(config);

    let err = conn.execute(["BLPOP", "list", "0"]).await.unwrap_err();

    assert!(matches!(err, Error::Connection(ref msg) if msg == "Timeout reading from socket"));
    assert_eq!(conn.state(), State::Disconnected);
}

#[tokio::test]
async fn test_decode_responses() {
    let server = spawn_server(vec![Step::Reply(b"*2\r\n$6\r\nh\xc3\xa9llo\r\n:1\r\n")]).await;
    let config = ConnectionConfig {
        decode_responses: true,
        ..server.config()
    };
    let mut conn = Connection::new(config);

    let reply = conn.execute(["LRANGE", "l", "0", "-1"]).await.unwrap();

    assert_eq!(
        reply,
        Frame::Array(vec![Frame::Text("héllo".to_string()), Frame::Integer(1)])
    );
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server = spawn_server(vec![Step::Reply(b"+PONG\r\n")]).await;
    let mut conn = Connection::new(server.config());

    conn.disconnect();
    conn.disconnect();
    assert_eq!(conn.state(), State::Disconnected);

    conn.execute(["PING"]).await.unwrap();
    conn.disconnect();
    conn.disconnect();

    assert_eq!(conn.state(), State::Disconnected);
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_large_reply() {
    let elements = 20_000;
    let mut reply = format!("*{}\r\n", elements).into_bytes();
    for i in 0..elements {
        let value = format!("value-{}", i);
        reply.extend_from_slice(format!("${}\r\n{}\r\n", value.len(), value).as_bytes());
    }
    let server = spawn_server(vec![Step::Generated(reply), Step::Reply(b"+PONG\r\n")]).await;
    let mut conn = Connection::new(server.config());

    let reply = conn.execute(["LRANGE", "list", "0", "-1"]).await.unwrap();

    let frames = match reply {
        Frame::Array(frames) => frames,
        other => panic!("expected an array, got {:?}", other),
    };
    assert_eq!(frames.len(), elements);
    assert_eq!(frames[0], Frame::Bulk(Bytes::from("value-0")));
    assert_eq!(
        frames[elements - 1],
        Frame::Bulk(Bytes::from(format!("value-{}", elements - 1)))
    );

    let pong = conn.execute(["PING"]).await.unwrap();

    assert_eq!(pong, Frame::Simple("PONG".to_string()));
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_command_does_not_leak_its_reply() {
    let mut server = spawn_server(vec![
        Step::Delayed(Duration::from_millis(200), b"*2\r\n:1\r\n:2\r\n"),
        Step::Reply(b"$5\r\nhello\r\n"),
    ])
    .await;
    let mut conn = Connection::new(server.config());

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        conn.execute(["LRANGE", "list", "0", "-1"]),
    )
    .await;

    assert!(result.is_err());
    assert!(!conn.is_connected());

    let reply = conn.execute(["GET", "k"]).await.unwrap();

    assert_eq!(reply, Frame::Bulk(Bytes::from("hello")));
    assert_eq!(conn.state(), State::Ready);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
    assert_eq!(server.next_command().await, vec!["LRANGE", "list", "0", "-1"]);
    assert_eq!(server.next_command().await, vec!["GET", "k"]);
}
