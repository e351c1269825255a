//! `FilteredStream` against a local HTTP upstream.
//!
//! Each test binds a `TcpListener` on loopback, answers a single request
//! with hand-written HTTP, and points the client at it with
//! [`FilteredStream::with_endpoint`].

#![allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::time::Duration;

use tally_core::TrackedOptions;
use tally_stream::{EventSource, FilteredStream, OAuthCredentials, StreamError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const STREAMING_HEAD: &str = "HTTP/1.1 200 OK\r\n\
                              Content-Type: application/json\r\n\
                              Transfer-Encoding: chunked\r\n\r\n";

const STALL_TIMEOUT: Duration = Duration::from_secs(90);

struct Upstream {
    endpoint: String,
    request: oneshot::Receiver<String>,
}

/// Encode `data` as one HTTP/1.1 body chunk.
fn chunk(data: &str) -> String {
    format!("{:x}\r\n{data}\r\n", data.len())
}

fn status_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Read one request: headers plus a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0_u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);

        if let Some(head_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&raw[..head_end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map_or(0, |value| value.trim().parse::<usize>().unwrap());
            if raw.len() >= head_end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8(raw).unwrap()
}

/// Serve one connection: write `head`, then each of `parts` with a short
/// pause between them. With `hold` the socket stays open afterwards.
async fn upstream(head: String, parts: Vec<String>, hold: bool) -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let _ = tx.send(request);

        socket.write_all(head.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        for part in parts {
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(part.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        }
        if hold {
            std::future::pending::<()>().await;
        }
    });

    Upstream {
        endpoint: format!("http://{addr}/1.1/statuses/filter.json"),
        request: rx,
    }
}

fn client(endpoint: &str) -> FilteredStream {
    let credentials = OAuthCredentials {
        consumer_key: "ck".to_owned(),
        consumer_secret: "cs".to_owned(),
        access_token: "at".to_owned(),
        access_secret: "as".to_owned(),
    };
    let options = TrackedOptions::new(["Messi", "Suarez"]).unwrap();
    FilteredStream::new(credentials, &options, STALL_TIMEOUT)
        .unwrap()
        .with_endpoint(endpoint)
}

#[tokio::test]
async fn lines_split_across_chunks_are_rejoined() {
    let upstream = upstream(
        STREAMING_HEAD.to_owned(),
        vec![
            chunk("{\"text\":\"I love Me"),
            chunk("ssi\"}\r\n\r\n{\"text\":\"Suarez and Messi\"}\r\n"),
            "0\r\n\r\n".to_owned(),
        ],
        false,
    )
    .await;
    let mut stream = client(&upstream.endpoint);

    stream.connect().await.unwrap();
    assert_eq!(stream.next_text().await.unwrap().as_deref(), Some("I love Messi"));
    assert_eq!(
        stream.next_text().await.unwrap().as_deref(),
        Some("Suarez and Messi")
    );
    assert_eq!(stream.next_text().await.unwrap(), None);

    let request = upstream.request.await.unwrap();
    assert!(request.starts_with("POST /1.1/statuses/filter.json HTTP/1.1\r\n"));
    assert!(
        request
            .to_ascii_lowercase()
            .contains("authorization: oauth oauth_consumer_key=\"ck\"")
    );
    assert!(request.ends_with("stall_warnings=true&track=Messi%2CSuarez"));
}

#[tokio::test]
async fn disconnect_notice_closes_the_connection() {
    let upstream = upstream(
        STREAMING_HEAD.to_owned(),
        vec![chunk(
            "{\"disconnect\":{\"code\":7,\"stream_name\":\"x\",\"reason\":\"admin logout\"}}\r\n",
        )],
        true,
    )
    .await;
    let mut stream = client(&upstream.endpoint);
    stream.connect().await.unwrap();

    let err = stream.next_text().await.unwrap_err();
    match &err {
        StreamError::Disconnected(reason) => assert!(reason.contains("admin logout")),
        other => panic!("expected a disconnect, got {other:?}"),
    }
    assert!(err.is_transient());

    // the response was dropped along with the notice
    assert!(matches!(
        stream.next_text().await.unwrap_err(),
        StreamError::NotConnected
    ));
}

#[tokio::test]
async fn silent_upstream_is_reported_as_stalled() {
    let upstream = upstream(STREAMING_HEAD.to_owned(), Vec::new(), true).await;
    let mut stream = client(&upstream.endpoint);
    stream.connect().await.unwrap();

    // nothing else is scheduled, so paused time jumps straight to the timeout
    tokio::time::pause();
    let err = stream.next_text().await.unwrap_err();
    assert!(matches!(err, StreamError::Stalled { timeout_secs: 90 }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn rate_limits_and_server_errors_are_retryable_connect_failures() {
    for status in [
        "420 Enhance Your Calm",
        "429 Too Many Requests",
        "503 Service Unavailable",
    ] {
        let upstream = upstream(status_response(status, "slow down"), Vec::new(), false).await;
        let mut stream = client(&upstream.endpoint);

        let err = stream.connect().await.unwrap_err();
        match &err {
            StreamError::Connect(message) => {
                assert!(message.contains(&status[..3]), "{message}");
                assert!(message.contains("slow down"), "{message}");
            }
            other => panic!("expected a connect failure for {status}, got {other:?}"),
        }
        assert!(err.is_transient());
    }
}

#[tokio::test]
async fn unauthorized_is_a_rejection() {
    let upstream = upstream(
        status_response("401 Unauthorized", "Unauthorized"),
        Vec::new(),
        false,
    )
    .await;
    let mut stream = client(&upstream.endpoint);

    let err = stream.connect().await.unwrap_err();
    match &err {
        StreamError::Rejected { status, body } => {
            assert_eq!(*status, 401);
            assert_eq!(body, "Unauthorized");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(!err.is_transient());
}
