#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock HTTP origin for fetch testing
//!
//! Serves a deterministic payload at `/audio` (honouring `Range: bytes=N-`),
//! the first half of it followed by a broken connection at `/truncated`,
//! a server error at `/error` and a few PLS playlists. Every other path is
//! a 404.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Size of the `/audio` payload
pub const AUDIO_LEN: usize = 1 << 20;

/// First entry of the `/radio.pls` and `/plain.pls` playlists
pub const PLS_STREAM: &str = "http://stream.example/live";

const PLS_BODY: &str = "[playlist]\nNumberOfEntries=2\nFile1=http://stream.example/live\nTitle1=Live\nFile2=http://stream.example/backup\nVersion=2\n";

pub fn audio_payload() -> Vec<u8> {
    (0..AUDIO_LEN).map(|i| (i % 251) as u8).collect()
}

pub struct MockHttpServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockHttpServer {
    /// Start the origin on a random port
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/audio", get(audio_handler))
            .route("/truncated", get(truncated_handler))
            .route("/error", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route(
                "/radio.pls",
                get(|| async { ([(header::CONTENT_TYPE, "audio/x-scpls")], PLS_BODY) }),
            )
            .route(
                "/plain.pls",
                get(|| async { ([(header::CONTENT_TYPE, "text/plain")], PLS_BODY) }),
            )
            .route(
                "/empty.pls",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "audio/x-scpls")],
                        "[playlist]\nNumberOfEntries=0\n",
                    )
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

/// A local port nothing listens on
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A URL nothing listens on
pub fn unreachable_url() -> String {
    format!("http://127.0.0.1:{}/audio", unused_port())
}

async fn audio_handler(headers: HeaderMap) -> Response {
    let data = audio_payload();
    let offset = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.trim_end_matches('-').parse::<usize>().ok());

    match offset {
        Some(offset) => (
            StatusCode::PARTIAL_CONTENT,
            [(header::CONTENT_TYPE, "audio/wav")],
            data[offset.min(data.len())..].to_vec(),
        )
            .into_response(),
        None => (StatusCode::OK, [(header::CONTENT_TYPE, "audio/wav")], data).into_response(),
    }
}

async fn truncated_handler() -> Response {
    let mut data = audio_payload();
    data.truncate(AUDIO_LEN / 2);
    let head = futures::stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(data)) });
    // Give the headers and the first half time to reach the client
    let broken = futures::stream::once(async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "origin went away",
        ))
    });
    (
        [(header::CONTENT_TYPE, "audio/wav")],
        Body::from_stream(head.chain(broken)),
    )
        .into_response()
}
