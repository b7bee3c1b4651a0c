//! Helpers for testing tiercache.
//!
//! Includes a logging initializer honoring `RUST_LOG`, tempdir
//! helpers, an ephemeral [`axum`]-based HTTP server for well-formed
//! fixtures, and a raw TCP server able to produce deliberately
//! truncated HTTP bodies.

use std::net::SocketAddr;
use std::sync::Once;

use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Setup function that is only run once, even if called multiple times.
pub fn setup() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`tempfile::TempDir`] instance is
/// dropped, unless `TEST_KEEP_TEMPDIR` is set.
pub fn tempdir() -> tempfile::TempDir {
    let mut builder = tempfile::Builder::new();
    builder.prefix("tiercache-test");
    let mut tempdir = builder.tempdir().unwrap();
    if std::env::var("TEST_KEEP_TEMPDIR").is_ok() {
        tempdir.disable_cleanup(true);
    }
    tempdir
}

/// A running local HTTP server.
///
/// The server is shut down when this instance is dropped.
pub struct Server {
    pub socket: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl Server {
    /// Spawns a server for the given `axum` router on an ephemeral
    /// port.
    pub async fn with_router(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { socket, handle }
    }

    /// Spawns a raw server that answers every request with a `200`
    /// declaring `declared_len` bytes of content but sending only
    /// `body`, then closing the connection.
    pub async fn with_truncated_body(body: Vec<u8>, declared_len: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    // drain the request head before answering
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }
                    let head = format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {declared_len}\r\nconnection: close\r\n\r\n"
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { socket, handle }
    }

    /// Returns the full URL for the given path on this server.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.socket, path)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
