//! Shared helpers for integration tests: a scripted HTTP server and a
//! fixture tree builder.
#![allow(dead_code)] // Not every test binary uses every helper.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One scripted HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: "ok".to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Minimal scripted HTTP server. Each path maps to a response sequence;
/// requests beyond the sequence repeat the last response, unknown paths get
/// a 404. Request counts per path are recorded.
pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(routes: HashMap<String, Vec<Response>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::new(routes);

        let hits_accept = Arc::clone(&hits);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&hits_accept);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let path = request
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .to_string();

                    let hit_count = {
                        let mut guard = hits.lock().expect("hits lock");
                        let count = guard.entry(path.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };

                    let response = routes
                        .get(&path)
                        .and_then(|seq| seq.get((hit_count - 1).min(seq.len().saturating_sub(1))))
                        .cloned()
                        .unwrap_or_else(|| Response::status(404));

                    let reason = match response.status {
                        200 => "OK",
                        301 => "Moved Permanently",
                        404 => "Not Found",
                        429 => "Too Many Requests",
                        503 => "Service Unavailable",
                        _ => "Unknown",
                    };
                    let mut out = format!(
                        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                        response.status,
                        reason,
                        response.body.len()
                    );
                    for (name, value) in &response.headers {
                        out.push_str(&format!("{}: {}\r\n", name, value));
                    }
                    out.push_str("\r\n");
                    out.push_str(&response.body);
                    let _ = socket.write_all(out.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            addr,
            hits,
            accept_task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of requests observed for the path.
    pub fn hits(&self, path: &str) -> usize {
        *self.hits.lock().expect("hits lock").get(path).unwrap_or(&0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Write a fixture file, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture dirs");
    }
    std::fs::write(&path, content).expect("write fixture");
    path
}
