//! Routing mock serving both the Steam store and GitHub endpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub delay: Option<Duration>,
}

impl Route {
    pub fn json(body: &str) -> Self {
        Self {
            status: 200,
            body: body.as_bytes().to_vec(),
            delay: None,
        }
    }

    pub fn bytes(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: b"{}".to_vec(),
            delay: None,
        }
    }

    /// Holds the response back for `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Matches the full request target first, then the path alone. `{base}`
/// in bodies is replaced with the server URL.
pub struct MockServer {
    pub base: String,
    pub requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());

        let routes: HashMap<String, Route> = routes
            .into_iter()
            .map(|(target, mut route)| {
                if let Ok(text) = String::from_utf8(route.body.clone()) {
                    route.body = text.replace("{base}", &base).into_bytes();
                }
                (target.to_string(), route)
            })
            .collect();
        let routes = Arc::new(routes);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let target = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    log.lock().unwrap().push(target.clone());

                    let path = target.split('?').next().unwrap_or("/");
                    let route = routes
                        .get(&target)
                        .or_else(|| routes.get(path))
                        .cloned()
                        .unwrap_or_else(|| Route::status(404));
                    if let Some(delay) = route.delay {
                        tokio::time::sleep(delay).await;
                    }

                    let head = format!(
                        "HTTP/1.1 {} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        route.status,
                        route.body.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(&route.body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            base,
            requests,
            handle,
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn manifest_body() -> Vec<u8> {
    let mut body = depotsync_github::parse::MANIFEST_MAGIC.to_vec();
    body.extend_from_slice(b"manifest payload");
    body
}

pub fn branch_json(repo: &str, commit: &str, tree_sha: &str, date: &str) -> String {
    format!(
        r#"{{"name":"480","commit":{{"sha":"{commit}","commit":{{"committer":{{"date":"{date}"}},"tree":{{"sha":"{tree_sha}","url":"{{base}}/repos/{repo}/git/trees/{tree_sha}"}}}}}}}}"#
    )
}

pub fn tree_json(paths: &[&str]) -> String {
    let entries: Vec<String> = paths
        .iter()
        .map(|p| format!(r#"{{"path":"{p}","type":"blob","sha":"x"}}"#))
        .collect();
    format!(r#"{{"sha":"t","tree":[{}],"truncated":false}}"#, entries.join(","))
}
