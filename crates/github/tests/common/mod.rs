//! Routing mock of the GitHub API and raw host for integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Canned response. `{base}` in the body is replaced with the server URL.
#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn json(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn bytes(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: b"{}".to_vec(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Mock server. Requests are matched on the full target first, then on
/// the path alone; anything else gets a 404.
pub struct MockGitHub {
    pub base: String,
    pub requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockGitHub {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());

        let routes: HashMap<String, Route> = routes
            .into_iter()
            .map(|(target, mut route)| {
                if let Ok(text) = String::from_utf8(route.body.clone()) {
                    route.body = text.replace("{base}", &base).into_bytes();
                }
                for (_, value) in &mut route.headers {
                    *value = value.replace("{base}", &base);
                }
                (target.to_string(), route)
            })
            .collect();
        let routes = Arc::new(routes);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
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

                    let headers: String = route
                        .headers
                        .iter()
                        .map(|(k, v)| format!("{k}: {v}\r\n"))
                        .collect();
                    let head = format!(
                        "HTTP/1.1 {} Mock\r\n{headers}Content-Length: {}\r\nConnection: close\r\n\r\n",
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

    pub fn requested(&self, target: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == target)
            .count()
    }
}

impl Drop for MockGitHub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A manifest body with the payload magic.
pub fn manifest_body() -> Vec<u8> {
    let mut body = depotsync_github::parse::MANIFEST_MAGIC.to_vec();
    body.extend_from_slice(b"manifest payload");
    body
}

/// Branch response pointing at tree `tree_sha` of `repo`.
pub fn branch_json(repo: &str, commit: &str, tree_sha: &str, date: &str) -> String {
    format!(
        r#"{{"name":"480","commit":{{"sha":"{commit}","commit":{{"committer":{{"date":"{date}"}},"tree":{{"sha":"{tree_sha}","url":"{{base}}/repos/{repo}/git/trees/{tree_sha}"}}}}}}}}"#
    )
}

/// Recursive tree listing with the given blob paths.
pub fn tree_json(paths: &[&str]) -> String {
    let entries: Vec<String> = paths
        .iter()
        .map(|p| format!(r#"{{"path":"{p}","type":"blob","sha":"x"}}"#))
        .collect();
    format!(r#"{{"sha":"t","tree":[{}],"truncated":false}}"#, entries.join(","))
}
