//! Intake API client.

use anyhow::{Context, Result};
use nodegate_common::constants::CLIENT_TIMEOUT_SECS;
use nodegate_common::{AddressBlock, DeleteRequest, DeleteResponse, ErrorBody, RegisterRequest};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// HTTP client for one Intake API endpoint
#[derive(Debug, Clone)]
pub struct IntakeClient {
    client: reqwest::Client,
    base_url: String,
}

impl IntakeClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", host, port),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AddressBlock> {
        self.post("/register", request).await
    }

    pub async fn delete(&self, request: &DeleteRequest) -> Result<DeleteResponse> {
        self.post("/delete", request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach intake API at {}", url))?;

        if !response.status().is_success() {
            return Err(handle_error_response(response).await);
        }

        response
            .json()
            .await
            .with_context(|| format!("Malformed response from {}", url))
    }
}

/// A non-2xx answer from the Intake API
#[derive(Debug, Error)]
#[error("HTTP {status}: {summary}")]
pub struct Rejection {
    pub status: u16,
    /// Response body as received
    pub body: String,
    summary: String,
}

impl Rejection {
    fn new(status: reqwest::StatusCode, body: String) -> Self {
        let summary = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => format!("{} - {}", err.error, err.detail.unwrap_or_default()),
            Err(_) if body.trim().is_empty() => "request failed".to_string(),
            Err(_) => body.trim().to_string(),
        };

        Self {
            status: status.as_u16(),
            body,
            summary,
        }
    }

    /// The body when it is JSON, else an `ErrorBody` describing the rejection
    pub fn json_body(&self) -> String {
        if serde_json::from_str::<serde_json::Value>(&self.body).is_ok() {
            return self.body.trim().to_string();
        }
        let body = ErrorBody {
            error: format!("http_{}", self.status),
            detail: Some(self.summary.clone()),
        };
        serde_json::to_string(&body).unwrap_or_default()
    }
}

/// Error for a non-2xx response. Keeps the body when it is not an `ErrorBody`.
async fn handle_error_response(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Rejection::new(status, text).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodegate_common::Role;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer a single request with `status` and `body`, returning the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (port, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= head_end + 4 + length
    }

    #[tokio::test]
    async fn test_register_posts_body() {
        let (port, server) = serve_once(
            "200 OK",
            r#"{"role":"worker","name":"w1","globalip":"203.0.113.7","cidr":"10.244.1.0/24","clasterip":"10.244.1.0"}"#,
        )
        .await;

        let client = IntakeClient::new("127.0.0.1", port).unwrap();
        let request = RegisterRequest::new("w1", Ipv4Addr::new(203, 0, 113, 7), Role::Worker, "tok");
        let block = client.register(&request).await.unwrap();
        assert_eq!(block.cidr.to_string(), "10.244.1.0/24");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /register "));
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["node"]["hostname"], "w1");
        assert_eq!(sent["node"]["role"], "worker");
        assert_eq!(sent["token"], "tok");
    }

    #[tokio::test]
    async fn test_error_body_is_reported() {
        let (port, _server) = serve_once(
            "401 Unauthorized",
            r#"{"error":"unauthorized","detail":"Unauthorized: invalid token"}"#,
        )
        .await;

        let client = IntakeClient::new("127.0.0.1", port).unwrap();
        let err = client
            .delete(&DeleteRequest::new("w1", Role::Worker, "bad"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("401"), "{}", message);
        assert!(message.contains("unauthorized"), "{}", message);

        let rejection = err.downcast_ref::<Rejection>().unwrap();
        assert_eq!(rejection.status, 401);
        let body: ErrorBody = serde_json::from_str(&rejection.json_body()).unwrap();
        assert_eq!(body.error, "unauthorized");
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_body() {
        let (port, _server) = serve_once(
            "500 Internal Server Error",
            r#"{"status":"ok","node":"w1","node_removed":false,"released_from":["worker"]}"#,
        )
        .await;

        let client = IntakeClient::new("127.0.0.1", port).unwrap();
        let err = client
            .delete(&DeleteRequest::new("w1", Role::Worker, "tok"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("\"node_removed\":false"));

        let rejection = err.downcast_ref::<Rejection>().unwrap();
        assert_eq!(rejection.status, 500);
        let body: DeleteResponse = serde_json::from_str(&rejection.json_body()).unwrap();
        assert!(!body.node_removed);
    }

    #[tokio::test]
    async fn test_plain_text_rejection_becomes_error_body() {
        let (port, _server) = serve_once("502 Bad Gateway", "upstream down").await;

        let client = IntakeClient::new("127.0.0.1", port).unwrap();
        let err = client
            .delete(&DeleteRequest::new("w1", Role::Worker, "tok"))
            .await
            .unwrap_err();

        let rejection = err.downcast_ref::<Rejection>().unwrap();
        let body: ErrorBody = serde_json::from_str(&rejection.json_body()).unwrap();
        assert_eq!(body.error, "http_502");
        assert_eq!(body.detail.as_deref(), Some("upstream down"));
    }
}
