use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use presence_sync_core::PresencePayload;
use presence_sync_engine::PresencePublisher;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct GatewayClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl GatewayClient {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid gateway url {endpoint}"))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            bail!("gateway url must be http or https, got {}", endpoint.scheme());
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build gateway http client")?;
        Ok(Self {
            http,
            endpoint,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> Result<()> {
        let mut req = self.http.post(self.endpoint.clone()).json(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("gateway request to {} failed", self.endpoint))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("gateway responded with {status}"));
        }
        debug!(%status, "gateway accepted presence");
        Ok(())
    }
}

#[async_trait]
impl PresencePublisher for GatewayClient {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn publish(&mut self, payload: &PresencePayload) -> Result<()> {
        self.post(payload).await
    }

    async fn clear(&mut self) -> Result<()> {
        self.post(&serde_json::Value::Null).await
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayClient;
    use presence_sync_core::{MediaType, PresencePayload};
    use presence_sync_engine::PresencePublisher;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload() -> PresencePayload {
        PresencePayload {
            track_title: "One More Time".to_string(),
            track_artists: "Daft Punk".to_string(),
            album_title: Some("Discovery".to_string()),
            album_cover_url: None,
            track_url: Some("https://www.deezer.com/track/3135553".to_string()),
            is_playing: true,
            start_timestamp: 10_000,
            end_timestamp: 330_000,
            media_type: MediaType::Track,
        }
    }

    async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            sock.write_all(reply.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}/presence"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let declared = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + declared
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(GatewayClient::new("ws://127.0.0.1:9000", None).is_err());
        assert!(GatewayClient::new("not a url", None).is_err());
        assert!(GatewayClient::new("https://presence.example.net/v1", None).is_ok());
    }

    #[tokio::test]
    async fn posts_payload_with_bearer_token() {
        let (url, server) = one_shot_server("204 No Content").await;
        let mut client = GatewayClient::new(&url, Some("s3cret".to_string())).unwrap();

        client.publish(&payload()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /presence"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer s3cret"));
        assert!(request.contains(r#""track_title":"One More Time""#));
        assert!(request.contains(r#""end_timestamp":330000"#));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, server) = one_shot_server("503 Service Unavailable").await;
        let mut client = GatewayClient::new(&url, None).unwrap();

        let err = client.publish(&payload()).await.unwrap_err();
        assert!(err.to_string().contains("503"));

        let request = server.await.unwrap();
        assert!(!request.to_ascii_lowercase().contains("authorization"));
    }
}
