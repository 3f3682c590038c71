//! HTTP channel reader backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};

use megaphone_core::error::TransportError;
use megaphone_core::transport::{ByteStream, ChannelTransport};

/// Configuration for `HttpChannelTransport`.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Time allowed to establish the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Sent as the `User-Agent` header.
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("megaphone-http/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Streaming reader for a Megaphone server.
pub struct HttpChannelTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpChannelTransport {
    /// Create a transport for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, config: HttpTransportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self::with_client(base_url, http))
    }

    /// Create with default configuration.
    pub fn default_for(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(base_url, HttpTransportConfig::default())
    }

    /// Reuse an existing `reqwest::Client` (connection pool, proxies, TLS).
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    /// URL read for `consumer`.
    pub fn read_url(&self, consumer: &str) -> String {
        format!("{}/read/{consumer}", self.base_url)
    }
}

#[async_trait]
impl ChannelTransport for HttpChannelTransport {
    async fn read(&self, consumer: &str) -> Result<ByteStream, TransportError> {
        let url = self.read_url(consumer);
        tracing::debug!(url = %url, "opening channel read");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        Ok(resp
            .bytes_stream()
            .map_err(|e| TransportError::Http(e.to_string()))
            .boxed())
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    #[test]
    fn read_url_joins_consumer() {
        let transport = HttpChannelTransport::default_for("https://megaphone.example.com/").unwrap();
        assert_eq!(transport.url(), "https://megaphone.example.com");
        assert_eq!(
            transport.read_url("c-42"),
            "https://megaphone.example.com/read/c-42"
        );
    }

    #[test]
    fn default_user_agent_names_crate() {
        let config = HttpTransportConfig::default();
        assert!(config.user_agent.starts_with("megaphone-http/"));
    }

    /// Serve one canned HTTP response; resolves to the request line received.
    async fn serve_once(response: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]);
            let _ = tx.send(head.lines().next().unwrap_or_default().to_string());
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn streams_body_of_successful_read() {
        let (url, request) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n\
             {\"sid\":\"s1\",\"eid\":\"e1\",\"ts\":\"0\",\"body\":1}\n",
        )
        .await;
        let transport = HttpChannelTransport::default_for(url).unwrap();

        let body: Vec<u8> = transport
            .read("c1")
            .await
            .unwrap()
            .try_fold(Vec::new(), |mut acc, bytes| async move {
                acc.extend_from_slice(&bytes);
                Ok(acc)
            })
            .await
            .unwrap();

        assert_eq!(request.await.unwrap(), "GET /read/c1 HTTP/1.1");
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "{\"sid\":\"s1\",\"eid\":\"e1\",\"ts\":\"0\",\"body\":1}\n"
        );
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let (url, _request) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\nConnection: close\r\n\r\nno such",
        )
        .await;
        let transport = HttpChannelTransport::default_for(url).unwrap();

        let err = match transport.read("missing").await {
            Ok(_) => panic!("404 read produced a stream"),
            Err(e) => e,
        };
        assert_eq!(
            err,
            TransportError::Status {
                status: 404,
                body: "no such".into()
            }
        );
        assert!(err.is_status());
    }
}
