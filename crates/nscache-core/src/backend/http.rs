//! S3-compatible HTTP backend.
//!
//! Objects are addressed path-style: `{endpoint}/{target_bucket}/{key}`.
//! Requests are unsigned; credentials references on a resource are carried
//! but never resolved here.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::traits::{FetchedObject, ObjectBackend, ObjectMeta};
use crate::config::NetworkConfig;
use crate::error::{GatewayError, Result};
use crate::resolver::HubResource;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Backend talking to S3-compatible endpoints over HTTP.
pub struct HttpBackend {
    client: Client,
    breaker_config: CircuitBreakerConfig,
    /// One breaker per `host:port`.
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl HttpBackend {
    pub fn new() -> Result<Self> {
        Self::with_timeouts(NetworkConfig::REQUEST_TIMEOUT, NetworkConfig::CONNECT_TIMEOUT)
    }

    pub fn with_timeouts(request_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            breaker_config: CircuitBreakerConfig::default(),
            breakers: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    fn breaker(&self, hub: &HubResource) -> Arc<CircuitBreaker> {
        let key = hub.endpoint_key();
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return breaker.clone();
        }
        self.breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(key, self.breaker_config.clone()))
            })
            .clone()
    }

    /// Send a request through the endpoint's circuit breaker.
    ///
    /// Transport errors and 5xx/429 responses count as endpoint failures;
    /// any other response means the endpoint is reachable.
    async fn send(
        &self,
        hub: &HubResource,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Response> {
        let breaker = self.breaker(hub);
        if !breaker.allow_request() {
            return Err(GatewayError::unavailable(
                &hub.name,
                format!("circuit open for {}", hub.endpoint_key()),
            ));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    breaker.record_failure();
                } else {
                    breaker.record_success();
                }
                debug!("{} {} -> {}", what, response.url(), status);
                Ok(response)
            }
            Err(e) => {
                breaker.record_failure();
                warn!("{} against {} failed: {}", what, hub.name, e);
                Err(GatewayError::unavailable(
                    &hub.name,
                    format!("{} failed: {}", what, e),
                ))
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for HttpBackend {
    async fn fetch(&self, hub: &HubResource, key: &str) -> Result<FetchedObject> {
        let url = object_url(hub, key)?;
        let response = self.send(hub, self.client.get(url), "GET").await?;
        let response = check_object_status(hub, key, response)?;

        let declared = content_length(response.headers());
        let mut meta = meta_from_headers(response.headers());

        // Stream the body so an overlong response is cut off early.
        let mut buffer = BytesMut::with_capacity(declared.unwrap_or(0).min(1 << 20) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                GatewayError::unavailable(
                    &hub.name,
                    format!("reading body of {} failed: {}", key, e),
                )
            })?;
            buffer.extend_from_slice(&chunk);
            if let Some(expected) = declared {
                if buffer.len() as u64 > expected {
                    return Err(GatewayError::unavailable(
                        &hub.name,
                        format!("body of {} exceeds declared {} bytes", key, expected),
                    ));
                }
            }
        }
        let body = buffer.freeze();

        if let Some(expected) = declared {
            if (body.len() as u64) < expected {
                return Err(GatewayError::unavailable(
                    &hub.name,
                    format!(
                        "short body for {}: got {} of {} bytes",
                        key,
                        body.len(),
                        expected
                    ),
                ));
            }
        }
        meta.size = body.len() as u64;
        Ok(FetchedObject { body, meta })
    }

    async fn head(&self, hub: &HubResource, key: &str) -> Result<ObjectMeta> {
        let url = object_url(hub, key)?;
        let response = self.send(hub, self.client.head(url), "HEAD").await?;
        let response = check_object_status(hub, key, response)?;
        let mut meta = meta_from_headers(response.headers());
        meta.size = content_length(response.headers()).unwrap_or(0);
        Ok(meta)
    }

    async fn put(&self, hub: &HubResource, key: &str, body: Bytes) -> Result<ObjectMeta> {
        let url = object_url(hub, key)?;
        let size = body.len() as u64;
        let request = self.client.put(url).body(body);
        let response = self.send(hub, request, "PUT").await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(hub, "PUT", key, status));
        }
        let mut meta = meta_from_headers(response.headers());
        meta.size = size;
        meta.last_modified.get_or_insert_with(Utc::now);
        Ok(meta)
    }

    async fn probe(&self, hub: &HubResource) -> Result<()> {
        let url = bucket_url(hub)?;
        let request = self.client.head(url).timeout(NetworkConfig::PROBE_TIMEOUT);
        let response = self.send(hub, request, "HEAD bucket").await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(GatewayError::unavailable(
                &hub.name,
                format!("target bucket {} does not exist", hub.target_bucket),
            )),
            status => Err(GatewayError::unavailable(
                &hub.name,
                format!("probe of {} returned {}", hub.target_bucket, status),
            )),
        }
    }

    fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|breaker| breaker.stats())
            .collect();
        stats.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        stats
    }
}

fn check_object_status(hub: &HubResource, key: &str, response: Response) -> Result<Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(GatewayError::ObjectNotFound {
            bucket: hub.target_bucket.clone(),
            key: key.to_string(),
        }),
        status => Err(status_error(hub, "GET", key, status)),
    }
}

/// Map a failed response status to an error.
///
/// Denied access, throttling and server errors may clear up on their own and
/// are retryable. Any other client error will not change on a retry.
fn status_error(hub: &HubResource, what: &str, key: &str, status: StatusCode) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::unavailable(&hub.name, format!("access denied for {} {}", what, key))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            GatewayError::unavailable(&hub.name, format!("{} {} returned {}", what, key, status))
        }
        status if status.is_client_error() => GatewayError::HubRejected {
            resource: hub.name.clone(),
            status: status.as_u16(),
            message: format!("{} {}", what, key),
        },
        status => {
            GatewayError::unavailable(&hub.name, format!("{} {} returned {}", what, key, status))
        }
    }
}

fn base(hub: &HubResource) -> String {
    hub.endpoint.as_str().trim_end_matches('/').to_string()
}

fn bucket_url(hub: &HubResource) -> Result<Url> {
    parse_url(format!("{}/{}", base(hub), hub.target_bucket))
}

/// Path-style object URL. Each `/`-separated key segment is percent-encoded.
fn object_url(hub: &HubResource, key: &str) -> Result<Url> {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    parse_url(format!(
        "{}/{}/{}",
        base(hub),
        hub.target_bucket,
        encoded.join("/")
    ))
}

fn parse_url(raw: String) -> Result<Url> {
    Url::parse(&raw).map_err(|e| GatewayError::InvalidParams {
        message: format!("Invalid object URL '{}': {}", raw, e),
    })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn meta_from_headers(headers: &HeaderMap) -> ObjectMeta {
    let text = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ObjectMeta {
        size: 0,
        etag: text(ETAG),
        content_type: text(CONTENT_TYPE),
        last_modified: text(LAST_MODIFIED)
            .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::HubResourceSpec;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn hub(endpoint: &str) -> HubResource {
        HubResource::from_spec(HubResourceSpec {
            name: "h1".into(),
            endpoint: endpoint.into(),
            region: None,
            target_bucket: "data".into(),
            credentials_ref: None,
        })
        .unwrap()
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let hub = hub("http://minio:9000/");
        let url = object_url(&hub, "dir/my file+1.txt").unwrap();
        assert_eq!(url.as_str(), "http://minio:9000/data/dir/my%20file%2B1.txt");
        assert_eq!(bucket_url(&hub).unwrap().as_str(), "http://minio:9000/data");
    }

    #[test]
    fn test_meta_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));

        let meta = meta_from_headers(&headers);
        assert_eq!(meta.etag.as_deref(), Some("\"abc\""));
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert!(meta.last_modified.is_some());
        assert_eq!(content_length(&headers), Some(12));
    }

    /// Answer every connection with the same raw HTTP response.
    ///
    /// The request is drained first (headers and any `Content-Length` body)
    /// so uploads complete before the reply is written.
    async fn canned_hub(response: impl Into<String>) -> HubResource {
        let response: String = response.into();
        let response: Arc<str> = Arc::from(response);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = response.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    let header_end = loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        request.extend_from_slice(&buf[..n]);
                        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };
                    let head = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
                    let body_len = head
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    while request.len() < header_end + body_len {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        request.extend_from_slice(&buf[..n]);
                    }
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        hub(&format!("http://{}", addr))
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_metadata() {
        let hub = canned_hub(
            "HTTP/1.1 200 OK\r\n\
             Content-Length: 11\r\n\
             Content-Type: text/plain\r\n\
             ETag: \"v1\"\r\n\
             Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\n\
             Connection: close\r\n\r\n\
             hello world",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        let object = backend.fetch(&hub, "testfile0.txt").await.unwrap();
        assert_eq!(&object.body[..], b"hello world");
        assert_eq!(object.meta.size, 11);
        assert_eq!(object.meta.etag.as_deref(), Some("\"v1\""));
        assert_eq!(object.meta.content_type.as_deref(), Some("text/plain"));
        assert!(object.meta.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_fetch_missing_object_is_not_found() {
        let hub = canned_hub(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        let err = backend.fetch(&hub, "missing.txt").await.unwrap_err();
        assert!(matches!(err, GatewayError::ObjectNotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_access_denied_is_unavailable() {
        for status in ["401 Unauthorized", "403 Forbidden"] {
            let hub = canned_hub(format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            ))
            .await;
            let backend = HttpBackend::new().unwrap();

            let err = backend.fetch(&hub, "secret.txt").await.unwrap_err();
            assert!(
                matches!(err, GatewayError::BackendUnavailable { .. }),
                "{}: {}",
                status,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_short_body_is_never_returned() {
        // Declares 100 bytes, sends 7 and closes the connection.
        let hub = canned_hub(
            "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        let err = backend.fetch(&hub, "big.bin").await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_never_returns_more_than_declared() {
        let hub = canned_hub(
            "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabcdefghij",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        match backend.fetch(&hub, "a.txt").await {
            Ok(object) => assert_eq!(&object.body[..], b"abc"),
            Err(err) => assert!(matches!(err, GatewayError::BackendUnavailable { .. })),
        }
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_retryable() {
        let hub = canned_hub(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        let err = backend.fetch(&hub, "a.txt").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_put_client_error_is_not_retried() {
        let hub = canned_hub(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        let err = backend
            .put(&hub, "a.txt", Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::HubRejected { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_put_throttled_is_retryable() {
        let hub = canned_hub(
            "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        let err = backend
            .put(&hub, "a.txt", Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_put_success_reports_etag() {
        let hub = canned_hub(
            "HTTP/1.1 200 OK\r\nETag: \"abc\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let backend = HttpBackend::new().unwrap();

        let meta = backend
            .put(&hub, "a.txt", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(meta.etag.as_deref(), Some("\"abc\""));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let backend = HttpBackend::new().unwrap();
        let err = backend
            .fetch(&hub("http://127.0.0.1:1"), "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits() {
        let backend = HttpBackend::new().unwrap().with_breaker_config(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(600),
            half_open_max_calls: 1,
        });
        let hub = hub("http://127.0.0.1:1");

        assert!(backend.probe(&hub).await.is_err());
        let err = backend.fetch(&hub, "a.txt").await.unwrap_err();
        assert!(err.to_string().contains("circuit open"));

        let stats = backend.circuit_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].endpoint, "127.0.0.1:1");
    }
}
