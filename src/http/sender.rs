//! HTTP transport used by fuzz processes

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::message::{HttpMessage, ResponseHeader};
use crate::app::TransportConfig;
use crate::error::HttpError;

/// Sends a message and fills in its response.
///
/// One sender is shared by every process a factory creates, so
/// implementations must tolerate concurrent calls.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send_and_receive(&self, message: &mut HttpMessage) -> Result<(), HttpError>;
}

/// reqwest-backed sender
pub struct ReqwestSender {
    /// Inner reqwest client
    client: reqwest::Client,

    /// Scheme for origin-form request-URIs
    default_scheme: String,

    /// Response bodies above this size are truncated
    max_response_size: usize,

    follow_redirects: bool,
}

impl ReqwestSender {
    pub fn new(config: &TransportConfig, follow_redirects: bool) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(if follow_redirects {
                reqwest::redirect::Policy::limited(config.max_redirects)
            } else {
                reqwest::redirect::Policy::none()
            })
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| HttpError::RequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_scheme: config.default_scheme.clone(),
            max_response_size: config.max_response_size,
            follow_redirects,
        })
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    fn build_request(&self, message: &HttpMessage) -> Result<reqwest::RequestBuilder, HttpError> {
        let header = &message.request_header;
        let url = header.target_url(&self.default_scheme)?;
        let method = reqwest::Method::from_str(&header.method)
            .map_err(|_| HttpError::RequestFailed(format!("Invalid HTTP method: {}", header.method)))?;

        // reqwest derives framing and Host from the body and URL
        let mut headers = HeaderMap::new();
        for (key, value) in &header.headers {
            if key.eq_ignore_ascii_case("content-length") || key.eq_ignore_ascii_case("host") {
                continue;
            }
            if let (Ok(name), Ok(val)) = (HeaderName::from_str(key), HeaderValue::from_str(value)) {
                headers.append(name, val);
            }
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if !message.request_body.is_empty() {
            builder = builder.body(message.request_body.clone());
        }
        Ok(builder)
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send_and_receive(&self, message: &mut HttpMessage) -> Result<(), HttpError> {
        let builder = self.build_request(message)?;
        let start = Instant::now();
        message.sent_at = Some(Utc::now());

        let response = builder.send().await.map_err(|e| map_reqwest_error(e, start))?;

        let status = response.status();
        let mut headers = Vec::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.push((key.as_str().to_string(), v.to_string()));
            }
        }
        let response_header = ResponseHeader {
            version: format!("{:?}", response.version()),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            headers,
        };

        let body = response.bytes().await.map_err(|e| map_reqwest_error(e, start))?;
        let body = if body.len() > self.max_response_size {
            tracing::debug!(
                size = body.len(),
                max = self.max_response_size,
                "Truncating response body"
            );
            &body[..self.max_response_size]
        } else {
            &body[..]
        };

        message.rtt_ms = start.elapsed().as_millis() as u64;
        message.response_header = Some(response_header);
        message.response_body = String::from_utf8_lossy(body).into_owned();

        tracing::debug!(
            method = %message.request_header.method,
            uri = %message.request_header.uri,
            status = status.as_u16(),
            rtt_ms = message.rtt_ms,
            "Received response"
        );

        Ok(())
    }
}

fn map_reqwest_error(e: reqwest::Error, start: Instant) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout(start.elapsed().as_millis() as u64)
    } else if e.is_connect() {
        HttpError::ConnectionError(e.to_string())
    } else {
        HttpError::RequestFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestHeader;

    #[tokio::test]
    async fn test_sender_creation() {
        let config = TransportConfig::default();
        let sender = ReqwestSender::new(&config, false).unwrap();
        assert!(!sender.follow_redirects());
    }

    #[tokio::test]
    async fn test_relative_uri_without_host_is_rejected() {
        let sender = ReqwestSender::new(&TransportConfig::default(), true).unwrap();
        let mut msg = HttpMessage::new(RequestHeader::new("GET", "/nohost"), "");
        let err = sender.send_and_receive(&mut msg).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl(_)));
        assert!(msg.response_header.is_none());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let sender = ReqwestSender::new(&TransportConfig::default(), true).unwrap();
        let uri = format!("http://127.0.0.1:{}/", port);
        let mut msg = HttpMessage::new(RequestHeader::new("GET", &uri), "");
        let err = sender.send_and_receive(&mut msg).await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::ConnectionError(_) | HttpError::RequestFailed(_)
        ));
    }
}
