//! HTTP message model
//!
//! A message keeps its request as a structured header plus a body string and
//! exposes both as text. Fuzz locations are byte offsets into the
//! concatenation of the header text and the body text, so the header text
//! form must be stable: [`RequestHeader::to_text`] always renders the same
//! canonical form for the same header.

use chrono::{DateTime, Utc};

use crate::error::HttpError;

const CONTENT_LENGTH: &str = "Content-Length";

/// Structured HTTP request header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Request method
    pub method: String,

    /// Request-URI as it appears on the request line
    pub uri: String,

    /// Protocol version (e.g. "HTTP/1.1")
    pub version: String,

    /// Header fields in wire order
    pub headers: Vec<(String, String)>,
}

/// Structured HTTP response header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHeader {
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            uri: uri.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
        }
    }

    /// Parse a header block: request line, header lines, then an empty line.
    ///
    /// Accepts CRLF or bare LF line endings. Anything after the terminating
    /// empty line is rejected, as is a header line without a colon.
    pub fn parse(text: &str) -> Result<Self, HttpError> {
        let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| HttpError::MalformedHeader("missing request line".into()))?;

        let mut parts = request_line.split_whitespace();
        let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(u), Some(v), None) if v.starts_with("HTTP/") => (m, u, v),
            _ => {
                return Err(HttpError::MalformedHeader(format!(
                    "invalid request line: {}",
                    request_line
                )))
            }
        };

        let mut headers = Vec::new();
        let mut terminated = false;
        for line in lines.by_ref() {
            if line.is_empty() {
                terminated = true;
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                HttpError::MalformedHeader(format!("invalid header line: {}", line))
            })?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(HttpError::MalformedHeader(format!("invalid header name: {}", line)));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }

        if terminated && lines.any(|l| !l.is_empty()) {
            return Err(HttpError::MalformedHeader(
                "unexpected content after end of header".into(),
            ));
        }

        Ok(Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Canonical text form, including the trailing empty line
    pub fn to_text(&self) -> String {
        let mut text = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            text.push_str(name);
            text.push_str(": ");
            text.push_str(value);
            text.push_str("\r\n");
        }
        text.push_str("\r\n");
        text
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first header with this name, or append it
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header(CONTENT_LENGTH).and_then(|v| v.parse().ok())
    }

    /// Resolve the request-URI to an absolute URL, using the Host header for
    /// origin-form URIs.
    pub fn target_url(&self, default_scheme: &str) -> Result<url::Url, HttpError> {
        let absolute = if self.uri.starts_with("http://") || self.uri.starts_with("https://") {
            self.uri.clone()
        } else {
            let host = self
                .header("Host")
                .ok_or_else(|| HttpError::InvalidUrl(self.uri.clone()))?;
            format!("{}://{}{}", default_scheme, host, self.uri)
        };

        url::Url::parse(&absolute).map_err(|_| HttpError::InvalidUrl(absolute))
    }
}

impl ResponseHeader {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn to_text(&self) -> String {
        let mut text = format!("{} {} {}\r\n", self.version, self.status, self.reason);
        for (name, value) in &self.headers {
            text.push_str(&format!("{}: {}\r\n", name, value));
        }
        text.push_str("\r\n");
        text
    }
}

/// A request and, once sent, its response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpMessage {
    pub request_header: RequestHeader,
    pub request_body: String,
    pub response_header: Option<ResponseHeader>,
    pub response_body: String,
    /// Round trip time of the last send
    pub rtt_ms: u64,
    pub sent_at: Option<DateTime<Utc>>,
    /// Injected payload values, for reflection highlighting
    pub note: Option<String>,
}

impl HttpMessage {
    pub fn new(request_header: RequestHeader, request_body: impl Into<String>) -> Self {
        Self {
            request_header,
            request_body: request_body.into(),
            response_header: None,
            response_body: String::new(),
            rtt_ms: 0,
            sent_at: None,
            note: None,
        }
    }

    /// Build a message from raw request text (header, empty line, body)
    pub fn from_raw_request(raw: &str) -> Result<Self, HttpError> {
        let (header, body) = match raw.find("\r\n\r\n") {
            Some(idx) => (&raw[..idx + 4], &raw[idx + 4..]),
            None => match raw.find("\n\n") {
                Some(idx) => (&raw[..idx + 2], &raw[idx + 2..]),
                None => (raw, ""),
            },
        };

        Ok(Self::new(RequestHeader::parse(header)?, body))
    }

    pub fn request_header_text(&self) -> String {
        self.request_header.to_text()
    }

    pub fn request_body_text(&self) -> &str {
        &self.request_body
    }

    /// Replace the request header from text; on error the previous header is kept.
    pub fn set_request_header_text(&mut self, text: &str) -> Result<(), HttpError> {
        self.request_header = RequestHeader::parse(text)?;
        Ok(())
    }

    pub fn set_request_body_text(&mut self, text: impl Into<String>) {
        self.request_body = text.into();
    }

    /// Declare the body length. An absent header is only added for non-empty bodies.
    pub fn set_content_length(&mut self, length: usize) {
        if self.request_header.header(CONTENT_LENGTH).is_none() && length == 0 {
            return;
        }
        self.request_header.set_header(CONTENT_LENGTH, &length.to_string());
    }

    /// Copy of the request only
    pub fn clone_request(&self) -> Self {
        Self::new(self.request_header.clone(), self.request_body.clone())
    }

    /// Copy of request and response
    pub fn clone_all(&self) -> Self {
        self.clone()
    }

    pub fn status(&self) -> Option<u16> {
        self.response_header.as_ref().map(|h| h.status)
    }

    pub fn reason(&self) -> Option<&str> {
        self.response_header.as_ref().map(|h| h.reason.as_str())
    }
}
