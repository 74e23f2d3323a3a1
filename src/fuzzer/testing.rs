//! Scripted sender for tests

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::HttpError;
use crate::http::{HttpMessage, HttpSender, ResponseHeader};

enum Reply {
    Fixed(u16, String),
    EchoBody,
    Fail(String),
}

/// Records every request and answers all of them the same way
pub struct StubSender {
    reply: Reply,
    requests: Mutex<Vec<HttpMessage>>,
}

impl StubSender {
    pub fn new() -> Self {
        Self {
            reply: Reply::Fixed(200, String::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with(mut self, status: u16, body: &str) -> Self {
        self.reply = Reply::Fixed(status, body.to_string());
        self
    }

    /// Reply 200 with the request body as response body
    pub fn echo_body(mut self) -> Self {
        self.reply = Reply::EchoBody;
        self
    }

    pub fn fail_with(mut self, reason: &str) -> Self {
        self.reply = Reply::Fail(reason.to_string());
        self
    }

    pub fn requests(&self) -> Vec<HttpMessage> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpSender for StubSender {
    async fn send_and_receive(&self, message: &mut HttpMessage) -> Result<(), HttpError> {
        self.requests.lock().push(message.clone());

        let (status, body) = match &self.reply {
            Reply::Fixed(status, body) => (*status, body.clone()),
            Reply::EchoBody => (200, message.request_body.clone()),
            Reply::Fail(reason) => return Err(HttpError::ConnectionError(reason.clone())),
        };

        message.response_header = Some(ResponseHeader {
            version: "HTTP/1.1".into(),
            status,
            reason: if status == 200 { "OK".into() } else { "Not Found".into() },
            headers: vec![("Content-Length".into(), body.len().to_string())],
        });
        message.response_body = body;
        message.rtt_ms = 5;
        Ok(())
    }
}
