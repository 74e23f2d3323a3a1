//! Anti-CSRF token synchronisation
//!
//! Before each fuzzed request is sent, the page the token came from is
//! fetched again and the fresh token replaces the stale one in the body.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{MessagePreProcessor, ResultPostProcessor};
use crate::anticsrf::{form_encode, AntiCsrfToken, AntiCsrfTokenSource};
use crate::error::ProcessorError;
use crate::fuzzer::process::FuzzResult;
use crate::http::{HttpMessage, HttpSender};

/// Refreshes one anti-CSRF token per fuzzed request.
///
/// One instance serves a single fuzz process: the pre-send step records the
/// token fetches and the post-send step attaches them to that process's result.
pub struct AntiCsrfSynchronizer {
    token: AntiCsrfToken,
    sender: Arc<dyn HttpSender>,
    extractor: Arc<dyn AntiCsrfTokenSource>,
    show_token_requests: bool,
    token_requests: Mutex<Vec<HttpMessage>>,
}

impl AntiCsrfSynchronizer {
    pub fn new(
        token: AntiCsrfToken,
        sender: Arc<dyn HttpSender>,
        extractor: Arc<dyn AntiCsrfTokenSource>,
        show_token_requests: bool,
    ) -> Self {
        Self {
            token,
            sender,
            extractor,
            show_token_requests,
            token_requests: Mutex::new(Vec::new()),
        }
    }

    /// Resend the token's source request; None if the fetch failed
    async fn fetch_fresh_token(&self) -> Option<String> {
        let mut token_message = self.token.source_message.clone_all();

        if let Err(e) = self.sender.send_and_receive(&mut token_message).await {
            tracing::warn!(
                token = %self.token.name,
                error = %e,
                "Failed to refresh anti-CSRF token, sending stale value"
            );
            return None;
        }

        let value = self.extractor.get_token_value(&token_message, &self.token.name);
        self.token_requests.lock().push(token_message);
        value
    }
}

#[async_trait]
impl MessagePreProcessor for AntiCsrfSynchronizer {
    fn name(&self) -> &str {
        "anti-csrf"
    }

    async fn process(&self, message: &HttpMessage) -> Result<HttpMessage, ProcessorError> {
        let fresh = match self.fetch_fresh_token().await {
            Some(value) => value,
            None => return Ok(message.clone()),
        };

        let stale_encoded = form_encode(&self.token.value);
        let fresh_encoded = form_encode(&fresh);

        let mut next = message.clone();
        if stale_encoded.is_empty() || !next.request_body.contains(&stale_encoded) {
            tracing::debug!(token = %self.token.name, "Stale token value not found in request body");
            return Ok(next);
        }

        next.request_body = next.request_body.replacen(&stale_encoded, &fresh_encoded, 1);
        let length = next.request_body.len();
        next.set_content_length(length);

        tracing::debug!(token = %self.token.name, "Replaced anti-CSRF token");
        Ok(next)
    }
}

#[async_trait]
impl ResultPostProcessor for AntiCsrfSynchronizer {
    fn name(&self) -> &str {
        "anti-csrf"
    }

    async fn process(&self, result: &FuzzResult) -> Result<FuzzResult, ProcessorError> {
        let mut next = result.clone();
        if self.show_token_requests {
            next.token_request_messages
                .extend(self.token_requests.lock().iter().cloned());
        }
        Ok(next)
    }
}
