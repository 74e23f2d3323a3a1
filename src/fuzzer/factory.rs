//! Builds fuzz processes sharing one base message and one sender

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::location::Combination;
use super::process::FuzzProcess;
use super::processors::{AntiCsrfSynchronizer, MessagePreProcessor, ResultPostProcessor};
use crate::anticsrf::{AntiCsrfToken, AntiCsrfTokenSource};
use crate::app::TransportConfig;
use crate::error::HttpError;
use crate::http::{HttpMessage, HttpSender, ReqwestSender};

struct AntiCsrfBinding {
    token: AntiCsrfToken,
    extractor: Arc<dyn AntiCsrfTokenSource>,
    show_token_requests: bool,
}

/// Owns the transport and the base message for a fuzzing session.
///
/// Every process gets the same sender; concurrent sends are the sender's
/// responsibility.
pub struct FuzzProcessFactory {
    base: Arc<HttpMessage>,
    sender: Arc<dyn HttpSender>,
    pre_processors: Vec<Arc<dyn MessagePreProcessor>>,
    post_processors: Vec<Arc<dyn ResultPostProcessor>>,
    anti_csrf: Option<AntiCsrfBinding>,
    next_id: AtomicUsize,
}

impl FuzzProcessFactory {
    /// Factory with a reqwest sender using the given redirect policy
    pub fn new(
        base: HttpMessage,
        transport: &TransportConfig,
        follow_redirects: bool,
    ) -> Result<Self, HttpError> {
        let sender = ReqwestSender::new(transport, follow_redirects)?;
        Ok(Self::with_sender(base, Arc::new(sender)))
    }

    pub fn with_sender(base: HttpMessage, sender: Arc<dyn HttpSender>) -> Self {
        Self {
            base: Arc::new(base),
            sender,
            pre_processors: Vec::new(),
            post_processors: Vec::new(),
            anti_csrf: None,
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_pre_processor(mut self, processor: Arc<dyn MessagePreProcessor>) -> Self {
        self.pre_processors.push(processor);
        self
    }

    pub fn with_post_processor(mut self, processor: Arc<dyn ResultPostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    /// Refresh `token` before every fuzzed request
    pub fn with_anti_csrf(
        mut self,
        token: AntiCsrfToken,
        extractor: Arc<dyn AntiCsrfTokenSource>,
        show_token_requests: bool,
    ) -> Self {
        self.anti_csrf = Some(AntiCsrfBinding {
            token,
            extractor,
            show_token_requests,
        });
        self
    }

    pub fn base_message(&self) -> &Arc<HttpMessage> {
        &self.base
    }

    pub fn sender(&self) -> Arc<dyn HttpSender> {
        self.sender.clone()
    }

    /// New process with the combination already assigned
    pub fn get_fuzz_process(&self, combination: Combination) -> FuzzProcess {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut pre_processors = self.pre_processors.clone();
        let mut post_processors = self.post_processors.clone();

        // Token fetches are per process, so the synchroniser is too
        if let Some(binding) = &self.anti_csrf {
            let synchronizer = Arc::new(AntiCsrfSynchronizer::new(
                binding.token.clone(),
                self.sender.clone(),
                binding.extractor.clone(),
                binding.show_token_requests,
            ));
            pre_processors.push(synchronizer.clone());
            post_processors.push(synchronizer);
        }

        let process = FuzzProcess::new(
            id,
            self.base.clone(),
            self.sender.clone(),
            pre_processors,
            post_processors,
        );
        process.set_payload(combination);
        process
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anticsrf::FormTokenExtractor;
    use crate::app::AntiCsrfConfig;
    use crate::fuzzer::testing::StubSender;
    use crate::fuzzer::{FuzzLocation, FuzzResultState, Payload};

    const BASE: &str = "POST http://shop.test/buy HTTP/1.1\r\nHost: shop.test\r\nContent-Length: 19\r\n\r\nitem=1&token=abc123";

    #[test]
    fn test_process_ids_increment() {
        let factory = FuzzProcessFactory::with_sender(
            HttpMessage::from_raw_request(BASE).unwrap(),
            Arc::new(StubSender::new()),
        );
        let first = factory.get_fuzz_process(Combination::new());
        let second = factory.get_fuzz_process(Combination::new());
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
    }

    #[tokio::test]
    async fn test_reqwest_factory_creation() {
        let factory = FuzzProcessFactory::new(
            HttpMessage::from_raw_request(BASE).unwrap(),
            &TransportConfig::default(),
            false,
        );
        assert!(factory.is_ok());
    }

    #[tokio::test]
    async fn test_anti_csrf_runs_before_send() {
        let page = r#"<form><input type="hidden" name="token" value="def456"></form>"#;
        let sender = Arc::new(StubSender::new().respond_with(200, page));

        let mut config = AntiCsrfConfig::default();
        config.token_names = vec!["token".into()];
        config.show_token_requests = true;
        let extractor = Arc::new(FormTokenExtractor::new(&config).unwrap());

        let token = AntiCsrfToken {
            name: "token".into(),
            value: "abc123".into(),
            source_message: HttpMessage::from_raw_request(
                "GET http://shop.test/cart HTTP/1.1\r\nHost: shop.test\r\n\r\n",
            )
            .unwrap(),
            target_url: None,
        };

        let base = HttpMessage::from_raw_request(BASE).unwrap();
        let item = base.request_header_text().len() + "item=".len();
        let factory = FuzzProcessFactory::with_sender(base, sender.clone())
            .with_anti_csrf(token, extractor, config.show_token_requests);

        let mut combination = Combination::new();
        combination.insert(FuzzLocation::new(item, item + 1), Payload::literal("99"));
        let process = factory.get_fuzz_process(combination);
        process.run().await;

        let sent = sender.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].request_header.uri, "http://shop.test/cart");
        assert_eq!(sent[1].request_body, "item=99&token=def456");
        assert_eq!(sent[1].request_header.content_length(), Some(20));

        let result = process.result().unwrap();
        assert_eq!(result.state, FuzzResultState::Successful);
        assert_eq!(result.token_request_messages.len(), 1);
    }
}
