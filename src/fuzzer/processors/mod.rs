//! Pre-send and post-send processors
//!
//! Pre-processors see the mutated request before it is sent; post-processors
//! see the finished result. Chains are fail-soft: a step that errors is
//! logged and the value from the previous step carries forward.

mod anti_csrf;

pub use anti_csrf::AntiCsrfSynchronizer;

use async_trait::async_trait;
use std::sync::Arc;

use super::process::FuzzResult;
use crate::error::ProcessorError;
use crate::http::HttpMessage;

/// Runs on the mutated request before it is sent
#[async_trait]
pub trait MessagePreProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, message: &HttpMessage) -> Result<HttpMessage, ProcessorError>;
}

/// Runs on the result after the response has been classified
#[async_trait]
pub trait ResultPostProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, result: &FuzzResult) -> Result<FuzzResult, ProcessorError>;
}

pub async fn apply_pre_processors(
    processors: &[Arc<dyn MessagePreProcessor>],
    mut message: HttpMessage,
) -> HttpMessage {
    for processor in processors {
        match processor.process(&message).await {
            Ok(next) => message = next,
            Err(e) => {
                tracing::warn!(processor = processor.name(), error = %e, "Pre-processor failed, continuing");
            }
        }
    }
    message
}

pub async fn apply_post_processors(
    processors: &[Arc<dyn ResultPostProcessor>],
    mut result: FuzzResult,
) -> FuzzResult {
    for processor in processors {
        match processor.process(&result).await {
            Ok(next) => result = next,
            Err(e) => {
                tracing::warn!(processor = processor.name(), error = %e, "Post-processor failed, continuing");
            }
        }
    }
    result
}
