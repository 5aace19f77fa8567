//! Model client abstraction used by the chat handler.

mod openai;
mod types;

use async_trait::async_trait;

use crate::Result;

pub use openai::ChatCompletionsClient;
pub use types::*;

/// A chat model endpoint.
///
/// Injected into the engine at build time; tests swap in a scripted double.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(
        &self,
        request: ModelRequest,
    ) -> Result<ModelResponse>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use super::{ModelClient, ModelRequest, ModelResponse};
    use crate::{ResflowError, Result};

    /// Replays queued responses in order and records every request.
    #[derive(Default)]
    pub struct MockModel {
        responses: Mutex<Vec<ModelResponse>>,
        requests: Mutex<Vec<ModelRequest>>,
        delay: Duration,
    }

    impl MockModel {
        pub fn new(responses: Vec<ModelResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        /// Answer every request after `delay`.
        pub fn with_delay(
            mut self,
            delay: Duration,
        ) -> Self {
            self.delay = delay;
            self
        }

        pub fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelClient for MockModel {
        async fn generate(
            &self,
            request: ModelRequest,
        ) -> Result<ModelResponse> {
            self.requests.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ResflowError::Execution("mock model has no response left".to_string()));
            }
            Ok(responses.remove(0))
        }
    }
}
