//! Mock Provider for Testing
//!
//! Records every call and replays scripted outcomes.

use async_trait::async_trait;
use lucid::error::ProviderError;
use lucid::providers::{ProviderClient, ProviderReply};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock provider that records the text it was asked to explain
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    /// Texts received, in call order
    pub calls: Arc<Mutex<Vec<String>>>,
    /// Outcomes returned before falling back to a success
    pub script: Arc<Mutex<VecDeque<Result<ProviderReply, ProviderError>>>>,
    /// Simulated latency per call
    pub delay: Arc<Mutex<Duration>>,
    pub credentials: bool,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            credentials: true,
        }
    }

    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    /// Queue an outcome for the next call
    pub fn push(&self, outcome: Result<ProviderReply, ProviderError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn fail_with(self, err: ProviderError) -> Self {
        self.push(Err(err));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reply_text(&self) -> String {
        format!("explained by {}", self.name)
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_credentials(&self) -> bool {
        self.credentials
    }

    async fn explain(&self, text: &str, _context: &str) -> Result<ProviderReply, ProviderError> {
        self.calls.lock().unwrap().push(text.to_string());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ProviderReply {
                explanation: self.reply_text(),
                examples: vec![format!("{} example", self.name)],
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_replays_script() {
        let mock = MockProvider::new("a").fail_with(ProviderError::RateLimited("a".to_string()));

        let first = mock.explain("one", "").await;
        assert_eq!(first.unwrap_err(), ProviderError::RateLimited("a".to_string()));

        let second = mock.explain("two", "").await.unwrap();
        assert_eq!(second.explanation, "explained by a");
        assert_eq!(mock.get_calls(), vec!["one", "two"]);
    }
}
