//! Explanation orchestrator
//!
//! Decides, per request, which provider (if any) gets the selected text.
//!
//! **Order of checks:**
//! 1. Input validation, with no network or rate limit cost
//! 2. Consent: none at all ends the request with `ConsentDenied`
//! 3. Response cache
//! 4. Providers by priority (a consented preferred provider goes first),
//!    each gated by consent, credentials and its rate limit
//! 5. Local fallback when nothing else answered
//!
//! Only step 4 suspends, and only inside the provider call itself.

use crate::audit::AuditLog;
use crate::cache::{cache_key, CacheStats, ResponseCache};
use crate::config::Config;
use crate::consent::ConsentStore;
use crate::core::{
    local_explanation, ExplainRequest, ExplainResponse, ExplanationRequest, ExplanationResult,
};
use crate::error::{ExplainError, ProviderError};
use crate::providers::{self, ProviderClient};
use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A provider together with its place in the fallback chain
#[derive(Debug, Clone)]
struct ProviderSlot {
    priority: u32,
    timeout: Duration,
    client: Arc<dyn ProviderClient>,
}

/// Coordinates consent, cache, rate limits and providers for each request.
///
/// Cheap to share: all state lives behind `Arc`s, so one instance serves
/// every concurrent request.
#[derive(Debug)]
pub struct FallbackOrchestrator {
    providers: Vec<ProviderSlot>,
    consent: Arc<ConsentStore>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    audit: Arc<AuditLog>,
    max_text_chars: usize,
}

impl FallbackOrchestrator {
    pub fn new(
        consent: Arc<ConsentStore>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            providers: Vec::new(),
            consent,
            limiter,
            cache,
            audit: Arc::new(AuditLog::disabled()),
            max_text_chars: Config::default().max_text_chars,
        }
    }

    /// Build the full service graph from configuration
    pub fn from_config(config: &Config, consent: Arc<ConsentStore>) -> anyhow::Result<Self> {
        let limiter = Arc::new(RateLimiter::from_config(config));
        let cache = Arc::new(ResponseCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
        ));

        let mut orchestrator = Self::new(consent, limiter, cache)
            .with_audit(Arc::new(AuditLog::from_config(config)))
            .with_max_text_chars(config.max_text_chars);

        for provider in config.providers_by_priority() {
            let client = providers::create_client(provider)?;
            orchestrator = orchestrator.with_provider(
                provider.priority,
                Duration::from_secs(provider.timeout_secs),
                client,
            );
        }
        Ok(orchestrator)
    }

    /// Add a provider; the chain stays sorted by priority, then name
    pub fn with_provider(
        mut self,
        priority: u32,
        timeout: Duration,
        client: Arc<dyn ProviderClient>,
    ) -> Self {
        self.providers.push(ProviderSlot {
            priority,
            timeout,
            client,
        });
        self.providers.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.client.name().cmp(b.client.name()))
        });
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_max_text_chars(mut self, max_text_chars: usize) -> Self {
        self.max_text_chars = max_text_chars;
        self
    }

    pub fn consent(&self) -> &Arc<ConsentStore> {
        &self.consent
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Provider names in fallback order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|slot| slot.client.name().to_string())
            .collect()
    }

    /// Drop cached explanations whenever consent is withdrawn, until `shutdown`
    pub async fn watch_consent(&self, shutdown: CancellationToken) {
        let mut changes = self.consent.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }

            let granted = changes
                .borrow_and_update()
                .as_ref()
                .is_some_and(|record| record.granted);
            if !granted && !self.cache.is_empty() {
                info!("🧹 Consent withdrawn, clearing {} cached explanations", self.cache.len());
                self.cache.clear();
            }
        }
    }

    /// Boundary entry point: never fails, maps every outcome to a response
    pub async fn handle(&self, request: ExplainRequest, cancel: &CancellationToken) -> ExplainResponse {
        match self.explain(&request, cancel).await {
            Ok(result) => result.into(),
            Err(err) => {
                debug!("Request ended with {}", err.code());
                err.into()
            }
        }
    }

    /// Validate a raw request and explain it
    pub async fn explain(
        &self,
        request: &ExplainRequest,
        cancel: &CancellationToken,
    ) -> Result<ExplanationResult, ExplainError> {
        let request = ExplanationRequest::new(
            &request.text,
            &request.context,
            request.preferred_provider.clone(),
            self.max_text_chars,
        )?;
        self.explain_request(&request, cancel).await
    }

    /// Run the fallback chain for an already validated request
    pub async fn explain_request(
        &self,
        request: &ExplanationRequest,
        cancel: &CancellationToken,
    ) -> Result<ExplanationResult, ExplainError> {
        if cancel.is_cancelled() {
            return Err(ExplainError::Cancelled);
        }

        if !self.consent.is_granted() {
            info!("🔒 No consent for remote explanations, answering locally");
            return Err(ExplainError::ConsentDenied {
                local: local_explanation(request),
            });
        }

        let key = cache_key(request.text(), request.context(), request.preferred_provider());
        if let Some(mut hit) = self.cache.get(&key) {
            debug!("⚡ Cache hit ({})", hit.provider);
            hit.cached = true;
            return Ok(hit);
        }

        let mut failures: Vec<ProviderError> = Vec::new();
        for slot in self.attempt_order(request) {
            let name = slot.client.name();

            if cancel.is_cancelled() {
                return Err(ExplainError::Cancelled);
            }

            // Checked per attempt so a revoke during the chain takes effect
            if !self.consent.is_allowed(name) {
                debug!("Skipping {}: not consented", name);
                continue;
            }

            if !slot.client.has_credentials() {
                debug!("Skipping {}: no credential", name);
                failures.push(ProviderError::AuthMissing(name.to_string()));
                continue;
            }

            if !self.limiter.try_acquire(name) {
                info!("⏳ {} is at its rate limit, trying next provider", name);
                failures.push(ProviderError::RateLimited(name.to_string()));
                continue;
            }

            self.audit.log_outbound(name, request.text().chars().count());
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("🚫 Request cancelled while waiting on {}", name);
                    return Err(ExplainError::Cancelled);
                }
                outcome = tokio::time::timeout(
                    slot.timeout,
                    slot.client.explain(request.text(), request.context()),
                ) => outcome,
            };

            let outcome = outcome.unwrap_or_else(|_| {
                Err(ProviderError::NetworkFailure(
                    name.to_string(),
                    "timed out".to_string(),
                ))
            });

            match outcome {
                Ok(reply) => {
                    let result = ExplanationResult::new(reply.explanation, name, reply.examples);
                    if cancel.is_cancelled() {
                        return Err(ExplainError::Cancelled);
                    }
                    self.cache.put(key, result.clone());
                    info!("✅ Explanation from {}", name);
                    return Ok(result);
                }
                Err(e) => {
                    warn!("❌ {} failed ({}), trying next provider", name, e.kind());
                    debug!("{} failure detail: {}", name, e);
                    failures.push(e);
                }
            }
        }

        let summary: Vec<String> = failures
            .iter()
            .map(|e| format!("{}={}", e.provider(), e.kind()))
            .collect();
        info!(
            "💡 All providers exhausted [{}], answering locally",
            summary.join(", ")
        );
        Ok(local_explanation(request))
    }

    /// Fallback chain for this request
    fn attempt_order(&self, request: &ExplanationRequest) -> Vec<&ProviderSlot> {
        let preferred = request
            .preferred_provider()
            .filter(|name| self.consent.is_allowed(name))
            .and_then(|name| self.providers.iter().find(|s| s.client.name() == name));

        if request.preferred_provider().is_some() && preferred.is_none() {
            debug!("Preferred provider unavailable, using normal order");
        }

        let mut order: Vec<&ProviderSlot> = Vec::with_capacity(self.providers.len());
        if let Some(slot) = preferred {
            order.push(slot);
        }
        order.extend(
            self.providers
                .iter()
                .filter(|s| preferred.map_or(true, |p| p.client.name() != s.client.name())),
        );
        order
    }
}
