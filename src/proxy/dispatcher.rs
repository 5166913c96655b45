//! Function dispatch: resolve the route, try the preferred service, fall back
//! once, and log the final outcome.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::providers::{describe_http_error, CallTarget, ProviderKind, ProviderRegistry};
use super::upstream::UpstreamClient;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::credential::Category;
use crate::registry::usage::{UsageRecord, UNCATEGORIZED};
use crate::registry::{Registry, ResolvedCredential};

/// Result of one dispatch after at most one fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub result: Option<Value>,
    /// Service whose attempt decided the outcome.
    pub service_name: String,
    pub category: String,
    /// Latency of the deciding attempt only.
    pub response_time_ms: i64,
    pub error: Option<String>,
    pub function_name: String,
    pub fallback_used: bool,
}

struct Attempt {
    service_name: String,
    category: Option<Category>,
    elapsed_ms: i64,
    result: Result<Value, String>,
}

pub struct Dispatcher {
    registry: Registry,
    providers: ProviderRegistry,
    upstream: UpstreamClient,
}

impl Dispatcher {
    pub fn new(registry: Registry, providers: ProviderRegistry, upstream: UpstreamClient) -> Self {
        Self {
            registry,
            providers,
            upstream,
        }
    }

    pub fn from_config(registry: Registry, config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            registry,
            ProviderRegistry::with_defaults(),
            UpstreamClient::new(config.provider_timeout())?,
        ))
    }

    /// Routes `payload` to the service mapped for `function_name`.
    ///
    /// Only an unknown function is an `Err`; every provider-side failure is
    /// reported through the outcome. Exactly one usage entry is written.
    pub async fn dispatch(&self, function_name: &str, payload: &Value) -> Result<DispatchOutcome, AppError> {
        let route = self.registry.mappings.resolve(function_name).await?;

        let mut attempt = self.attempt(&route.preferred_service, payload).await;
        let mut fallback_used = false;

        let primary_error = attempt.result.as_ref().err().cloned();
        if let (Some(primary_error), Some(fallback)) = (primary_error, route.fallback_service.as_deref()) {
            tracing::warn!(
                function = %function_name,
                service = %attempt.service_name,
                fallback = %fallback,
                latency_ms = attempt.elapsed_ms,
                "preferred service failed, trying fallback: {}",
                primary_error
            );
            attempt = self.attempt(fallback, payload).await;
            fallback_used = true;
        }

        let category = attempt
            .category
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        let (success, result, error) = match attempt.result {
            Ok(value) => (true, Some(value), None),
            Err(message) => (false, None, Some(message)),
        };

        self.registry
            .usage
            .record(UsageRecord {
                service_name: attempt.service_name.clone(),
                category: category.clone(),
                function_name: Some(function_name.to_string()),
                success,
                response_time_ms: attempt.elapsed_ms,
                error_message: error.clone(),
            })
            .await;

        if success {
            tracing::info!(
                function = %function_name,
                service = %attempt.service_name,
                latency_ms = attempt.elapsed_ms,
                fallback_used,
                "dispatch succeeded"
            );
        } else {
            tracing::warn!(
                function = %function_name,
                service = %attempt.service_name,
                latency_ms = attempt.elapsed_ms,
                fallback_used,
                error = ?error,
                "dispatch failed"
            );
        }

        Ok(DispatchOutcome {
            success,
            result,
            service_name: attempt.service_name,
            category,
            response_time_ms: attempt.elapsed_ms,
            error,
            function_name: function_name.to_string(),
            fallback_used,
        })
    }

    /// One try against one service: credential, rate limit, provider call.
    async fn attempt(&self, service_name: &str, payload: &Value) -> Attempt {
        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as i64;

        let credential = match self.registry.credentials.resolve_for_service(service_name).await {
            Ok(c) => c,
            Err(e) => {
                return Attempt {
                    service_name: service_name.to_string(),
                    category: None,
                    elapsed_ms: elapsed(started),
                    result: Err(e.to_string()),
                }
            }
        };

        let result = match self.registry.rate_limits.check(&credential.service_name).await {
            Ok(()) => self.call_provider(&credential, payload).await,
            Err(e) => Err(e.to_string()),
        };

        Attempt {
            service_name: service_name.to_string(),
            category: Some(credential.category),
            elapsed_ms: elapsed(started),
            result,
        }
    }

    async fn call_provider(&self, credential: &ResolvedCredential, payload: &Value) -> Result<Value, String> {
        let kind = ProviderKind::from_service_name(&credential.service_name);
        let strategy = self
            .providers
            .get(kind)
            .ok_or_else(|| format!("no provider strategy registered for '{}'", kind))?;
        let base_url = credential
            .base_url
            .as_deref()
            .or_else(|| strategy.default_base_url())
            .ok_or_else(|| format!("service '{}' has no base URL configured", credential.service_name))?;

        let target = CallTarget {
            base_url,
            api_key: credential.api_key.as_str(),
        };
        let request = strategy.build_request(self.upstream.client(), &target, payload)?;

        tracing::debug!(
            service = %credential.service_name,
            provider = %kind,
            credential_id = %credential.id,
            "calling provider"
        );
        let response = self.upstream.execute(request).await;

        // The request left this process, so it counts against the quota
        if let Err(e) = self.registry.rate_limits.record_usage(&credential.service_name, 1).await {
            tracing::error!(service = %credential.service_name, "failed to record rate limit usage: {}", e);
        }

        let response = response?;
        if !(200..300).contains(&response.status) {
            return Err(describe_http_error(response.status, &response.body));
        }
        strategy.parse_response(&response)
    }
}
