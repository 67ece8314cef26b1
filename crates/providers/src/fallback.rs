//! Primary/secondary backend pair with per-call timeouts.
//!
//! Every call goes to the primary first. When it fails (timeout, error
//! status, empty reply) the same request is retried once on the secondary,
//! if one is configured. A [`Route::Secondary`] override skips the primary
//! for a single call.

use async_trait::async_trait;
use cadence_core::error::ProviderError;
use cadence_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Which backend(s) a call may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Route {
    /// Primary, then secondary on failure.
    #[default]
    Auto,
    /// Secondary only.
    Secondary,
}

/// One backend: a provider plus the settings it is called with.
#[derive(Clone)]
pub struct Backend {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl Backend {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// One bounded call with this backend's model settings applied.
    async fn call(&self, mut request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        request.model = self.model.clone();
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "Backend '{}' timed out after {}ms",
                    self.name(),
                    self.timeout.as_millis()
                ))
            })??;

        if response.message.content.trim().is_empty() && response.message.tool_calls.is_empty() {
            return Err(ProviderError::EmptyResponse(self.name().to_string()));
        }
        Ok(response)
    }
}

/// A successful completion and the backend that produced it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub response: ProviderResponse,
    pub backend: String,
}

pub struct BackendPair {
    primary: Backend,
    secondary: Option<Backend>,
}

impl BackendPair {
    pub fn new(primary: Backend) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Backend) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub async fn complete(
        &self,
        request: ProviderRequest,
        route: Route,
    ) -> Result<Completion, ProviderError> {
        if route == Route::Secondary {
            let secondary = self.secondary.as_ref().ok_or_else(|| {
                ProviderError::NotConfigured("No secondary backend configured".into())
            })?;
            info!(backend = %secondary.name(), "Routing call to secondary backend");
            return secondary.call(request).await.map(|response| Completion {
                response,
                backend: secondary.name().to_string(),
            });
        }

        let primary_error = match self.primary.call(request.clone()).await {
            Ok(response) => {
                return Ok(Completion {
                    response,
                    backend: self.primary.name().to_string(),
                });
            }
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_error);
        };
        if !primary_error.is_transient() {
            return Err(primary_error);
        }

        warn!(
            primary = %self.primary.name(),
            secondary = %secondary.name(),
            error = %primary_error,
            "Primary backend failed, falling back"
        );

        secondary.call(request).await.map(|response| Completion {
            response,
            backend: secondary.name().to_string(),
        })
    }
}

#[async_trait]
impl Provider for BackendPair {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        BackendPair::complete(self, request, Route::Auto)
            .await
            .map(|c| c.response)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        if let Ok(true) = self.primary.provider.health_check().await {
            return Ok(true);
        }
        match &self.secondary {
            Some(s) => s.provider.health_check().await,
            None => Ok(false),
        }
    }
}
