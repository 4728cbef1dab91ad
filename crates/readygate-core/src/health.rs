use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::endpoint::{ModelReference, RuntimeEndpoint};
use crate::error::ReadinessError;

/// Upper bound on a single liveness probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe for a runtime server's HTTP API.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility, so the supervisor and
/// provisioner can share one probe behind an `Arc`.
pub trait HealthProbe: Send + Sync {
    /// True only when the server answers the list-models route with 200.
    /// Never fails: errors and timeouts read as "not running".
    fn is_running<'a>(
        &'a self,
        endpoint: &'a RuntimeEndpoint,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Names of the models currently in the runtime's model store.
    fn list_models<'a>(
        &'a self,
        endpoint: &'a RuntimeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeSet<ModelReference>, ReadinessError>> + Send + 'a>>;
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Parse a `/api/tags` body into the set of model names.
pub fn parse_tags(body: &str) -> Result<BTreeSet<ModelReference>, ReadinessError> {
    let tags: TagsResponse = serde_json::from_str(body)
        .map_err(|e| ReadinessError::ServerUnhealthy(format!("malformed model list: {e}")))?;
    Ok(tags
        .models
        .into_iter()
        .map(|entry| ModelReference::new(entry.name))
        .collect())
}

/// `reqwest`-backed health checker. Stateless apart from the HTTP client.
pub struct HttpHealthChecker {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthChecker {
    pub fn new() -> Self {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    /// Timeouts above [`PROBE_TIMEOUT`] are clamped. The bound is applied to
    /// every request, not only to the client.
    pub fn with_timeout(timeout: Duration) -> Self {
        let timeout = timeout.min(PROBE_TIMEOUT);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self { http, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn tags_request(&self, endpoint: &RuntimeEndpoint) -> reqwest::RequestBuilder {
        self.http.get(endpoint.tags_url()).timeout(self.timeout)
    }
}

impl Default for HttpHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe for HttpHealthChecker {
    fn is_running<'a>(
        &'a self,
        endpoint: &'a RuntimeEndpoint,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match self.tags_request(endpoint).send().await {
                Ok(resp) => {
                    let running = resp.status() == reqwest::StatusCode::OK;
                    tracing::debug!(endpoint = %endpoint, status = %resp.status(), running, "Health probe");
                    running
                }
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "Health probe failed");
                    false
                }
            }
        })
    }

    fn list_models<'a>(
        &'a self,
        endpoint: &'a RuntimeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeSet<ModelReference>, ReadinessError>> + Send + 'a>>
    {
        Box::pin(async move {
            let resp = self
                .tags_request(endpoint)
                .send()
                .await
                .map_err(|e| ReadinessError::ServerUnhealthy(format!("model list request failed: {e}")))?;

            if resp.status() != reqwest::StatusCode::OK {
                return Err(ReadinessError::ServerUnhealthy(format!(
                    "model list returned {}",
                    resp.status()
                )));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| ReadinessError::ServerUnhealthy(format!("model list unreadable: {e}")))?;
            let models = parse_tags(&body)?;
            tracing::debug!(endpoint = %endpoint, count = models.len(), "Listed models");
            Ok(models)
        })
    }
}

/// Stub probe with scripted liveness and a fixed model store. Counts calls.
pub struct StubHealthProbe {
    running_after: Option<usize>,
    models: Option<BTreeSet<ModelReference>>,
    probes: AtomicUsize,
    listings: AtomicUsize,
}

impl StubHealthProbe {
    /// Healthy from the first probe.
    pub fn running() -> Self {
        Self::healthy_after(0)
    }

    /// Never healthy.
    pub fn down() -> Self {
        Self {
            running_after: None,
            models: Some(BTreeSet::new()),
            probes: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
        }
    }

    /// Unhealthy for the first `probes` probes, healthy afterwards.
    pub fn healthy_after(probes: usize) -> Self {
        Self {
            running_after: Some(probes),
            ..Self::down()
        }
    }

    pub fn with_models(mut self, names: &[&str]) -> Self {
        self.models = Some(names.iter().map(|n| ModelReference::from(*n)).collect());
        self
    }

    /// Listing models fails as if the server were unreachable.
    pub fn listing_fails(mut self) -> Self {
        self.models = None;
        self
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

impl HealthProbe for StubHealthProbe {
    fn is_running<'a>(
        &'a self,
        _endpoint: &'a RuntimeEndpoint,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            let n = self.probes.fetch_add(1, Ordering::SeqCst);
            self.running_after.is_some_and(|after| n >= after)
        })
    }

    fn list_models<'a>(
        &'a self,
        _endpoint: &'a RuntimeEndpoint,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeSet<ModelReference>, ReadinessError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.listings.fetch_add(1, Ordering::SeqCst);
            self.models
                .clone()
                .ok_or_else(|| ReadinessError::ServerUnhealthy("stub listing failure".into()))
        })
    }
}
