use serde::{Deserialize, Serialize};

/// Default address the local runtime listens on.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Base URL of a runtime server, normalized without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeEndpoint {
    base_url: String,
}

impl RuntimeEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        Self {
            base_url: trimmed.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The "list models" path, also used as the liveness probe.
    pub fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// OpenAI-compatible base URL for chat-completion callers.
    pub fn openai_base_url(&self) -> String {
        format!("{}/v1", self.base_url)
    }
}

impl Default for RuntimeEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl std::fmt::Display for RuntimeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.base_url)
    }
}

/// Name of a model in the runtime's model store, e.g. `qwen2.5:0.5b`.
///
/// Opaque beyond exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelReference(String);

impl ModelReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModelReference {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ModelReference {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for ModelReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slashes() {
        let endpoint = RuntimeEndpoint::new("http://localhost:11434//");
        assert_eq!(endpoint.base_url(), "http://localhost:11434");
        assert_eq!(endpoint.tags_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn default_points_at_local_runtime() {
        let endpoint = RuntimeEndpoint::default();
        assert_eq!(endpoint.openai_base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn model_references_compare_exactly() {
        assert_eq!(ModelReference::from("qwen2.5:0.5b"), "qwen2.5:0.5b".into());
        assert_ne!(ModelReference::from("qwen2.5:0.5b"), "qwen2.5".into());
    }
}
