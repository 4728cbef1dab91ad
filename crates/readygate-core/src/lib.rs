//! Readiness gate for a local inference runtime.
//!
//! Guarantees that the runtime binary is installed, its server is running and
//! the requested model is in the local store before a caller sends inference
//! requests. [`ReadinessOrchestrator`] is the single entry point.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use readygate_core::{InferenceProvider, ReadinessOrchestrator, ReadyGateConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut config = ReadyGateConfig::load(None)?;
//! config.apply_env_overrides(|key| std::env::var(key).ok());
//!
//! let provider = InferenceProvider::from_env(&config);
//! let mut gate = ReadinessOrchestrator::from_config(&config);
//!
//! if provider.needs_readiness_gate() {
//!     // Call before every inference request; cheap when already ready.
//!     gate.ensure_ready(&config.model()).await.into_result()?;
//! }
//!
//! // ... chat-completion calls ...
//!
//! gate.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod installer;
pub mod orchestrator;
pub mod process;
pub mod provisioner;
pub mod remedy;
pub mod supervisor;

pub use config::{InferenceProvider, ReadyGateConfig};
pub use endpoint::{ModelReference, RuntimeEndpoint};
pub use error::{ConfigError, ReadinessError};
pub use orchestrator::{ReadinessOrchestrator, ReadinessResult};
