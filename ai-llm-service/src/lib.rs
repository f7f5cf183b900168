//! Shared LLM client library: provider abstraction (Ollama / OpenAI-compatible),
//! unified error handling, health checks, and cached fast/slow/embedding profiles.

pub mod config;
pub mod error_handler;
pub mod health_service;
pub mod service_profiles;
pub mod services;
pub mod telemetry;

pub use config::llm_model_config::LlmModelConfig;
pub use config::llm_provider::LlmProvider;
pub use error_handler::AiLlmError;
pub use service_profiles::LlmServiceProfiles;
