use std::fmt;

/// Represents the provider (backend) used for large language model (LLM) inference.
///
/// This enum distinguishes between different backends such as local Ollama
/// or an OpenAI-compatible HTTP API.
///
/// # Examples
///
/// ```
/// use ai_llm_service::config::llm_provider::LlmProvider;
///
/// fn print_provider(provider: LlmProvider) {
///     match provider {
///         LlmProvider::Ollama => println!("Using local Ollama backend"),
///         LlmProvider::OpenAI => println!("Using an OpenAI-compatible API"),
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    /// Local Ollama runtime for on-device inference.
    Ollama,
    /// OpenAI-compatible chat completions API (also used for reasoning-family models).
    OpenAI,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::OpenAI => write!(f, "openai"),
        }
    }
}
