//! Generation provider abstraction and provider selection
//!
//! The RAG orchestrator talks to language models only through
//! [`GenerationProvider`]. Concrete providers:
//! - **Ollama**: local inference, streaming and embeddings (feature `ollama`)

use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::types::Result;

/// Stream of generated text fragments.
pub type TextStream = Box<dyn Stream<Item = Result<String>> + Send + Unpin>;

/// Sampling parameters passed with every generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// A generative language model.
///
/// Implementations report failures as
/// [`RagError::GenerationFailure`](crate::types::RagError::GenerationFailure).
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate a completion for a fully rendered prompt
    async fn generate(&self, prompt: &str, options: &GenerationConfig) -> Result<String>;

    /// Stream a completion. The default yields the whole completion as one
    /// fragment.
    async fn generate_stream(&self, prompt: &str, options: &GenerationConfig) -> Result<TextStream> {
        let text = self.generate(prompt, options).await?;
        Ok(Box::new(futures::stream::iter(vec![Ok(text)])))
    }

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Provider enum for runtime selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum Provider {
    /// Ollama local LLM provider
    ///
    /// # Example
    /// ```rust,ignore
    /// let provider = Provider::Ollama {
    ///     base_url: "http://localhost:11434".to_string(),
    ///     model: "llama3.2".to_string(),
    ///     embedding_model: "nomic-embed-text".to_string(),
    ///     dimension: 768,
    /// };
    /// ```
    Ollama {
        base_url: String,
        model: String,
        embedding_model: String,
        dimension: usize,
    },
}

impl Provider {
    /// Create the generation client for this provider
    pub fn create_generator(&self) -> Result<Arc<dyn GenerationProvider>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama { base_url, model, .. } => Ok(Arc::new(
                super::ollama::OllamaClient::new(base_url, model.clone())?,
            )),
            #[cfg(not(feature = "ollama"))]
            Provider::Ollama { .. } => Err(crate::types::RagError::Config(
                "Ollama provider requires the 'ollama' feature".to_string(),
            )),
        }
    }

    /// Create the embedding client for this provider
    pub fn create_embedder(&self) -> Result<Arc<dyn crate::rag::embeddings::EmbeddingProvider>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama {
                base_url,
                embedding_model,
                dimension,
                ..
            } => Ok(Arc::new(super::ollama::OllamaEmbedder::new(
                base_url,
                embedding_model.clone(),
                *dimension,
            )?)),
            #[cfg(not(feature = "ollama"))]
            Provider::Ollama { .. } => Err(crate::types::RagError::Config(
                "Ollama provider requires the 'ollama' feature".to_string(),
            )),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "Ollama",
        }
    }
}
