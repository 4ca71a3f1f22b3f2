use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage},
    generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest},
    models::ModelOptions,
    Ollama,
};

use crate::llm::client::{GenerationConfig, GenerationProvider, TextStream};
use crate::rag::embeddings::EmbeddingProvider;
use crate::types::{RagError, Result};

const DEFAULT_PORT: u16 = 11434;

/// Base URL in the form ollama-rs expects: a scheme, a trailing slash, and
/// no `api` segment, since the client appends `api/<endpoint>` itself.
///
/// A missing scheme means `http`. Plain `http` URLs without a port get
/// Ollama's default port. A path prefix (for a reverse proxy) is kept.
fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    let (scheme, rest) = trimmed.split_once("://").unwrap_or(("http", trimmed));
    let (authority, path) = match rest.find('/') {
        Some(pos) => rest.split_at(pos),
        None => (rest, ""),
    };
    let authority = if authority.is_empty() { "localhost" } else { authority };

    // An IPv6 host carries colons of its own; only one after `]` is a port
    let has_port = match authority.rfind(']') {
        Some(end) => authority[end..].contains(':'),
        None => authority.contains(':'),
    };
    if scheme == "http" && !has_port {
        format!("{}://{}:{}{}/", scheme, authority, DEFAULT_PORT, path)
    } else {
        format!("{}://{}{}/", scheme, authority, path)
    }
}

fn connect(base_url: &str) -> Result<Ollama> {
    let url = normalize_base_url(base_url);
    Ollama::try_new(url.as_str())
        .map_err(|e| RagError::Config(format!("invalid Ollama URL '{}': {}", base_url, e)))
}

// ============================================================================
// Generation
// ============================================================================

pub struct OllamaClient {
    client: Ollama,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: String) -> Result<Self> {
        Ok(Self {
            client: connect(base_url)?,
            model,
        })
    }

    fn request(&self, prompt: &str, options: &GenerationConfig) -> ChatMessageRequest {
        let messages = vec![ChatMessage::user(prompt.to_string())];
        ChatMessageRequest::new(self.model.clone(), messages).options(
            ModelOptions::default()
                .temperature(options.temperature)
                .num_predict(options.max_tokens as i32),
        )
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    async fn generate(&self, prompt: &str, options: &GenerationConfig) -> Result<String> {
        let response = self
            .client
            .send_chat_messages(self.request(prompt, options))
            .await
            .map_err(|e| RagError::generation(format!("Ollama error: {}", e)))?;

        Ok(response.message.content)
    }

    async fn generate_stream(&self, prompt: &str, options: &GenerationConfig) -> Result<TextStream> {
        let mut stream_response = self
            .client
            .send_chat_messages_stream(self.request(prompt, options))
            .await
            .map_err(|e| RagError::generation(format!("Ollama stream error: {}", e)))?;

        let output_stream = stream! {
            while let Some(chunk_result) = stream_response.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        let content = chunk.message.content;
                        if !content.is_empty() {
                            yield Ok(content);
                        }
                    }
                    Err(_) => {
                        yield Err(RagError::generation("Ollama stream chunk error"));
                        break;
                    }
                }
            }
        };

        Ok(Box::new(Box::pin(output_stream)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Embeddings
// ============================================================================

pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: String, dimension: usize) -> Result<Self> {
        Ok(Self {
            client: connect(base_url)?,
            model,
            dimension,
        })
    }

    async fn request(&self, input: EmbeddingsInput) -> Result<Vec<Vec<f32>>> {
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), input);
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| RagError::Embedding(format!("Ollama error: {}", e)))?;
        Ok(response.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(EmbeddingsInput::Single(text.to_string()))
            .await?
            .pop()
            .ok_or_else(|| RagError::Embedding("Ollama returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self
            .request(EmbeddingsInput::Multiple(texts.to_vec()))
            .await?;
        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    /// Loads the model on the server by embedding a probe string.
    async fn warm_up(&self) -> Result<()> {
        let probe = self.embed("warm up").await?;
        if probe.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: probe.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://localhost:11434", "http://localhost:11434/")]
    #[case("http://localhost", "http://localhost:11434/")]
    #[case("https://192.168.1.100:8080/", "https://192.168.1.100:8080/")]
    #[case("gpu-box:9000", "http://gpu-box:9000/")]
    #[case("http://h:11434/api", "http://h:11434/")]
    #[case("http://h:11434/api/", "http://h:11434/")]
    #[case("https://proxy.example.com/ollama", "https://proxy.example.com/ollama/")]
    #[case("http://[::1]", "http://[::1]:11434/")]
    #[case("http://[::1]:9000", "http://[::1]:9000/")]
    fn test_normalize_base_url(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_base_url(input), expected);
    }

    #[test]
    fn test_client_keeps_path_prefix() {
        let client = connect("http://gateway:8000/ollama").unwrap();
        assert_eq!(client.url_str(), "http://gateway:8000/ollama/");
    }

    #[test]
    fn test_invalid_url_is_a_config_error() {
        assert!(matches!(
            OllamaClient::new("http://bad host:11434", "m".to_string()),
            Err(RagError::Config(_))
        ));
    }
}
