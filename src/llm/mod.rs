//! Language model providers.
//!
//! - [`client`] - the [`GenerationProvider`](client::GenerationProvider) trait and provider selection
//! - [`ollama`] - Ollama generation and embeddings (feature `ollama`)

pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use client::{GenerationConfig, GenerationProvider, Provider, TextStream};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaClient, OllamaEmbedder};
