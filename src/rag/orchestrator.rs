//! Retrieval-augmented answer generation.
//!
//! Every answer runs three timed stages:
//!
//! 1. **Retrieve**: semantic search for the question. A failed search or
//!    an empty result set ends the call with [`RagError::NoContext`].
//! 2. **Augment**: render the prompt, admitting ranked chunks while the
//!    estimated token total fits `max_context_tokens`.
//! 3. **Generate**: call the [`GenerationProvider`], optionally under a
//!    timeout. Failures carry the retrieval time already spent.
//!
//! The hybrid mode runs a document-grounded answer and a general-knowledge
//! answer concurrently and returns both, labelled separately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::llm::client::{GenerationConfig, GenerationProvider, TextStream};
use crate::rag::prompt::{
    estimate_tokens, parse_final_answer, select_context, source_tokens, PromptBuilder,
    DEFAULT_SYSTEM_PROMPT, GENERAL_SYSTEM_PROMPT, REASONING_INSTRUCTIONS,
};
use crate::rag::search::{SearchOptions, SearchService};
use crate::types::{
    Message, RagError, RagResponse, ResponseMetadata, Result, SearchResultItem, Source,
};

const PREVIEW_CHARS: usize = 200;

// ============================================================================
// Options and results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOptions {
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,

    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_include_sources")]
    pub include_sources: bool,

    /// Replaces the built-in instructions when set
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub history: Vec<Message>,

    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    #[serde(default)]
    pub search: SearchOptions,

    /// No timeout when unset
    #[serde(default)]
    pub generation_timeout: Option<Duration>,
}

fn default_max_context_chunks() -> usize {
    5
}

fn default_max_context_tokens() -> usize {
    3000
}

fn default_include_sources() -> bool {
    true
}

fn default_max_history_turns() -> usize {
    6
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            max_context_chunks: default_max_context_chunks(),
            max_context_tokens: default_max_context_tokens(),
            include_sources: default_include_sources(),
            system_prompt: None,
            history: Vec::new(),
            max_history_turns: default_max_history_turns(),
            search: SearchOptions::default(),
            generation_timeout: None,
        }
    }
}

impl AnswerOptions {
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = Some(timeout);
        self
    }
}

/// Answer plus the reasoning that preceded the `Final Answer:` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonedAnswer {
    pub answer: String,
    pub reasoning: String,
    pub raw_response: String,
    pub marker_found: bool,
    pub sources: Vec<Source>,
    pub metadata: ResponseMetadata,
}

/// Outcome of one knowledge source in a hybrid answer.
#[derive(Debug, Clone)]
pub enum SourceOutcome<T> {
    Answered(T),
    Failed { error: RagError },
}

impl<T> SourceOutcome<T> {
    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => SourceOutcome::Answered(value),
            Err(error) => SourceOutcome::Failed { error },
        }
    }

    pub fn answered(&self) -> Option<&T> {
        match self {
            SourceOutcome::Answered(value) => Some(value),
            SourceOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&RagError> {
        match self {
            SourceOutcome::Answered(_) => None,
            SourceOutcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridResponse {
    pub documents: SourceOutcome<RagResponse>,
    pub general: SourceOutcome<String>,
}

/// Sources and retrieval metadata known before generation starts, plus the
/// fragment stream.
pub struct RagStream {
    pub sources: Vec<Source>,
    pub metadata: ResponseMetadata,
    pub fragments: TextStream,
}

struct Augmented {
    prompt: String,
    sources: Vec<Source>,
    chunks_used: usize,
    context_tokens: usize,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct RagOrchestrator {
    search: Arc<SearchService>,
    generator: Arc<dyn GenerationProvider>,
    generation: GenerationConfig,
}

impl RagOrchestrator {
    pub fn new(
        search: Arc<SearchService>,
        generator: Arc<dyn GenerationProvider>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            search,
            generator,
            generation,
        }
    }

    pub fn search(&self) -> &Arc<SearchService> {
        &self.search
    }

    pub fn generator(&self) -> &Arc<dyn GenerationProvider> {
        &self.generator
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    #[instrument(skip(self, options), fields(model = %self.generator.model_name()))]
    pub async fn answer(&self, query: &str, options: &AnswerOptions) -> Result<RagResponse> {
        let started = Instant::now();

        let (results, retrieval_time_ms) = self.retrieve(query, options).await?;
        let system_prompt = options.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let augmented = self.augment(query, &results, options, system_prompt, "Answer:")?;

        let generation_started = Instant::now();
        let answer = self
            .generate(&augmented.prompt, options.generation_timeout)
            .await
            .map_err(|e| e.with_retrieval_time(retrieval_time_ms))?;
        let generation_time_ms = generation_started.elapsed().as_millis() as u64;

        let metadata = ResponseMetadata {
            retrieval_time_ms,
            generation_time_ms,
            total_time_ms: started.elapsed().as_millis() as u64,
            chunks_used: augmented.chunks_used,
            context_tokens: augmented.context_tokens,
        };
        info!(
            chunks = metadata.chunks_used,
            tokens = metadata.context_tokens,
            total_ms = metadata.total_time_ms,
            "answer generated"
        );

        Ok(RagResponse {
            answer: answer.trim().to_string(),
            sources: augmented.sources,
            metadata,
        })
    }

    /// Retrieve and augment, then hand back the generation stream. The
    /// timeout, when set, bounds opening the stream.
    #[instrument(skip(self, options))]
    pub async fn answer_stream(&self, query: &str, options: &AnswerOptions) -> Result<RagStream> {
        let (results, retrieval_time_ms) = self.retrieve(query, options).await?;
        let system_prompt = options.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let augmented = self.augment(query, &results, options, system_prompt, "Answer:")?;

        let opening = self.generator.generate_stream(&augmented.prompt, &self.generation);
        let fragments = match options.generation_timeout {
            Some(limit) => tokio::time::timeout(limit, opening)
                .await
                .map_err(|_| RagError::timeout(limit))?,
            None => opening.await,
        }
        .map_err(|e| as_generation_error(e).with_retrieval_time(retrieval_time_ms))?;

        Ok(RagStream {
            sources: augmented.sources,
            metadata: ResponseMetadata {
                retrieval_time_ms,
                generation_time_ms: 0,
                total_time_ms: retrieval_time_ms,
                chunks_used: augmented.chunks_used,
                context_tokens: augmented.context_tokens,
            },
            fragments,
        })
    }

    /// Ask for step-by-step reasoning and keep only the text after the
    /// final-answer marker as the answer.
    #[instrument(skip(self, options))]
    pub async fn answer_with_reasoning(
        &self,
        query: &str,
        options: &AnswerOptions,
    ) -> Result<ReasonedAnswer> {
        let started = Instant::now();

        let (results, retrieval_time_ms) = self.retrieve(query, options).await?;
        let system_prompt = format!(
            "{}\n\n{}",
            options
                .system_prompt
                .as_deref()
                .unwrap_or(DEFAULT_SYSTEM_PROMPT)
                .trim(),
            REASONING_INSTRUCTIONS
        );
        let augmented = self.augment(query, &results, options, &system_prompt, "Reasoning:")?;

        let generation_started = Instant::now();
        let raw_response = self
            .generate(&augmented.prompt, options.generation_timeout)
            .await
            .map_err(|e| e.with_retrieval_time(retrieval_time_ms))?;
        let generation_time_ms = generation_started.elapsed().as_millis() as u64;

        let parsed = parse_final_answer(&raw_response);
        if !parsed.marker_found {
            warn!("response has no final answer marker, returning full text");
        }

        Ok(ReasonedAnswer {
            answer: parsed.answer,
            reasoning: parsed.reasoning,
            raw_response,
            marker_found: parsed.marker_found,
            sources: augmented.sources,
            metadata: ResponseMetadata {
                retrieval_time_ms,
                generation_time_ms,
                total_time_ms: started.elapsed().as_millis() as u64,
                chunks_used: augmented.chunks_used,
                context_tokens: augmented.context_tokens,
            },
        })
    }

    /// Answer from general knowledge only, without retrieval.
    #[instrument(skip(self, options))]
    pub async fn general_answer(&self, query: &str, options: &AnswerOptions) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }

        let prompt = PromptBuilder::new(query)
            .system_prompt(GENERAL_SYSTEM_PROMPT)
            .history(&options.history, options.max_history_turns)
            .build();
        let answer = self.generate(&prompt, options.generation_timeout).await?;
        Ok(answer.trim().to_string())
    }

    /// Generate the document-grounded and general answers concurrently.
    ///
    /// Errors only when both fail, returning the document-side error. A
    /// single failure is reported in its [`SourceOutcome`].
    #[instrument(skip(self, options))]
    pub async fn hybrid_answer(&self, query: &str, options: &AnswerOptions) -> Result<HybridResponse> {
        let (documents, general) = tokio::join!(
            self.answer(query, options),
            self.general_answer(query, options)
        );

        match (documents, general) {
            (Err(documents), Err(general)) => {
                warn!(documents = %documents, general = %general, "both answer sources failed");
                Err(documents)
            }
            (documents, general) => {
                if let Err(e) = &documents {
                    debug!(error = %e, "document answer failed, keeping general answer");
                }
                if let Err(e) = &general {
                    debug!(error = %e, "general answer failed, keeping document answer");
                }
                Ok(HybridResponse {
                    documents: SourceOutcome::from_result(documents),
                    general: SourceOutcome::from_result(general),
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    async fn retrieve(
        &self,
        query: &str,
        options: &AnswerOptions,
    ) -> Result<(Vec<SearchResultItem>, u64)> {
        let started = Instant::now();
        let response = self
            .search
            .search(query, &options.search)
            .await
            .map_err(|e| match e {
                RagError::NotInitialized(_) | RagError::InvalidInput(_) => e,
                other => RagError::NoContext(format!("retrieval failed: {}", other)),
            })?;
        let retrieval_time_ms = started.elapsed().as_millis() as u64;

        if response.results.is_empty() {
            return Err(RagError::NoContext(format!(
                "no chunks matched above threshold {}",
                options.search.threshold
            )));
        }
        debug!(results = response.results.len(), retrieval_time_ms, "retrieved");
        Ok((response.results, retrieval_time_ms))
    }

    fn augment(
        &self,
        query: &str,
        results: &[SearchResultItem],
        options: &AnswerOptions,
        system_prompt: &str,
        answer_cue: &str,
    ) -> Result<Augmented> {
        let bare = PromptBuilder::new(query)
            .system_prompt(system_prompt)
            .history(&options.history, options.max_history_turns)
            .answer_cue(answer_cue);
        let base_tokens = estimate_tokens(&bare.build());
        if base_tokens > options.max_context_tokens {
            return Err(RagError::PromptTooLarge {
                required: base_tokens,
                budget: options.max_context_tokens,
            });
        }

        let (selected, context_tokens) = select_context(
            results,
            options.max_context_chunks,
            options.max_context_tokens,
            base_tokens,
        );
        if selected.is_empty() {
            let first = results
                .first()
                .map(|item| source_tokens(1, item))
                .unwrap_or(0);
            return Err(RagError::PromptTooLarge {
                required: base_tokens + first,
                budget: options.max_context_tokens,
            });
        }

        let sources = if options.include_sources {
            selected.iter().map(|item| to_source(item)).collect()
        } else {
            Vec::new()
        };
        let chunks_used = selected.len();
        let prompt = bare.sources(selected).build();

        debug!(chunks_used, context_tokens, base_tokens, "prompt assembled");
        Ok(Augmented {
            prompt,
            sources,
            chunks_used,
            context_tokens,
        })
    }

    async fn generate(&self, prompt: &str, timeout: Option<Duration>) -> Result<String> {
        let call = self.generator.generate(prompt, &self.generation);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RagError::timeout(limit))?,
            None => call.await,
        };
        outcome.map_err(as_generation_error)
    }
}

fn as_generation_error(error: RagError) -> RagError {
    match error {
        RagError::GenerationFailure { .. } | RagError::GenerationTimeout { .. } => error,
        other => RagError::generation(other.to_string()),
    }
}

fn to_source(item: &SearchResultItem) -> Source {
    Source {
        title: item.document.display_title().to_string(),
        preview: preview(&item.document.content),
        score: item.score,
        document_id: item.document.document_id.clone(),
        chunk_id: item.document.chunk_id.clone(),
    }
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
