//! Prompt assembly and token budgeting.
//!
//! Token counts are estimated as `ceil(chars / 4)`. Context chunks are
//! admitted greedily in rank order until the next one would exceed the
//! budget; smaller chunks further down are not backfilled. Each chunk is
//! charged for its rendered `Source N` block, header line included.

use std::fmt::Write;

use crate::types::{Message, MessageRole, SearchResultItem};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the question using only the \
     provided sources. If the sources do not contain the answer, say so. Cite sources as [Source N].";

pub const GENERAL_SYSTEM_PROMPT: &str =
    "You are a knowledgeable assistant. Answer the question from your general knowledge.";

pub const REASONING_INSTRUCTIONS: &str = "Think through the problem step by step before answering. \
     Write your reasoning first, then finish with a line that starts with \"Final Answer:\" \
     followed by the answer alone.";

pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

/// Heading placed before the first source.
pub const CONTEXT_HEADER: &str = "\nContext:\n";

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Rendered prompt block for the source at 1-based `position`.
fn source_block(position: usize, item: &SearchResultItem) -> String {
    format!(
        "Source {}: {} ({}% relevant)\n{}\n\n",
        position,
        item.document.display_title(),
        (item.score * 100.0).round() as i64,
        item.prompt_text().trim()
    )
}

/// Estimated tokens `item` adds to the prompt at 1-based `position`,
/// including the context heading when it is the first source.
pub fn source_tokens(position: usize, item: &SearchResultItem) -> usize {
    let heading = if position == 1 {
        estimate_tokens(CONTEXT_HEADER)
    } else {
        0
    };
    heading + estimate_tokens(&source_block(position, item))
}

/// Take results in rank order while `base_tokens` plus the running total
/// stays within `max_tokens`. Stops at the first result that does not fit.
pub fn select_context(
    results: &[SearchResultItem],
    max_chunks: usize,
    max_tokens: usize,
    base_tokens: usize,
) -> (Vec<&SearchResultItem>, usize) {
    let mut selected = Vec::new();
    let mut context_tokens = 0;

    for (i, item) in results.iter().take(max_chunks).enumerate() {
        let tokens = source_tokens(i + 1, item);
        if base_tokens + context_tokens + tokens > max_tokens {
            break;
        }
        context_tokens += tokens;
        selected.push(item);
    }

    (selected, context_tokens)
}

/// Builder for the document-grounded prompt.
#[derive(Debug, Clone)]
pub struct PromptBuilder<'a> {
    system_prompt: &'a str,
    sources: Vec<&'a SearchResultItem>,
    history: &'a [Message],
    max_history: usize,
    question: &'a str,
    answer_cue: &'a str,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(question: &'a str) -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT,
            sources: Vec::new(),
            history: &[],
            max_history: 6,
            question,
            answer_cue: "Answer:",
        }
    }

    pub fn system_prompt(mut self, system_prompt: &'a str) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn sources(mut self, sources: Vec<&'a SearchResultItem>) -> Self {
        self.sources = sources;
        self
    }

    /// Prior turns; only the most recent `max_history` are rendered.
    pub fn history(mut self, history: &'a [Message], max_history: usize) -> Self {
        self.history = history;
        self.max_history = max_history;
        self
    }

    pub fn answer_cue(mut self, cue: &'a str) -> Self {
        self.answer_cue = cue;
        self
    }

    pub fn build(&self) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "{}", self.system_prompt.trim());

        if !self.sources.is_empty() {
            prompt.push_str(CONTEXT_HEADER);
            for (i, item) in self.sources.iter().enumerate() {
                prompt.push_str(&source_block(i + 1, item));
            }
        }

        let skip = self.history.len().saturating_sub(self.max_history);
        let turns: Vec<&Message> = self
            .history
            .iter()
            .skip(skip)
            .filter(|m| m.role != MessageRole::System)
            .collect();
        if !turns.is_empty() {
            prompt.push_str("\nConversation so far:\n");
            for message in turns {
                let speaker = match message.role {
                    MessageRole::Assistant => "Assistant",
                    _ => "User",
                };
                let _ = writeln!(prompt, "{}: {}", speaker, message.content.trim());
            }
        }

        let _ = write!(
            prompt,
            "\nQuestion: {}\n\n{}",
            self.question.trim(),
            self.answer_cue
        );
        prompt
    }
}

/// A chain-of-thought completion split into reasoning and final answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReasoning {
    pub answer: String,
    pub reasoning: String,
    pub marker_found: bool,
}

/// Return the text after the last `Final Answer:` marker, or the whole
/// trimmed response when the marker is missing.
pub fn parse_final_answer(response: &str) -> ParsedReasoning {
    match response.rfind(FINAL_ANSWER_MARKER) {
        Some(pos) => ParsedReasoning {
            answer: response[pos + FINAL_ANSWER_MARKER.len()..].trim().to_string(),
            reasoning: response[..pos].trim().to_string(),
            marker_found: true,
        },
        None => ParsedReasoning {
            answer: response.trim().to_string(),
            reasoning: String::new(),
            marker_found: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkRecord, Metadata};
    use chrono::Utc;
    use uuid::Uuid;

    fn item(content: &str, score: f32, rank: usize) -> SearchResultItem {
        SearchResultItem {
            document: ChunkRecord {
                id: Uuid::new_v4(),
                chunk_id: format!("doc_chunk_{}", rank),
                document_id: "doc".to_string(),
                chunk_index: rank,
                title: Some("Handbook".to_string()),
                content: content.to_string(),
                metadata: Metadata::new(),
                created_at: Utc::now(),
            },
            score,
            rank,
            highlights: None,
            context: None,
        }
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // chars, not bytes
        assert_eq!(estimate_tokens("ñññññ"), 2);
    }

    #[test]
    fn test_source_tokens_include_heading_and_header_line() {
        let first = item(&"a".repeat(20), 0.9, 1);
        // "\nContext:\n" (3) + "Source 1: Handbook (90% relevant)\n" + 20 chars + "\n\n"
        assert_eq!(source_tokens(1, &first), 3 + 14);
        assert_eq!(source_tokens(2, &first), 14);
        assert!(source_tokens(2, &first) > estimate_tokens(first.prompt_text()));
    }

    #[test]
    fn test_budget_stops_at_first_overflow() {
        let items = vec![
            item(&"a".repeat(20), 0.9, 1),
            item(&"b".repeat(16), 0.8, 2),
            item(&"c".repeat(12), 0.7, 3),
        ];
        let first_two = source_tokens(1, &items[0]) + source_tokens(2, &items[1]);
        let (selected, tokens) = select_context(&items, 10, first_two, 0);
        let ranks: Vec<usize> = selected.iter().map(|i| i.rank).collect();
        assert_eq!(ranks, vec![1, 2]);
        assert_eq!(tokens, first_two);
    }

    #[test]
    fn test_budget_does_not_backfill() {
        // the third would fit but iteration stopped at the second
        let items = vec![
            item(&"a".repeat(20), 0.9, 1),
            item(&"b".repeat(400), 0.8, 2),
            item("c", 0.7, 3),
        ];
        let budget = source_tokens(1, &items[0]) + source_tokens(3, &items[2]) + 5;
        let (selected, _) = select_context(&items, 10, budget, 0);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_budget_counts_base_prompt_and_chunk_cap() {
        let items = vec![item(&"a".repeat(20), 0.9, 1), item(&"b".repeat(4), 0.8, 2)];
        let budget = source_tokens(1, &items[0]);
        let (selected, _) = select_context(&items, 10, budget, 2);
        assert!(selected.is_empty());

        let (selected, _) = select_context(&items, 1, 100, 0);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_rendered_prompt_stays_within_budget() {
        let items: Vec<SearchResultItem> = (1..=6)
            .map(|rank| item(&"word ".repeat(rank * 7), 0.95 - rank as f32 * 0.05, rank))
            .collect();
        let bare = PromptBuilder::new("How are keys rotated?").system_prompt("SYSTEM");
        let base_tokens = estimate_tokens(&bare.build());

        for budget in [base_tokens + 20, base_tokens + 45, base_tokens + 90, base_tokens + 400] {
            let (selected, context_tokens) = select_context(&items, 10, budget, base_tokens);
            let prompt = bare.clone().sources(selected).build();
            assert!(base_tokens + context_tokens <= budget);
            assert!(
                estimate_tokens(&prompt) <= budget,
                "prompt of {} tokens exceeds budget {}",
                estimate_tokens(&prompt),
                budget
            );
        }
    }

    #[test]
    fn test_prompt_layout() {
        let items = vec![item("Keys rotate every 90 days.", 0.873, 1)];
        let history = vec![
            Message::user("What is key rotation?"),
            Message::assistant("Replacing keys periodically."),
        ];
        let prompt = PromptBuilder::new("How often?")
            .system_prompt("SYSTEM")
            .sources(items.iter().collect())
            .history(&history, 6)
            .build();

        assert!(prompt.starts_with("SYSTEM\n"));
        assert!(prompt.contains("Source 1: Handbook (87% relevant)\nKeys rotate every 90 days."));
        assert!(prompt.contains("User: What is key rotation?\nAssistant: Replacing keys periodically."));
        assert!(prompt.ends_with("Question: How often?\n\nAnswer:"));

        let system_at = prompt.find("SYSTEM").unwrap();
        let source_at = prompt.find("Source 1").unwrap();
        let history_at = prompt.find("User:").unwrap();
        let question_at = prompt.find("Question:").unwrap();
        assert!(system_at < source_at && source_at < history_at && history_at < question_at);
    }

    #[test]
    fn test_history_is_capped_to_recent_turns() {
        let history: Vec<Message> = (0..10).map(|i| Message::user(format!("turn {}", i))).collect();
        let prompt = PromptBuilder::new("q").history(&history, 6).build();

        assert!(!prompt.contains("turn 3\n"));
        assert!(prompt.contains("turn 4\n"));
        assert!(prompt.contains("turn 9\n"));
    }

    #[test]
    fn test_parse_final_answer() {
        let parsed = parse_final_answer("...Reasoning: X. Final Answer: Y");
        assert_eq!(parsed.answer, "Y");
        assert_eq!(parsed.reasoning, "...Reasoning: X.");
        assert!(parsed.marker_found);
    }

    #[test]
    fn test_parse_without_marker_returns_trimmed_text() {
        let parsed = parse_final_answer("  just an answer \n");
        assert_eq!(parsed.answer, "just an answer");
        assert!(!parsed.marker_found);
    }
}
