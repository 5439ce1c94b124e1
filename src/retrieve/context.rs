//! Context assembly: turn ranked chunks into a grounded prompt with a
//! stable citation map.
//!
//! Every injected chunk is labeled `[N]`; the system prompt requires the
//! model to cite those keys and forbids inventing paths or line numbers.
//! The character budget drops whole chunks from the tail and trims the
//! citation map in lockstep so no dangling key can appear.

use crate::models::{Citation, RetrievedChunk};

/// Answer used when no chunk survives retrieval or the budget.
pub const NO_CONTEXT_ANSWER: &str =
    "No indexed code context matched this question. The repository may not cover \
     this topic, or it may need to be re-indexed.";

/// Rough chars-per-token divisor for estimates.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub user_prompt: String,
    pub citations: Vec<Citation>,
    pub token_estimate: usize,
    /// How many of the input chunks made it under the budget.
    pub included_chunks: usize,
}

pub fn assemble(
    query: &str,
    chunks: &[RetrievedChunk],
    repo_id: &str,
    char_budget: usize,
) -> AssembledContext {
    let system_prompt = build_system_prompt(repo_id);

    let mut user_prompt = format!("Question: {query}\n\nCode context:\n\n");
    let mut citations = Vec::new();

    for (i, retrieved) in chunks.iter().enumerate() {
        let key = format!("[{}]", i + 1);
        let block = format_chunk_block(&key, retrieved);

        // Budget check before committing the block; once one chunk is
        // dropped, everything after it is dropped too so citation numbering
        // stays dense.
        if user_prompt.len() + block.len() > char_budget {
            tracing::debug!(
                included = i,
                dropped = chunks.len() - i,
                "context budget reached, dropping tail chunks"
            );
            break;
        }

        user_prompt.push_str(&block);
        citations.push(Citation {
            key,
            file_path: retrieved.chunk.file_path.clone(),
            start_line: retrieved.chunk.start_line,
            end_line: retrieved.chunk.end_line,
            symbol_name: retrieved.chunk.symbol_name.clone(),
        });
    }

    if citations.is_empty() {
        user_prompt = format!(
            "Question: {query}\n\nNo code context was retrieved for this question. \
             State that no relevant context was available; do not answer from outside knowledge."
        );
    }

    let token_estimate = (system_prompt.len() + user_prompt.len()) / CHARS_PER_TOKEN;
    let included_chunks = citations.len();

    AssembledContext {
        system_prompt,
        user_prompt,
        citations,
        token_estimate,
        included_chunks,
    }
}

fn build_system_prompt(repo_id: &str) -> String {
    format!(
        "You are a code assistant answering questions about the repository {repo_id}.\n\
         Answer ONLY from the code snippets provided in the user message. Never use outside knowledge.\n\
         Never invent file paths or line numbers; refer only to the ones shown.\n\
         Every factual claim must reference a citation key like [1] or [2] from the provided snippets.\n\
         If the snippets do not answer the question, say what is missing instead of guessing.\n\
         Use markdown code blocks with language tags when quoting code."
    )
}

fn format_chunk_block(key: &str, retrieved: &RetrievedChunk) -> String {
    let chunk = &retrieved.chunk;
    let symbol = chunk
        .symbol_name
        .as_deref()
        .map(|s| format!(" · {s}"))
        .unwrap_or_default();
    format!(
        "{key} {} Lines {}–{}{symbol}\n```{}\n{}\n```\n\n",
        chunk.file_path, chunk.start_line, chunk.end_line, chunk.language, chunk.content
    )
}
