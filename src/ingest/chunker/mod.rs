//! Chunking: symbol-aware where a language extractor is registered,
//! overlapping sliding windows everywhere else.
//!
//! Symbol-aware output also emits unnamed chunks for the regions between
//! symbols (imports, module-level statements) so the union of chunk ranges
//! covers every non-blank line of the file. Oversized chunks are split at
//! line boundaries; the symbol name survives only on the first piece.

pub mod symbols;
pub mod window;

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkStrategy};

/// Output of chunking one file.
#[derive(Debug)]
pub struct ChunkSet {
    pub chunks: Vec<Chunk>,
    pub strategy: ChunkStrategy,
}

/// A line range with an optional symbol name, before materialization.
#[derive(Debug, Clone)]
struct Span {
    start_line: usize,
    end_line: usize,
    symbol_name: Option<String>,
}

/// Split one file into chunks.
pub fn chunk_file(
    repo_id: &str,
    path: &str,
    language: &str,
    content: &str,
    config: &ChunkingConfig,
) -> ChunkSet {
    if content.trim().is_empty() {
        return ChunkSet {
            chunks: Vec::new(),
            strategy: ChunkStrategy::SlidingWindow,
        };
    }

    let lines: Vec<&str> = content.lines().collect();

    let (spans, strategy) = match symbols::extract(language, content) {
        Some(found) => (symbol_spans(&found, &lines), ChunkStrategy::Ast),
        None => {
            let spans = window::window_ranges(lines.len(), config.window_lines, config.window_overlap)
                .into_iter()
                .map(|(start_line, end_line)| Span {
                    start_line,
                    end_line,
                    symbol_name: None,
                })
                .collect();
            (spans, ChunkStrategy::SlidingWindow)
        }
    };

    let mut chunks = Vec::new();
    for span in spans {
        for piece in split_to_budget(&lines, span, config.max_chunk_chars) {
            let content: String =
                lines[piece.0.start_line - 1..piece.0.end_line].join("\n");
            let content = piece.1.unwrap_or(content);
            chunks.push(Chunk {
                id: Uuid::new_v4(),
                repo_id: repo_id.to_string(),
                file_path: path.to_string(),
                language: language.to_string(),
                symbol_name: piece.0.symbol_name,
                start_line: piece.0.start_line,
                end_line: piece.0.end_line,
                content,
                chunk_index: chunks.len(),
            });
        }
    }

    ChunkSet { chunks, strategy }
}

/// Turn extracted symbols into spans, inserting unnamed gap spans for the
/// non-blank regions between them.
fn symbol_spans(found: &[symbols::Symbol], lines: &[&str]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut prev_end = 0usize;

    for symbol in found {
        if symbol.start_line > prev_end + 1 {
            if let Some(gap) = trimmed_gap(lines, prev_end + 1, symbol.start_line - 1) {
                spans.push(gap);
            }
        }
        spans.push(Span {
            start_line: symbol.start_line,
            end_line: symbol.end_line.min(lines.len()),
            symbol_name: Some(symbol.name.clone()),
        });
        prev_end = symbol.end_line;
    }

    if prev_end < lines.len() {
        if let Some(gap) = trimmed_gap(lines, prev_end + 1, lines.len()) {
            spans.push(gap);
        }
    }

    spans
}

/// A gap span trimmed to its first and last non-blank line, or None when
/// the region is all blank.
fn trimmed_gap(lines: &[&str], start_line: usize, end_line: usize) -> Option<Span> {
    let first = (start_line..=end_line).find(|&n| !lines[n - 1].trim().is_empty())?;
    let last = (start_line..=end_line).rev().find(|&n| !lines[n - 1].trim().is_empty())?;
    Some(Span {
        start_line: first,
        end_line: last,
        symbol_name: None,
    })
}

/// Enforce the per-chunk character cap. Pieces split from an oversized
/// span keep its line attribution; only the first piece keeps the symbol
/// name. Returns (span, override_content) pairs; the override is only set
/// for intra-line splits of a single overlong line.
fn split_to_budget(
    lines: &[&str],
    span: Span,
    max_chars: usize,
) -> Vec<(Span, Option<String>)> {
    let total: usize = (span.start_line..=span.end_line)
        .map(|n| lines[n - 1].len() + 1)
        .sum();
    if total <= max_chars {
        return vec![(span, None)];
    }

    let mut pieces: Vec<(Span, Option<String>)> = Vec::new();
    let mut piece_start = span.start_line;
    let mut piece_chars = 0usize;

    for n in span.start_line..=span.end_line {
        let line_len = lines[n - 1].len() + 1;

        if line_len > max_chars {
            // A single line over the cap: flush, then hard-split the line.
            if n > piece_start {
                push_piece(&mut pieces, &span, piece_start, n - 1, None);
            }
            for part in split_long_line(lines[n - 1], max_chars) {
                push_piece(&mut pieces, &span, n, n, Some(part));
            }
            piece_start = n + 1;
            piece_chars = 0;
            continue;
        }

        if piece_chars + line_len > max_chars && n > piece_start {
            push_piece(&mut pieces, &span, piece_start, n - 1, None);
            piece_start = n;
            piece_chars = 0;
        }
        piece_chars += line_len;
    }

    if piece_start <= span.end_line {
        push_piece(&mut pieces, &span, piece_start, span.end_line, None);
    }

    pieces
}

fn push_piece(
    pieces: &mut Vec<(Span, Option<String>)>,
    span: &Span,
    start_line: usize,
    end_line: usize,
    content_override: Option<String>,
) {
    // The symbol name belongs to the first piece only.
    let symbol_name = if pieces.is_empty() {
        span.symbol_name.clone()
    } else {
        None
    };
    pieces.push((
        Span {
            start_line,
            end_line,
            symbol_name,
        },
        content_override,
    ));
}

/// Split one overlong line at char boundaries into pieces of at most
/// `max_chars` bytes.
fn split_long_line(line: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = line;
    while rest.len() > max_chars {
        let mut cut = max_chars;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        parts.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            max_chunk_chars: 8_000,
            window_lines: 40,
            window_overlap: 8,
        }
    }

    // ── strategy selection ──────────────────────────────

    #[test]
    fn test_typescript_two_functions() {
        let src = "export function handleLogin(user: string) {\n    return user;\n}\n\nexport function handleLogout() {\n    return null;\n}\n";
        let set = chunk_file("acme/auth", "src/auth/login.ts", "typescript", src, &config());
        assert_eq!(set.strategy, ChunkStrategy::Ast);
        assert_eq!(set.chunks.len(), 2);
        assert_eq!(set.chunks[0].symbol_name.as_deref(), Some("handleLogin"));
        assert_eq!(set.chunks[1].symbol_name.as_deref(), Some("handleLogout"));
        assert_eq!(set.chunks[0].chunk_index, 0);
        assert_eq!(set.chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_markdown_uses_sliding_window() {
        let src: String = (1..=100).map(|i| format!("line {i}\n")).collect();
        let set = chunk_file("a/b", "README.md", "text", &src, &config());
        assert_eq!(set.strategy, ChunkStrategy::SlidingWindow);
        assert!(set.chunks.len() >= 2);
        for chunk in &set.chunks {
            assert!(chunk.start_line >= 1 && chunk.end_line <= 100);
            assert!(chunk.symbol_name.is_none());
        }
    }

    #[test]
    fn test_empty_file_yields_no_chunks() {
        let set = chunk_file("a/b", "empty.rs", "rust", "", &config());
        assert!(set.chunks.is_empty());
        let set = chunk_file("a/b", "blank.rs", "rust", "  \n\n  ", &config());
        assert!(set.chunks.is_empty());
    }

    #[test]
    fn test_single_line_file() {
        let set = chunk_file("a/b", "one.md", "text", "just one line", &config());
        assert_eq!(set.chunks.len(), 1);
        assert_eq!(set.chunks[0].start_line, 1);
        assert_eq!(set.chunks[0].end_line, 1);
    }

    #[test]
    fn test_comment_only_file_falls_back_to_windows() {
        let src = "// nothing but commentary\n// and more commentary\n";
        let set = chunk_file("a/b", "notes.rs", "rust", src, &config());
        assert_eq!(set.strategy, ChunkStrategy::SlidingWindow);
        assert_eq!(set.chunks.len(), 1);
    }

    // ── content integrity ───────────────────────────────

    #[test]
    fn test_chunk_content_matches_line_range() {
        let src = "fn alpha() {\n    one();\n}\n\nfn beta() {\n    two();\n}\n";
        let set = chunk_file("a/b", "lib.rs", "rust", src, &config());
        let lines: Vec<&str> = src.lines().collect();
        for chunk in &set.chunks {
            let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
            assert_eq!(chunk.content, expected);
        }
    }

    #[test]
    fn test_ast_chunks_cover_non_blank_lines() {
        let src = "use std::io;\n\nfn alpha() {\n    one();\n}\n\nconst X: u32 = 1;\n\nfn beta() {}\n";
        let set = chunk_file("a/b", "lib.rs", "rust", src, &config());
        assert_eq!(set.strategy, ChunkStrategy::Ast);

        let lines: Vec<&str> = src.lines().collect();
        let mut covered = vec![false; lines.len() + 1];
        for chunk in &set.chunks {
            for n in chunk.start_line..=chunk.end_line {
                covered[n] = true;
            }
        }
        for (i, line) in lines.iter().enumerate() {
            if !line.trim().is_empty() {
                assert!(covered[i + 1], "non-blank line {} not covered", i + 1);
            }
        }
    }

    #[test]
    fn test_gap_chunks_have_no_symbol_name() {
        let src = "use std::io;\nuse std::fmt;\n\nfn only() {}\n";
        let set = chunk_file("a/b", "lib.rs", "rust", src, &config());
        assert_eq!(set.chunks.len(), 2);
        assert!(set.chunks[0].symbol_name.is_none());
        assert_eq!(set.chunks[0].start_line, 1);
        assert_eq!(set.chunks[0].end_line, 2);
        assert_eq!(set.chunks[1].symbol_name.as_deref(), Some("only"));
    }

    #[test]
    fn test_windows_cover_all_lines_exactly() {
        let src: String = (1..=90).map(|i| format!("row {i}\n")).collect();
        let set = chunk_file("a/b", "data.txt", "text", &src, &config());
        let mut covered = vec![false; 91];
        for chunk in &set.chunks {
            for n in chunk.start_line..=chunk.end_line {
                covered[n] = true;
            }
        }
        assert!(covered[1..].iter().all(|c| *c));
    }

    #[test]
    fn test_chunk_index_is_monotone_per_file() {
        let src: String = (1..=150).map(|i| format!("line {i}\n")).collect();
        let set = chunk_file("a/b", "big.txt", "text", &src, &config());
        for (i, chunk) in set.chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    // ── oversize splitting ──────────────────────────────

    #[test]
    fn test_oversized_symbol_split_at_line_boundary() {
        // A function body of ~200 lines × 60 chars ≈ 12 000 chars
        let body: String = (0..200)
            .map(|i| format!("    let value_{i} = compute_something_interesting({i});\n"))
            .collect();
        let src = format!("fn enormous() {{\n{body}}}\n");
        let set = chunk_file("a/b", "gen.rs", "rust", &src, &config());

        assert!(set.chunks.len() >= 2, "oversized symbol must split");
        assert_eq!(set.chunks[0].symbol_name.as_deref(), Some("enormous"));
        for piece in &set.chunks[1..] {
            assert!(piece.symbol_name.is_none(), "only the first piece keeps the name");
        }
        for chunk in &set.chunks {
            assert!(chunk.content.len() <= 8_000);
        }
    }

    #[test]
    fn test_single_overlong_line_hard_split() {
        let src = "x".repeat(20_000);
        let set = chunk_file("a/b", "blob.txt", "text", &src, &config());
        assert!(set.chunks.len() >= 3);
        for chunk in &set.chunks {
            assert!(chunk.content.len() <= 8_000);
            assert_eq!(chunk.start_line, 1);
            assert_eq!(chunk.end_line, 1);
        }
    }

    #[test]
    fn test_split_long_line_respects_char_boundaries() {
        let line = "é".repeat(5_000); // 10 000 bytes
        let parts = split_long_line(&line, 8_000);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.concat(), line);
    }

    // ── round-trip ──────────────────────────────────────

    #[test]
    fn test_rechunking_yields_same_symbol_set() {
        let src = "/// Doc.\nfn alpha() {\n    one();\n}\n\nstruct Thing {\n    x: u32,\n}\n\nfn beta() {}\n";
        let first = chunk_file("a/b", "lib.rs", "rust", src, &config());

        let reassembled: String = first
            .chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let second = chunk_file("a/b", "lib.rs", "rust", &reassembled, &config());

        let names = |set: &ChunkSet| {
            set.chunks
                .iter()
                .filter_map(|c| c.symbol_name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&first), names(&second));
    }
}
