//! Symbol-aware extraction using tree-sitter.
//!
//! Walks the top level of the parse tree and records one symbol per
//! function/class-like definition. Wrapper nodes (`export_statement`,
//! `decorated_definition`) contribute their full range but are named by
//! the definition they wrap. A leading comment block contiguous with the
//! definition is absorbed into the symbol's range.

use tree_sitter::{Language as TsLanguage, Node, Parser};

/// A named top-level definition with its 1-based inclusive line range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Whether a symbol extractor is registered for this language.
pub fn supports(language: &str) -> bool {
    grammar_for(language).is_some()
}

fn grammar_for(language: &str) -> Option<TsLanguage> {
    match language {
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "javascript" | "jsx" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        _ => None,
    }
}

/// Extract top-level symbols. Returns None when the language is
/// unsupported, parsing fails, or no symbol is found; the caller falls
/// back to sliding windows in all three cases.
pub fn extract(language: &str, content: &str) -> Option<Vec<Symbol>> {
    let grammar = grammar_for(language)?;
    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let mut symbols = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if let Some(symbol) = symbol_from_node(child, content) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        return None;
    }

    symbols.sort_by_key(|s| s.start_line);
    absorb_leading_comments(&mut symbols, language, content);
    Some(symbols)
}

/// Build a symbol from one top-level node, unwrapping export/decorator
/// wrappers: the wrapper supplies the line range, the inner definition the
/// name.
fn symbol_from_node(node: Node, src: &str) -> Option<Symbol> {
    let inner = unwrap_definition(node)?;
    let name = definition_name(inner, src)?;
    Some(Symbol {
        name,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    })
}

/// Peel `export_statement` / `decorated_definition` down to the definition
/// node, or return the node itself when it is already a definition kind.
fn unwrap_definition(node: Node) -> Option<Node> {
    match node.kind() {
        "export_statement" | "decorated_definition" => {
            let mut cursor = node.walk();
            let inner = node
                .named_children(&mut cursor)
                .find(|c| is_definition_kind(c.kind()))?;
            Some(inner)
        }
        kind if is_definition_kind(kind) => Some(node),
        _ => None,
    }
}

fn is_definition_kind(kind: &str) -> bool {
    matches!(
        kind,
        // Rust
        "function_item"
            | "struct_item"
            | "enum_item"
            | "trait_item"
            | "impl_item"
            // JavaScript / TypeScript
            | "function_declaration"
            | "generator_function_declaration"
            | "class_declaration"
            | "abstract_class_declaration"
            | "lexical_declaration"
            | "variable_declaration"
            // Python
            | "function_definition"
            | "class_definition"
    )
}

fn definition_name(node: Node, src: &str) -> Option<String> {
    match node.kind() {
        "lexical_declaration" | "variable_declaration" => {
            // Only `const f = () => {}` / `var f = function() {}` count as
            // function definitions; plain value bindings do not.
            let mut cursor = node.walk();
            let declarator = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "variable_declarator")?;
            let value = declarator.child_by_field_name("value")?;
            if !matches!(
                value.kind(),
                "arrow_function" | "function_expression" | "function" | "generator_function"
            ) {
                return None;
            }
            node_text(declarator.child_by_field_name("name")?, src)
        }
        "impl_item" => node_text(node.child_by_field_name("type")?, src),
        _ => node_text(node.child_by_field_name("name")?, src),
    }
}

fn node_text(node: Node, src: &str) -> Option<String> {
    node.utf8_text(src.as_bytes()).ok().map(|s| s.to_string())
}

/// Extend each symbol upward over a contiguous run of comment lines,
/// without crossing the previous symbol. Keeps symbols non-overlapping.
fn absorb_leading_comments(symbols: &mut [Symbol], language: &str, content: &str) {
    let lines: Vec<&str> = content.lines().collect();
    let mut floor = 0usize; // last line (1-based) claimed by the previous symbol

    for symbol in symbols.iter_mut() {
        let mut start = symbol.start_line;
        while start > floor + 1 {
            let above = lines.get(start - 2).map(|l| l.trim()).unwrap_or("");
            if above.is_empty() || !is_comment_line(above, language) {
                break;
            }
            start -= 1;
        }
        symbol.start_line = start;
        floor = symbol.end_line;
    }
}

fn is_comment_line(trimmed: &str, language: &str) -> bool {
    match language {
        "python" => trimmed.starts_with('#'),
        _ => {
            trimmed.starts_with("//")
                || trimmed.starts_with("/*")
                || trimmed.starts_with('*')
        }
    }
}
