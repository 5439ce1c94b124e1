//! File acceptance filter.
//!
//! Pure and side-effect-free: every input file is classified exactly once,
//! either into `accepted` or into `rejected` with an enumerated reason, so
//! `|accepted| + |rejected| = |input|` always holds. Runs before any
//! expensive work (chunking, embedding).

use serde::Serialize;

use crate::models::RepoFile;

/// Files larger than this are rejected. The bound is inclusive: a file of
/// exactly 500 KiB is accepted.
pub const MAX_FILE_BYTES: u64 = 500 * 1024;

/// Directory segments that are never indexed.
const IGNORED_SEGMENTS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    "__pycache__",
    "vendor",
    "coverage",
    "target",
    "bin",
    "obj",
    "out",
    "venv",
    ".venv",
    "env",
];

/// Lockfiles carry no retrievable meaning and bloat the index.
const IGNORED_FILENAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "cargo.lock",
    "poetry.lock",
    "composer.lock",
    "gemfile.lock",
];

/// Why a file was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    IgnoredPath,
    ExtensionNotAllowed,
    TooLarge,
    Binary,
    Empty,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::IgnoredPath => "ignored-path",
            RejectReason::ExtensionNotAllowed => "extension-not-allowed",
            RejectReason::TooLarge => "too-large",
            RejectReason::Binary => "binary",
            RejectReason::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedFile {
    pub path: String,
    pub reason: RejectReason,
}

#[derive(Debug)]
pub struct FilterOutcome {
    pub accepted: Vec<RepoFile>,
    pub rejected: Vec<RejectedFile>,
}

/// Classify every file into accepted or rejected.
pub fn filter_files(files: Vec<RepoFile>) -> FilterOutcome {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for file in files {
        match classify(&file) {
            None => accepted.push(file),
            Some(reason) => rejected.push(RejectedFile {
                path: file.path,
                reason,
            }),
        }
    }

    FilterOutcome { accepted, rejected }
}

/// Returns the rejection reason, or None when the file is accepted.
/// Checks run cheapest-first; the first failing check names the reason.
fn classify(file: &RepoFile) -> Option<RejectReason> {
    if is_ignored_path(&file.path) {
        return Some(RejectReason::IgnoredPath);
    }
    if !is_allowed_file(&file.path) {
        return Some(RejectReason::ExtensionNotAllowed);
    }
    if file.size_bytes > MAX_FILE_BYTES {
        return Some(RejectReason::TooLarge);
    }
    if looks_binary(&file.content) {
        return Some(RejectReason::Binary);
    }
    if file.content.trim().is_empty() {
        return Some(RejectReason::Empty);
    }
    None
}

fn is_ignored_path(path: &str) -> bool {
    let mut segments = path.split('/').peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        let lower = segment.to_lowercase();
        if !is_last {
            // Directory segment: hidden dirs and the known junk set.
            if segment.starts_with('.') || IGNORED_SEGMENTS.contains(&lower.as_str()) {
                return true;
            }
        } else if IGNORED_FILENAMES.contains(&lower.as_str()) {
            return true;
        }
    }
    false
}

/// Whether the path names an indexable text/code file, by extension or by
/// well-known extensionless filename.
fn is_allowed_file(path: &str) -> bool {
    let filename = path
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_lowercase();

    if matches!(
        filename.as_str(),
        "makefile"
            | "dockerfile"
            | "rakefile"
            | "gemfile"
            | "cmakelists.txt"
            | "readme"
            | "license"
            | ".gitignore"
            | ".dockerignore"
    ) {
        return true;
    }

    let ext = filename.rsplit_once('.').map(|(_, e)| e).unwrap_or("");

    matches!(
        ext,
        "rs" | "py"
            | "js"
            | "ts"
            | "tsx"
            | "jsx"
            | "mjs"
            | "cjs"
            | "go"
            | "java"
            | "c"
            | "cpp"
            | "cc"
            | "h"
            | "hpp"
            | "cs"
            | "rb"
            | "php"
            | "swift"
            | "kt"
            | "kts"
            | "scala"
            | "r"
            | "lua"
            | "sh"
            | "bash"
            | "zsh"
            | "fish"
            | "ps1"
            | "bat"
            | "cmd"
            | "sql"
            | "html"
            | "css"
            | "scss"
            | "less"
            | "xml"
            | "json"
            | "yaml"
            | "yml"
            | "toml"
            | "ini"
            | "cfg"
            | "conf"
            | "md"
            | "rst"
            | "txt"
            | "tex"
            | "proto"
            | "graphql"
            | "gql"
            | "vue"
            | "svelte"
            | "ex"
            | "exs"
            | "erl"
            | "hs"
            | "ml"
            | "mli"
            | "clj"
            | "cljs"
            | "el"
            | "vim"
            | "tf"
            | "hcl"
            | "nix"
            | "zig"
            | "dart"
            | "v"
            | "nim"
            | "cr"
            | "jl"
    )
}

/// Heuristic binary detection over already-decoded content. A NUL byte is
/// decisive; a high density of other control characters also disqualifies
/// (undecodable bytes arrive as U+FFFD from the lossy decode).
fn looks_binary(content: &str) -> bool {
    if content.contains('\0') {
        return true;
    }
    if content.is_empty() {
        return false;
    }
    let sample: Vec<char> = content.chars().take(4096).collect();
    let suspicious = sample
        .iter()
        .filter(|c| (c.is_control() && !matches!(c, '\n' | '\r' | '\t')) || **c == '\u{FFFD}')
        .count();
    suspicious * 10 > sample.len()
}

/// Map a file path to a language tag used by the chunker and stored on
/// each chunk.
pub fn detect_language(path: &str) -> String {
    let filename = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    let ext = filename.rsplit_once('.').map(|(_, e)| e).unwrap_or("");

    match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "ts" => "typescript",
        "tsx" => "tsx",
        "go" => "go",
        "java" => "java",
        "c" => "c",
        "cpp" | "cc" | "h" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "r" => "r",
        "lua" => "lua",
        "sh" | "bash" | "zsh" | "fish" => "shell",
        "sql" => "sql",
        "html" => "html",
        "css" | "scss" | "less" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "md" | "rst" | "txt" => "text",
        "proto" => "protobuf",
        "graphql" | "gql" => "graphql",
        "vue" => "vue",
        "svelte" => "svelte",
        "zig" => "zig",
        "dart" => "dart",
        "nim" => "nim",
        "jl" => "julia",
        "ex" | "exs" => "elixir",
        "hs" => "haskell",
        "clj" | "cljs" => "clojure",
        "tf" | "hcl" => "hcl",
        "nix" => "nix",
        _ => "text",
    }
    .to_string()
}
