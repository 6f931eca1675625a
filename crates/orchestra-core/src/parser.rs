//! Extraction of file operations from free-form agent output.
//!
//! The only recognized shape is a path marker line followed by a fenced code
//! region:
//!
//! ````text
//! ### Create: src/lib.rs
//! ```rust
//! pub fn answer() -> u32 { 42 }
//! ```
//! ````
//!
//! Parsing is best effort. Regions without a recoverable path are recorded as
//! skipped and never fail the parse. Deletions come only from plain-text
//! marker lines carrying a delete verb.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Marker lines further back than this are not considered.
const MAX_LOOKBACK: usize = 3;

/// Operation a marker line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Create,
    Modify,
    Delete,
    /// Path given without a verb; resolved against the filesystem later.
    Unspecified,
}

/// One recovered file operation, before filesystem resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedBlock {
    pub path: String,
    pub intent: Intent,
    /// Full proposed content. `None` for deletions.
    pub content: Option<String>,
    pub language: Option<String>,
}

/// A fenced region that produced no operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRegion {
    /// 1-based line of the opening fence.
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub blocks: Vec<ParsedBlock>,
    pub skipped: Vec<SkippedRegion>,
}

struct Fence {
    ch: char,
    len: usize,
    hint: Option<String>,
}

/// Parse one agent response.
pub fn parse_response(text: &str) -> ParseOutcome {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks: Vec<ParsedBlock> = Vec::new();
    let mut skipped = Vec::new();
    // Non-blank plain lines since the previous fenced region.
    let mut pending: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let Some(fence) = open_fence(line) else {
            if !line.trim().is_empty() {
                pending.push(line);
                if let Some((path, Intent::Delete)) = parse_marker(line) {
                    blocks.push(ParsedBlock {
                        path,
                        intent: Intent::Delete,
                        content: None,
                        language: None,
                    });
                }
            }
            i += 1;
            continue;
        };

        let Some(close) = (i + 1..lines.len()).find(|&j| closes(lines[j], &fence)) else {
            skipped.push(SkippedRegion {
                line: i + 1,
                reason: "unclosed fence".to_string(),
            });
            break;
        };

        let marker = pending
            .iter()
            .rev()
            .take(MAX_LOOKBACK)
            .filter_map(|l| parse_marker(l))
            .find(|(_, intent)| *intent != Intent::Delete);

        match marker {
            Some((path, intent)) => {
                let body = &lines[i + 1..close];
                let content = if body.is_empty() {
                    String::new()
                } else {
                    let mut joined = body.join("\n");
                    joined.push('\n');
                    joined
                };
                let language = fence.hint.clone().or_else(|| infer_language(&path));
                blocks.push(ParsedBlock {
                    path,
                    intent,
                    content: Some(content),
                    language,
                });
            }
            None => skipped.push(SkippedRegion {
                line: i + 1,
                reason: "no file path marker before fence".to_string(),
            }),
        }

        pending.clear();
        i = close + 1;
    }

    ParseOutcome {
        blocks: last_occurrence_wins(blocks),
        skipped,
    }
}

fn last_occurrence_wins(blocks: Vec<ParsedBlock>) -> Vec<ParsedBlock> {
    let mut last: HashMap<String, usize> = HashMap::new();
    for (idx, block) in blocks.iter().enumerate() {
        last.insert(block.path.clone(), idx);
    }
    blocks
        .into_iter()
        .enumerate()
        .filter(|(idx, block)| last.get(&block.path) == Some(idx))
        .map(|(_, block)| block)
        .collect()
}

fn open_fence(line: &str) -> Option<Fence> {
    let trimmed = line.trim_start();
    let ch = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = trimmed.chars().take_while(|c| *c == ch).count();
    if len < 3 {
        return None;
    }
    let info = trimmed[len..].trim();
    if ch == '`' && info.contains('`') {
        return None;
    }
    let hint = info
        .split_whitespace()
        .next()
        .map(|s| s.trim_start_matches(&['{', '.'][..]).trim_end_matches('}').to_string())
        .filter(|s| !s.is_empty() && !s.contains('`'));
    Some(Fence { ch, len, hint })
}

fn closes(line: &str, fence: &Fence) -> bool {
    let trimmed = line.trim();
    trimmed.chars().count() >= fence.len && trimmed.chars().all(|c| c == fence.ch)
}

const VERBS: &[(&str, Intent)] = &[
    ("create", Intent::Create),
    ("created", Intent::Create),
    ("new", Intent::Create),
    ("add", Intent::Create),
    ("added", Intent::Create),
    ("modify", Intent::Modify),
    ("modified", Intent::Modify),
    ("update", Intent::Modify),
    ("updated", Intent::Modify),
    ("edit", Intent::Modify),
    ("edited", Intent::Modify),
    ("change", Intent::Modify),
    ("changed", Intent::Modify),
    ("delete", Intent::Delete),
    ("deleted", Intent::Delete),
    ("remove", Intent::Delete),
    ("removed", Intent::Delete),
    ("filename", Intent::Unspecified),
    ("file", Intent::Unspecified),
    ("path", Intent::Unspecified),
];

fn verb_intent(word: &str) -> Option<Intent> {
    let word = word.trim();
    let word = word
        .strip_suffix(" file")
        .map(str::trim_end)
        .unwrap_or(word);
    VERBS
        .iter()
        .find(|(verb, _)| verb.eq_ignore_ascii_case(word))
        .map(|(_, intent)| *intent)
}

/// Interpret a plain-text line as a path marker.
fn parse_marker(line: &str) -> Option<(String, Intent)> {
    let cleaned = strip_decoration(line);
    if cleaned.is_empty() {
        return None;
    }

    // Prefix verb: "Create: src/a.rs", "New file src/a.rs".
    if let Some((head, rest)) = split_verb_prefix(&cleaned) {
        let intent = verb_intent(head)?;
        let path = clean_path(rest);
        return looks_like_path(&path).then_some((path, intent));
    }

    // Suffix verb: "src/a.rs (new)".
    if let Some(stripped) = cleaned.strip_suffix(')') {
        if let Some(open) = stripped.rfind('(') {
            let intent = verb_intent(&stripped[open + 1..])?;
            let path = clean_path(&stripped[..open]);
            return looks_like_path(&path).then_some((path, intent));
        }
    }

    let path = clean_path(&cleaned);
    looks_like_path(&path).then_some((path, Intent::Unspecified))
}

/// Split `"<verb>[ file][:] <rest>"`. Returns the verb phrase and the rest.
fn split_verb_prefix(s: &str) -> Option<(&str, &str)> {
    if let Some(colon) = s.find(':') {
        let head = &s[..colon];
        if verb_intent(head).is_some() {
            return Some((head, &s[colon + 1..]));
        }
    }
    let mut words = s.splitn(3, char::is_whitespace);
    let first = words.next()?;
    let second = words.next()?;
    if second.eq_ignore_ascii_case("file") || second.eq_ignore_ascii_case("file:") {
        let rest = words.next()?;
        let head_len = s.len() - rest.len();
        return verb_intent(first).map(|_| (&s[..first.len()], &s[head_len..]));
    }
    verb_intent(first).map(|_| (first, s[first.len()..].trim_start()))
}

fn strip_decoration(line: &str) -> String {
    let mut s = line.trim().replace('`', "").replace("**", "");
    loop {
        let before = s.len();
        let t = s.trim_start();
        let t = t.trim_start_matches('#').trim_start_matches('>');
        let t = strip_list_marker(t.trim_start());
        s = t.trim().to_string();
        if s.len() == before {
            break;
        }
    }
    while let Some(inner) = s.strip_prefix("__").and_then(|x| x.strip_suffix("__")) {
        s = inner.trim().to_string();
    }
    s.trim_end_matches(':').trim().to_string()
}

fn strip_list_marker(s: &str) -> &str {
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = s.strip_prefix(bullet) {
            return rest;
        }
    }
    let digits = s.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &s[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest;
        }
    }
    s
}

fn clean_path(raw: &str) -> String {
    let mut path = raw.trim().trim_end_matches(':').trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

const BARE_FILE_NAMES: &[(&str, Option<&str>)] = &[
    ("Dockerfile", Some("dockerfile")),
    ("Makefile", Some("makefile")),
    (".gitignore", None),
    (".dockerignore", None),
    (".editorconfig", None),
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("jsx", "jsx"),
    ("ts", "typescript"),
    ("tsx", "tsx"),
    ("go", "go"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("scala", "scala"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("dart", "dart"),
    ("lua", "lua"),
    ("ex", "elixir"),
    ("exs", "elixir"),
    ("hs", "haskell"),
    ("sh", "bash"),
    ("bash", "bash"),
    ("zsh", "zsh"),
    ("sql", "sql"),
    ("html", "html"),
    ("css", "css"),
    ("scss", "scss"),
    ("vue", "vue"),
    ("svelte", "svelte"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("toml", "toml"),
    ("xml", "xml"),
    ("ini", "ini"),
    ("cfg", "ini"),
    ("proto", "protobuf"),
    ("gradle", "groovy"),
    ("md", "markdown"),
    ("txt", "text"),
];

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn looks_like_path(path: &str) -> bool {
    if path.is_empty() || path.len() > 255 || path.contains("://") {
        return false;
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "._-/@+".contains(c);
    if !path.chars().all(allowed) {
        return false;
    }
    let name = file_name(path);
    if BARE_FILE_NAMES.iter().any(|(bare, _)| *bare == name) {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|(known, _)| known.eq_ignore_ascii_case(ext)))
}

/// Language tag for `path` from its extension or well-known file name.
pub fn infer_language(path: &str) -> Option<String> {
    let name = file_name(path);
    if let Some((_, lang)) = BARE_FILE_NAMES.iter().find(|(bare, _)| *bare == name) {
        return lang.map(str::to_string);
    }
    let ext = Path::new(name).extension()?.to_str()?;
    EXTENSIONS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, lang)| lang.to_string())
}

/// Canonical text form of `blocks`; parsing it yields the same blocks.
pub fn render_blocks(blocks: &[ParsedBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        let verb = match block.intent {
            Intent::Create => "Create",
            Intent::Modify => "Modify",
            Intent::Delete => "Delete",
            Intent::Unspecified => "File",
        };
        let _ = writeln!(out, "{verb}: {}", block.path);
        if let Some(content) = &block.content {
            let fence = "`".repeat(longest_backtick_run(content).max(2) + 1);
            let _ = writeln!(out, "{fence}{}", block.language.as_deref().unwrap_or(""));
            out.push_str(content);
            if !content.is_empty() && !content.ends_with('\n') {
                out.push('\n');
            }
            let _ = writeln!(out, "{fence}");
        }
        out.push('\n');
    }
    out
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(outcome: &ParseOutcome) -> Vec<&str> {
        outcome.blocks.iter().map(|b| b.path.as_str()).collect()
    }

    #[test]
    fn test_heading_marker_with_hint() {
        let text = "Here you go.\n\n### src/lib.rs\n```rust\npub fn a() {}\n```\n";
        let outcome = parse_response(text);
        assert_eq!(outcome.blocks.len(), 1);
        let block = &outcome.blocks[0];
        assert_eq!(block.path, "src/lib.rs");
        assert_eq!(block.intent, Intent::Unspecified);
        assert_eq!(block.content.as_deref(), Some("pub fn a() {}\n"));
        assert_eq!(block.language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_braced_attribute_hint() {
        for (open, close) in [("~~~ {.toml}", "~~~"), ("``` {.toml}", "```"), ("~~~{.toml .numberLines}", "~~~")] {
            let text = format!("### Cargo.toml\n{open}\n[package]\n{close}\n");
            let outcome = parse_response(&text);
            assert_eq!(outcome.blocks.len(), 1, "{open}");
            assert_eq!(outcome.blocks[0].language.as_deref(), Some("toml"), "{open}");
            assert_eq!(outcome.blocks[0].content.as_deref(), Some("[package]\n"));
        }
    }

    #[test]
    fn test_verb_prefix_and_suffix_markers() {
        let text = "\
**Create: `src/new.rs`**
```
fn n() {}
```

- src/old.py (modified)
~~~
print(1)
~~~
";
        let outcome = parse_response(text);
        assert_eq!(paths(&outcome), vec!["src/new.rs", "src/old.py"]);
        assert_eq!(outcome.blocks[0].intent, Intent::Create);
        assert_eq!(outcome.blocks[0].language.as_deref(), Some("rust"));
        assert_eq!(outcome.blocks[1].intent, Intent::Modify);
        assert_eq!(outcome.blocks[1].language.as_deref(), Some("python"));
    }

    #[test]
    fn test_fence_without_marker_is_skipped() {
        let text = "Run this:\n```bash\ncargo test\n```\n";
        let outcome = parse_response(text);
        assert!(outcome.blocks.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].line, 2);
    }

    #[test]
    fn test_marker_too_far_back_is_ignored() {
        let text = "src/a.rs\none\ntwo\nthree\n```\nx\n```\n";
        let outcome = parse_response(text);
        assert!(outcome.blocks.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn test_marker_not_reused_across_fences() {
        let text = "File: a.rs\n```\n1\n```\n```\n2\n```\n";
        let outcome = parse_response(text);
        assert_eq!(outcome.blocks.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn test_delete_marker() {
        let text = "Delete: src/legacy.rs\n\nFile: src/lib.rs\n```\nmod x;\n```\n";
        let outcome = parse_response(text);
        assert_eq!(paths(&outcome), vec!["src/legacy.rs", "src/lib.rs"]);
        assert_eq!(outcome.blocks[0].intent, Intent::Delete);
        assert_eq!(outcome.blocks[0].content, None);
    }

    #[test]
    fn test_delete_marker_never_claims_fence() {
        let text = "Remove: src/gone.rs\n```\nleftover\n```\n";
        let outcome = parse_response(text);
        assert_eq!(outcome.blocks.len(), 1);
        assert_eq!(outcome.blocks[0].intent, Intent::Delete);
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn test_last_occurrence_wins() {
        let text = "a.rs\n```\nfirst\n```\nb.rs\n```\nb\n```\na.rs\n```\nsecond\n```\n";
        let outcome = parse_response(text);
        assert_eq!(paths(&outcome), vec!["b.rs", "a.rs"]);
        assert_eq!(outcome.blocks[1].content.as_deref(), Some("second\n"));
    }

    #[test]
    fn test_longer_fence_contains_shorter() {
        let text = "README.md\n````markdown\n```\ninner\n```\n````\n";
        let outcome = parse_response(text);
        assert_eq!(outcome.blocks.len(), 1);
        assert_eq!(outcome.blocks[0].content.as_deref(), Some("```\ninner\n```\n"));
    }

    #[test]
    fn test_unclosed_fence_is_skipped() {
        let text = "src/a.rs\n```\nnever closed\n";
        let outcome = parse_response(text);
        assert!(outcome.blocks.is_empty());
        assert_eq!(outcome.skipped[0].reason, "unclosed fence");
    }

    #[test]
    fn test_prose_is_not_a_marker() {
        assert_eq!(parse_marker("This updates the parser to be faster."), None);
        assert_eq!(parse_marker("see https://example.com/a.rs"), None);
        assert_eq!(parse_marker("Cargo.toml"), Some(("Cargo.toml".into(), Intent::Unspecified)));
        assert_eq!(
            parse_marker("1. New file: ./src/x.ts"),
            Some(("src/x.ts".into(), Intent::Create))
        );
        assert_eq!(
            parse_marker("## `src/__init__.py`:"),
            Some(("src/__init__.py".into(), Intent::Unspecified))
        );
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(parse_response(""), ParseOutcome::default());
        assert_eq!(parse_response("I could not do that."), ParseOutcome::default());
    }

    #[test]
    fn test_render_is_reparseable() {
        let text = "Create: src/a.rs\n```rust\nlet s = \"```\";\n```\n\nDelete: b.txt\nMakefile\n```\n```\n";
        let first = parse_response(text);
        let second = parse_response(&render_blocks(&first.blocks));
        assert_eq!(first.blocks, second.blocks);
        assert!(second.skipped.is_empty());
    }

    #[test]
    fn test_infer_language() {
        assert_eq!(infer_language("a/b/c.RS").as_deref(), Some("rust"));
        assert_eq!(infer_language("Dockerfile").as_deref(), Some("dockerfile"));
        assert_eq!(infer_language(".gitignore"), None);
        assert_eq!(infer_language("x.unknown"), None);
    }
}
