//! Project context bundle shipped to agents alongside the prompt.
//!
//! The bundle is a bounded summary of the working directory: detected
//! project type, a shallow directory tree and excerpts of well-known project
//! files. Everything is capped so the payload stays small.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "__pycache__",
    "venv",
    "dist",
    "build",
];

/// Marker files checked in order; first hit decides the project type.
const PROJECT_MARKERS: &[(&str, ProjectType)] = &[
    ("Cargo.toml", ProjectType::Rust),
    ("package.json", ProjectType::JavaScript),
    ("pyproject.toml", ProjectType::Python),
    ("setup.py", ProjectType::Python),
    ("requirements.txt", ProjectType::Python),
    ("go.mod", ProjectType::Go),
    ("pom.xml", ProjectType::Java),
    ("build.gradle", ProjectType::Java),
    ("Gemfile", ProjectType::Ruby),
];

/// Files excerpted into the bundle when present at the root.
const EXCERPT_FILES: &[&str] = &[
    "README.md",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
    "Dockerfile",
];

/// Context-building limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub enabled: bool,
    /// Maximum directory depth shown in the tree.
    pub max_depth: usize,
    /// Maximum tree entries.
    pub max_entries: usize,
    pub max_excerpts: usize,
    /// Characters kept per excerpt.
    pub excerpt_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 2,
            max_entries: 200,
            max_excerpts: 5,
            excerpt_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectType {
    Rust,
    JavaScript,
    Python,
    Go,
    Java,
    Ruby,
    Unknown,
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectType::Rust => "Rust",
            ProjectType::JavaScript => "JavaScript/Node",
            ProjectType::Python => "Python",
            ProjectType::Go => "Go",
            ProjectType::Java => "Java",
            ProjectType::Ruby => "Ruby",
            ProjectType::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// One excerpted project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
    /// Whether `content` was cut at the character budget.
    pub truncated: bool,
}

/// Serialized project context delivered with a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub root_name: String,
    pub project_type: ProjectType,
    /// Indented tree, one entry per line, directories suffixed with `/`.
    pub tree: Vec<String>,
    pub excerpts: Vec<FileExcerpt>,
}

impl ContextBundle {
    /// Build a bundle for `root` within `config` limits.
    pub fn collect(root: &Path, config: &ContextConfig) -> std::io::Result<Self> {
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        let project_type = detect_project_type(root);
        let tree = collect_tree(root, config);
        let excerpts = collect_excerpts(root, config)?;

        debug!(
            root = %root.display(),
            project_type = %project_type,
            tree_entries = tree.len(),
            excerpts = excerpts.len(),
            "collected context bundle"
        );

        Ok(Self {
            root_name,
            project_type,
            tree,
            excerpts,
        })
    }

    /// Markdown rendering placed ahead of the request in agent payloads.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Project Context");
        let _ = writeln!(out, "Project: {}", self.root_name);
        let _ = writeln!(out, "Project type: {}", self.project_type);
        out.push('\n');

        if !self.tree.is_empty() {
            let _ = writeln!(out, "## Directory Structure");
            out.push_str("```\n");
            for line in &self.tree {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("```\n\n");
        }

        for excerpt in &self.excerpts {
            let _ = writeln!(out, "### {}", excerpt.path);
            out.push_str("```\n");
            out.push_str(&excerpt.content);
            if !excerpt.content.ends_with('\n') {
                out.push('\n');
            }
            if excerpt.truncated {
                out.push_str("... (truncated)\n");
            }
            out.push_str("```\n\n");
        }
        out
    }
}

/// Detect the project type from marker files at `root`.
pub fn detect_project_type(root: &Path) -> ProjectType {
    PROJECT_MARKERS
        .iter()
        .find(|(marker, _)| root.join(marker).is_file())
        .map(|(_, kind)| *kind)
        .unwrap_or(ProjectType::Unknown)
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0 && (name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()))
}

fn collect_tree(root: &Path, config: &ContextConfig) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(config.max_depth.max(1))
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .take(config.max_entries)
        .map(|e| {
            let indent = "  ".repeat(e.depth() - 1);
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() {
                format!("{indent}{name}/")
            } else {
                format!("{indent}{name}")
            }
        })
        .collect()
}

fn collect_excerpts(root: &Path, config: &ContextConfig) -> std::io::Result<Vec<FileExcerpt>> {
    let mut excerpts = Vec::new();
    for name in EXCERPT_FILES {
        if excerpts.len() >= config.max_excerpts {
            break;
        }
        let path: PathBuf = root.join(name);
        if !path.is_file() {
            continue;
        }
        let bytes = fs::read(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        let (content, truncated) = truncate_chars(&text, config.excerpt_chars);
        excerpts.push(FileExcerpt {
            path: name.to_string(),
            content,
            truncated,
        });
    }
    Ok(excerpts)
}

/// Cut `text` to at most `limit` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        dir
    }

    #[test]
    fn test_detects_rust_project() {
        let dir = project();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Rust);
    }

    #[test]
    fn test_unknown_project_type() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Unknown);
    }

    #[test]
    fn test_tree_skips_hidden_and_vendor_dirs() {
        let dir = project();
        let bundle = ContextBundle::collect(dir.path(), &ContextConfig::default()).unwrap();
        assert!(bundle.tree.contains(&"src/".to_string()));
        assert!(bundle.tree.contains(&"  main.rs".to_string()));
        assert!(!bundle.tree.iter().any(|l| l.contains("target")));
        assert!(!bundle.tree.iter().any(|l| l.contains(".git")));
    }

    #[test]
    fn test_excerpts_are_truncated() {
        let dir = project();
        let config = ContextConfig {
            excerpt_chars: 5,
            ..ContextConfig::default()
        };
        let bundle = ContextBundle::collect(dir.path(), &config).unwrap();
        let cargo = bundle.excerpts.iter().find(|e| e.path == "Cargo.toml").unwrap();
        assert_eq!(cargo.content, "[pack");
        assert!(cargo.truncated);
    }

    #[test]
    fn test_render_mentions_project_type_and_tree() {
        let dir = project();
        let bundle = ContextBundle::collect(dir.path(), &ContextConfig::default()).unwrap();
        let rendered = bundle.render();
        assert!(rendered.contains("Project type: Rust"));
        assert!(rendered.contains("## Directory Structure"));
        assert!(rendered.contains("### Cargo.toml"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let (cut, truncated) = truncate_chars("héllo", 2);
        assert_eq!(cut, "hé");
        assert!(truncated);
        assert_eq!(truncate_chars("ab", 5), ("ab".to_string(), false));
    }
}
