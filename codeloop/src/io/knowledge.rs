//! Knowledge store: prior code and documentation retrieved as prompt context.
//!
//! [`JsonlKnowledgeStore`] keeps one JSON document per line and ranks
//! documents by how many distinct task terms they share. There is no
//! embedding search.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::io::config::KnowledgeConfig;

pub type Metadata = BTreeMap<String, String>;

/// Extensions indexed by [`JsonlKnowledgeStore::add_directory`] by default.
pub const DEFAULT_CODE_EXTENSIONS: [&str; 8] = ["py", "js", "ts", "java", "cpp", "c", "go", "rs"];

/// Directories never descended into when indexing.
const SKIPPED_DIRS: [&str; 5] = ["target", "node_modules", "__pycache__", "venv", "build"];

/// Retrieval-augmented context provider.
pub trait KnowledgeStore {
    fn store_code(&self, code: &str, metadata: &Metadata) -> Result<()>;

    /// Rendered context for `task`; empty when nothing relevant is stored.
    fn get_context(&self, task: &str) -> Result<String>;
}

impl<T: KnowledgeStore + ?Sized> KnowledgeStore for &T {
    fn store_code(&self, code: &str, metadata: &Metadata) -> Result<()> {
        (**self).store_code(code, metadata)
    }

    fn get_context(&self, task: &str) -> Result<String> {
        (**self).get_context(task)
    }
}

impl<T: KnowledgeStore + ?Sized> KnowledgeStore for Rc<T> {
    fn store_code(&self, code: &str, metadata: &Metadata) -> Result<()> {
        (**self).store_code(code, metadata)
    }

    fn get_context(&self, task: &str) -> Result<String> {
        (**self).get_context(task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Code,
    Documentation,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Code => "code",
            DocumentKind::Documentation => "documentation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub kind: DocumentKind,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub added_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    fn source(&self) -> &str {
        self.metadata
            .get("file_path")
            .or_else(|| self.metadata.get("source"))
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone)]
pub struct JsonlKnowledgeStore {
    path: PathBuf,
    max_results: usize,
    max_context_chars: usize,
}

impl JsonlKnowledgeStore {
    pub fn new(path: impl Into<PathBuf>, max_results: usize, max_context_chars: usize) -> Self {
        Self {
            path: path.into(),
            max_results,
            max_context_chars,
        }
    }

    /// Store configured by `[knowledge]`; relative paths resolve against `base`.
    pub fn from_config(config: &KnowledgeConfig, base: &Path) -> Self {
        let path = if config.path.is_absolute() {
            config.path.clone()
        } else {
            base.join(&config.path)
        };
        Self::new(path, config.max_results, config.max_context_chars)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_documentation(&self, text: &str, source: Option<&str>) -> Result<()> {
        let mut metadata = Metadata::new();
        if let Some(source) = source {
            metadata.insert("source".to_string(), source.to_string());
        }
        self.append(DocumentKind::Documentation, text, metadata)
    }

    /// Add a source file, tagging it with its path and detected language.
    pub fn add_code_file(&self, file: &Path) -> Result<()> {
        let code =
            fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
        let mut metadata = Metadata::new();
        metadata.insert("file_path".to_string(), file.display().to_string());
        metadata.insert("language".to_string(), language_for(file).to_string());
        self.append(DocumentKind::Code, &code, metadata)
    }

    /// Add every file under `dir` whose extension is in `extensions`
    /// (with or without the leading dot). Hidden and build directories are
    /// skipped, and a file that cannot be read is logged and skipped.
    ///
    /// Returns the added files in walk order.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn add_directory(&self, dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        let wanted: Vec<String> = extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let mut added = Vec::new();
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(err = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| wanted.iter().any(|w| w.eq_ignore_ascii_case(ext)));
            if !matches {
                continue;
            }
            match self.add_code_file(path) {
                Ok(()) => added.push(path.to_path_buf()),
                Err(err) => warn!(path = %path.display(), err = %format!("{err:#}"), "failed to add file"),
            }
        }
        info!(files = added.len(), "indexed directory");
        Ok(added)
    }

    pub fn documents(&self) -> Result<Vec<KnowledgeDocument>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let mut docs = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: KnowledgeDocument = serde_json::from_str(&line)
                .with_context(|| format!("parse {}:{}", self.path.display(), idx + 1))?;
            docs.push(doc);
        }
        Ok(docs)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.documents()?.len())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("remove {}", self.path.display()))?;
        }
        Ok(())
    }

    fn append(&self, kind: DocumentKind, content: &str, metadata: Metadata) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let doc = KnowledgeDocument {
            kind,
            content: content.to_string(),
            metadata,
            added_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&doc).context("serialize knowledge document")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))?;
        debug!(kind = kind.as_str(), bytes = content.len(), "stored knowledge document");
        Ok(())
    }
}

impl KnowledgeStore for JsonlKnowledgeStore {
    fn store_code(&self, code: &str, metadata: &Metadata) -> Result<()> {
        self.append(DocumentKind::Code, code, metadata.clone())
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn get_context(&self, task: &str) -> Result<String> {
        let docs = self.documents()?;
        let ranked = rank_documents(task, &docs, self.max_results);
        Ok(render_context(&ranked, self.max_context_chars))
    }
}

/// Documents sharing at least one term with `query`, best first.
///
/// Ties go to the more recently stored document.
pub fn rank_documents<'a>(
    query: &str,
    docs: &'a [KnowledgeDocument],
    limit: usize,
) -> Vec<&'a KnowledgeDocument> {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(usize, usize, &KnowledgeDocument)> = docs
        .iter()
        .enumerate()
        .filter_map(|(idx, doc)| {
            let doc_terms = terms(&doc.content);
            let score = query_terms.intersection(&doc_terms).count();
            (score > 0).then_some((score, idx, doc))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    scored.into_iter().take(limit).map(|(_, _, doc)| doc).collect()
}

/// `### Source: … (type)` sections, stopping before `max_chars` of content.
pub fn render_context(docs: &[&KnowledgeDocument], max_chars: usize) -> String {
    let mut parts = Vec::new();
    let mut total = 0usize;
    for doc in docs {
        let len = doc.content.chars().count();
        if total + len > max_chars {
            break;
        }
        parts.push(format!(
            "### Source: {} ({})\n{}",
            doc.source(),
            doc.kind.as_str(),
            doc.content
        ));
        total += len;
    }
    parts.join("\n\n")
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.')
        || (entry.file_type().is_dir() && SKIPPED_DIRS.iter().any(|dir| *dir == name))
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn language_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("py") => "python",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("java") => "java",
        Some("cpp") => "cpp",
        Some("c") => "c",
        Some("go") => "go",
        Some("rs") => "rust",
        _ => "unknown",
    }
}
