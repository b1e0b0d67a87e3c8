//! Sandbox-aware file system access for generated files.
//!
//! Paths are first folded lexically (`..` and `.` without touching the file
//! system), then, in sandboxed mode, checked physically: the deepest existing
//! ancestor is canonicalized with symlinks followed and the missing tail is
//! re-appended. A symlink inside the root that points elsewhere therefore
//! cannot carry a write outside it, and neither can a dangling one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::types::FileBlock;
use crate::io::config::WorkspaceConfig;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    sandbox: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub kind: EntryKind,
}

/// A block that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of persisting a batch of blocks. Failures never stop later writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    /// Block paths as extracted, in write order.
    pub written: Vec<String>,
    pub failures: Vec<PersistFailure>,
}

impl PersistReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Workspace {
    /// Workspace rooted at `root`, made absolute against the current directory.
    pub fn new(root: impl AsRef<Path>, sandbox: bool) -> Result<Self> {
        let root = root.as_ref();
        let absolute = std::path::absolute(root)
            .with_context(|| format!("resolve workspace root {}", root.display()))?;
        Ok(Self {
            root: normalize_lexically(&absolute),
            sandbox,
        })
    }

    /// Workspace configured by `[workspace]`; relative roots resolve against `base`.
    pub fn from_config(config: &WorkspaceConfig, base: &Path) -> Result<Self> {
        let root = if config.root.is_absolute() {
            config.root.clone()
        } else {
            base.join(&config.root)
        };
        Self::new(root, config.sandbox)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the root. Absolute paths stay absolute.
    ///
    /// In sandboxed mode, a path that resolves outside the root is an error.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let resolved = normalize_lexically(&joined);
        if !self.sandbox {
            return Ok(resolved);
        }
        if !resolved.starts_with(&self.root) {
            bail!(
                "path {path} resolves to {} outside workspace {}",
                resolved.display(),
                self.root.display()
            );
        }
        let physical_root = canonicalize_existing(&self.root)?;
        let physical = canonicalize_existing(&resolved)?;
        if !physical.starts_with(&physical_root) {
            bail!(
                "path {path} follows a link to {} outside workspace {}",
                physical.display(),
                physical_root.display()
            );
        }
        Ok(resolved)
    }

    /// Write `content` to `path`, creating parent directories.
    pub fn create_file(&self, path: &str, content: &str) -> Result<PathBuf> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, content).with_context(|| format!("write {}", target.display()))?;
        debug!(path = %target.display(), bytes = content.len(), "wrote file");
        Ok(target)
    }

    /// Entries of `path` (relative to the root), directories first, then by name.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        let dir = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read dir {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
            let file_type = entry
                .file_type()
                .with_context(|| format!("stat {}", entry.path().display()))?;
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            });
        }
        entries.sort_by(|a, b| {
            (a.kind != EntryKind::Directory, &a.name).cmp(&(b.kind != EntryKind::Directory, &b.name))
        });
        Ok(entries)
    }

    /// Write every block, collecting per-block failures.
    pub fn persist_blocks(&self, blocks: &[FileBlock]) -> PersistReport {
        let mut report = PersistReport::default();
        for block in blocks {
            match self.create_file(&block.path, &block.content) {
                Ok(_) => {
                    info!(path = %block.path, "saved file");
                    report.written.push(block.path.clone());
                }
                Err(err) => {
                    warn!(path = %block.path, err = %format!("{err:#}"), "failed to save file");
                    report.failures.push(PersistFailure {
                        path: block.path.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        report
    }
}

/// Canonicalize the deepest ancestor of `path` that exists and re-append the
/// rest. `path` must already be lexically normalized and absolute.
///
/// An existing entry that cannot be canonicalized (a dangling symlink) is an
/// error rather than a missing component.
fn canonicalize_existing(path: &Path) -> Result<PathBuf> {
    let mut tail = Vec::new();
    let mut current = path;
    loop {
        match fs::symlink_metadata(current) {
            Ok(_) => {
                let mut physical = fs::canonicalize(current)
                    .with_context(|| format!("resolve {}", current.display()))?;
                physical.extend(tail.iter().rev());
                return Ok(physical);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("stat {}", current.display()));
            }
        }
        let (Some(parent), Some(name)) = (current.parent(), current.file_name()) else {
            bail!("no existing ancestor for {}", path.display());
        };
        tail.push(name);
        current = parent;
    }
}

/// Fold `.` and `..` components without consulting the file system.
///
/// `..` at the root stays at the root; leading `..` on a relative path is kept.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
