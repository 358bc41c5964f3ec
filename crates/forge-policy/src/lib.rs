//! Workspace sandbox for every path the model supplies.
//!
//! Paths are resolved lexically against the workspace root (a leading `/` or
//! `\` is treated as workspace-relative), `..` is folded, and the result must
//! stay under the root. When part of the path already exists on disk, the
//! existing prefix is canonicalized too so a symlink cannot lead outside.

use std::path::{Component, Path, PathBuf};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("\"path\" parameter is required.")]
    EmptyPath,
    #[error("Access denied: \"{path}\" is outside workspace \"{workspace}\"")]
    OutsideWorkspace { path: String, workspace: String },
    #[error("Access denied: \"{0}\" is inside the agent runtime directory")]
    RuntimeDir(String),
}

#[derive(Debug, Clone)]
pub struct PathPolicy {
    root: PathBuf,
    runtime_dir_name: String,
}

impl PathPolicy {
    pub fn new(root: &Path) -> Self {
        Self {
            root: normalize_lexically(&absolute(root)),
            runtime_dir_name: ".forge".to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `input` against `base` (the root or a sub-folder of it) and
    /// require the result to stay inside the root.
    pub fn resolve_in(&self, base: &Path, input: &str) -> Result<PathBuf, PolicyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PolicyError::EmptyPath);
        }
        let relative = trimmed.trim_start_matches(['/', '\\']);
        let joined = normalize_lexically(&absolute(base).join(relative));
        if !joined.starts_with(&self.root) || escapes_through_symlink(&self.root, &joined) {
            return Err(PolicyError::OutsideWorkspace {
                path: input.to_string(),
                workspace: self.root.display().to_string(),
            });
        }
        Ok(joined)
    }

    pub fn resolve(&self, input: &str) -> Result<PathBuf, PolicyError> {
        self.resolve_in(&self.root, input)
    }

    /// Like [`PathPolicy::resolve_in`], but also refuses the runtime directory,
    /// which holds settings and logs the agent must not rewrite.
    pub fn resolve_writable_in(&self, base: &Path, input: &str) -> Result<PathBuf, PolicyError> {
        let resolved = self.resolve_in(base, input)?;
        if resolved.starts_with(self.root.join(&self.runtime_dir_name)) {
            return Err(PolicyError::RuntimeDir(input.to_string()));
        }
        Ok(resolved)
    }

    /// Resolve a `[TARGET FOLDER: ...]` value to a directory inside the root.
    /// `.` and blank values mean the root itself and yield `None`.
    pub fn resolve_target_folder(&self, folder: &str) -> Option<PathBuf> {
        let folder = folder.trim();
        if folder.is_empty() || folder == "." || folder == "./" {
            return None;
        }
        let resolved = self.resolve(folder).ok()?;
        (resolved != self.root).then_some(resolved)
    }

    /// Workspace-relative display form with forward slashes.
    pub fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn escapes_through_symlink(root: &Path, candidate: &Path) -> bool {
    let Ok(real_root) = root.canonicalize() else {
        return false;
    };
    let mut existing = candidate;
    loop {
        if existing.exists() {
            return match existing.canonicalize() {
                Ok(real) => !real.starts_with(&real_root),
                Err(_) => false,
            };
        }
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return false,
        }
    }
}
