use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

use super::catalog::{builtin_tools, LIST_FILES, READ_FILE, RUN_COMMAND};
use super::workspace::{Workspace, WorkspaceEntry};
use crate::errors::{ToolError, ToolResult};
use crate::models::tool::{Tool, ToolCall};

/// Byte ceiling for `read_file`
pub const MAX_READ_BYTES: usize = 64 * 1024;
/// Entry ceiling for `list_files`
pub const MAX_LIST_ENTRIES: usize = 500;

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "venv",
    "__pycache__",
    ".next",
    ".cache",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "pdf", "zip", "gz", "tgz", "tar",
    "bz2", "xz", "7z", "rar", "jar", "class", "exe", "dll", "so", "dylib", "o", "a", "lib", "bin",
    "wasm", "mp3", "mp4", "mov", "avi", "wav", "flac", "woff", "woff2", "ttf", "otf", "eot",
    "sqlite", "db", "pyc", "rlib",
];

fn secret_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^(\.env(\..+)?|\.netrc|\.npmrc|\.pypirc|id_(rsa|dsa|ecdsa|ed25519)|credentials(\.\w+)?|secrets?(\.\w+)?|.+\.(pem|key|p12|pfx|jks|keystore|asc))$",
        )
        .expect("secret file pattern is valid")
    })
}

/// Whether a file name looks like it holds credentials
pub fn is_secret_file(name: &str) -> bool {
    secret_pattern().is_match(name)
}

pub fn is_binary_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn display_relative(path: &Path) -> String {
    if path.as_os_str().is_empty() {
        ".".to_string()
    } else {
        path.to_string_lossy().replace('\\', "/")
    }
}

/// Runs the tools a model asked for and reports the outcome as text
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The catalog this executor can serve
    fn tools(&self) -> &[Tool];

    /// Execute one call. Failures come back as `[Error: ...]` text, never as `Err`.
    async fn execute(&self, call: &ToolCall) -> String;
}

/// The built-in project tools, confined to a [`Workspace`] root
pub struct WorkspaceTools {
    workspace: Arc<dyn Workspace>,
    tools: Vec<Tool>,
    /// Working directory, relative to the workspace root
    cwd: Mutex<PathBuf>,
    max_read_bytes: usize,
    max_list_entries: usize,
}

impl WorkspaceTools {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self {
            workspace,
            tools: builtin_tools(),
            cwd: Mutex::new(PathBuf::new()),
            max_read_bytes: MAX_READ_BYTES,
            max_list_entries: MAX_LIST_ENTRIES,
        }
    }

    pub fn max_read_bytes(mut self, max: usize) -> Self {
        self.max_read_bytes = max;
        self
    }

    pub fn max_list_entries(mut self, max: usize) -> Self {
        self.max_list_entries = max;
        self
    }

    /// Current working directory, relative to the root
    pub async fn cwd(&self) -> PathBuf {
        self.cwd.lock().await.clone()
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult<String> {
        match call.name.as_str() {
            LIST_FILES => self.list_files(call.str_arg("path")).await,
            READ_FILE => {
                let path = call.str_arg("path").ok_or_else(|| {
                    ToolError::InvalidParameters("read_file requires a 'path' string".into())
                })?;
                self.read_file(path).await
            }
            RUN_COMMAND => {
                let command = call.str_arg("command").ok_or_else(|| {
                    ToolError::InvalidParameters("run_command requires a 'command' string".into())
                })?;
                self.run_command(command).await
            }
            other => Err(ToolError::ToolNotFound(other.to_string())),
        }
    }

    /// Lexically resolve `requested` against the working directory.
    ///
    /// Returns a path relative to the root, or an access error when the path
    /// would leave it.
    fn resolve(&self, cwd: &Path, requested: &str) -> ToolResult<PathBuf> {
        let denied = || ToolError::AccessDenied(format!("{} is outside the project", requested));
        let requested_path = Path::new(requested);

        let (base, rest) = if requested_path.is_absolute() {
            let rest = requested_path
                .strip_prefix(self.workspace.root())
                .map_err(|_| denied())?;
            (PathBuf::new(), rest.to_path_buf())
        } else {
            (cwd.to_path_buf(), requested_path.to_path_buf())
        };

        let mut resolved = base;
        for component in rest.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(denied());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(denied()),
            }
        }
        Ok(resolved)
    }

    /// Reject paths whose real location (after symlinks) is outside the root
    async fn ensure_contained(&self, relative: &Path, requested: &str) -> ToolResult<PathBuf> {
        let full = self.workspace.root().join(relative);
        match self.workspace.canonicalize(&full).await {
            Ok(real) if real.starts_with(self.workspace.root()) => Ok(real),
            Ok(_) => Err(ToolError::AccessDenied(format!(
                "{} resolves outside the project",
                requested
            ))),
            Err(e) => Err(ToolError::ExecutionError(format!(
                "cannot access {}: {}",
                requested, e
            ))),
        }
    }

    /// Whether a file entry may be shown to the model.
    ///
    /// A symlink is judged by its target: it must stay inside the root and
    /// must not point at a secret or binary file.
    async fn is_listable(&self, relative: &Path, entry: &WorkspaceEntry) -> bool {
        if is_secret_file(&entry.name) || is_binary_file(&entry.name) {
            return false;
        }
        if !entry.is_symlink {
            return true;
        }
        match self.workspace.canonicalize(&self.workspace.root().join(relative)).await {
            Ok(real) if real.starts_with(self.workspace.root()) => {
                let target = file_name(&real);
                !is_secret_file(&target) && !is_binary_file(&target)
            }
            _ => false,
        }
    }

    async fn hides_secret(&self, full: &Path, entry: &WorkspaceEntry) -> bool {
        if is_secret_file(&entry.name) {
            return true;
        }
        if !entry.is_symlink {
            return false;
        }
        match self.workspace.canonicalize(full).await {
            Ok(real) => {
                !real.starts_with(self.workspace.root()) || is_secret_file(&file_name(&real))
            }
            Err(_) => true,
        }
    }

    async fn list_files(&self, path: Option<&str>) -> ToolResult<String> {
        let cwd = self.cwd().await;
        let requested = path.unwrap_or(".");
        let start = self.resolve(&cwd, requested)?;
        let start_full = self.ensure_contained(&start, requested).await?;
        if !self.workspace.is_dir(&start_full).await {
            return Err(ToolError::InvalidParameters(format!(
                "{} is not a directory",
                requested
            )));
        }

        let mut files = Vec::new();
        let mut visited = HashSet::from([start_full]);
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let entries = match self.workspace.list_dir(&self.workspace.root().join(&dir)).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!("skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries {
                let relative = dir.join(&entry.name);
                if entry.is_dir {
                    if SKIPPED_DIRS.contains(&entry.name.as_str()) {
                        continue;
                    }
                    // symlinked directories must stay inside the root and not loop
                    match self.workspace.canonicalize(&self.workspace.root().join(&relative)).await {
                        Ok(real) if real.starts_with(self.workspace.root()) => {
                            if visited.insert(real) {
                                pending.push(relative);
                            }
                        }
                        _ => {}
                    }
                } else if self.is_listable(&relative, &entry).await {
                    files.push(display_relative(&relative));
                }
            }
        }

        if files.is_empty() {
            return Ok("(no files)".to_string());
        }

        files.sort();
        let total = files.len();
        files.truncate(self.max_list_entries);
        let mut output = files.join("\n");
        if total > self.max_list_entries {
            output.push_str(&format!(
                "\n[... {} more files not shown]",
                total - self.max_list_entries
            ));
        }
        Ok(output)
    }

    async fn read_file(&self, path: &str) -> ToolResult<String> {
        let cwd = self.cwd().await;
        let relative = self.resolve(&cwd, path)?;
        let name = file_name(&relative);
        if is_secret_file(&name) {
            return Err(ToolError::AccessDenied(format!("{} may contain secrets", path)));
        }

        let full = self.ensure_contained(&relative, path).await?;
        let target = file_name(&full);
        if is_secret_file(&target) {
            return Err(ToolError::AccessDenied(format!("{} may contain secrets", path)));
        }
        if self.workspace.is_dir(&full).await {
            return Err(ToolError::InvalidParameters(format!(
                "{} is a directory, use list_files",
                path
            )));
        }

        let head = self
            .workspace
            .read_head(&full, self.max_read_bytes)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("cannot read {}: {}", path, e)))?;

        let sniffed_binary = head.bytes.iter().take(8000).any(|b| *b == 0);
        if is_binary_file(&name) || is_binary_file(&target) || sniffed_binary {
            return Err(ToolError::ExecutionError(format!("{} is a binary file", path)));
        }

        let mut content = String::from_utf8_lossy(&head.bytes).into_owned();
        if head.truncated {
            content.push_str(&format!(
                "\n\n[... truncated: file exceeds {} bytes]",
                self.max_read_bytes
            ));
        }
        Ok(content)
    }

    async fn run_command(&self, command: &str) -> ToolResult<String> {
        if command.contains(|c: char| matches!(c, ';' | '|' | '&' | '$' | '>' | '<' | '`' | '\n')) {
            return Err(ToolError::CommandNotAllowed(format!(
                "`{}` uses shell operators",
                command.trim()
            )));
        }

        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.as_slice() {
            ["pwd"] => Ok(display_relative(&self.cwd().await)),
            ["ls"] => self.ls(".").await,
            ["ls", dir] => self.ls(dir).await,
            ["cd"] => {
                *self.cwd.lock().await = PathBuf::new();
                Ok("Changed directory to .".to_string())
            }
            ["cd", dir] => {
                let mut cwd = self.cwd.lock().await;
                let target = self.resolve(&cwd, dir)?;
                let full = self.ensure_contained(&target, dir).await?;
                if !self.workspace.is_dir(&full).await {
                    return Err(ToolError::InvalidParameters(format!(
                        "{} is not a directory",
                        dir
                    )));
                }
                *cwd = target;
                Ok(format!("Changed directory to {}", display_relative(&cwd)))
            }
            [] => Err(ToolError::InvalidParameters("empty command".into())),
            _ => Err(ToolError::CommandNotAllowed(format!(
                "`{}` is not one of pwd, ls, cd",
                command.trim()
            ))),
        }
    }

    async fn ls(&self, dir: &str) -> ToolResult<String> {
        let cwd = self.cwd().await;
        let relative = self.resolve(&cwd, dir)?;
        let full = self.ensure_contained(&relative, dir).await?;
        let entries = self
            .workspace
            .list_dir(&full)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("cannot list {}: {}", dir, e)))?;

        let mut names = Vec::new();
        for entry in entries {
            if entry.is_dir {
                names.push(format!("{}/", entry.name));
            } else if !self.hides_secret(&full.join(&entry.name), &entry).await {
                names.push(entry.name);
            }
        }
        if names.is_empty() {
            Ok("(empty)".to_string())
        } else {
            Ok(names.join("\n"))
        }
    }
}

#[async_trait]
impl ToolExecutor for WorkspaceTools {
    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn execute(&self, call: &ToolCall) -> String {
        match self.dispatch(call).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(tool = %call.name, "tool call failed: {}", e);
                e.to_tool_output()
            }
        }
    }
}
