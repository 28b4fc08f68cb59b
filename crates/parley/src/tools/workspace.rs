use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// The head of a file, at most the requested number of bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHead {
    pub bytes: Vec<u8>,
    /// True when the file had more bytes than were read
    pub truncated: bool,
}

/// Filesystem surface the tools are allowed to touch.
///
/// All paths handed to a workspace are absolute and have already been checked
/// to lie under [`Workspace::root`]; containment is the executor's job.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Sandbox root, in canonical form
    fn root(&self) -> &Path;

    async fn list_dir(&self, dir: &Path) -> io::Result<Vec<WorkspaceEntry>>;

    async fn read_head(&self, path: &Path, limit: usize) -> io::Result<FileHead>;

    async fn is_dir(&self, path: &Path) -> bool;

    /// Resolve symlinks of an existing path
    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// A [`Workspace`] over the local disk
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn list_dir(&self, dir: &Path) -> io::Result<Vec<WorkspaceEntry>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            // Dangling or special entries are not project files
            if !file_type.is_dir() && !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }
            let is_dir = if file_type.is_symlink() {
                tokio::fs::metadata(entry.path())
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false)
            } else {
                file_type.is_dir()
            };
            entries.push(WorkspaceEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
                is_symlink: file_type.is_symlink(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_head(&self, path: &Path, limit: usize) -> io::Result<FileHead> {
        let file = tokio::fs::File::open(path).await?;
        let mut bytes = Vec::new();
        file.take(limit as u64 + 1).read_to_end(&mut bytes).await?;
        let truncated = bytes.len() > limit;
        bytes.truncate(limit);
        Ok(FileHead { bytes, truncated })
    }

    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::canonicalize(path).await
    }
}
