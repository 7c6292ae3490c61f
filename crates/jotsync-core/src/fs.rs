//! FileSystem trait abstraction over the repository working tree.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` - Uses tokio::fs, rooted at the repository directory
//!
//! Paths are always repository-relative with `/` separators.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not valid UTF-8: {0}")]
    NotUtf8(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Platform-independent filesystem abstraction.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents. A missing directory lists as empty.
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Create directory (and parents)
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Read a file as UTF-8 text.
    async fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|_| FsError::NotUtf8(path.to_string()))
    }

    /// Names of the regular files directly inside `dir` with the given
    /// extension, sorted.
    async fn list_files(&self, dir: &str, extension: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .list(dir)
            .await?
            .into_iter()
            .filter(|e| !e.is_dir && e.name.ends_with(extension))
            .map(|e| e.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

/// In-memory filesystem for testing
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    dirs: RwLock<BTreeSet<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    /// Explicitly created directory, or implied by a file beneath it.
    fn is_dir(&self, path: &str) -> bool {
        if self.dirs.read().unwrap_or_else(|e| e.into_inner()).contains(path) {
            return true;
        }
        let prefix = format!("{}/", path);
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .any(|k| k.starts_with(&prefix))
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path, content.to_vec());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut seen = BTreeSet::new();
        let mut entries = Vec::new();
        for file_path in files.keys() {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            let (name, is_dir) = match rest.split_once('/') {
                Some((dir, _)) => (dir, true),
                None => (rest, false),
            };
            if seen.insert(name.to_string()) {
                entries.push(FileEntry {
                    name: name.to_string(),
                    is_dir,
                });
            }
        }
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        match files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let is_file = self
            .files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&path);
        Ok(is_file || self.is_dir(&path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize_path(path);
        if let Some(content) = self.files.read().unwrap_or_else(|e| e.into_inner()).get(&path) {
            return Ok(FileStat {
                size: content.len() as u64,
                is_dir: false,
            });
        }
        if path.is_empty() || self.is_dir(&path) {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
            });
        }
        Err(FsError::NotFound(path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if path.is_empty() {
            return Ok(());
        }
        let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());
        let mut current = String::new();
        for part in path.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            dirs.insert(current.clone());
        }
        Ok(())
    }
}

// Lets a test keep a handle on the filesystem it hands to the orchestrator.
#[async_trait]
impl<T: FileSystem + Send + Sync> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("test.txt", b"hello world").await.unwrap();
        assert_eq!(fs.read("test.txt").await.unwrap(), b"hello world");
        assert!(fs.exists("test.txt").await.unwrap());
        assert!(!fs.exists("nonexistent.txt").await.unwrap());

        fs.delete("test.txt").await.unwrap();
        assert!(!fs.exists("test.txt").await.unwrap());
        assert!(matches!(fs.delete("test.txt").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inmemory_fs_listing() {
        let fs = InMemoryFs::new();
        fs.write("notes/b.md", b"b").await.unwrap();
        fs.write("notes/a.md", b"a").await.unwrap();
        fs.write("notes/sub/c.md", b"c").await.unwrap();
        fs.write("notes/readme.txt", b"x").await.unwrap();

        assert!(fs.exists("notes").await.unwrap());
        assert_eq!(fs.list_files("notes", ".md").await.unwrap(), vec!["a.md", "b.md"]);

        let entries = fs.list("notes").await.unwrap();
        assert!(entries.contains(&FileEntry {
            name: "sub".to_string(),
            is_dir: true
        }));
        assert!(fs.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_fs_stat_and_mkdir() {
        let fs = InMemoryFs::new();
        fs.mkdir("images/2024").await.unwrap();
        assert!(fs.exists("images").await.unwrap());
        assert!(fs.stat("images/2024").await.unwrap().is_dir);

        fs.write("notes/a.md", b"abc").await.unwrap();
        assert_eq!(
            fs.stat("notes/a.md").await.unwrap(),
            FileStat {
                size: 3,
                is_dir: false
            }
        );
        assert!(fs.stat("notes").await.unwrap().is_dir);
        assert!(matches!(fs.stat("nope").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_to_string_rejects_binary() {
        let fs = InMemoryFs::new();
        fs.write("images/a.png", &[0xff, 0xfe, 0x00]).await.unwrap();
        assert!(matches!(
            fs.read_to_string("images/a.png").await,
            Err(FsError::NotUtf8(_))
        ));
    }
}
