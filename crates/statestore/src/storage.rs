//! Storage trait and implementations

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Whole-document storage. Every write replaces the previous contents.
pub trait Storage: Send + Sync {
    fn read(&self) -> std::io::Result<Option<Vec<u8>>>;
    fn write(&self, bytes: &[u8]) -> std::io::Result<()>;
    fn describe(&self) -> String;
}

impl<T: Storage + ?Sized> Storage for Box<T> {
    fn read(&self) -> std::io::Result<Option<Vec<u8>>> {
        (**self).read()
    }

    fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        (**self).write(bytes)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// In-memory storage (for testing and demos)
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<Mutex<Option<Vec<u8>>>>,
    writes: Arc<Mutex<usize>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        let s = Self::new();
        *s.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.into());
        s
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for InMemoryStorage {
    fn read(&self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.contents())
    }

    fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// File-backed storage with atomic replace.
#[derive(Clone, Debug)]
pub struct FileBackedStorage {
    path: PathBuf,
}

impl FileBackedStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileBackedStorage {
    fn read(&self) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        write_atomic(&self.path, bytes)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Writes to a uniquely named sibling temp file, syncs it, then renames over
/// `path`. Readers see either the old file or the new one, never a truncated
/// one, and concurrent writers never share a temp file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)?;

    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    // a failed persist drops the temp file, which removes it
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_concurrent_writers_to_one_path_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = std::sync::Arc::new(dir.path().join("STATUS.md"));

        let writers: Vec<_> = [b'a', b'b']
            .into_iter()
            .map(|fill| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let body = vec![fill; 256 * 1024];
                    (0..100).filter(|_| write_atomic(&path, &body).is_err()).count()
                })
            })
            .collect();

        let mut torn = 0;
        for _ in 0..100 {
            if let Ok(bytes) = fs::read(path.as_path()) {
                let whole = bytes.len() == 256 * 1024 && bytes.iter().all(|b| *b == bytes[0]);
                if !whole {
                    torn += 1;
                }
            }
        }

        let errors: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(errors, 0);
        assert_eq!(torn, 0);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_file_storage_missing_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileBackedStorage::new(dir.path().join("absent.json"));
        assert!(s.read().unwrap().is_none());
    }

    #[test]
    fn test_in_memory_counts_writes() {
        let s = InMemoryStorage::new();
        s.write(b"a").unwrap();
        s.write(b"b").unwrap();
        assert_eq!(s.write_count(), 2);
        assert_eq!(s.contents().unwrap(), b"b");
    }
}
