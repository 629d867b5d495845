//! Filesystem abstraction.
//!
//! Outputs and replay inputs reach the disk only through [`Filesystem`], so
//! rotation and replay can be exercised against [`MockFilesystem`].

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// Errors from filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{path}: {source}")]
    AtPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path error: {0}")]
    Path(String),
}

impl FsError {
    fn at(path: &Path, source: io::Error) -> Self {
        FsError::AtPath {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The underlying IO error kind, when there is one.
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            FsError::Io(e) | FsError::AtPath { source: e, .. } => Some(e.kind()),
            FsError::Path(_) => None,
        }
    }
}

/// Trait for filesystem operations.
/// Abstracted for testing with mock implementations.
pub trait Filesystem: Send + Sync {
    /// Create a file for writing.
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, FsError>;

    /// Open a file for reading.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError>;

    /// Read a whole file.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Regular files directly inside `dir`, sorted by path.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError>;

    fn is_dir(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool;

    /// Create directory and parents if needed.
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;
}

/// Real filesystem implementation.
///
/// Files are created exclusively unless `clobber` is set, in which case an
/// existing file is truncated.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFilesystem {
    clobber: bool,
}

impl RealFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filesystem whose `create` truncates existing files.
    pub fn clobbering() -> Self {
        Self { clobber: true }
    }
}

impl Filesystem for RealFilesystem {
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, FsError> {
        let mut options = OpenOptions::new();
        options.write(true);
        if self.clobber {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(path).map_err(|e| FsError::at(path, e))?;
        Ok(Box::new(file))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError> {
        let file = fs::File::open(path).map_err(|e| FsError::at(path, e))?;
        Ok(Box::new(file))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        fs::read(path).map_err(|e| FsError::at(path, e))
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| FsError::at(dir, e))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| FsError::at(path, e))
    }
}

/// Mock filesystem for testing.
/// Cloning creates a new handle to the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MockFilesystem {
    files: Arc<RwLock<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<RwLock<HashSet<PathBuf>>>,
    read_only: Arc<AtomicBool>,
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all files in the mock filesystem.
    pub fn files(&self) -> HashMap<PathBuf, Vec<u8>> {
        self.files.read().unwrap().clone()
    }

    /// Get content of a specific file.
    pub fn get_file(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().unwrap().get(path).cloned()
    }

    /// Add a file directly (for test setup).
    pub fn add_file(&self, path: PathBuf, data: Vec<u8>) {
        self.files.write().unwrap().insert(path, data);
    }

    /// Paths of all files, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.read().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Make every subsequent create and write fail.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "mock filesystem is read-only",
            ))
        } else {
            Ok(())
        }
    }
}

/// Handle returned by [`MockFilesystem::create`]; writes land in the shared map.
struct MockFile {
    path: PathBuf,
    fs: MockFilesystem,
}

impl Write for MockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fs.check_writable()?;
        let mut files = self.fs.files.write().unwrap();
        files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.fs.check_writable()
    }
}

impl Filesystem for MockFilesystem {
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, FsError> {
        self.check_writable().map_err(|e| FsError::at(path, e))?;
        self.files
            .write()
            .unwrap()
            .insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MockFile {
            path: path.to_path_buf(),
            fs: self.clone(),
        }))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError> {
        let data = self.read_file(path)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.get_file(path).ok_or_else(|| {
            FsError::at(
                path,
                io::Error::new(io::ErrorKind::NotFound, "file not found"),
            )
        })
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        if !self.is_dir(dir) {
            return Err(FsError::at(
                dir,
                io::Error::new(io::ErrorKind::NotFound, "directory not found"),
            ));
        }
        let mut files: Vec<PathBuf> = self
            .files
            .read()
            .unwrap()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect();
        files.sort();
        Ok(files)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.read().unwrap().contains(path)
            || self
                .files
                .read()
                .unwrap()
                .keys()
                .any(|p| p.starts_with(path) && p != path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.read().unwrap().contains_key(path) || self.is_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.check_writable().map_err(|e| FsError::at(path, e))?;
        self.dirs.write().unwrap().insert(path.to_path_buf());
        Ok(())
    }
}
