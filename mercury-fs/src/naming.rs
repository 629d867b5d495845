//! Output file naming.
//!
//! | mode                        | path                              |
//! |-----------------------------|-----------------------------------|
//! | single, unbounded           | `<path>`                          |
//! | single, rotating            | `<dir>/<stem>-<seq>.<ext>`        |
//! | file-set member, unbounded  | `<path>/<stem>-w<i>.<ext>`        |
//! | file-set member, rotating   | `<path>/<stem>-w<i>-<seq>.<ext>`  |
//!
//! A file-set uses the configured path as a directory.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    base: PathBuf,
    dir: PathBuf,
    stem: String,
    ext: Option<String>,
    member: Option<usize>,
    rotating: bool,
}

impl OutputNaming {
    /// Naming for the only output stream.
    pub fn single(path: impl Into<PathBuf>, rotating: bool) -> Self {
        let base = path.into();
        let dir = base
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_parts(base, dir, None, rotating)
    }

    /// Naming for worker `index` inside the file-set rooted at `path`.
    pub fn file_set_member(path: impl Into<PathBuf>, index: usize, rotating: bool) -> Self {
        let base = path.into();
        let dir = base.clone();
        Self::from_parts(base, dir, Some(index), rotating)
    }

    fn from_parts(base: PathBuf, dir: PathBuf, member: Option<usize>, rotating: bool) -> Self {
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mercury".to_string());
        let ext = base
            .extension()
            .map(|e| e.to_string_lossy().into_owned());
        Self {
            base,
            dir,
            stem,
            ext,
            member,
            rotating,
        }
    }

    /// Directory the files are created in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_file_set_member(&self) -> bool {
        self.member.is_some()
    }

    /// Path of the `seq`-th file of this stream.
    ///
    /// `seq` is ignored when the stream does not rotate.
    pub fn path_for(&self, seq: u64) -> PathBuf {
        let mut name = self.stem.clone();
        match (self.member, self.rotating) {
            (None, false) => return self.base.clone(),
            (None, true) => name.push_str(&format!("-{seq}")),
            (Some(i), false) => name.push_str(&format!("-w{i}")),
            (Some(i), true) => name.push_str(&format!("-w{i}-{seq}")),
        }
        if let Some(ext) = &self.ext {
            name.push('.');
            name.push_str(ext);
        }
        self.dir.join(name)
    }
}
