use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};

use util::PathEncodingError;

/// Utility fns
mod ops;

/// Defines fns for creating common paths in the state directory
mod paths;

/// Progress records stored as json files
mod progress;
pub use progress::FileStore;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Specified state directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
    #[error("Path has no parent directory: \"{0}\"")]
    NoParent(String),
}

/// All file operations in the crate should go through this struct.
///
/// All destructive operations check that the path in question is a child of
/// one of the whitelisted prefixes (the state dir, plus the unit directory for
/// a `Fs` made with `scoped`), otherwise they will not be performed.
/// Note that the jobs a workflow runs can break this rule; it is up to the user
/// to make sure that the scripts there don't have unintended consequences.
#[derive(Debug, Clone)]
pub struct Fs {
    /// The directories we are allowed to modify
    prefixes: Vec<PathBuf>,
}

impl Fs {
    /// Create a new `Fs` that may modify anything under `state_dir`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            prefixes: vec![state_dir.to_path_buf()],
        }
    }

    /// A copy of this `Fs` that may also modify anything under `dir`.
    pub fn scoped(&self, dir: &Path) -> Self {
        let mut prefixes = self.prefixes.clone();
        prefixes.push(dir.to_path_buf());
        Self { prefixes }
    }

    /// The first whitelisted prefix.
    pub fn state_dir(&self) -> &Path {
        &self.prefixes[0]
    }

    /// Check whether the state dir exists, and create it if not.
    pub fn ensure_state_dir_exists(&mut self, verbose: bool) -> Result<()> {
        let dir = self.prefixes[0].clone();
        if !dir.exists() {
            if verbose {
                eprintln!("State directory {:?} doesn't exist. Creating.", dir);
            }
            fs::create_dir_all(&dir).context("creating state directory")?;
        } else if !dir.is_dir() {
            return Err(Error::NotDirectory(dir.to_str().ok_or(PathEncodingError)?.to_string()).into());
        } else if verbose {
            eprintln!("State directory {:?} already exists. Not creating.", dir);
        }

        self.prefixes[0] = dir.canonicalize()?;
        Ok(())
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Create parent directory of a given path.
    pub fn create_parent_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        let parent = path
            .parent()
            .ok_or_else(|| Error::NoParent(path.to_string_lossy().into_owned()))?;
        self.check_whitelist(parent)?;
        fs::create_dir_all(parent).context("creating parent dir")?;
        Ok(())
    }

    /// Write a file so that readers see either the old or the new contents,
    /// never a partial write.
    pub fn write_file_atomic<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        ops::write_atomic(path, text.as_bytes())
            .with_context(|| format!("writing {:?}", path))?;
        Ok(())
    }

    /// Append bytes to a file, creating it and its parent dirs if needed.
    pub fn append_file<T: AsRef<Path>>(&self, path: T, bytes: &[u8]) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        self.create_parent_dir(path)?;
        ops::append(path, bytes).with_context(|| format!("appending to {:?}", path))?;
        Ok(())
    }

    /// Read entire file into a String.
    pub fn read_to_buf<T: AsRef<Path>>(&self, path: T, strbuf: &mut String) -> Result<()> {
        use std::io::Read;
        let path = path.as_ref();
        strbuf.clear();
        let cap = fs::metadata(path)?.len() as usize;
        if cap > strbuf.len() {
            strbuf.reserve(cap - strbuf.len());
        }
        let mut f = fs::File::open(path)?;
        f.read_to_string(strbuf)?;
        Ok(())
    }

    /// List entries in a directory
    pub fn read_dir<T: AsRef<Path>>(&self, path: T) -> Result<fs::ReadDir, io::Error> {
        fs::read_dir(path)
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        self.prefixes.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Fail unless `path` is under one of our prefixes.
    pub fn check_whitelist(&self, path: &Path) -> Result<()> {
        if !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(PathEncodingError)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}
