use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

use super::Fs;
use crate::engine::{Progress, ProgressStore};

/// Keeps one pretty-printed json record per unit under `$STATE/units`.
/// Records are replaced atomically, so a crash leaves the previous one intact.
#[derive(Debug)]
pub struct FileStore {
    fs: Fs,
}

impl FileStore {
    pub fn new(fs: Fs) -> Result<Self> {
        let mut dir = PathBuf::with_capacity(128);
        fs.create_dir(fs.units_dir(&mut dir))?;
        Ok(Self { fs })
    }

    fn read(&self, path: &std::path::Path) -> Result<Progress> {
        let mut strbuf = String::new();
        self.fs.read_to_buf(path, &mut strbuf)?;
        let progress = serde_json::from_str(&strbuf)
            .with_context(|| format!("while reading progress record {:?}", path))?;
        Ok(progress)
    }
}

impl ProgressStore for FileStore {
    fn save_progress(&self, progress: &Progress) -> Result<()> {
        let mut path = PathBuf::with_capacity(128);
        self.fs.progress_file(progress.uuid, &mut path);
        let text = serde_json::to_string_pretty(progress)?;
        self.fs.write_file_atomic(&path, &text)
    }

    fn load_progress(&self, uuid: Uuid) -> Result<Option<Progress>> {
        let mut path = PathBuf::with_capacity(128);
        self.fs.progress_file(uuid, &mut path);
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        self.read(&path).map(Some)
    }

    fn list(&self) -> Result<Vec<Progress>> {
        let mut dir = PathBuf::with_capacity(128);
        self.fs.units_dir(&mut dir);
        let mut paths = Vec::new();
        for entry in self.fs.read_dir(&dir)? {
            let path = entry?.path();
            if self.fs.is_progress_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        paths.iter().map(|p| self.read(p)).collect()
    }
}
