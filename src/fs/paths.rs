use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::Fs;

const PROGRESS_EXT: &str = "json";

/// Utility fns for making common types of paths.
impl Fs {
    /// $STATE/units
    pub fn units_dir<'a>(&self, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(self.state_dir(), "units", buf)
    }

    /// $STATE/units/<uuid>.json
    pub fn progress_file<'a>(&self, uuid: Uuid, buf: &'a mut PathBuf) -> &'a Path {
        self.units_dir(buf);
        buf.push(uuid.to_string());
        buf.set_extension(PROGRESS_EXT);
        &*buf
    }

    /// Whether a file in the units dir looks like a progress record.
    pub fn is_progress_file(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == PROGRESS_EXT)
    }

    fn parts2<'a, T, U>(&self, p1: T, p2: U, buf: &'a mut PathBuf) -> &'a Path
    where
        T: AsRef<Path>,
        U: AsRef<Path>,
    {
        buf.clear();
        buf.push(p1);
        buf.push(p2);
        &*buf
    }
}
