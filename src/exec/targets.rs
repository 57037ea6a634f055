use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;
use walkdir::WalkDir;

use util::PathEncodingError;
use workflow::{FileFilter, Variables};

/// One file a per-file task runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub absolute: PathBuf,
    /// path relative to the unit root, '/' separated
    pub relative: String,
}

impl FileTarget {
    /// Variables a per-file job sees on top of the unit's own.
    /// `fileUUID` depends only on the unit and the relative path,
    /// so it is the same every time the task runs.
    pub fn vars(&self, unit: Uuid) -> Result<Variables, PathEncodingError> {
        let input = self.absolute.to_str().ok_or(PathEncodingError)?;
        let file_name = self
            .absolute
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(PathEncodingError)?;
        let dir = match self.absolute.parent() {
            Some(parent) => format!("{}/", parent.to_str().ok_or(PathEncodingError)?),
            None => String::from("/"),
        };
        let ext = self
            .absolute
            .extension()
            .map(|e| e.to_str().ok_or(PathEncodingError))
            .transpose()?
            .unwrap_or("");

        let mut vars = Variables::default();
        vars.set("inputFile", input);
        vars.set("relativeLocation", self.relative.as_str());
        vars.set("fileName", file_name);
        vars.set("fileDirectory", dir);
        vars.set("fileExtension", ext);
        vars.set(
            "fileExtensionWithDot",
            if ext.is_empty() { String::new() } else { format!(".{ext}") },
        );
        vars.set("fileUUID", file_uuid(unit, &self.relative).to_string());
        Ok(vars)
    }
}

pub fn file_uuid(unit: Uuid, relative: &str) -> Uuid {
    Uuid::new_v5(&unit, relative.as_bytes())
}

/// Every regular file under `root` that passes `filter`, in lexical order
/// of relative path.
pub fn collect_targets(root: &Path, filter: &FileFilter) -> Result<Vec<FileTarget>> {
    let mut targets = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("while listing files in {root:?}"))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = relative_str(root, entry.path())?;
        if filter.matches(&relative) {
            targets.push(FileTarget {
                absolute: entry.into_path(),
                relative,
            });
        }
    }
    targets.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(targets)
}

fn relative_str(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root)?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str().ok_or(PathEncodingError))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join("/"))
}
