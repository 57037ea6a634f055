use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::Result;

/// Write to a sibling temp file, sync it, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    {
        let mut f = fs::File::create(tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)?;
    Ok(())
}

/// Append `bytes` to the end of `path`, creating it if needed.
pub fn append(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_leaves_no_temp() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("record.json");
        write_atomic(&path, b"first")?;
        write_atomic(&path, b"second")?;
        assert_eq!("second", fs::read_to_string(&path)?);
        assert!(!dir.path().join("record.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_append() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log");
        append(&path, b"a")?;
        append(&path, b"b")?;
        assert_eq!("ab", fs::read_to_string(&path)?);
        Ok(())
    }
}
