//! Temp-file + rename writes shared by the config and the JSON stores.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Replace `path` with `contents`, creating parent directories as needed.
///
/// Readers observe either the old file or the new one, never a partial write.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_parents_and_replaces_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a").join("b").join("users.json");
        write_atomic(&path, "{}\n").expect("first write");
        write_atomic(&path, "{\"x\":1}\n").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "{\"x\":1}\n");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn temp_name_keeps_original_extension() {
        assert_eq!(
            tmp_path_for(Path::new("data/tasks/alice.json")),
            PathBuf::from("data/tasks/alice.json.tmp")
        );
    }
}
