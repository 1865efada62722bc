//! Server host key: loaded from disk, or generated and saved on first start.

use std::fs::{self, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tracing::info;

/// Load the Ed25519 host key at `path`, creating it if the file is missing.
pub fn load_or_generate(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        let key = russh_keys::load_secret_key(path, None)
            .with_context(|| format!("load host key {}", path.display()))?;
        info!(path = %path.display(), "host key loaded");
        return Ok(key);
    }

    let key = KeyPair::generate_ed25519().context("generate ed25519 host key")?;
    write_key(path, &key)?;
    info!(path = %path.display(), "host key generated");
    Ok(key)
}

/// Write `key` as PKCS#8 PEM, readable only by the owner on Unix.
fn write_key(path: &Path, key: &KeyPair) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options
        .open(path)
        .with_context(|| format!("create host key {}", path.display()))?;
    russh_keys::encode_pkcs8_pem(key, file)
        .with_context(|| format!("write host key {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_is_reloaded_unchanged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("keys").join("host_key");

        let first = load_or_generate(&path).expect("generate");
        assert!(path.exists());
        let second = load_or_generate(&path).expect("reload");
        assert_eq!(
            first.clone_public_key().expect("public").fingerprint(),
            second.clone_public_key().expect("public").fingerprint()
        );
    }

    #[cfg(unix)]
    #[test]
    fn generated_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("host_key");
        load_or_generate(&path).expect("generate");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn garbage_key_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("host_key");
        fs::write(&path, "not a key").expect("write");
        let err = load_or_generate(&path).expect_err("garbage");
        assert!(err.to_string().starts_with("load host key"));
    }
}
