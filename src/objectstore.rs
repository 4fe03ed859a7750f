//! Annotated frame storage.
//!
//! Frames are written as opaque blobs under hierarchical keys like
//! `cam_001/intrusion/frame_00000042.jpg`. The filesystem implementation
//! maps keys to paths under a root directory and writes atomically through a
//! temp file so a crashed drain never leaves a torn image behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

pub trait ObjectStore: Send {
    /// Store `bytes` under `key`, returning the stable path recorded in the
    /// event row.
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<String>;
}

pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create object store root {}", root.display()))?;
        Ok(Self { root })
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(anyhow!("object key is empty"));
        }
        let valid = key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-'));
        if !valid || key.contains("..") || key.starts_with('/') {
            return Err(anyhow!("invalid object key: {key}"));
        }
        Ok(())
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<String> {
        Self::validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create object directory {}", parent.display()))?;
        }
        write_atomic(&path, bytes)?;
        Ok(key.to_string())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Discards everything. Useful when persistence of frames is not wanted.
#[derive(Default)]
pub struct NullObjectStore;

impl ObjectStore for NullObjectStore {
    fn put(&mut self, key: &str, _bytes: &[u8]) -> Result<String> {
        Ok(key.to_string())
    }
}
