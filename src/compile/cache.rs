//! EP-022: On-disk compile cache keyed by content hash.
//!
//! Layout under the cache root:
//! - `<hash>.bin`   hex bytecode
//! - `<hash>.abi`   ABI document (may be empty)
//! - `<hash>.<ext>` source unit; an empty file marks an include hash as seen
//!
//! An empty or undecodable bytecode file is a miss, never an error.

use super::lang::LangDescriptor;
use super::Artifact;
use crate::error::{EpmError, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheDir { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            EpmError::io(format!("cannot create cache dir {}", self.root.display()), e)
        })
    }

    pub fn bytecode_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}.bin", hash))
    }

    pub fn abi_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}.abi", hash))
    }

    pub fn unit_path(&self, lang: &LangDescriptor, hash: &str) -> PathBuf {
        self.root.join(lang.ext(hash))
    }

    /// Cached artifact for `hash`, if present and intact.
    pub fn load(&self, hash: &str) -> Option<Artifact> {
        let text = std::fs::read_to_string(self.bytecode_path(hash)).ok()?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let bytecode = hex::decode(text.trim_start_matches("0x")).ok()?;
        let abi = std::fs::read_to_string(self.abi_path(hash)).unwrap_or_default();
        Some(Artifact { bytecode, abi })
    }

    /// Persist an artifact (temp file, then rename).
    pub fn store(&self, hash: &str, artifact: &Artifact) -> Result<()> {
        self.ensure()?;
        write_atomic(&self.abi_path(hash), artifact.abi.as_bytes())?;
        write_atomic(
            &self.bytecode_path(hash),
            hex::encode(&artifact.bytecode).as_bytes(),
        )
    }

    pub fn has_unit(&self, lang: &LangDescriptor, hash: &str) -> bool {
        self.unit_path(lang, hash).exists()
    }

    /// Write an empty marker for an include hash unless one exists.
    pub fn mark_unit(&self, lang: &LangDescriptor, hash: &str) -> Result<bool> {
        let path = self.unit_path(lang, hash);
        if path.exists() {
            return Ok(false);
        }
        self.ensure()?;
        std::fs::write(&path, b"")
            .map_err(|e| EpmError::io(format!("cannot write {}", path.display()), e))?;
        Ok(true)
    }

    /// Write a source unit; returns false when it was already present.
    pub fn write_unit(&self, lang: &LangDescriptor, hash: &str, code: &[u8]) -> Result<bool> {
        let path = self.unit_path(lang, hash);
        let existed = path.exists();
        self.ensure()?;
        std::fs::write(&path, code)
            .map_err(|e| EpmError::io(format!("cannot write {}", path.display()), e))?;
        Ok(!existed)
    }

    /// Remove every entry. Returns the number of files removed.
    pub fn clear(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(EpmError::io(
                    format!("cannot read cache dir {}", self.root.display()),
                    e,
                ))
            }
        };
        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() {
                std::fs::remove_file(&path)
                    .map_err(|e| EpmError::io(format!("cannot remove {}", path.display()), e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)
        .map_err(|e| EpmError::io(format!("cannot write {}", tmp.display()), e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        EpmError::io(
            format!("cannot rename {} -> {}", tmp.display(), path.display()),
            e,
        )
    })
}
