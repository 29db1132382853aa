//! EP-016: BLAKE3 fingerprints for package files and chain state snapshots.

use crate::chain::State;
use crate::error::{EpmError, Result};
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| EpmError::io(format!("cannot open {}", path.display()), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| EpmError::io(format!("read error {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Fingerprint of a storage snapshot, independent of account and slot order.
pub fn fingerprint_state(state: &State) -> String {
    let mut lines: Vec<String> = state
        .storage
        .iter()
        .flat_map(|(addr, storage)| {
            storage
                .slots
                .iter()
                .map(move |(slot, value)| format!("{}\0{}\0{}", addr, slot, value))
        })
        .collect();
    lines.sort();

    let mut hasher = blake3::Hasher::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
