//! EP-007: ABI store and argument packing for transact/call.
//!
//! ABI documents are stored per backend: `<abi_dir>/<chain_id>/<address>`.
//! With an ABI on file the first argument names the function and the rest
//! are encoded as 32-byte static words after its 4-byte selector. Without
//! one, every argument becomes a left-padded 32-byte word.

use super::resolver::parse_number;
use super::symbols::{coerce_hex, strip_hex};
use crate::error::{EpmError, Result};
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use std::path::{Path, PathBuf};

/// Filesystem-backed ABI documents keyed by chain and address.
#[derive(Debug, Clone)]
pub struct AbiStore {
    root: PathBuf,
}

impl AbiStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        AbiStore { root: root.into() }
    }

    pub fn path(&self, chain_id: &str, addr: &str) -> PathBuf {
        self.root
            .join(chain_id)
            .join(strip_hex(addr).to_ascii_lowercase())
    }

    /// Persist an ABI document. Empty documents are not written.
    pub fn save(&self, chain_id: &str, addr: &str, abi: &str) -> Result<()> {
        if abi.trim().is_empty() {
            return Ok(());
        }
        let path = self.path(chain_id, addr);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EpmError::io(format!("cannot create abi dir {}", parent.display()), e))?;
        }
        std::fs::write(&path, abi)
            .map_err(|e| EpmError::io(format!("cannot write abi {}", path.display()), e))
    }

    pub fn load(&self, chain_id: &str, addr: &str) -> Option<String> {
        read_nonempty(&self.path(chain_id, addr))
    }
}

fn read_nonempty(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<AbiParam>,
}

#[derive(Debug, Deserialize)]
struct AbiParam {
    #[serde(rename = "type")]
    kind: String,
}

/// First four bytes of Keccak-256 of the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Encode `function arg...` against an ABI document into one hex call-data string.
/// Returns `Ok(None)` when the document is not valid ABI JSON.
pub fn pack_with_abi(abi: &str, args: &[String]) -> Result<Option<String>> {
    let Ok(entries) = serde_json::from_str::<Vec<AbiEntry>>(abi) else {
        return Ok(None);
    };
    let (name, values) = args
        .split_first()
        .ok_or_else(|| EpmError::Abi("missing function name".to_string()))?;
    let func = entries
        .iter()
        .find(|e| (e.kind == "function" || e.kind.is_empty()) && e.name == *name)
        .ok_or_else(|| EpmError::Abi(format!("function '{}' not found in abi", name)))?;
    if func.inputs.len() != values.len() {
        return Err(EpmError::Abi(format!(
            "function '{}' takes {} argument(s), got {}",
            name,
            func.inputs.len(),
            values.len()
        )));
    }
    let types: Vec<&str> = func.inputs.iter().map(|p| p.kind.as_str()).collect();
    let signature = format!("{}({})", name, types.join(","));
    let mut data = selector(&signature).to_vec();
    for (kind, value) in types.iter().zip(values) {
        data.extend_from_slice(&encode_word(kind, value)?);
    }
    Ok(Some(format!("0x{}", hex::encode(data))))
}

/// Raw convention: each argument as a left-padded 32-byte word.
pub fn pack_raw(args: &[String]) -> Result<Vec<String>> {
    args.iter()
        .map(|a| {
            let bytes = hex_bytes(&coerce_hex(a))?;
            if bytes.len() > 32 {
                return Ok(format!("0x{}", hex::encode(bytes)));
            }
            Ok(format!("0x{}", hex::encode(left_pad(&bytes))))
        })
        .collect()
}

fn hex_bytes(value: &str) -> Result<Vec<u8>> {
    let digits = strip_hex(value);
    let digits = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    hex::decode(&digits).map_err(|e| EpmError::Abi(format!("bad hex {:?}: {}", value, e)))
}

fn left_pad(bytes: &[u8]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(bytes);
    word
}

/// Encode one static ABI value.
pub fn encode_word(kind: &str, value: &str) -> Result<[u8; 32]> {
    let too_wide = || EpmError::Abi(format!("value {:?} does not fit {}", value, kind));
    if kind.contains('[') {
        return Err(EpmError::Abi(format!("unsupported array type {}", kind)));
    }
    if kind.starts_with("uint") || kind.starts_with("int") {
        let bytes = parse_number(value)?.to_bytes_be();
        if bytes.len() > 32 {
            return Err(too_wide());
        }
        return Ok(left_pad(&bytes));
    }
    match kind {
        "address" => {
            let bytes = hex_bytes(value)?;
            let bytes = strip_leading_zero_bytes(&bytes);
            if bytes.len() > 20 {
                return Err(too_wide());
            }
            Ok(left_pad(bytes))
        }
        "bool" => {
            let truth = match value {
                "true" => true,
                "false" => false,
                v => parse_number(v)? != num_bigint::BigUint::default(),
            };
            Ok(left_pad(&[u8::from(truth)]))
        }
        k if k.starts_with("bytes") && k.len() > 5 => {
            let size: usize = k[5..]
                .parse()
                .map_err(|_| EpmError::Abi(format!("unsupported parameter type {}", k)))?;
            let bytes = if value.starts_with("0x") {
                hex_bytes(value)?
            } else {
                value.as_bytes().to_vec()
            };
            if size == 0 || size > 32 || bytes.len() > size {
                return Err(too_wide());
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(word)
        }
        other => Err(EpmError::Abi(format!(
            "unsupported parameter type {} (only static types are packed)",
            other
        ))),
    }
}

fn strip_leading_zero_bytes(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}
