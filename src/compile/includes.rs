//! EP-021: Recursive include resolution.
//!
//! Each include is resolved relative to the including file, rewritten
//! depth-first, hashed (SHA-256 of its rewritten text) and replaced in the
//! parent by a reference to that hash. A file that transitively includes
//! itself is rejected.

use super::lang::LangDescriptor;
use crate::error::{EpmError, Result};
use indexmap::IndexMap;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Lower-case hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Source with every include rewritten to its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub code: String,
    pub hash: String,
    /// Include hash → rewritten include text, in discovery order.
    pub includes: IndexMap<String, Vec<u8>>,
}

type Rule = (Regex, (String, String));

/// Rewrite `source` (located in `dir`) and collect its transitive includes.
pub fn resolve_includes(
    lang: &LangDescriptor,
    source: &str,
    dir: &Path,
    origin: Option<&Path>,
) -> Result<ResolvedSource> {
    let rules = lang.include_rules()?;
    let mut includes = IndexMap::new();
    let mut stack: Vec<PathBuf> = origin
        .and_then(|p| p.canonicalize().ok())
        .into_iter()
        .collect();
    let code = rewrite(&rules, source, dir, &mut stack, &mut includes)?;
    let hash = sha256_hex(code.as_bytes());
    Ok(ResolvedSource {
        code,
        hash,
        includes,
    })
}

fn rewrite(
    rules: &[Rule],
    source: &str,
    dir: &Path,
    stack: &mut Vec<PathBuf>,
    includes: &mut IndexMap<String, Vec<u8>>,
) -> Result<String> {
    let mut text = source.to_string();
    for (re, (prefix, suffix)) in rules {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in re.captures_iter(&text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let hash = include_one(rules, name.as_str(), dir, stack, includes)?;
            out.push_str(&text[last..whole.start()]);
            out.push_str(prefix);
            out.push_str(&hash);
            out.push_str(suffix);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        text = out;
    }
    Ok(text)
}

fn include_one(
    rules: &[Rule],
    name: &str,
    dir: &Path,
    stack: &mut Vec<PathBuf>,
    includes: &mut IndexMap<String, Vec<u8>>,
) -> Result<String> {
    let path = dir.join(name);
    let canonical = path.canonicalize().map_err(|e| EpmError::MissingInclude {
        path: path.clone(),
        source: e,
    })?;
    if let Some(pos) = stack.iter().position(|p| *p == canonical) {
        let mut chain: Vec<String> = stack[pos..].iter().map(|p| p.display().to_string()).collect();
        chain.push(canonical.display().to_string());
        return Err(EpmError::IncludeCycle(chain.join(" -> ")));
    }
    let content = std::fs::read_to_string(&canonical).map_err(|e| EpmError::MissingInclude {
        path: path.clone(),
        source: e,
    })?;
    let child_dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

    stack.push(canonical);
    let rewritten = rewrite(rules, &content, &child_dir, stack, includes);
    stack.pop();
    let rewritten = rewritten?;

    let hash = sha256_hex(rewritten.as_bytes());
    includes
        .entry(hash.clone())
        .or_insert_with(|| rewritten.into_bytes());
    Ok(hash)
}
