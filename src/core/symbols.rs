//! EP-006: Symbol table — variable storage, hex canonicalization, vars files.
//!
//! Stored values are lower-case, even-length, `0x`-prefixed hex unless the
//! value is a filesystem path (contains `/`), which is kept verbatim.

use crate::error::{EpmError, Result};
use num_bigint::BigUint;
use num_traits::Num;
use std::collections::HashMap;
use std::path::Path;

/// Variable name → canonical value, with an optional dotted namespace for stores.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    vars: HashMap<String, String>,
    prefix: Option<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a name; inside a namespace the prefixed name wins over the bare one.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = strip_braces(name);
        if let Some(prefix) = &self.prefix {
            if let Some(v) = self.vars.get(&format!("{}.{}", prefix, name)) {
                return Some(v);
            }
        }
        self.vars.get(name).map(String::as_str)
    }

    /// Store `value` under `name` (namespaced), canonicalizing non-path values.
    /// Returns the fully qualified name.
    pub fn store(&mut self, name: &str, value: &str) -> String {
        let value = if value.contains('/') {
            value.to_string()
        } else {
            coerce_hex(value)
        };
        self.store_raw(name, value)
    }

    /// Store without canonicalization.
    pub fn store_raw(&mut self, name: &str, value: String) -> String {
        let key = self.qualify(name);
        self.vars.insert(key.clone(), value);
        key
    }

    fn qualify(&self, name: &str) -> String {
        let name = strip_braces(name);
        match &self.prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Replace the namespace, returning the previous one for restoration.
    pub fn set_prefix(&mut self, prefix: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.prefix, prefix)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// All variables sorted by name.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<_> = self
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        out.sort();
        out
    }
}

fn strip_braces(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix("{{")
        .and_then(|n| n.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(name)
}

/// Canonical hex form of a stored value.
///
/// - `0x…` is lower-cased and padded to an even number of digits
/// - decimal integers are converted
/// - other strings longer than 32 bytes that are all hex digits get a `0x` prefix
/// - remaining strings are hex-encoded and left-padded to 32 bytes
pub fn coerce_hex(value: &str) -> String {
    let v = value.trim();
    if let Some(hex) = v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        if hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return even_hex(&hex.to_ascii_lowercase());
        }
    }
    if !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = BigUint::from_str_radix(v, 10) {
            return even_hex(&n.to_str_radix(16));
        }
    }
    if v.len() > 32 && v.chars().all(|c| c.is_ascii_hexdigit()) {
        return even_hex(&v.to_ascii_lowercase());
    }
    let encoded = hex::encode(v.as_bytes());
    if v.len() > 32 {
        return format!("0x{}", encoded);
    }
    format!("0x{:0>64}", encoded)
}

fn even_hex(digits: &str) -> String {
    if digits.is_empty() {
        "0x00".to_string()
    } else if digits.len() % 2 == 1 {
        format!("0x0{}", digits)
    } else {
        format!("0x{}", digits)
    }
}

/// Remove a leading `0x`.
pub fn strip_hex(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Remove leading zero digits.
pub fn strip_zeros(s: &str) -> &str {
    s.trim_start_matches('0')
}

/// Compare two values ignoring case, a `0x` prefix and leading zero padding.
pub fn values_equal(a: &str, b: &str) -> bool {
    strip_zeros(strip_hex(a.trim())).eq_ignore_ascii_case(strip_zeros(strip_hex(b.trim())))
}

/// Read a `key:value` per line vars file into the table.
pub fn read_vars(path: &Path, table: &mut SymbolTable) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EpmError::io(format!("cannot read vars file {}", path.display()), e))?;
    let mut count = 0;
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (k, v) = line.split_once(':').ok_or_else(|| {
            EpmError::Config(format!(
                "{}:{}: expected key:value, got {:?}",
                path.display(),
                n + 1,
                line
            ))
        })?;
        table.store_raw(k.trim(), v.trim().to_string());
        count += 1;
    }
    Ok(count)
}

/// Write all variables as sorted `key:value` lines (temp file, then rename).
pub fn write_vars(path: &Path, table: &SymbolTable) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| EpmError::io(format!("cannot create dir {}", parent.display()), e))?;
    }
    let mut out = String::new();
    for (k, v) in table.entries() {
        out.push_str(&format!("{}:{}\n", k, v));
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, out)
        .map_err(|e| EpmError::io(format!("cannot write {}", tmp.display()), e))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| EpmError::io(format!("cannot rename to {}", path.display()), e))
}
