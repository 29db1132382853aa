//! EP-020: Language descriptors — how each contract language is detected,
//! how its includes are found and rewritten, and how its compiler is invoked.

use crate::error::{EpmError, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder in command templates replaced by the source file name.
pub const FILE_PLACEHOLDER: &str = "_";

/// One supported contract language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangDescriptor {
    /// Remote compile endpoint.
    #[serde(default)]
    pub url: String,
    /// Local compiler binary, substituted for `{compiler}` in templates.
    #[serde(default)]
    pub path: String,
    /// Compile remotely instead of locally.
    #[serde(default)]
    pub net: bool,
    pub extensions: Vec<String>,
    /// Include-detection patterns; capture group 1 is the included file name.
    #[serde(default)]
    pub include_regexes: Vec<String>,
    /// Prefix/suffix written around the content hash, one pair per regex.
    #[serde(default)]
    pub include_replaces: Vec<(String, String)>,
    pub compile_cmd: Vec<String>,
    #[serde(default)]
    pub abi_cmd: Vec<String>,
}

impl LangDescriptor {
    /// Cache file name for a content hash: `<hash>.<first extension>`.
    pub fn ext(&self, hash: &str) -> String {
        match self.extensions.first() {
            Some(ext) => format!("{}.{}", hash, ext),
            None => hash.to_string(),
        }
    }

    fn expand(&self, template: &[String], filename: &str) -> Vec<String> {
        template
            .iter()
            .map(|t| {
                if t == FILE_PLACEHOLDER {
                    filename.to_string()
                } else {
                    t.replace("{compiler}", &self.path)
                }
            })
            .collect()
    }

    /// Compile command line for `filename`.
    pub fn cmd(&self, filename: &str) -> Vec<String> {
        self.expand(&self.compile_cmd, filename)
    }

    /// ABI command line for `filename`; empty when the language has none.
    pub fn abi(&self, filename: &str) -> Vec<String> {
        self.expand(&self.abi_cmd, filename)
    }

    /// Compiled include patterns paired with their replacement templates.
    pub fn include_rules(&self) -> Result<Vec<(Regex, (String, String))>> {
        if self.include_regexes.len() != self.include_replaces.len() {
            return Err(EpmError::Config(format!(
                "{} include regexes but {} replacements",
                self.include_regexes.len(),
                self.include_replaces.len()
            )));
        }
        self.include_regexes
            .iter()
            .zip(&self.include_replaces)
            .map(|(re, rep)| {
                Regex::new(re)
                    .map(|r| (r, rep.clone()))
                    .map_err(|e| EpmError::Config(format!("bad include regex {:?}: {}", re, e)))
            })
            .collect()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// LLL: `(include "file")` → `(include "<hash>.lll")`.
pub fn lll() -> LangDescriptor {
    LangDescriptor {
        url: "http://localhost:9099/compile".to_string(),
        path: "lllc".to_string(),
        net: false,
        extensions: strings(&["lll", "def"]),
        include_regexes: vec![r#"\(include "(.+?)"\)"#.to_string()],
        include_replaces: vec![(r#"(include ""#.to_string(), r#".lll")"#.to_string())],
        compile_cmd: strings(&["{compiler}", "_"]),
        abi_cmd: Vec::new(),
    }
}

/// Serpent: `create("file")` / `create('file')` → `create("<hash>.se")`.
pub fn serpent() -> LangDescriptor {
    LangDescriptor {
        url: "http://localhost:9099/compile".to_string(),
        path: "serpent".to_string(),
        net: false,
        extensions: strings(&["se"]),
        include_regexes: vec![
            r#"create\("(.+?)"\)"#.to_string(),
            r#"create\('(.+?)'\)"#.to_string(),
        ],
        include_replaces: vec![
            (r#"create(""#.to_string(), r#".se")"#.to_string()),
            (r#"create(""#.to_string(), r#".se")"#.to_string()),
        ],
        compile_cmd: strings(&["{compiler}", "compile", "_"]),
        abi_cmd: strings(&["{compiler}", "mk_full_signature", "_"]),
    }
}

/// Name → descriptor table, owned by a compiler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LangRegistry {
    langs: IndexMap<String, LangDescriptor>,
}

impl Default for LangRegistry {
    fn default() -> Self {
        let mut langs = IndexMap::new();
        langs.insert("lll".to_string(), lll());
        langs.insert("se".to_string(), serpent());
        LangRegistry { langs }
    }
}

impl LangRegistry {
    pub fn empty() -> Self {
        LangRegistry {
            langs: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, lang: LangDescriptor) {
        self.langs.insert(name.to_string(), lang);
    }

    pub fn get(&self, name: &str) -> Result<&LangDescriptor> {
        self.langs
            .get(name)
            .ok_or_else(|| EpmError::UnknownLanguage(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.langs.keys().map(String::as_str)
    }

    /// Language whose extensions include the file's extension.
    pub fn from_file(&self, path: &Path) -> Result<&str> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| EpmError::UnknownLanguage(path.display().to_string()))?;
        self.langs
            .iter()
            .find(|(_, l)| l.extensions.iter().any(|e| e == ext))
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| EpmError::UnknownLanguage(ext.to_string()))
    }

    /// Point every language at one remote compile server.
    pub fn set_remote(&mut self, url: &str) {
        for lang in self.langs.values_mut() {
            lang.url = url.to_string();
            lang.net = true;
        }
    }

    /// Force local compilation for every language.
    pub fn set_local(&mut self) {
        for lang in self.langs.values_mut() {
            lang.net = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ep020_from_file() {
        let reg = LangRegistry::default();
        assert_eq!(reg.from_file(Path::new("a/b.lll")).unwrap(), "lll");
        assert_eq!(reg.from_file(Path::new("x.def")).unwrap(), "lll");
        assert_eq!(reg.from_file(Path::new("c.se")).unwrap(), "se");
        assert!(matches!(
            reg.from_file(Path::new("d.sol")),
            Err(EpmError::UnknownLanguage(_))
        ));
        assert!(reg.from_file(Path::new("noext")).is_err());
    }

    #[test]
    fn test_ep020_command_templates() {
        let l = lll();
        assert_eq!(l.cmd("abc.lll"), vec!["lllc", "abc.lll"]);
        assert!(l.abi("abc.lll").is_empty());
        assert_eq!(serpent().abi("x.se"), vec!["serpent", "mk_full_signature", "x.se"]);
        assert_eq!(l.ext("ff00"), "ff00.lll");
    }

    #[test]
    fn test_ep020_include_rules_match() {
        let rules = lll().include_rules().unwrap();
        let caps = rules[0].0.captures(r#"(include "lib/math.lll")"#).unwrap();
        assert_eq!(&caps[1], "lib/math.lll");
        let rules = serpent().include_rules().unwrap();
        assert!(rules[1].0.is_match("create('sub.se')"));
    }

    #[test]
    fn test_ep020_unknown_language() {
        let reg = LangRegistry::empty();
        assert_eq!(reg.get("lll").unwrap_err().to_string(), "unknown language: lll");
    }

    #[test]
    fn test_ep020_set_remote() {
        let mut reg = LangRegistry::default();
        reg.set_remote("http://compilers.local/compile");
        assert!(reg.get("lll").unwrap().net);
        assert_eq!(reg.get("se").unwrap().url, "http://compilers.local/compile");
    }

    #[test]
    fn test_ep020_yaml_registry() {
        let yaml = r#"
lll:
  extensions: [lll]
  include_regexes: ['\(include "(.+?)"\)']
  include_replaces: [['(include "', '.lll")']]
  compile_cmd: [sh, -c, 'cat "$0"', _]
"#;
        let reg: LangRegistry = serde_yaml_ng::from_str(yaml).unwrap();
        let l = reg.get("lll").unwrap();
        assert_eq!(l.cmd("f.lll"), vec!["sh", "-c", "cat \"$0\"", "f.lll"]);
        assert_eq!(l.include_rules().unwrap().len(), 1);
    }
}
