//! EP-009: Engine configuration loaded from YAML.
//!
//! Every field has a default, so an empty document is a valid config.
//! Relative paths are interpreted against the process working directory.

use super::types::ErrorPolicy;
use crate::compile::CompilerConfig;
use crate::error::{EpmError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a run reacts to job failures and when it snapshots state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    pub on_error: ErrorPolicy,
    /// Honour `!{` / `!}` diff markers.
    pub diff: bool,
    /// Deadline for a commit to produce a block; `None` waits forever.
    pub commit_timeout_ms: Option<u64>,
}

impl Default for RunPolicy {
    fn default() -> Self {
        RunPolicy {
            on_error: ErrorPolicy::Fail,
            diff: false,
            commit_timeout_ms: Some(30_000),
        }
    }
}

impl RunPolicy {
    pub fn commit_timeout(&self) -> Option<Duration> {
        self.commit_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root that deploy and modify-deploy paths are relative to.
    pub contract_path: PathBuf,
    /// Where modify-deploy writes rewritten sources.
    pub scratch_dir: PathBuf,
    /// Per-chain ABI documents keyed by deployed address.
    pub abi_dir: PathBuf,
    /// Target of the `log` command.
    pub log_file: PathBuf,
    /// Variables loaded before and saved after a file run.
    pub vars_file: Option<PathBuf>,
    /// Search root for `include`; missing entries are cloned here.
    pub include_root: PathBuf,
    /// JSONL run log; disabled when unset.
    pub event_log: Option<PathBuf>,
    pub policy: RunPolicy,
    pub verbosity: u8,
    pub compiler: CompilerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            contract_path: PathBuf::from("."),
            scratch_dir: PathBuf::from(".epm/scratch"),
            abi_dir: PathBuf::from(".epm/abi"),
            log_file: PathBuf::from("epm.log"),
            vars_file: None,
            include_root: PathBuf::from(".epm/src"),
            event_log: None,
            policy: RunPolicy::default(),
            verbosity: 0,
            compiler: CompilerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Config with every working directory placed under `root`.
    pub fn rooted(root: &Path) -> Self {
        let epm = root.join(".epm");
        EngineConfig {
            contract_path: root.to_path_buf(),
            scratch_dir: epm.join("scratch"),
            abi_dir: epm.join("abi"),
            log_file: root.join("epm.log"),
            include_root: epm.join("src"),
            compiler: CompilerConfig {
                client_cache_dir: epm.join("cache/client"),
                server_cache_dir: epm.join("cache/server"),
                ..CompilerConfig::default()
            },
            ..EngineConfig::default()
        }
    }
}

/// Parse a YAML config document.
pub fn parse_config(yaml: &str) -> Result<EngineConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| EpmError::Config(format!("YAML parse error: {}", e)))
}

/// Load a YAML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EpmError::io(format!("cannot read config {}", path.display()), e))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ep009_empty_is_default() {
        let cfg = parse_config("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.policy.on_error, ErrorPolicy::Fail);
        assert_eq!(cfg.policy.commit_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_ep009_parse_fields() {
        let yaml = r#"
contract_path: contracts
vars_file: vars.txt
verbosity: 2
policy:
  on_error: persist
  diff: true
  commit_timeout_ms: null
compiler:
  remote_timeout_secs: 5
  languages:
    lll:
      extensions: [lll]
      compile_cmd: ["lllc", "_"]
"#;
        let cfg = parse_config(yaml).unwrap();
        assert_eq!(cfg.contract_path, PathBuf::from("contracts"));
        assert_eq!(cfg.vars_file, Some(PathBuf::from("vars.txt")));
        assert_eq!(cfg.policy.on_error, ErrorPolicy::Persist);
        assert!(cfg.policy.diff);
        assert_eq!(cfg.policy.commit_timeout(), None);
        assert_eq!(cfg.compiler.remote_timeout_secs, 5);
        assert_eq!(cfg.compiler.languages.names().collect::<Vec<_>>(), vec!["lll"]);
        assert_eq!(cfg.scratch_dir, PathBuf::from(".epm/scratch"));
    }

    #[test]
    fn test_ep009_bad_yaml() {
        let err = parse_config("policy: [").unwrap_err();
        assert!(matches!(err, EpmError::Config(_)));
        let err = parse_config("policy:\n  on_error: sometimes\n").unwrap_err();
        assert!(err.to_string().contains("YAML"));
    }

    #[test]
    fn test_ep009_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epm.yaml");
        std::fs::write(&path, "verbosity: 1\n").unwrap();
        assert_eq!(load_config(&path).unwrap().verbosity, 1);
        assert!(load_config(&dir.path().join("nope.yaml")).is_err());
    }

    #[test]
    fn test_ep009_rooted() {
        let cfg = EngineConfig::rooted(Path::new("/w"));
        assert_eq!(cfg.abi_dir, PathBuf::from("/w/.epm/abi"));
        assert_eq!(cfg.compiler.client_cache_dir, PathBuf::from("/w/.epm/cache/client"));
    }
}
