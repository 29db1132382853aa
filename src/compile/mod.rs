//! EP-025: Content-addressed compile cache with recursive include resolution.
//!
//! compile(path) → detect language → rewrite includes to hashes → hash →
//! client cache hit only if the top-level hash and every include hash are
//! known → otherwise compile locally (server core) or remotely (HTTP) →
//! persist the artifact and mark include hashes as seen.

pub mod cache;
pub mod includes;
pub mod lang;
pub mod net;
pub mod server;

use crate::error::{EpmError, Result};
use cache::CacheDir;
use lang::LangRegistry;
use serde::{Deserialize, Serialize};
use server::CompileServer;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Compiled bytecode and its (possibly empty) ABI document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub bytecode: Vec<u8>,
    pub abi: String,
}

/// Cache locations and the language table for one compiler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub client_cache_dir: PathBuf,
    pub server_cache_dir: PathBuf,
    pub languages: LangRegistry,
    pub remote_timeout_secs: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            client_cache_dir: PathBuf::from(".epm/cache/client"),
            server_cache_dir: PathBuf::from(".epm/cache/server"),
            languages: LangRegistry::default(),
            remote_timeout_secs: 60,
        }
    }
}

/// Counters for one compiler instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompileStats {
    pub requests: usize,
    pub cache_hits: usize,
    pub local_compiles: usize,
    pub remote_compiles: usize,
    /// External compiler processes actually spawned.
    pub compiler_invocations: usize,
}

/// Which cache tier to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Client,
    Server,
    All,
}

pub struct Compiler {
    langs: LangRegistry,
    client: CacheDir,
    server: CompileServer,
    memo: HashMap<String, Artifact>,
    stats: CompileStats,
    remote_timeout: Duration,
    verbosity: u8,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Compiler {
            server: CompileServer::new(&config.server_cache_dir, config.languages.clone()),
            client: CacheDir::new(&config.client_cache_dir),
            langs: config.languages,
            memo: HashMap::new(),
            stats: CompileStats::default(),
            remote_timeout: Duration::from_secs(config.remote_timeout_secs),
            verbosity: 0,
        }
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self.server = self.server.with_verbosity(verbosity);
        self
    }

    pub fn languages(&self) -> &LangRegistry {
        &self.langs
    }

    pub fn stats(&self) -> CompileStats {
        CompileStats {
            compiler_invocations: self.server.invocations(),
            ..self.stats
        }
    }

    /// Compile a source file; language is chosen by extension.
    pub fn compile(&mut self, path: &Path) -> Result<Artifact> {
        let lang = self.langs.from_file(path)?.to_string();
        let source = std::fs::read_to_string(path)
            .map_err(|e| EpmError::io(format!("cannot read {}", path.display()), e))?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.compile_source(&lang, &name, &source, &dir, Some(path))
    }

    /// Compile source text; includes resolve against the working directory.
    pub fn compile_literal(&mut self, source: &str, lang: &str) -> Result<Artifact> {
        self.langs.get(lang)?;
        let dir = std::env::current_dir()
            .map_err(|e| EpmError::io("cannot determine working directory", e))?;
        self.compile_source(lang, "literal", source, &dir, None)
    }

    fn compile_source(
        &mut self,
        lang_name: &str,
        name: &str,
        source: &str,
        dir: &Path,
        origin: Option<&Path>,
    ) -> Result<Artifact> {
        let lang = self.langs.get(lang_name)?.clone();
        self.stats.requests += 1;

        let resolved = includes::resolve_includes(&lang, source, dir, origin)?;
        let hash = resolved.hash.clone();

        let includes_known = resolved
            .includes
            .keys()
            .all(|h| self.client.has_unit(&lang, h));
        if includes_known {
            let hit = match self.memo.get(&hash) {
                Some(a) => Some(a.clone()),
                None => self.client.load(&hash),
            };
            if let Some(artifact) = hit {
                if self.verbosity >= 2 {
                    eprintln!("compile: cache hit {} ({})", hash, name);
                }
                self.stats.cache_hits += 1;
                self.memo.insert(hash, artifact.clone());
                return Ok(artifact);
            }
        }

        let request = net::Request {
            name: name.to_string(),
            language: lang_name.to_string(),
            script: resolved.code.into_bytes(),
            includes: resolved.includes,
        };
        let response = if lang.net {
            if self.verbosity >= 1 {
                eprintln!("compile: {} via {}", name, lang.url);
            }
            self.stats.remote_compiles += 1;
            net::request_remote(&lang.url, &request, self.remote_timeout)?
        } else {
            if self.verbosity >= 1 {
                eprintln!("compile: {} locally", name);
            }
            self.stats.local_compiles += 1;
            self.server.compile_core(&request)
        };
        let artifact = response.into_artifact()?;

        self.client.store(&hash, &artifact)?;
        for h in request.includes.keys() {
            self.client.mark_unit(&lang, h)?;
        }
        self.memo.insert(hash, artifact.clone());
        Ok(artifact)
    }

    /// Remove cached artifacts; the in-process memo is always dropped.
    pub fn clear_caches(&mut self, tier: CacheTier) -> Result<usize> {
        self.memo.clear();
        let mut removed = 0;
        if matches!(tier, CacheTier::Client | CacheTier::All) {
            removed += self.client.clear()?;
        }
        if matches!(tier, CacheTier::Server | CacheTier::All) {
            removed += self.server.cache().clear()?;
        }
        Ok(removed)
    }
}
