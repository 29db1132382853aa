//! EP-024: Compile server core and its request routing.
//!
//! `compile_core` writes the script and its includes into the server cache
//! directory, serves a cached artifact when every unit was already present,
//! and otherwise runs the language's compile command in that directory.
//! ABI generation failures are logged and produce an empty ABI.
//!
//! `route` maps an HTTP path and body to a reply; hosting a listener is
//! left to the embedding application.

use super::cache::CacheDir;
use super::includes::sha256_hex;
use super::lang::LangRegistry;
use super::net::{HexResponse, ProxyRequest, ProxyResponse, Request, Response};
use super::{Artifact, Compiler};
use crate::error::{EpmError, Result};
use crate::transport::local;
use std::path::PathBuf;

/// Server-side compiler with its own cache directory.
#[derive(Debug, Clone)]
pub struct CompileServer {
    cache: CacheDir,
    langs: LangRegistry,
    invocations: usize,
    verbosity: u8,
}

impl CompileServer {
    pub fn new(cache_dir: impl Into<PathBuf>, langs: LangRegistry) -> Self {
        CompileServer {
            cache: CacheDir::new(cache_dir),
            langs,
            invocations: 0,
            verbosity: 0,
        }
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn cache(&self) -> &CacheDir {
        &self.cache
    }

    /// Number of compiler command invocations so far.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    pub fn compile_core(&mut self, req: &Request) -> Response {
        match self.compile_request(req) {
            Ok(artifact) => Response::ok(artifact),
            Err(e) => Response::err(e),
        }
    }

    fn compile_request(&mut self, req: &Request) -> Result<Artifact> {
        let lang = self.langs.get(&req.language)?.clone();
        if req.script.is_empty() {
            return Err(EpmError::CompilerFailed("no script provided".to_string()));
        }

        let hash = sha256_hex(&req.script);
        let mut maybe_cached = !self.cache.write_unit(&lang, &hash, &req.script)?;
        for (name, code) in &req.includes {
            if self.cache.write_unit(&lang, name, code)? {
                maybe_cached = false;
            }
        }
        if maybe_cached {
            if let Some(hit) = self.cache.load(&hash) {
                if self.verbosity >= 2 {
                    eprintln!("compile server: cache hit {}", hash);
                }
                return Ok(hit);
            }
        }

        let filename = lang.ext(&hash);
        let dir = self.cache.root().to_path_buf();
        self.invocations += 1;
        if self.verbosity >= 1 {
            eprintln!("compile server: {}", lang.cmd(&filename).join(" "));
        }
        let out = local::exec_command(&lang.cmd(&filename), &dir).map_err(EpmError::CompilerFailed)?;
        if !out.success() {
            return Err(EpmError::CompilerFailed(out.failure_message()));
        }
        let code = out.stdout.trim();
        let bytecode = hex::decode(code.trim_start_matches("0x")).map_err(|e| {
            EpmError::CompilerFailed(format!("compiler output is not hex ({}): {:?}", e, code))
        })?;

        let abi_cmd = lang.abi(&filename);
        let abi = if abi_cmd.is_empty() {
            String::new()
        } else {
            match local::exec_command(&abi_cmd, &dir) {
                Ok(o) if o.success() => o.stdout.trim().to_string(),
                Ok(o) => {
                    eprintln!("warning: abi generation failed for {}: {}", filename, o.failure_message());
                    String::new()
                }
                Err(e) => {
                    eprintln!("warning: abi generation failed for {}: {}", filename, e);
                    String::new()
                }
            }
        };

        let artifact = Artifact { bytecode, abi };
        self.cache.store(&hash, &artifact)?;
        Ok(artifact)
    }
}

/// Reply to one routed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Reply {
    fn json<T: serde::Serialize>(value: &T) -> Reply {
        match serde_json::to_vec(value) {
            Ok(body) => Reply { status: 200, body },
            Err(e) => Reply::error(500, &e.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Reply {
        Reply {
            status,
            body: message.as_bytes().to_vec(),
        }
    }
}

/// Dispatch `POST <path>` with a JSON body.
///
/// - `/compile`  → [`Response`]
/// - `/compile2` → `{"bytecode": "<hex>"}`
/// - `/`         → proxy: compile a path or literal with the client `Compiler`
pub fn route(server: &mut CompileServer, client: &mut Compiler, path: &str, body: &[u8]) -> Reply {
    match path {
        "/compile" | "/compile2" => {
            let req: Request = match serde_json::from_slice(body) {
                Ok(r) => r,
                Err(e) => return Reply::error(400, &format!("bad request: {}", e)),
            };
            let resp = server.compile_core(&req);
            if path == "/compile" {
                Reply::json(&resp)
            } else {
                Reply::json(&HexResponse {
                    bytecode: hex::encode(&resp.bytecode),
                })
            }
        }
        "/" => {
            let req: ProxyRequest = match serde_json::from_slice(body) {
                Ok(r) => r,
                Err(e) => return Reply::error(400, &format!("bad request: {}", e)),
            };
            let result = if req.literal {
                client.compile_literal(&req.source, &req.language)
            } else {
                client.compile(std::path::Path::new(&req.source))
            };
            Reply::json(&ProxyResponse::from_result(result))
        }
        other => Reply::error(404, &format!("no route for {}", other)),
    }
}
