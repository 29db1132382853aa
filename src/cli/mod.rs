//! EP-017: CLI subcommands — init, validate, run, compile, clear-cache.

use crate::chain::memory::MemoryChain;
use crate::compile::{CacheTier, Compiler};
use crate::core::config::{self, EngineConfig};
use crate::core::executor::Engine;
use crate::core::parser;
use crate::core::types::ErrorPolicy;
use crate::tripwire::hasher;
use clap::{Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default epm.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse a package definition without running it
    Validate {
        /// Package definition file
        file: PathBuf,
    },

    /// Run a package definition against the in-process chain
    Run {
        /// Package definition file
        file: PathBuf,

        /// Engine config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Failure handling; overrides the config
        #[arg(long, value_enum)]
        on_error: Option<OnError>,

        /// Honour diff markers
        #[arg(long)]
        diff: bool,

        /// Variables file loaded before and saved after the run
        #[arg(long)]
        vars: Option<PathBuf>,

        /// Increase diagnostics (repeatable)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Compile a contract through the cache and print its bytecode
    Compile {
        /// Contract source file
        file: PathBuf,

        /// Engine config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Compile every language on this remote server
        #[arg(long)]
        remote: Option<String>,
    },

    /// Remove cached compile artifacts
    ClearCache {
        /// Engine config
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "all")]
        tier: Tier,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OnError {
    Persist,
    Return,
    Fail,
}

impl From<OnError> for ErrorPolicy {
    fn from(v: OnError) -> Self {
        match v {
            OnError::Persist => ErrorPolicy::Persist,
            OnError::Return => ErrorPolicy::Return,
            OnError::Fail => ErrorPolicy::Fail,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Tier {
    Client,
    Server,
    All,
}

impl From<Tier> for CacheTier {
    fn from(v: Tier) -> Self {
        match v {
            Tier::Client => CacheTier::Client,
            Tier::Server => CacheTier::Server,
            Tier::All => CacheTier::All,
        }
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Run {
            file,
            config,
            on_error,
            diff,
            vars,
            verbose,
        } => {
            let mut cfg = load_or_default(config.as_deref())?;
            if let Some(policy) = on_error {
                cfg.policy.on_error = policy.into();
            }
            cfg.policy.diff |= diff;
            if vars.is_some() {
                cfg.vars_file = vars;
            }
            cfg.verbosity = cfg.verbosity.max(verbose);
            cmd_run(&file, cfg)
        }
        Commands::Compile {
            file,
            config,
            remote,
        } => {
            let mut cfg = load_or_default(config.as_deref())?;
            if let Some(url) = remote {
                cfg.compiler.languages.set_remote(&url);
            }
            cmd_compile(&file, cfg)
        }
        Commands::ClearCache { config, tier } => {
            let cfg = load_or_default(config.as_deref())?;
            cmd_clear_cache(cfg, tier.into())
        }
    }
}

fn load_or_default(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(p) => config::load_config(p).map_err(|e| e.to_string()),
        None => {
            let default = Path::new("epm.yaml");
            if default.exists() {
                config::load_config(default).map_err(|e| e.to_string())
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("epm.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let template = r#"contract_path: contracts
scratch_dir: .epm/scratch
abi_dir: .epm/abi
log_file: epm.log
include_root: .epm/src
event_log: .epm/events.jsonl

policy:
  on_error: fail
  diff: false
  commit_timeout_ms: 30000

compiler:
  client_cache_dir: .epm/cache/client
  server_cache_dir: .epm/cache/server
  remote_timeout_secs: 60
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized epm project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let pkg = parser::parse_package_file(file).map_err(|e| e.to_string())?;
    let hash = hasher::hash_file(file).map_err(|e| e.to_string())?;
    let snapshots: usize = pkg.diff_schedule.values().map(Vec::len).sum();
    println!(
        "OK: {} ({} jobs, {} snapshot captures) {}",
        file.display(),
        pkg.jobs.len(),
        snapshots,
        hash
    );
    Ok(())
}

fn cmd_run(file: &Path, cfg: EngineConfig) -> Result<(), String> {
    let mut engine = Engine::new(MemoryChain::default(), cfg);
    let report = engine.run_file(file).map_err(|e| e.to_string())?;

    for test in &report.tests {
        print!("{}", test);
    }
    for diff in &report.diffs {
        print!("{}", diff);
    }
    println!(
        "Run {}: {} job(s), {} failed ({:.2}s)",
        report.run_id,
        report.jobs_run,
        report.failures.len(),
        report.total_seconds
    );
    if report.succeeded() {
        Ok(())
    } else {
        eprint!("{}", report.failure_report());
        Err(format!("{} job(s) failed", report.failures.len()))
    }
}

fn cmd_compile(file: &Path, cfg: EngineConfig) -> Result<(), String> {
    let mut compiler = Compiler::new(cfg.compiler).with_verbosity(cfg.verbosity);
    let artifact = compiler.compile(file).map_err(|e| e.to_string())?;
    println!("{}", hex::encode(&artifact.bytecode));
    if !artifact.abi.is_empty() {
        println!("{}", artifact.abi);
    }
    Ok(())
}

fn cmd_clear_cache(cfg: EngineConfig, tier: CacheTier) -> Result<(), String> {
    let mut compiler = Compiler::new(cfg.compiler);
    let removed = compiler.clear_caches(tier).map_err(|e| e.to_string())?;
    println!("Removed {} cached file(s)", removed);
    Ok(())
}
