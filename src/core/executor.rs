//! EP-012: Executor — the job loop.
//!
//! For each job in parse order: capture scheduled snapshots → resolve
//! arguments → dispatch → record outcome → apply the error policy.
//! Chain-mutating jobs leave a commit owed; it is flushed at the end of
//! the run unless a commit, test or snapshot settled it first.

use super::abi::AbiStore;
use super::config::EngineConfig;
use super::diff::storage_diff;
use super::parser;
use super::resolver;
use super::symbols::{self, SymbolTable};
use super::types::*;
use crate::chain::{Blockchain, State, NEW_BLOCK};
use crate::compile::Compiler;
use crate::error::{EpmError, Result};
use crate::tripwire::{eventlog, hasher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Subscription name used while waiting for a committed block.
const COMMIT_SUBSCRIPTION: &str = "epm-commit";

/// Drives one chain through package runs.
pub struct Engine<C: Blockchain> {
    pub(super) chain: C,
    pub(super) config: EngineConfig,
    pub(super) compiler: Compiler,
    pub(super) symbols: SymbolTable,
    pub(super) abis: AbiStore,
    pub(super) snapshots: HashMap<String, State>,
    pub(super) owed_commit: bool,
    pub(super) depth: usize,
    /// Directories of the packages being run, innermost last.
    pub(super) dirs: Vec<PathBuf>,
    pub(super) package_file: String,
    pub(super) report: RunReport,
    queued: Vec<Job>,
}

impl<C: Blockchain> Engine<C> {
    pub fn new(chain: C, config: EngineConfig) -> Self {
        let compiler = Compiler::new(config.compiler.clone()).with_verbosity(config.verbosity);
        Engine {
            chain,
            compiler,
            symbols: SymbolTable::new(),
            abis: AbiStore::new(&config.abi_dir),
            snapshots: HashMap::new(),
            owed_commit: false,
            depth: 0,
            dirs: Vec::new(),
            package_file: String::new(),
            report: RunReport::default(),
            queued: Vec::new(),
            config,
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut C {
        &mut self.chain
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn set_error_policy(&mut self, policy: ErrorPolicy) {
        self.config.policy.on_error = policy;
    }

    pub fn set_diff(&mut self, on: bool) {
        self.config.policy.diff = on;
    }

    /// True when a chain-mutating job has run since the last commit.
    pub fn commit_owed(&self) -> bool {
        self.owed_commit
    }

    /// Queue a job built from a command keyword and argument text.
    pub fn add_job(&mut self, command: &str, args: &str) -> Result<()> {
        let job = parser::parse_job(command, args)?;
        self.queued.push(job);
        Ok(())
    }

    /// Run and clear the queued jobs.
    pub fn run_queued(&mut self) -> Result<RunReport> {
        let pkg = ParsedPackage {
            jobs: std::mem::take(&mut self.queued),
            diff_schedule: DiffSchedule::new(),
        };
        self.execute_jobs(&pkg)
    }

    /// Parse and run a package file, loading and saving the vars file if configured.
    pub fn run_file(&mut self, path: &Path) -> Result<RunReport> {
        if let Some(vars) = self.config.vars_file.clone() {
            if vars.exists() {
                let n = symbols::read_vars(&vars, &mut self.symbols)?;
                if self.config.verbosity >= 1 {
                    eprintln!("loaded {} variable(s) from {}", n, vars.display());
                }
            }
        }
        let pkg = parser::parse_package_file(path)?;
        self.package_file = path.display().to_string();
        self.dirs = vec![parent_dir(path)];
        let report = self.execute_jobs(&pkg);
        self.dirs.clear();
        if let Some(vars) = self.config.vars_file.clone() {
            symbols::write_vars(&vars, &self.symbols)?;
        }
        report
    }

    /// Run a parsed package to completion under the configured policy.
    pub fn execute_jobs(&mut self, pkg: &ParsedPackage) -> Result<RunReport> {
        let start = Instant::now();
        self.report = RunReport {
            run_id: eventlog::generate_run_id(),
            ..RunReport::default()
        };
        self.emit(RunEvent::RunStarted {
            run_id: self.report.run_id.clone(),
            package: self.package_file.clone(),
            epm_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        self.run_package(pkg)?;
        if self.owed_commit {
            self.commit()?;
        }

        self.report.total_seconds = start.elapsed().as_secs_f64();
        self.emit(RunEvent::RunCompleted {
            run_id: self.report.run_id.clone(),
            jobs_run: self.report.jobs_run,
            jobs_failed: self.report.failures.len(),
            total_seconds: self.report.total_seconds,
        });
        Ok(std::mem::take(&mut self.report))
    }

    /// The job loop for one package; nested packages re-enter it.
    pub(super) fn run_package(&mut self, pkg: &ParsedPackage) -> Result<()> {
        let mut captured_next = false;
        for (index, job) in pkg.jobs.iter().enumerate() {
            // A failed capture counts as a failure of the job it precedes.
            let captured = if std::mem::take(&mut captured_next) {
                Ok(())
            } else {
                self.capture_scheduled(pkg, index)
            };

            let text = job.to_string();
            if self.config.verbosity >= 1 {
                eprintln!("{}[{}] {}", "  ".repeat(self.depth), index, text);
            }
            self.report.jobs_run += 1;
            self.report.executed.push(text.clone());
            self.emit(RunEvent::JobStarted {
                index,
                depth: self.depth,
                job: text.clone(),
            });

            let job_start = Instant::now();
            let err = match captured.and_then(|()| self.run_job(job)) {
                Ok(()) => {
                    self.emit(RunEvent::JobSucceeded {
                        index,
                        depth: self.depth,
                        duration_seconds: job_start.elapsed().as_secs_f64(),
                    });
                    continue;
                }
                Err(e) => e,
            };

            self.emit(RunEvent::JobFailed {
                index,
                depth: self.depth,
                error: err.to_string(),
            });
            if let Err(e) = self.capture_scheduled(pkg, index + 1) {
                eprintln!("warning: snapshot after failed job {}: {}", index, e);
            }
            captured_next = true;

            let failure = JobFailure {
                index,
                job: text,
                line: job.line,
                column: job.column,
                error: err.to_string(),
            };
            self.apply_policy(failure, err)?;
        }
        if !captured_next {
            if let Err(err) = self.capture_scheduled(pkg, pkg.jobs.len()) {
                let failure = JobFailure {
                    index: pkg.jobs.len(),
                    job: "snapshot".to_string(),
                    line: 0,
                    column: 0,
                    error: err.to_string(),
                };
                self.apply_policy(failure, err)?;
            }
        }
        Ok(())
    }

    /// Record a failure and apply the configured error policy to it.
    fn apply_policy(&mut self, failure: JobFailure, err: EpmError) -> Result<()> {
        self.report.failures.push(failure.clone());
        match self.config.policy.on_error {
            ErrorPolicy::Persist => {
                if self.config.verbosity >= 1 {
                    eprintln!("job {} failed, continuing: {}", failure.index, err);
                }
                Ok(())
            }
            ErrorPolicy::Return => match err {
                EpmError::JobFailed { .. } => Err(err),
                _ => Err(EpmError::JobFailed {
                    index: failure.index,
                    job: failure.job,
                    line: failure.line,
                    source: Box::new(err),
                }),
            },
            ErrorPolicy::Fail => {
                self.emit(RunEvent::RunCompleted {
                    run_id: self.report.run_id.clone(),
                    jobs_run: self.report.jobs_run,
                    jobs_failed: self.report.failures.len(),
                    total_seconds: 0.0,
                });
                eprint!("{}", self.report.failure_report());
                std::process::exit(1);
            }
        }
    }

    fn run_job(&mut self, job: &Job) -> Result<()> {
        parser::check_arity(job)?;
        let args = resolver::resolve_job(job, &self.symbols)?;
        self.dispatch(job.command, &args)?;
        if job.command.mutates_chain() && !self.chain.is_autocommit() {
            self.owed_commit = true;
        }
        Ok(())
    }

    /// Finalize pending state and wait for the resulting block.
    pub fn commit(&mut self) -> Result<()> {
        let deadline = self.config.policy.commit_timeout();
        let blocks = self.chain.subscribe(COMMIT_SUBSCRIPTION, NEW_BLOCK, "")?;
        let waited = self.chain.commit().and_then(|()| match deadline {
            Some(d) => blocks.recv_timeout(d).map_err(|_| EpmError::CommitTimeout(d)),
            None => blocks
                .recv()
                .map_err(|_| EpmError::chain("block subscription closed")),
        });
        self.chain.unsubscribe(COMMIT_SUBSCRIPTION)?;
        let block = waited?;
        self.owed_commit = false;
        if self.config.verbosity >= 2 {
            eprintln!("committed block {}", block.resource);
        }
        self.emit(RunEvent::Committed {
            block: block.resource,
        });
        Ok(())
    }

    fn capture_scheduled(&mut self, pkg: &ParsedPackage, index: usize) -> Result<()> {
        if !self.config.policy.diff {
            return Ok(());
        }
        let Some(names) = pkg.diff_schedule.get(&index) else {
            return Ok(());
        };
        for name in names {
            self.capture(name)?;
        }
        Ok(())
    }

    /// Snapshot chain storage under `name`; a second capture of the same
    /// name produces a diff against the first.
    pub fn capture(&mut self, name: &str) -> Result<()> {
        if self.owed_commit {
            self.commit()?;
        }
        let state = self.chain.state();
        self.emit(RunEvent::SnapshotTaken {
            name: name.to_string(),
            fingerprint: hasher::fingerprint_state(&state),
        });
        match self.snapshots.remove(name) {
            Some(before) => {
                let diff = storage_diff(name, &before, &state);
                eprint!("{}", diff);
                self.report.diffs.push(diff);
            }
            None => {
                self.snapshots.insert(name.to_string(), state);
            }
        }
        Ok(())
    }

    pub(super) fn emit(&self, event: RunEvent) {
        if let Some(path) = &self.config.event_log {
            let _ = eventlog::append_event(path, event);
        }
    }

    /// Directory of the package currently running.
    pub(super) fn package_dir(&self) -> PathBuf {
        self.dirs.last().cloned().unwrap_or_else(|| PathBuf::from("."))
    }
}

pub(super) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
