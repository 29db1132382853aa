//! EP-013: Job handlers, one per command.
//!
//! Handlers receive fully resolved arguments. Setter slots arrive as raw
//! variable names; path slots are joined paths.

use super::abi;
use super::executor::{parent_dir, Engine};
use super::parser;
use super::resolver::substitute_vars;
use super::symbols::values_equal;
use super::types::Command;
use crate::chain::Blockchain;
use crate::compile::includes::sha256_hex;
use crate::error::{EpmError, Result};
use crate::transport::local;
use std::io::Write;
use std::path::{Path, PathBuf};

impl<C: Blockchain> Engine<C> {
    pub(super) fn dispatch(&mut self, command: Command, args: &[String]) -> Result<()> {
        if args.len() < command.min_args() {
            return Err(missing(command));
        }
        match command {
            Command::Deploy => self.deploy(&args[0], &args[1]),
            Command::ModifyDeploy => self.modify_deploy(&args[0], &args[1], &args[2..]),
            Command::Transact => self.transact(&args[0], &args[1..]),
            Command::Call => {
                let (dest, rest) = args.split_last().ok_or_else(|| missing(command))?;
                self.call(&rest[0], &rest[1..], dest)
            }
            Command::Query => self.query(&args[0], &args[1], &args[2]),
            Command::Log => self.log(&args[0], &args[1]),
            Command::Set => {
                self.symbols.store(&args[0], &args[1]);
                Ok(())
            }
            Command::Endow => self.endow(&args[0], &args[1]),
            Command::Assert => assert_equal(&args[0], &args[1]),
            Command::Commit => self.commit(),
            Command::Epm => self.nested_package(&args[0], args.get(1).map(String::as_str)),
            Command::Include => self.include(args),
            Command::Test => self.test(&args[0]),
        }
    }

    /// Contract paths are relative to the configured contract root.
    fn contract_file(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.config.contract_path.join(p)
        }
    }

    /// Package and test paths are relative to the running package.
    pub(super) fn package_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.package_dir().join(p)
        }
    }

    fn deploy(&mut self, path: &str, dest: &str) -> Result<()> {
        let file = self.contract_file(path);
        self.deploy_file(&file, dest)
    }

    fn deploy_file(&mut self, file: &Path, dest: &str) -> Result<()> {
        let artifact = self.compiler.compile(file)?;
        if artifact.bytecode.is_empty() {
            return Err(EpmError::CompilerFailed(format!(
                "{} produced no bytecode",
                file.display()
            )));
        }
        let (_, addr) = self.chain.script(&artifact.bytecode)?;
        let key = self.symbols.store(dest, &addr);
        self.abis.save(&self.chain.chain_id(), &addr, &artifact.abi)?;
        if self.config.verbosity >= 1 {
            eprintln!("deployed {} as {} ({})", file.display(), addr, key);
        }
        Ok(())
    }

    /// Rewrite the source with literal find/replace pairs, then deploy the result.
    fn modify_deploy(&mut self, path: &str, dest: &str, pairs: &[String]) -> Result<()> {
        let original = self.contract_file(path);
        let mut source = std::fs::read_to_string(&original)
            .map_err(|e| EpmError::io(format!("cannot open {}", original.display()), e))?;
        for pair in pairs.chunks(2) {
            if let [find, replace] = pair {
                let find = substitute_vars(find, &self.symbols);
                let replace = substitute_vars(replace, &self.symbols);
                source = source.replace(&find, &replace);
            }
        }

        // The copy keeps its place in the contract tree so relative includes resolve.
        let root = &self.config.contract_path;
        let mirror = self.config.scratch_dir.join(tree_name(root));
        copy_tree(root, &mirror, &self.config.scratch_dir)?;
        let relative = parent_dir(Path::new(path));
        let ext = original
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = mirror
            .join(relative)
            .join(format!("{}.{}", sha256_hex(source.as_bytes()), ext));
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EpmError::io(format!("cannot create {}", parent.display()), e))?;
        }
        std::fs::write(&target, &source)
            .map_err(|e| EpmError::io(format!("cannot write {}", target.display()), e))?;
        self.deploy_file(&target, dest)
    }

    /// Call data: ABI-packed when the target has an ABI on file, raw words otherwise.
    fn pack(&self, target: &str, args: &[String]) -> Result<Vec<String>> {
        if let Some(doc) = self.abis.load(&self.chain.chain_id(), target) {
            if let Some(data) = abi::pack_with_abi(&doc, args)? {
                return Ok(vec![data]);
            }
        }
        abi::pack_raw(args)
    }

    fn transact(&mut self, target: &str, args: &[String]) -> Result<()> {
        let data = self.pack(target, args)?;
        self.chain.msg(target, &data)?;
        if self.config.verbosity >= 1 {
            eprintln!("sent {:?} to {}", data, target);
        }
        Ok(())
    }

    fn call(&mut self, target: &str, args: &[String], dest: &str) -> Result<()> {
        let data = self.pack(target, args)?;
        let out = self.chain.call(target, &data)?;
        self.symbols.store(dest, &out);
        Ok(())
    }

    fn query(&mut self, addr: &str, slot: &str, dest: &str) -> Result<()> {
        let value = self.chain.storage_at(addr, slot)?;
        let key = self.symbols.store(dest, &value);
        if self.config.verbosity >= 1 {
            eprintln!("result: {} = {}", key, value);
        }
        Ok(())
    }

    fn log(&mut self, key: &str, value: &str) -> Result<()> {
        let path = &self.config.log_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EpmError::io(format!("cannot create {}", parent.display()), e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EpmError::io(format!("cannot open log {}", path.display()), e))?;
        writeln!(file, "{} : {}", key, value)
            .map_err(|e| EpmError::io(format!("cannot write log {}", path.display()), e))
    }

    fn endow(&mut self, addr: &str, amount: &str) -> Result<()> {
        self.chain.tx(addr, amount)?;
        if self.config.verbosity >= 1 {
            eprintln!("endowed {} with {}", addr, amount);
        }
        Ok(())
    }

    /// Run another package in place. Its stores land under `namespace`,
    /// nested below any namespace already active.
    fn nested_package(&mut self, path: &str, namespace: Option<&str>) -> Result<()> {
        let file = self.package_path(path);
        let pkg = parser::parse_package_file(&file)?;

        let previous = namespace.map(|ns| {
            let qualified = match self.symbols.prefix() {
                Some(outer) => format!("{}.{}", outer, ns),
                None => ns.to_string(),
            };
            self.symbols.set_prefix(Some(qualified))
        });
        self.dirs.push(parent_dir(&file));
        self.depth += 1;

        let result = self.run_package(&pkg);

        self.depth -= 1;
        self.dirs.pop();
        if let Some(prev) = previous {
            self.symbols.set_prefix(prev);
        }
        result
    }

    /// Bind each label to the absolute path of its include, cloning missing ones.
    fn include(&mut self, args: &[String]) -> Result<()> {
        for pair in args.chunks(2) {
            let [repo, label] = pair else {
                return Err(missing(Command::Include));
            };
            let dest = self.config.include_root.join(repo);
            if !dest.exists() {
                let fetch_failed =
                    |e: String| EpmError::Config(format!("cannot fetch include {}: {}", repo, e));
                let out = local::git_clone(repo, &dest).map_err(fetch_failed)?;
                if !out.success() {
                    return Err(fetch_failed(out.failure_message()));
                }
            }
            let absolute = dest
                .canonicalize()
                .map_err(|e| EpmError::io(format!("cannot resolve {}", dest.display()), e))?;
            self.symbols
                .store_raw(label, absolute.to_string_lossy().into_owned());
        }
        Ok(())
    }

    fn test(&mut self, path: &str) -> Result<()> {
        self.commit()?;
        let file = self.package_path(path);
        let results = self.run_tests(&file)?;
        if results.passed() {
            Ok(())
        } else {
            Err(EpmError::TestsFailed {
                failed: results.failed,
                total: results.tests.len(),
                file: results.test_file,
            })
        }
    }
}

fn missing(command: Command) -> EpmError {
    EpmError::Syntax {
        message: format!("{} is missing arguments", command),
        line: 0,
        column: 0,
    }
}

/// Case-insensitive comparison ignoring a hex prefix and leading zeros.
pub fn assert_equal(got: &str, expected: &str) -> Result<()> {
    if values_equal(got, expected) {
        Ok(())
    } else {
        Err(EpmError::Assertion {
            got: got.to_string(),
            expected: expected.to_string(),
        })
    }
}

fn tree_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "contracts".to_string())
}

/// Mirror `src` into `dst`, skipping hidden entries and the scratch directory itself.
fn copy_tree(src: &Path, dst: &Path, scratch: &Path) -> Result<()> {
    // The scratch dir must exist to be recognized inside `src`.
    std::fs::create_dir_all(scratch)
        .map_err(|e| EpmError::io(format!("cannot create {}", scratch.display()), e))?;
    let skip = scratch.canonicalize().ok();
    copy_dir(src, dst, skip.as_deref())
}

fn copy_dir(src: &Path, dst: &Path, skip: Option<&Path>) -> Result<()> {
    std::fs::create_dir_all(dst)
        .map_err(|e| EpmError::io(format!("cannot create {}", dst.display()), e))?;
    let entries = std::fs::read_dir(src)
        .map_err(|e| EpmError::io(format!("cannot read dir {}", src.display()), e))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if skip.is_some_and(|s| path.canonicalize().ok().as_deref() == Some(s)) {
            continue;
        }
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        let target = dst.join(&name);
        if ft.is_dir() {
            copy_dir(&path, &target, skip)?;
        } else if ft.is_file() {
            std::fs::copy(&path, &target).map_err(|e| {
                EpmError::io(format!("cannot copy {}", path.display()), e)
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::MemoryChain;
    use crate::core::config::EngineConfig;
    use crate::core::types::ErrorPolicy;

    fn engine(root: &Path) -> Engine<MemoryChain> {
        let mut config = EngineConfig::rooted(root);
        config.policy.on_error = ErrorPolicy::Return;
        Engine::new(MemoryChain::new("test"), config)
    }

    #[test]
    fn test_ep013_assert_equal() {
        assert!(assert_equal("0x0000ab", "AB").is_ok());
        assert!(assert_equal("0x13BA", "0x13ba").is_ok());
        let err = assert_equal("0x1", "0x2").unwrap_err();
        assert_eq!(err.to_string(), "assertion error. Got 0x1, expected 0x2");
    }

    #[test]
    fn test_ep013_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.dispatch(Command::Log, &["a".to_string(), "1".to_string()]).unwrap();
        e.dispatch(Command::Log, &["b".to_string(), "2".to_string()]).unwrap();
        let text = std::fs::read_to_string(dir.path().join("epm.log")).unwrap();
        assert_eq!(text, "a : 1\nb : 2\n");
    }

    #[test]
    fn test_ep013_set_keeps_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.dispatch(Command::Set, &["p".to_string(), "contracts/a.lll".to_string()]).unwrap();
        assert_eq!(e.symbols.get("p"), Some("contracts/a.lll"));
    }

    #[test]
    fn test_ep013_include_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        let lib = e.config.include_root.join("github.com/org/lib");
        std::fs::create_dir_all(&lib).unwrap();
        e.dispatch(Command::Include, &["github.com/org/lib".to_string(), "LIB".to_string()])
            .unwrap();
        let bound = e.symbols.get("LIB").unwrap().to_string();
        assert_eq!(PathBuf::from(bound), lib.canonicalize().unwrap());
    }

    #[test]
    fn test_ep013_package_paths_follow_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.dirs.push(PathBuf::from("/pkgs/inner"));
        assert_eq!(e.package_path("t.pdt"), PathBuf::from("/pkgs/inner/t.pdt"));
        assert_eq!(e.package_path("/abs/t.pdt"), PathBuf::from("/abs/t.pdt"));
        assert_eq!(e.contract_file("a.lll"), dir.path().join("a.lll"));
    }

    #[test]
    fn test_ep013_copy_tree_skips_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("contracts");
        std::fs::create_dir_all(root.join("lib")).unwrap();
        std::fs::create_dir_all(root.join("scratch")).unwrap();
        std::fs::write(root.join("lib/x.lll"), "X").unwrap();
        std::fs::write(root.join(".hidden"), "H").unwrap();
        let mirror = root.join("scratch/contracts");
        copy_tree(&root, &mirror, &root.join("scratch")).unwrap();
        assert_eq!(std::fs::read_to_string(mirror.join("lib/x.lll")).unwrap(), "X");
        assert!(!mirror.join(".hidden").exists());
        assert!(!mirror.join("scratch").exists());
    }

    #[test]
    fn test_ep013_copy_tree_into_fresh_nested_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("contracts");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.lll"), "A").unwrap();
        let scratch = root.join("scratch");
        let mirror = scratch.join("contracts");
        copy_tree(&root, &mirror, &scratch).unwrap();
        assert_eq!(std::fs::read_to_string(mirror.join("a.lll")).unwrap(), "A");
        assert!(!mirror.join("scratch").exists());
        // a second pass over the existing mirror stays flat
        copy_tree(&root, &mirror, &scratch).unwrap();
        assert!(!mirror.join("scratch").exists());
    }

    #[test]
    fn test_ep013_dispatch_short_args_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        let err = e.dispatch(Command::Query, &["0x01".to_string()]).unwrap_err();
        assert!(err.to_string().contains("missing arguments"));
    }
}
