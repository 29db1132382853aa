//! End-to-end package runs against the in-process chain.
//!
//! Contracts are "compiled" by hex-dumping their rewritten source, and the
//! chain's contract model interprets `(sstore SLOT VALUE)` forms in that
//! source, so a package run exercises the whole parse → compile → chain path.

use epm::chain::memory::{ContractModel, Invocation, MemoryChain};
use epm::chain::{Blockchain, Storage};
use epm::compile::lang::{LangDescriptor, LangRegistry};
use epm::core::config::EngineConfig;
use epm::core::executor::Engine;
use epm::core::parser;
use epm::core::symbols::{coerce_hex, values_equal};
use epm::core::types::{ErrorPolicy, RunEvent};
use epm::tripwire::eventlog;
use epm::EpmError;
use std::path::Path;

/// Storage writes come from `(sstore a b)` forms in the deployed source;
/// messages store the low word of their last argument in slot 0.
struct SstoreModel;

impl ContractModel for SstoreModel {
    fn construct(&self, code: &[u8]) -> Vec<(String, String)> {
        let text = String::from_utf8_lossy(code);
        text.split("(sstore ")
            .skip(1)
            .filter_map(|rest| {
                let body = rest.split(')').next()?;
                let mut parts = body.split_whitespace();
                Some((parts.next()?.to_string(), parts.next()?.to_string()))
            })
            .collect()
    }

    fn invoke(&self, _code: &[u8], storage: &Storage, data: &[String]) -> Invocation {
        let last = data.last().cloned().unwrap_or_default();
        let word = &last[last.len().saturating_sub(64)..];
        Invocation {
            output: storage.slots.get("0x0").cloned().unwrap_or_default(),
            writes: vec![("0x0".to_string(), format!("0x{}", word))],
        }
    }
}

const ABI: &str = r#"[{"type":"function","name":"set","inputs":[{"name":"v","type":"uint256"}]}]"#;

fn hexdump_lang(abi: Option<&str>) -> LangDescriptor {
    LangDescriptor {
        url: String::new(),
        path: String::new(),
        net: false,
        extensions: vec!["lll".to_string()],
        include_regexes: vec![r#"\(include "(.+?)"\)"#.to_string()],
        include_replaces: vec![(r#"(include ""#.to_string(), r#".lll")"#.to_string())],
        compile_cmd: vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"od -An -v -tx1 "$0" | tr -d ' \n'"#.to_string(),
            "_".to_string(),
        ],
        abi_cmd: match abi {
            Some(doc) => vec!["sh".to_string(), "-c".to_string(), format!("echo '{}'", doc)],
            None => Vec::new(),
        },
    }
}

fn engine_with(root: &Path, abi: Option<&str>) -> Engine<MemoryChain> {
    let mut config = EngineConfig::rooted(root);
    config.contract_path = root.join("contracts");
    config.event_log = Some(root.join("events.jsonl"));
    config.policy.on_error = ErrorPolicy::Return;
    let mut langs = LangRegistry::empty();
    langs.insert("lll", hexdump_lang(abi));
    config.compiler.languages = langs;
    let chain = MemoryChain::new("test").with_model(Box::new(SstoreModel));
    Engine::new(chain, config)
}

fn engine(root: &Path) -> Engine<MemoryChain> {
    engine_with(root, None)
}

fn write(root: &Path, rel: &str, content: &str) -> std::path::PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_deploy_commit_query_5050() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/counter.lll", "(seq (sstore 0x60 5050))");
    let pkg = write(
        dir.path(),
        "pkg.pdx",
        "deploy counter.lll addr\ncommit\nquery {{addr}} 0x60 result\n",
    );

    let mut e = engine(dir.path());
    let report = e.run_file(&pkg).unwrap();
    assert!(report.succeeded());
    assert_eq!(report.jobs_run, 3);

    let result = e.symbols().get("result").unwrap();
    assert_eq!(result, "0x13ba");
    assert!(values_equal(result, &coerce_hex("5050")));
}

#[test]
fn test_recursive_package_order_and_namespace() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pkgs/child.pdx", "set x 2\nset z {{x}}\n");
    let parent = write(
        dir.path(),
        "pkgs/parent.pdx",
        "set x 1\nepm child.pdx sub\nset y {{sub.x}}\n",
    );

    let mut e = engine(dir.path());
    let report = e.run_file(&parent).unwrap();
    assert_eq!(
        report.executed,
        vec![
            "set x 1",
            "epm child.pdx sub",
            "set x 2",
            "set z {{x}}",
            "set y {{sub.x}}",
        ]
    );
    let s = e.symbols();
    assert_eq!(s.get("x"), Some("0x01"));
    assert_eq!(s.get("sub.x"), Some("0x02"));
    assert_eq!(s.get("sub.z"), Some("0x02"));
    assert_eq!(s.get("y"), Some("0x02"));
    assert_eq!(s.prefix(), None);
}

#[test]
fn test_nested_namespaces_compose() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "leaf.pdx", "set v 7\n");
    write(dir.path(), "mid.pdx", "epm leaf.pdx inner\n");
    let top = write(dir.path(), "top.pdx", "epm mid.pdx outer\n");

    let mut e = engine(dir.path());
    e.run_file(&top).unwrap();
    assert_eq!(e.symbols().get("outer.inner.v"), Some("0x07"));
}

#[test]
fn test_assert_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = engine(dir.path());
    e.execute_jobs(&parser::parse("assert 0x0f 0xf\n").unwrap())
        .unwrap();

    let err = e
        .execute_jobs(&parser::parse("assert 0x0f 0x10\n").unwrap())
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("0x0f"), "{}", msg);
    assert!(msg.contains("0x10"), "{}", msg);
}

#[test]
fn test_arithmetic_in_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = engine(dir.path());
    e.execute_jobs(&parser::parse("set a (+ 1 2)\n").unwrap())
        .unwrap();
    assert_eq!(e.symbols().get("a"), Some("0x03"));

    let err = e
        .execute_jobs(
            &parser::parse("set b (/ 0xffffffffffffffffffffffffffffffff 0)\n").unwrap(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EpmError::JobFailed { ref source, .. } if matches!(**source, EpmError::DivisionByZero(_))
    ));
}

#[test]
fn test_persist_policy_records_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = engine(dir.path());
    e.set_error_policy(ErrorPolicy::Persist);
    let pkg = parser::parse("deploy missing.lll a\nset after 1\n").unwrap();
    let report = e.execute_jobs(&pkg).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].line, 1);
    assert_eq!(e.symbols().get("after"), Some("0x01"));
}

#[test]
fn test_modify_deploy_keeps_relative_includes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/lib/inc.lll", "(seq)");
    write(
        dir.path(),
        "contracts/b.lll",
        r#"(include "lib/inc.lll") (sstore 0x60 PLACEHOLDER)"#,
    );
    let pkg = write(
        dir.path(),
        "pkg.pdx",
        "set val 0x2a\nmodify-deploy b.lll B PLACEHOLDER {{val}}\ncommit\nquery {{B}} 0x60 got\n",
    );

    let mut e = engine(dir.path());
    e.run_file(&pkg).unwrap();
    assert_eq!(e.symbols().get("got"), Some("0x2a"));

    let mirror = dir.path().join(".epm/scratch/contracts");
    assert!(mirror.join("lib/inc.lll").exists());
    let rewritten: Vec<_> = std::fs::read_dir(&mirror)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().len() == 64 + 4)
        .collect();
    assert_eq!(rewritten.len(), 1);
}

#[test]
fn test_transact_with_and_without_abi() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/store.lll", "(seq)");
    let pkg = write(
        dir.path(),
        "pkg.pdx",
        "deploy store.lll S\ntransact {{S}} set 5\ncommit\nquery {{S}} 0x0 v\n",
    );
    let mut e = engine_with(dir.path(), Some(ABI));
    e.run_file(&pkg).unwrap();
    assert!(values_equal(e.symbols().get("v").unwrap(), "5"));
    let addr = e.symbols().get("S").unwrap().to_string();
    let saved = dir
        .path()
        .join(".epm/abi/test")
        .join(addr.trim_start_matches("0x"));
    assert_eq!(std::fs::read_to_string(saved).unwrap().trim(), ABI);

    let dir2 = tempfile::tempdir().unwrap();
    write(dir2.path(), "contracts/store.lll", "(seq)");
    let pkg2 = write(
        dir2.path(),
        "pkg.pdx",
        "deploy store.lll S\ntransact {{S}} 9\ncommit\nquery {{S}} 0x0 v\n",
    );
    let mut raw = engine(dir2.path());
    raw.run_file(&pkg2).unwrap();
    assert!(values_equal(raw.symbols().get("v").unwrap(), "9"));
}

#[test]
fn test_test_command_runs_companion_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/counter.lll", "(sstore 0x60 5050)");
    write(dir.path(), "p/checks.pdt", "{{C}} 0x60 5050 seen\n{{C}} 0x61 0\n");
    let pkg = write(dir.path(), "p/pkg.pdx", "deploy counter.lll C\ntest checks.pdt\n");

    let mut e = engine(dir.path());
    let report = e.run_file(&pkg).unwrap();
    assert_eq!(report.tests.len(), 1);
    assert!(report.tests[0].passed());
    assert_eq!(e.symbols().get("seen"), Some("0x13ba"));
}

#[test]
fn test_failing_companion_tests_fail_the_job() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/counter.lll", "(sstore 0x60 5050)");
    write(dir.path(), "checks.pdt", "{{C}} 0x60 5051\n");
    let pkg = write(dir.path(), "pkg.pdx", "deploy counter.lll C\ntest checks.pdt\n");

    let mut e = engine(dir.path());
    let err = e.run_file(&pkg).unwrap_err();
    assert!(err.to_string().contains("1 of 1 tests failed"), "{}", err);
}

#[test]
fn test_diff_reports_new_slots() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/counter.lll", "(sstore 0x60 5050)");
    let pkg = write(dir.path(), "pkg.pdx", "!{ deploy\ndeploy counter.lll C\n!} deploy\n");

    let mut e = engine(dir.path());
    e.set_diff(true);
    let report = e.run_file(&pkg).unwrap();
    assert_eq!(report.diffs.len(), 1);
    let diff = &report.diffs[0];
    assert_eq!(diff.accounts.len(), 1);
    assert_eq!(diff.accounts[0].changes[0].slot, "0x60");
    assert_eq!(diff.accounts[0].changes[0].before, None);
    assert_eq!(diff.accounts[0].changes[0].after, "0x13ba");
    assert!(diff.to_string().contains("0x60"));
}

#[test]
fn test_second_deploy_hits_compile_cache() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/lib.lll", "(seq)");
    write(dir.path(), "contracts/a.lll", r#"(include "lib.lll") (sstore 0x1 1)"#);
    let pkg = write(dir.path(), "pkg.pdx", "deploy a.lll A\ndeploy a.lll B\n");

    let mut e = engine(dir.path());
    e.run_file(&pkg).unwrap();
    let stats = e.compiler().stats();
    assert_eq!(stats.compiler_invocations, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_ne!(e.symbols().get("A"), e.symbols().get("B"));
}

#[test]
fn test_run_events_cover_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "contracts/counter.lll", "(sstore 0x60 5050)");
    let pkg = write(dir.path(), "pkg.pdx", "deploy counter.lll C\n");

    let mut e = engine(dir.path());
    e.run_file(&pkg).unwrap();
    let events = eventlog::read_events(&dir.path().join("events.jsonl")).unwrap();
    let kinds: Vec<&RunEvent> = events.iter().map(|t| &t.event).collect();
    assert!(matches!(kinds[0], RunEvent::RunStarted { package, .. } if package.ends_with("pkg.pdx")));
    assert!(kinds.iter().any(|k| matches!(k, RunEvent::Committed { .. })));
    assert!(matches!(kinds.last(), Some(RunEvent::RunCompleted { jobs_failed: 0, .. })));
    assert!(!e.commit_owed());
    assert_eq!(e.chain().block_count(), 2);
}
