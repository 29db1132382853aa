//! EP-014: Companion test files.
//!
//! One assertion per line: `address slot expected [var]`, separated by
//! whitespace or `;`. Fields may use `{{var}}` and `(op a b)`. An expected
//! value of `_` skips the comparison but still reads (and may store) the slot.
//! `#` starts a comment.

use super::executor::Engine;
use super::parser;
use super::resolver::{resolve_tree, substitute_vars};
use super::symbols::{coerce_hex, values_equal};
use super::types::{ArgGroup, RunEvent, TestResults};
use crate::chain::Blockchain;
use crate::error::{EpmError, Result};
use std::path::Path;

/// Expected-value placeholder meaning "record only".
pub const SKIP: &str = "_";

impl<C: Blockchain> Engine<C> {
    /// Run every assertion in `path` against committed chain state.
    /// Failures are recorded per line; only I/O and an empty file are errors.
    pub fn run_tests(&mut self, path: &Path) -> Result<TestResults> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EpmError::io(format!("cannot read test file {}", path.display()), e))?;

        let mut results = TestResults {
            package_file: self.package_file.clone(),
            test_file: path.display().to_string(),
            ..TestResults::default()
        };
        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let index = results.tests.len();
            results.tests.push(line.to_string());
            match self.run_test_line(line) {
                Ok(()) => results.errors.push(String::new()),
                Err(e) => {
                    if self.config.verbosity >= 1 {
                        eprintln!("test {} failed: {}", index, e);
                    }
                    results.errors.push(e.to_string());
                    results.failed_tests.push(index);
                    results.failed += 1;
                }
            }
        }
        if results.tests.is_empty() {
            return Err(EpmError::Config(format!(
                "no tests to run in {}",
                path.display()
            )));
        }

        self.emit(RunEvent::TestsCompleted {
            test_file: results.test_file.clone(),
            total: results.tests.len(),
            failed: results.failed,
        });
        if self.config.verbosity >= 1 {
            eprint!("{}", results);
        }
        self.report.tests.push(results.clone());
        Ok(results)
    }

    fn run_test_line(&mut self, line: &str) -> Result<()> {
        let fields = split_fields(&substitute_vars(line, &self.symbols))?;
        if !(3..=4).contains(&fields.len()) {
            return Err(EpmError::Syntax {
                message: format!("test takes 3 or 4 fields, found {}", fields.len()),
                line: 0,
                column: 0,
            });
        }

        let addr = self.resolve_field(&fields[0])?;
        let slot = self.resolve_field(&fields[1])?;
        let got = self.chain.storage_at(&addr, &slot)?;

        let expected = self.resolve_field(&fields[2])?;
        if expected != SKIP {
            let expected = coerce_hex(&expected);
            if !values_equal(&got, &expected) {
                return Err(EpmError::Assertion { got, expected });
            }
        }

        if let Some(var) = fields.get(3) {
            let name = self.resolve_field(var)?;
            self.symbols.store(&name, &got);
        }
        Ok(())
    }

    fn resolve_field(&self, group: &ArgGroup) -> Result<String> {
        let mut out = String::new();
        for tree in group {
            out.push_str(&resolve_tree(tree, &self.symbols)?);
        }
        Ok(out)
    }
}

/// Split a test line into argument groups, one per field.
fn split_fields(line: &str) -> Result<Vec<ArgGroup>> {
    if !line.contains(';') {
        return parser::parse_arguments(line);
    }
    let mut fields = Vec::new();
    for part in line.trim_end_matches(';').split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let group: ArgGroup = parser::parse_arguments(part)?.into_iter().flatten().collect();
        fields.push(group);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::{ContractModel, MemoryChain};
    use crate::core::config::EngineConfig;

    struct Fixed;

    impl ContractModel for Fixed {
        fn construct(&self, _code: &[u8]) -> Vec<(String, String)> {
            vec![
                ("0x60".to_string(), "5050".to_string()),
                ("0x1".to_string(), "0x2a".to_string()),
            ]
        }
    }

    fn engine_with_contract(root: &Path) -> (Engine<MemoryChain>, String) {
        let chain = MemoryChain::new("test").with_model(Box::new(Fixed));
        let mut e = Engine::new(chain, EngineConfig::rooted(root));
        let (_, addr) = e.chain_mut().script(b"code").unwrap();
        e.chain_mut().commit().unwrap();
        e.symbols_mut().store("C", &addr);
        (e, addr)
    }

    #[test]
    fn test_ep014_split_fields() {
        assert_eq!(split_fields("a b c").unwrap().len(), 3);
        assert_eq!(split_fields("a; b ;c;").unwrap().len(), 3);
        assert_eq!(split_fields("{{A}} (+ 1 2) 3 v").unwrap().len(), 4);
    }

    #[test]
    fn test_ep014_pass_fail_skip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut e, _) = engine_with_contract(dir.path());
        let file = dir.path().join("t.pdt");
        std::fs::write(
            &file,
            "# header\n{{C}} 0x60 5050\n{{C}} 0x60 0x13BA\n{{C}} (- 2 1) 43\n{{C}}; 0x1; _; seen\n\n",
        )
        .unwrap();

        let results = e.run_tests(&file).unwrap();
        assert_eq!(results.tests.len(), 4);
        assert_eq!(results.failed, 1);
        assert_eq!(results.failed_tests, vec![2]);
        assert!(results.errors[2].contains("Got 0x2a"));
        assert_eq!(results.errors[0], "");
        assert!(!results.passed());
        assert_eq!(e.symbols().get("seen"), Some("0x2a"));
        assert!(results.to_string().contains("FAIL [2]"));
    }

    #[test]
    fn test_ep014_bad_lines_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (mut e, _) = engine_with_contract(dir.path());
        let file = dir.path().join("t.pdt");
        std::fs::write(&file, "{{C}} 0x60\n{{nope}} 0x60 1\n").unwrap();
        let results = e.run_tests(&file).unwrap();
        assert_eq!(results.failed, 2);
        assert!(results.errors[0].contains("3 or 4 fields"));
    }

    #[test]
    fn test_ep014_empty_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut e, _) = engine_with_contract(dir.path());
        let file = dir.path().join("t.pdt");
        std::fs::write(&file, "# nothing\n").unwrap();
        assert!(e.run_tests(&file).is_err());
    }
}
