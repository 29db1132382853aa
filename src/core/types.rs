//! EP-002: Core types — tokens, argument trees, jobs, run reports, events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Tokens
// ============================================================================

/// Lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Command,
    Colon,
    Quoted,
    Number,
    Operator,
    Ident,
    VarOpen,
    VarClose,
    ParenOpen,
    ParenClose,
    Arrow,
    Comment,
    DiffOpen,
    DiffClose,
    Indent,
    Newline,
    Eof,
    Error,
}

/// A token with its literal text and 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            value: value.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Quoted => write!(f, "\"{}\"", self.value),
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Newline => write!(f, "end of line"),
            _ => write!(f, "{}", self.value),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// The closed set of job commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Deploy,
    ModifyDeploy,
    Transact,
    Call,
    Query,
    Log,
    Set,
    Endow,
    Test,
    Epm,
    Include,
    Assert,
    Commit,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::Deploy,
        Command::ModifyDeploy,
        Command::Transact,
        Command::Call,
        Command::Query,
        Command::Log,
        Command::Set,
        Command::Endow,
        Command::Test,
        Command::Epm,
        Command::Include,
        Command::Assert,
        Command::Commit,
    ];

    /// Canonical keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            Command::Deploy => "deploy",
            Command::ModifyDeploy => "modify-deploy",
            Command::Transact => "transact",
            Command::Call => "call",
            Command::Query => "query",
            Command::Log => "log",
            Command::Set => "set",
            Command::Endow => "endow",
            Command::Test => "test",
            Command::Epm => "epm",
            Command::Include => "include",
            Command::Assert => "assert",
            Command::Commit => "commit",
        }
    }

    /// Look up a keyword, accepting the long aliases of `epm` and `include`.
    pub fn from_keyword(word: &str) -> Option<Command> {
        match word {
            "recursive-include" => Some(Command::Epm),
            "file-include" => Some(Command::Include),
            _ => Command::ALL.into_iter().find(|c| c.keyword() == word),
        }
    }

    /// Minimum number of argument groups a job must supply.
    pub fn min_args(self) -> usize {
        match self {
            Command::ModifyDeploy => 4,
            Command::Call | Command::Query => 3,
            Command::Deploy
            | Command::Transact
            | Command::Log
            | Command::Set
            | Command::Endow
            | Command::Include
            | Command::Assert => 2,
            Command::Test | Command::Epm => 1,
            Command::Commit => 0,
        }
    }

    /// Jobs that leave uncommitted chain state behind.
    pub fn mutates_chain(self) -> bool {
        matches!(
            self,
            Command::Deploy | Command::ModifyDeploy | Command::Transact | Command::Endow
        )
    }

    /// Whether argument group `index` of `count` is an assignment target or label,
    /// passed to the handler as its raw identifier instead of being resolved.
    pub fn is_name_slot(self, index: usize, count: usize) -> bool {
        match self {
            Command::Deploy | Command::ModifyDeploy => index == 1,
            Command::Query => index == 2,
            Command::Set => index == 0,
            Command::Call => index + 1 == count,
            Command::Include => index % 2 == 1,
            Command::Epm => index == 1,
            _ => false,
        }
    }

    /// Whether argument group `index` is a filesystem path assembled from segments.
    pub fn is_path_slot(self, index: usize) -> bool {
        match self {
            Command::Deploy | Command::ModifyDeploy | Command::Epm | Command::Test => index == 0,
            Command::Include => index % 2 == 0,
            _ => false,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

// ============================================================================
// Argument trees and jobs
// ============================================================================

/// Arithmetic operators over unsigned big integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Operator {
    pub fn from_symbol(s: &str) -> Option<Operator> {
        match s {
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Sub),
            "*" => Some(Operator::Mul),
            "/" => Some(Operator::Div),
            "%" => Some(Operator::Mod),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
        }
    }
}

/// One parsed argument element: a literal or variable leaf, or a prefix arithmetic node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgTree {
    Leaf { token: Token, is_var: bool },
    Op { op: Operator, children: Vec<ArgTree> },
}

impl ArgTree {
    pub fn literal(token: Token) -> Self {
        ArgTree::Leaf {
            token,
            is_var: false,
        }
    }

    pub fn var(token: Token) -> Self {
        ArgTree::Leaf {
            token,
            is_var: true,
        }
    }

    /// Raw identifier text of a leaf, without `{{ }}`.
    pub fn raw_name(&self) -> Option<&str> {
        match self {
            ArgTree::Leaf { token, .. } => Some(&token.value),
            ArgTree::Op { .. } => None,
        }
    }
}

impl fmt::Display for ArgTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgTree::Leaf { token, is_var: true } => write!(f, "{{{{{}}}}}", token.value),
            ArgTree::Leaf { token, .. } => write!(f, "{}", token),
            ArgTree::Op { op, children } => {
                write!(f, "({}", op.symbol())?;
                for c in children {
                    write!(f, " {}", c)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One argument position; several elements are concatenated (or joined as a path).
pub type ArgGroup = Vec<ArgTree>;

/// One executable instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub command: Command,
    pub args: Vec<ArgGroup>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for group in &self.args {
            f.write_str(" ")?;
            for (i, tree) in group.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}", tree)?;
            }
        }
        Ok(())
    }
}

/// Job index → snapshot names captured immediately before that job runs.
/// Index `jobs.len()` means "after the last job".
pub type DiffSchedule = BTreeMap<usize, Vec<String>>;

/// Output of a successful parse. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPackage {
    pub jobs: Vec<Job>,
    pub diff_schedule: DiffSchedule,
}

// ============================================================================
// Run policy and results
// ============================================================================

/// What the engine does when a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure and continue with the next job.
    Persist,
    /// Abort the run and return the error to the caller.
    Return,
    /// Flush logs and terminate the process.
    #[default]
    Fail,
}

/// One entry of the consolidated failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub index: usize,
    pub job: String,
    pub line: usize,
    pub column: usize,
    pub error: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} at {}:{} `{}`: {}",
            self.index, self.line, self.column, self.job, self.error
        )
    }
}

/// Outcome of one test-assertion file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub package_file: String,
    pub test_file: String,
    /// Assertion lines in file order.
    pub tests: Vec<String>,
    /// Parallel to `tests`; empty string when the line passed.
    pub errors: Vec<String>,
    /// Indices into `tests` of the failing lines.
    pub failed_tests: Vec<usize>,
    pub failed: usize,
}

impl TestResults {
    pub fn passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for TestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} tests, {} failed",
            self.test_file,
            self.tests.len(),
            self.failed
        )?;
        for &i in &self.failed_tests {
            writeln!(f, "  FAIL [{}] {}: {}", i, self.tests[i], self.errors[i])?;
        }
        Ok(())
    }
}

/// Summary returned by a completed (or persist-mode) run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub jobs_run: usize,
    /// Job texts in execution order, nested packages inlined.
    pub executed: Vec<String>,
    pub failures: Vec<JobFailure>,
    pub diffs: Vec<crate::core::diff::StorageDiff>,
    pub tests: Vec<TestResults>,
    pub total_seconds: f64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable consolidated failure report.
    pub fn failure_report(&self) -> String {
        let mut out = format!("{} job(s) failed:\n", self.failures.len());
        for f in &self.failures {
            out.push_str(&format!("  {}\n", f));
        }
        out
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Events appended to the JSONL run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        package: String,
        epm_version: String,
    },
    JobStarted {
        index: usize,
        depth: usize,
        job: String,
    },
    JobSucceeded {
        index: usize,
        depth: usize,
        duration_seconds: f64,
    },
    JobFailed {
        index: usize,
        depth: usize,
        error: String,
    },
    SnapshotTaken {
        name: String,
        fingerprint: String,
    },
    Committed {
        block: String,
    },
    TestsCompleted {
        test_file: String,
        total: usize,
        failed: usize,
    },
    RunCompleted {
        run_id: String,
        jobs_run: usize,
        jobs_failed: usize,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ep002_keywords_round_trip() {
        for c in Command::ALL {
            assert_eq!(Command::from_keyword(c.keyword()), Some(c));
        }
        assert_eq!(Command::from_keyword("recursive-include"), Some(Command::Epm));
        assert_eq!(Command::from_keyword("file-include"), Some(Command::Include));
        assert_eq!(Command::from_keyword("deploys"), None);
    }

    #[test]
    fn test_ep002_min_args() {
        assert_eq!(Command::Deploy.min_args(), 2);
        assert_eq!(Command::ModifyDeploy.min_args(), 4);
        assert_eq!(Command::Call.min_args(), 3);
        assert_eq!(Command::Commit.min_args(), 0);
    }

    #[test]
    fn test_ep002_name_slots() {
        assert!(Command::Deploy.is_name_slot(1, 2));
        assert!(!Command::Deploy.is_name_slot(0, 2));
        assert!(Command::Call.is_name_slot(3, 4));
        assert!(!Command::Call.is_name_slot(2, 4));
        assert!(Command::Include.is_name_slot(3, 4));
        assert!(Command::Set.is_name_slot(0, 2));
        assert!(!Command::Assert.is_name_slot(0, 2));
    }

    #[test]
    fn test_ep002_job_display() {
        let job = Job {
            command: Command::Set,
            args: vec![
                vec![ArgTree::literal(Token::new(TokenKind::Ident, "x", 1, 5))],
                vec![ArgTree::Op {
                    op: Operator::Add,
                    children: vec![
                        ArgTree::literal(Token::new(TokenKind::Number, "1", 1, 10)),
                        ArgTree::var(Token::new(TokenKind::Ident, "y", 1, 14)),
                    ],
                }],
            ],
            line: 1,
            column: 1,
        };
        assert_eq!(job.to_string(), "set x (+ 1 {{y}})");
    }

    #[test]
    fn test_ep002_event_serde_tag() {
        let te = TimestampedEvent {
            ts: "2026-10-16T00:00:00Z".to_string(),
            event: RunEvent::Committed {
                block: "0xab".to_string(),
            },
        };
        let json = serde_json::to_string(&te).unwrap();
        assert!(json.contains("\"event\":\"committed\""));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_ep002_error_policy_default_is_fail() {
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Fail);
        let p: ErrorPolicy = serde_yaml_ng::from_str("persist").unwrap();
        assert_eq!(p, ErrorPolicy::Persist);
    }
}
