//! EP-004: Package parsing — token stream to jobs and a diff schedule.
//!
//! Two job layouts are accepted:
//! - inline: `command a b c` (one group per element, or `=>`-separated groups)
//! - block:  `command:` followed by indented lines of `=>`-separated groups
//!
//! Arithmetic is prefix form with explicit grouping: `(op a b)`.
//! `!{ name` schedules a snapshot before the next job; `!} name` closes it.

use super::lexer::Lexer;
use super::types::*;
use crate::error::{EpmError, Result};
use std::collections::HashSet;
use std::path::Path;

/// Parse a package-definition file from disk.
pub fn parse_package_file(path: &Path) -> Result<ParsedPackage> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EpmError::io(format!("cannot read package {}", path.display()), e))?;
    parse(&content)
}

/// Parse package-definition source text.
pub fn parse(source: &str) -> Result<ParsedPackage> {
    parse_tokens(Lexer::new(source))
}

/// Parse a bare argument list, e.g. the arguments of a programmatically added job.
pub fn parse_arguments(text: &str) -> Result<Vec<ArgGroup>> {
    let mut tokens = Vec::new();
    for tok in Lexer::new(text) {
        match tok.kind {
            TokenKind::Error => return Err(lex_error(tok)),
            TokenKind::Newline | TokenKind::Comment | TokenKind::Indent | TokenKind::Eof => {}
            // A leading keyword lexes as a command; as an argument it is a plain word.
            TokenKind::Command => tokens.push(Token {
                kind: TokenKind::Ident,
                ..tok
            }),
            _ => tokens.push(tok),
        }
    }
    let end = tokens.last().map(|t| (t.line, t.column)).unwrap_or((1, 1));
    parse_inline(&tokens, end)
}

/// Build a single job from a command keyword and its argument text.
pub fn parse_job(command: &str, args: &str) -> Result<Job> {
    let command = Command::from_keyword(command)
        .ok_or_else(|| syntax(format!("unknown command '{}'", command), 1, 1))?;
    let job = Job {
        command,
        args: parse_arguments(args)?,
        line: 0,
        column: 0,
    };
    check_arity(&job)?;
    Ok(job)
}

/// Parse an already-lexed stream. Any lexical error aborts with no partial result.
pub fn parse_tokens(tokens: impl IntoIterator<Item = Token>) -> Result<ParsedPackage> {
    let lines = split_lines(tokens)?;
    let mut builder = Builder::default();
    for line in lines {
        builder.line(line)?;
    }
    builder.finish()
}

fn lex_error(tok: Token) -> EpmError {
    EpmError::Lex {
        message: tok.value,
        line: tok.line,
        column: tok.column,
    }
}

fn syntax(message: impl Into<String>, line: usize, column: usize) -> EpmError {
    EpmError::Syntax {
        message: message.into(),
        line,
        column,
    }
}

fn syntax_at(message: impl Into<String>, tok: &Token) -> EpmError {
    syntax(message, tok.line, tok.column)
}

/// One physical line with comments stripped.
struct Line {
    indented: bool,
    tokens: Vec<Token>,
}

fn split_lines(tokens: impl IntoIterator<Item = Token>) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    let mut current = Line {
        indented: false,
        tokens: Vec::new(),
    };
    for tok in tokens {
        match tok.kind {
            TokenKind::Error => return Err(lex_error(tok)),
            TokenKind::Comment => {}
            TokenKind::Indent => current.indented = true,
            TokenKind::Newline | TokenKind::Eof => {
                let done = std::mem::replace(
                    &mut current,
                    Line {
                        indented: false,
                        tokens: Vec::new(),
                    },
                );
                if !done.tokens.is_empty() {
                    lines.push(done);
                }
            }
            _ => current.tokens.push(tok),
        }
    }
    if !current.tokens.is_empty() {
        lines.push(current);
    }
    Ok(lines)
}

#[derive(Default)]
struct Builder {
    jobs: Vec<Job>,
    schedule: DiffSchedule,
    opened: HashSet<String>,
    block: Option<Job>,
}

impl Builder {
    fn line(&mut self, line: Line) -> Result<()> {
        let first = &line.tokens[0];
        if line.indented {
            let Some(block) = self.block.as_mut() else {
                return Err(syntax_at("indented line outside a block job", first));
            };
            let end = (first.line, first.column);
            let groups = split_arrows(&line.tokens, end)?;
            block.args.extend(groups);
            return Ok(());
        }

        self.close_block()?;
        match first.kind {
            TokenKind::DiffOpen => {
                let name = snapshot_name(&line.tokens)?;
                self.opened.insert(name.clone());
                self.schedule.entry(self.jobs.len()).or_default().push(name);
                Ok(())
            }
            TokenKind::DiffClose => {
                let name = snapshot_name(&line.tokens)?;
                if !self.opened.contains(&name) {
                    return Err(syntax_at(
                        format!("snapshot '{}' closed but never opened", name),
                        first,
                    ));
                }
                self.schedule.entry(self.jobs.len()).or_default().push(name);
                Ok(())
            }
            TokenKind::Command => {
                let command = Command::from_keyword(&first.value)
                    .ok_or_else(|| syntax_at(format!("unknown command '{}'", first.value), first))?;
                let mut job = Job {
                    command,
                    args: Vec::new(),
                    line: first.line,
                    column: first.column,
                };
                let rest = &line.tokens[1..];
                if rest.first().map(|t| t.kind) == Some(TokenKind::Colon) {
                    if let Some(extra) = rest.get(1) {
                        return Err(syntax_at(format!("unexpected {} after ':'", extra), extra));
                    }
                    self.block = Some(job);
                    return Ok(());
                }
                let end = line
                    .tokens
                    .last()
                    .map(|t| (t.line, t.column + t.value.len()))
                    .unwrap_or((first.line, first.column));
                job.args = parse_inline(rest, end)?;
                self.push(job)
            }
            TokenKind::Ident => Err(syntax_at(format!("unknown command '{}'", first.value), first)),
            _ => Err(syntax_at(format!("expected a command, found {}", first), first)),
        }
    }

    fn close_block(&mut self) -> Result<()> {
        match self.block.take() {
            Some(job) => self.push(job),
            None => Ok(()),
        }
    }

    fn push(&mut self, job: Job) -> Result<()> {
        check_arity(&job)?;
        self.jobs.push(job);
        Ok(())
    }

    fn finish(mut self) -> Result<ParsedPackage> {
        self.close_block()?;
        Ok(ParsedPackage {
            jobs: self.jobs,
            diff_schedule: self.schedule,
        })
    }
}

fn snapshot_name(tokens: &[Token]) -> Result<String> {
    match tokens {
        [_, name] if matches!(name.kind, TokenKind::Ident | TokenKind::Number) => {
            Ok(name.value.clone())
        }
        [marker] => Err(syntax_at("expected a snapshot name", marker)),
        [_, other, ..] => Err(syntax_at(
            format!("expected a single snapshot name, found {}", other),
            other,
        )),
        [] => Err(syntax("expected a snapshot name", 0, 0)),
    }
}

/// Reject jobs with too few or unpaired arguments.
pub(crate) fn check_arity(job: &Job) -> Result<()> {
    let min = job.command.min_args();
    let got = job.args.len();
    if got < min {
        return Err(syntax(
            format!(
                "{} requires at least {} argument(s), found {}",
                job.command, min, got
            ),
            job.line,
            job.column,
        ));
    }
    let paired = match job.command {
        Command::Include => got % 2 == 0,
        Command::ModifyDeploy => (got - 2) % 2 == 0,
        _ => true,
    };
    if !paired {
        return Err(syntax(
            format!("{} takes its trailing arguments in pairs", job.command),
            job.line,
            job.column,
        ));
    }
    Ok(())
}

/// Inline arguments: `=>` separates groups if present, otherwise each element is a group.
fn parse_inline(tokens: &[Token], end: (usize, usize)) -> Result<Vec<ArgGroup>> {
    if tokens.iter().any(|t| t.kind == TokenKind::Arrow) {
        return split_arrows(tokens, end);
    }
    let mut cursor = Cursor::new(tokens, end);
    let mut groups = Vec::new();
    while !cursor.done() {
        groups.push(vec![cursor.expr()?]);
    }
    Ok(groups)
}

/// `a b => c => (+ 1 2)` — each `=>`-separated segment is one group.
fn split_arrows(tokens: &[Token], end: (usize, usize)) -> Result<Vec<ArgGroup>> {
    let mut groups = Vec::new();
    for segment in tokens.split(|t| t.kind == TokenKind::Arrow) {
        let mut cursor = Cursor::new(segment, end);
        if cursor.done() {
            let at = tokens
                .iter()
                .find(|t| t.kind == TokenKind::Arrow)
                .map(|t| (t.line, t.column))
                .unwrap_or(end);
            return Err(syntax("empty argument around '=>'", at.0, at.1));
        }
        let mut group = Vec::new();
        while !cursor.done() {
            group.push(cursor.expr()?);
        }
        groups.push(group);
    }
    Ok(groups)
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    end: (usize, usize),
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token], end: (usize, usize)) -> Self {
        Cursor {
            tokens,
            pos: 0,
            end,
        }
    }

    fn done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn next(&mut self, expecting: &str) -> Result<&'a Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| syntax(format!("expected {}", expecting), self.end.0, self.end.1))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expr(&mut self) -> Result<ArgTree> {
        let tok = self.next("an argument")?;
        match tok.kind {
            TokenKind::Number | TokenKind::Ident | TokenKind::Quoted => {
                Ok(ArgTree::literal(tok.clone()))
            }
            TokenKind::VarOpen => {
                let name = self.next("a variable name")?;
                if name.kind != TokenKind::Ident {
                    return Err(syntax_at(
                        format!("expected a variable name, found {}", name),
                        name,
                    ));
                }
                let close = self.next("'}}'")?;
                if close.kind != TokenKind::VarClose {
                    return Err(syntax_at(format!("expected '}}}}', found {}", close), close));
                }
                Ok(ArgTree::var(name.clone()))
            }
            TokenKind::ParenOpen => self.arithmetic(tok),
            TokenKind::Operator => Err(syntax_at(
                format!("operator '{}' must directly follow '('", tok.value),
                tok,
            )),
            _ => Err(syntax_at(format!("unexpected {}", tok), tok)),
        }
    }

    fn arithmetic(&mut self, open: &Token) -> Result<ArgTree> {
        let op_tok = self.next("an operator")?;
        let op = Operator::from_symbol(&op_tok.value)
            .filter(|_| op_tok.kind == TokenKind::Operator)
            .ok_or_else(|| syntax_at(format!("expected an operator, found {}", op_tok), op_tok))?;
        let mut children = Vec::new();
        loop {
            match self.tokens.get(self.pos) {
                None => return Err(syntax_at("unclosed '('", open)),
                Some(t) if t.kind == TokenKind::ParenClose => {
                    self.pos += 1;
                    break;
                }
                Some(_) => children.push(self.expr()?),
            }
        }
        if children.len() != 2 {
            return Err(syntax_at(
                format!(
                    "operator '{}' takes exactly 2 operands, found {}",
                    op.symbol(),
                    children.len()
                ),
                op_tok,
            ));
        }
        Ok(ArgTree::Op { op, children })
    }
}
