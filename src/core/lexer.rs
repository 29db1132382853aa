//! EP-003: Lexer — package-definition source to a lazy token stream.
//!
//! Yields tokens with 1-based line/column. On malformed input a single
//! `Error` token carrying the message is produced and the stream ends.
//! A well-formed stream always ends with `Eof`.

use super::types::{Command, Token, TokenKind};

/// Characters allowed in identifiers, numbers and paths.
pub fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-' | '~')
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '+' | '-' | '*' | '/' | '%')
}

/// Decimal digits, or `0x` followed by hex digits.
pub fn is_number(word: &str) -> bool {
    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    !word.is_empty() && word.chars().all(|c| c.is_ascii_digit())
}

/// Tokenizer over one source text. Not restartable.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    at_line_start: bool,
    /// No token has been emitted yet on an unindented line.
    command_position: bool,
    in_var: Option<(usize, usize)>,
    finished: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
            command_position: true,
            in_var: None,
            finished: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&mut self, message: String, line: usize, column: usize) -> Token {
        self.finished = true;
        Token::new(TokenKind::Error, message, line, column)
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\r')) {
            self.bump();
        }
    }

    /// Leading tab or four spaces marks an indented continuation line.
    fn lex_indent(&mut self) -> Option<Token> {
        let indented = self.peek() == Some('\t')
            || (0..4).all(|i| self.peek_at(i) == Some(' '));
        if !indented {
            return None;
        }
        let (line, column) = (self.line, self.column);
        self.skip_blanks();
        // Whitespace-only lines carry no indentation meaning.
        if matches!(self.peek(), None | Some('\n') | Some('#')) {
            return None;
        }
        Some(Token::new(TokenKind::Indent, "", line, column))
    }

    fn lex_quoted(&mut self, quote: char, line: usize, column: usize) -> Token {
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.bump();
                    return Token::new(TokenKind::Quoted, value, line, column);
                }
                None | Some('\n') => {
                    return self.error("unterminated quote".to_string(), line, column);
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    fn lex_word(&mut self, line: usize, column: usize) -> Token {
        let mut word = String::new();
        while let Some(c) = self.peek().filter(|c| is_word_char(*c)) {
            word.push(c);
            self.bump();
        }
        let kind = if self.command_position && Command::from_keyword(&word).is_some() {
            TokenKind::Command
        } else if is_number(&word) {
            TokenKind::Number
        } else {
            TokenKind::Ident
        };
        Token::new(kind, word, line, column)
    }

    fn lex_pair(&mut self, kind: TokenKind, text: &str, line: usize, column: usize) -> Token {
        self.bump();
        self.bump();
        Token::new(kind, text, line, column)
    }

    fn lex_token(&mut self) -> Token {
        if self.at_line_start {
            self.at_line_start = false;
            if let Some(indent) = self.lex_indent() {
                self.command_position = false;
                return indent;
            }
        }
        self.skip_blanks();
        let (line, column) = (self.line, self.column);
        let Some(c) = self.peek() else {
            if let Some((l, c)) = self.in_var {
                return self.error("unterminated variable reference".to_string(), l, c);
            }
            self.finished = true;
            return Token::new(TokenKind::Eof, "", line, column);
        };
        let next = self.peek_at(1);

        let token = match c {
            '\n' => {
                if let Some((l, c)) = self.in_var {
                    return self.error("unterminated variable reference".to_string(), l, c);
                }
                self.bump();
                self.at_line_start = true;
                self.command_position = true;
                return Token::new(TokenKind::Newline, "\n", line, column);
            }
            '#' => {
                let mut text = String::new();
                while let Some(ch) = self.peek().filter(|ch| *ch != '\n') {
                    text.push(ch);
                    self.bump();
                }
                return Token::new(TokenKind::Comment, text, line, column);
            }
            '{' if next == Some('{') => {
                if self.in_var.is_some() {
                    return self.error("nested variable reference".to_string(), line, column);
                }
                self.in_var = Some((line, column));
                self.lex_pair(TokenKind::VarOpen, "{{", line, column)
            }
            '}' if next == Some('}') => {
                if self.in_var.take().is_none() {
                    return self.error("unmatched '}}'".to_string(), line, column);
                }
                self.lex_pair(TokenKind::VarClose, "}}", line, column)
            }
            '!' if next == Some('{') => self.lex_pair(TokenKind::DiffOpen, "!{", line, column),
            '!' if next == Some('}') => self.lex_pair(TokenKind::DiffClose, "!}", line, column),
            '=' if next == Some('>') => self.lex_pair(TokenKind::Arrow, "=>", line, column),
            '(' => {
                self.bump();
                Token::new(TokenKind::ParenOpen, "(", line, column)
            }
            ')' => {
                self.bump();
                Token::new(TokenKind::ParenClose, ")", line, column)
            }
            ':' => {
                self.bump();
                Token::new(TokenKind::Colon, ":", line, column)
            }
            '"' | '\'' => self.lex_quoted(c, line, column),
            c if is_operator_char(c) && !next.is_some_and(is_word_char) => {
                self.bump();
                Token::new(TokenKind::Operator, c.to_string(), line, column)
            }
            c if is_word_char(c) => self.lex_word(line, column),
            other => {
                return self.error(format!("unexpected character {:?}", other), line, column);
            }
        };
        self.command_position = false;
        token
    }
}

impl Iterator for Lexer {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        Some(self.lex_token())
    }
}

/// Convenience: tokenize a whole source.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_ep003_simple_job() {
        let toks = tokenize("deploy a.lll addr\n");
        assert_eq!(toks[0].kind, TokenKind::Command);
        assert_eq!(toks[0].value, "deploy");
        assert_eq!(toks[1].kind, TokenKind::Ident);
        assert_eq!(toks[1].value, "a.lll");
        assert_eq!(toks[2].kind, TokenKind::Ident);
        assert_eq!(toks[3].kind, TokenKind::Newline);
        assert_eq!(toks[4].kind, TokenKind::Eof);
        assert_eq!(toks.len(), 5);
    }

    #[test]
    fn test_ep003_positions() {
        let toks = tokenize("set x 1\nlog k v");
        let log = toks.iter().find(|t| t.value == "log").unwrap();
        assert_eq!((log.line, log.column), (2, 1));
        let v = toks.iter().find(|t| t.value == "v").unwrap();
        assert_eq!((v.line, v.column), (2, 7));
    }

    #[test]
    fn test_ep003_keyword_only_in_command_position() {
        let toks = tokenize("log set deploy");
        assert_eq!(toks[0].kind, TokenKind::Command);
        assert_eq!(toks[1].kind, TokenKind::Ident);
        assert_eq!(toks[2].kind, TokenKind::Ident);
    }

    #[test]
    fn test_ep003_numbers() {
        let toks = tokenize("set x 0x2A\nset y 5050\nset z 0xg");
        let vals: Vec<_> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(vals, vec!["0x2A", "5050"]);
        assert!(toks.iter().any(|t| t.kind == TokenKind::Ident && t.value == "0xg"));
    }

    #[test]
    fn test_ep003_arithmetic_and_vars() {
        assert_eq!(
            kinds("set x (+ {{a}} 2)"),
            vec![
                TokenKind::Command,
                TokenKind::Ident,
                TokenKind::ParenOpen,
                TokenKind::Operator,
                TokenKind::VarOpen,
                TokenKind::Ident,
                TokenKind::VarClose,
                TokenKind::Number,
                TokenKind::ParenClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_ep003_operator_vs_path() {
        let toks = tokenize("set x (/ 10 2)\ndeploy /abs/a.lll a");
        assert!(toks.iter().any(|t| t.kind == TokenKind::Operator && t.value == "/"));
        assert!(toks.iter().any(|t| t.kind == TokenKind::Ident && t.value == "/abs/a.lll"));
    }

    #[test]
    fn test_ep003_comment_and_diff_markers() {
        assert_eq!(
            kinds("!{ snap # take it\n!} snap"),
            vec![
                TokenKind::DiffOpen,
                TokenKind::Ident,
                TokenKind::Comment,
                TokenKind::Newline,
                TokenKind::DiffClose,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_ep003_block_syntax() {
        assert_eq!(
            kinds("deploy:\n\ta.lll => {{A}}\n    b => c"),
            vec![
                TokenKind::Command,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::VarOpen,
                TokenKind::Ident,
                TokenKind::VarClose,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_ep003_quoted_literal() {
        let toks = tokenize("log msg \"hello world\"");
        assert_eq!(toks[2].kind, TokenKind::Quoted);
        assert_eq!(toks[2].value, "hello world");
    }

    #[test]
    fn test_ep003_unterminated_quote_is_terminal_error() {
        let toks = tokenize("log msg \"oops\nset a b");
        let last = toks.last().unwrap();
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.value, "unterminated quote");
        assert_eq!((last.line, last.column), (1, 9));
        assert_eq!(toks.iter().filter(|t| t.kind == TokenKind::Error).count(), 1);
    }

    #[test]
    fn test_ep003_unknown_character() {
        let toks = tokenize("set a $b");
        let last = toks.last().unwrap();
        assert_eq!(last.kind, TokenKind::Error);
        assert!(last.value.contains("unexpected character"));
        assert_eq!(last.column, 7);
    }

    #[test]
    fn test_ep003_unterminated_variable() {
        let toks = tokenize("set a {{b\n");
        let last = toks.last().unwrap();
        assert_eq!(last.kind, TokenKind::Error);
        assert!(last.value.contains("unterminated variable"));
    }

    #[test]
    fn test_ep003_stream_is_finite() {
        let mut lx = Lexer::new("commit");
        assert_eq!(lx.next().unwrap().kind, TokenKind::Command);
        assert_eq!(lx.next().unwrap().kind, TokenKind::Eof);
        assert!(lx.next().is_none());
        assert!(lx.next().is_none());
    }

    proptest::proptest! {
        #[test]
        fn test_ep003_never_panics(src in "\\PC{0,64}") {
            let toks = tokenize(&src);
            let last = toks.last().unwrap();
            proptest::prop_assert!(matches!(last.kind, TokenKind::Eof | TokenKind::Error));
        }
    }
}
