//! Incremental Go lexer that tracks delimiter nesting outside of literals and comments.
//!
//! It is fed one character at a time, so the same state machine serves whole-file syntax checks
//! and streamed responses whose code arrives in arbitrary chunks.

use serde::Serialize;

/// A problem found while lexing, with its 1-based line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyntaxDiagnostic {
    pub line: usize,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Code,
    /// Saw `/` in code; the next character decides whether a comment starts.
    Slash,
    LineComment,
    BlockComment { star: bool },
    Interpreted { escaped: bool },
    Rune { escaped: bool },
    Raw,
}

#[derive(Clone, Debug)]
pub struct GoLexer {
    state: State,
    line: usize,
    /// Open delimiters and the lines they were opened on.
    stack: Vec<(char, usize)>,
    opened: bool,
    /// Start line of the literal or block comment being lexed.
    literal_line: usize,
    diagnostics: Vec<SyntaxDiagnostic>,
    /// The first two tokens of the file, used for the package clause check.
    head: Vec<String>,
    word: String,
}

impl Default for GoLexer {
    fn default() -> Self {
        GoLexer::new()
    }
}

impl GoLexer {
    pub fn new() -> GoLexer {
        GoLexer {
            state: State::Code,
            line: 1,
            stack: vec![],
            opened: false,
            literal_line: 1,
            diagnostics: vec![],
            head: vec![],
            word: String::new(),
        }
    }

    /// Current nesting depth of `()`, `[]` and `{}`.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether any delimiter has been opened so far.
    pub fn opened_any(&self) -> bool {
        self.opened
    }

    /// True between delimiters: every opened delimiter has been closed and the lexer is not inside
    /// a literal or comment.
    pub fn balanced(&self) -> bool {
        self.stack.is_empty() && matches!(self.state, State::Code | State::LineComment)
    }

    /// Whether the lexer is inside a raw string literal, where a line of backticks is content.
    pub fn in_raw_string(&self) -> bool {
        self.state == State::Raw
    }

    pub fn push_str(&mut self, text: &str) {
        text.chars().for_each(|c| self.push(c));
    }

    pub fn push(&mut self, c: char) {
        match self.state {
            State::Code => self.code(c),
            State::Slash => match c {
                '/' => self.state = State::LineComment,
                '*' => {
                    self.literal_line = self.line;
                    self.state = State::BlockComment { star: false };
                }
                _ => {
                    self.state = State::Code;
                    self.token("/".into());
                    self.code(c);
                }
            },
            State::LineComment => {
                if c == '\n' {
                    self.state = State::Code;
                }
            }
            State::BlockComment { star } => {
                if star && c == '/' {
                    self.state = State::Code;
                } else {
                    self.state = State::BlockComment { star: c == '*' };
                }
            }
            State::Interpreted { escaped } => match c {
                '\n' => self.unterminated("string"),
                '"' if !escaped => self.state = State::Code,
                _ => {
                    self.state = State::Interpreted {
                        escaped: !escaped && c == '\\',
                    }
                }
            },
            State::Rune { escaped } => match c {
                '\n' => self.unterminated("rune"),
                '\'' if !escaped => self.state = State::Code,
                _ => {
                    self.state = State::Rune {
                        escaped: !escaped && c == '\\',
                    }
                }
            },
            State::Raw => {
                if c == '`' {
                    self.state = State::Code;
                }
            }
        }
        if c == '\n' {
            self.line += 1;
        }
    }

    fn code(&mut self, c: char) {
        if c.is_alphanumeric() || c == '_' {
            self.word.push(c);
            return;
        }
        if !self.word.is_empty() {
            let word = std::mem::take(&mut self.word);
            self.token(word);
        }
        match c {
            '/' => {
                self.state = State::Slash;
                return;
            }
            '"' => self.begin_literal(State::Interpreted { escaped: false }),
            '\'' => self.begin_literal(State::Rune { escaped: false }),
            '`' => self.begin_literal(State::Raw),
            '(' | '[' | '{' => {
                self.stack.push((c, self.line));
                self.opened = true;
            }
            ')' | ']' | '}' => self.close(c),
            _ => {}
        }
        if !c.is_whitespace() {
            self.token(c.to_string());
        }
    }

    fn begin_literal(&mut self, state: State) {
        self.literal_line = self.line;
        self.state = state;
    }

    fn token(&mut self, token: String) {
        if self.head.len() < 2 {
            self.head.push(token);
        }
    }

    fn close(&mut self, c: char) {
        let expected = match c {
            ')' => '(',
            ']' => '[',
            _ => '{',
        };
        match self.stack.last() {
            Some(&(open, _)) if open == expected => {
                self.stack.pop();
            }
            Some(&(open, line)) => self.error(format!(
                "unexpected `{c}`, expected the `{open}` from line {line} to be closed first"
            )),
            None => self.error(format!("unexpected `{c}` with nothing open")),
        }
    }

    fn unterminated(&mut self, kind: &str) {
        self.error(format!("{kind} literal not terminated"));
        self.state = State::Code;
    }

    fn error(&mut self, message: String) {
        self.diagnostics.push(SyntaxDiagnostic {
            line: self.line,
            message,
        });
    }

    /// Ends the input and returns every problem found, in order.
    pub fn finish(mut self) -> Vec<SyntaxDiagnostic> {
        if !self.word.is_empty() {
            let word = std::mem::take(&mut self.word);
            self.token(word);
        }
        let open_literal = match self.state {
            State::Interpreted { .. } => Some("string literal not terminated"),
            State::Rune { .. } => Some("rune literal not terminated"),
            State::Raw => Some("raw string literal not terminated"),
            State::BlockComment { .. } => Some("comment not terminated"),
            _ => None,
        };
        if let Some(message) = open_literal {
            self.diagnostics.push(SyntaxDiagnostic {
                line: self.literal_line,
                message: message.into(),
            });
        }
        for (open, line) in std::mem::take(&mut self.stack) {
            self.diagnostics.push(SyntaxDiagnostic {
                line,
                message: format!("`{open}` is never closed"),
            });
        }
        self.diagnostics
    }

    /// The package name, if the input so far starts with a package clause.
    pub fn package_name(&self) -> Option<&str> {
        let pending = (!self.word.is_empty()).then_some(self.word.as_str());
        let mut head = self.head.iter().map(String::as_str).chain(pending);
        match (head.next(), head.next()) {
            (Some("package"), Some(name)) if is_identifier(name) => Some(name),
            _ => None,
        }
    }
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}
