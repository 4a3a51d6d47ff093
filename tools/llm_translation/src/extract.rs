//! Pulls the Go code out of an inference response.
//!
//! Complete and streamed responses go through the same character-level tracker. For streamed
//! responses the tracker can stop consuming chunks early, once the closing fence arrives or once a
//! top-level block closes after enough chunks.

use go_validator::GoLexer;
use modernize_core::inference::{ChunkStream, InferenceError};
use tracing::debug;

/// A response as the inference service delivered it.
pub enum ResponseShape {
    Streamed(ChunkStream),
    Complete(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EarlyStop {
    pub enabled: bool,
    /// Chunks that must arrive before a closing brace may end the stream.
    pub min_chunks: usize,
}

impl EarlyStop {
    pub const DISABLED: EarlyStop = EarlyStop {
        enabled: false,
        min_chunks: 0,
    };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extraction {
    pub code: String,
    /// Chunks consumed; 0 for complete responses.
    pub chunks: usize,
    /// The stream was abandoned before it ended.
    pub stopped_early: bool,
}

pub fn extract(shape: ResponseShape, early_stop: EarlyStop) -> Result<Extraction, InferenceError> {
    match shape {
        ResponseShape::Complete(text) => Ok(Extraction {
            code: extract_code(&text),
            chunks: 0,
            stopped_early: false,
        }),
        ResponseShape::Streamed(chunks) => extract_streamed(chunks, early_stop),
    }
}

/// The contents of the first fenced code block in `text`, or the unfenced code when there is no
/// fence.
pub fn extract_code(text: &str) -> String {
    let mut tracker = CodeTracker::new(EarlyStop::DISABLED);
    tracker.feed(text, 0);
    tracker.finish()
}

fn extract_streamed(chunks: ChunkStream, early_stop: EarlyStop) -> Result<Extraction, InferenceError> {
    let mut tracker = CodeTracker::new(early_stop);
    let mut count = 0;
    let mut stopped_early = false;
    for chunk in chunks {
        count += 1;
        if tracker.feed(&chunk?, count) {
            stopped_early = true;
            break;
        }
    }
    if stopped_early {
        debug!(chunks = count, "Stopped reading the response early");
    }
    Ok(Extraction {
        code: tracker.finish(),
        chunks: count,
        stopped_early,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    SeekingFence,
    InCode,
    Closed,
}

/// Follows a response one character at a time.
struct CodeTracker {
    phase: Phase,
    early_stop: EarlyStop,
    /// Everything seen, for responses without a fence.
    text: String,
    /// The line being read while looking for the opening fence.
    line: String,
    code: String,
    lexer: GoLexer,
    at_line_start: bool,
    /// Indentation and backticks at the start of a code line that may turn out to be the closing
    /// fence.
    pending: String,
}

impl CodeTracker {
    fn new(early_stop: EarlyStop) -> CodeTracker {
        CodeTracker {
            phase: Phase::SeekingFence,
            early_stop,
            text: String::new(),
            line: String::new(),
            code: String::new(),
            lexer: GoLexer::new(),
            at_line_start: true,
            pending: String::new(),
        }
    }

    /// Consumes `chunk`, the `chunks_seen`-th chunk. Returns true when the rest of the response
    /// is not needed.
    fn feed(&mut self, chunk: &str, chunks_seen: usize) -> bool {
        for c in chunk.chars() {
            match self.phase {
                Phase::SeekingFence => self.seek(c),
                Phase::InCode => {
                    if self.code_char(c, chunks_seen) {
                        return true;
                    }
                }
                Phase::Closed => return true,
            }
        }
        self.phase == Phase::Closed
    }

    fn seek(&mut self, c: char) {
        self.text.push(c);
        if c != '\n' {
            self.line.push(c);
            return;
        }
        if self.line.trim_start().starts_with("```") {
            self.phase = Phase::InCode;
            self.at_line_start = true;
        }
        self.line.clear();
    }

    fn code_char(&mut self, c: char, chunks_seen: usize) -> bool {
        if self.at_line_start && !self.lexer.in_raw_string() {
            let ticks = self.pending.chars().filter(|p| *p == '`').count();
            if c == '`' || ((c == ' ' || c == '\t') && ticks == 0) {
                self.pending.push(c);
                if ticks + usize::from(c == '`') == 3 {
                    self.phase = Phase::Closed;
                    return true;
                }
                return false;
            }
            self.at_line_start = false;
            let pending = std::mem::take(&mut self.pending);
            for p in pending.chars() {
                self.emit(p);
            }
        }
        self.emit(c);
        self.at_line_start = c == '\n';
        c == '}'
            && self.early_stop.enabled
            && chunks_seen >= self.early_stop.min_chunks
            && self.lexer.opened_any()
            && self.lexer.balanced()
    }

    fn emit(&mut self, c: char) {
        self.code.push(c);
        self.lexer.push(c);
    }

    fn finish(mut self) -> String {
        match self.phase {
            Phase::SeekingFence => trim_unfenced(&self.text),
            Phase::InCode | Phase::Closed => {
                let pending = std::mem::take(&mut self.pending);
                if self.phase == Phase::InCode {
                    self.code.push_str(&pending);
                }
                tidy(&self.code)
            }
        }
    }
}

/// Drops leading blank lines and trailing whitespace, and ends the code with a newline.
fn tidy(code: &str) -> String {
    let start = code
        .split_inclusive('\n')
        .take_while(|line| line.trim().is_empty())
        .map(str::len)
        .sum::<usize>();
    let trimmed = code[start..].trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

/// Code from a response without fences: everything up to the last line that ends like a Go
/// statement. Trailing prose, blank lines and comments after it are dropped.
fn trim_unfenced(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let last = lines.iter().rposition(|line| {
        let line = line.trim();
        !line.starts_with("//") && line.chars().last().is_some_and(ends_statement)
    });
    match last {
        Some(last) => tidy(&lines[..=last].join("\n")),
        None => String::new(),
    }
}

fn ends_statement(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '}' | ')' | ']' | ';' | '"' | '\'' | '`')
}

/// Rewrites the package clause of `code` to `package`. Code without a package clause is returned
/// unchanged.
pub fn with_package(code: &str, package: &str) -> String {
    let mut lexer = GoLexer::new();
    let mut out = String::with_capacity(code.len());
    let mut replaced = false;
    for line in code.split_inclusive('\n') {
        let in_code = lexer.balanced() && !lexer.opened_any();
        if !replaced && in_code && is_package_clause(line) {
            let newline = if line.ends_with('\n') { "\n" } else { "" };
            out.push_str(&format!("package {package}{newline}"));
            replaced = true;
        } else {
            out.push_str(line);
        }
        lexer.push_str(line);
    }
    out
}

fn is_package_clause(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("package")
        .is_some_and(|rest| rest.starts_with([' ', '\t']))
}
