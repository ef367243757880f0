//! REPL input.
//!
//! Lines are read on a dedicated thread and delivered to the loop as
//! `StreamRead` completions on the REPL's stdin handle; end of input is a
//! `StreamClose`. The loop thread never blocks on the terminal.

use async_runtime::{HandleId, LoopHandle, NativeEvent};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io;
use std::thread::{self, JoinHandle};

/// Where REPL lines come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplInput {
    /// Interactive terminal with line editing
    #[default]
    Terminal,
    /// Fixed lines, e.g. piped input or tests
    Lines(Vec<String>),
}

/// A source of complete REPL inputs.
pub(crate) trait LineSource {
    /// Next complete input, or `None` at end of input.
    fn next_line(&mut self) -> Option<String>;
}

struct ScriptedLines(std::vec::IntoIter<String>);

impl LineSource for ScriptedLines {
    fn next_line(&mut self) -> Option<String> {
        self.0.next()
    }
}

/// Terminal input via rustyline. Unbalanced input continues on the next
/// line under a `... ` prompt.
struct TerminalLines {
    editor: DefaultEditor,
    buffer: String,
}

impl TerminalLines {
    fn new() -> Result<Self, ReadlineError> {
        Ok(Self {
            editor: DefaultEditor::new()?,
            buffer: String::new(),
        })
    }
}

impl LineSource for TerminalLines {
    fn next_line(&mut self) -> Option<String> {
        loop {
            let prompt = if self.buffer.is_empty() { "> " } else { "... " };
            match self.editor.readline(prompt) {
                Ok(line) => {
                    if !self.buffer.is_empty() {
                        self.buffer.push('\n');
                    }
                    self.buffer.push_str(&line);
                    if is_input_complete(&self.buffer) {
                        let input = std::mem::take(&mut self.buffer);
                        let _ = self.editor.add_history_entry(input.as_str());
                        return Some(input);
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    if self.buffer.is_empty() {
                        println!("(To exit, press Ctrl-D or type .exit)");
                    }
                    self.buffer.clear();
                }
                Err(ReadlineError::Eof) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "readline failed");
                    return None;
                }
            }
        }
    }
}

/// Starts the reader thread for `stdin`.
pub(crate) fn spawn_reader(input: ReplInput, handle: LoopHandle, stdin: HandleId) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("repl-reader".into())
        .spawn(move || {
            let mut source: Box<dyn LineSource> = match input {
                ReplInput::Terminal => match TerminalLines::new() {
                    Ok(terminal) => Box::new(terminal),
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot open terminal for repl");
                        handle.post(stdin, NativeEvent::StreamClose);
                        return;
                    }
                },
                ReplInput::Lines(lines) => Box::new(ScriptedLines(lines.into_iter())),
            };
            while let Some(line) = source.next_line() {
                if handle.is_stopped() {
                    return;
                }
                if line.trim() == ".exit" {
                    break;
                }
                let event = NativeEvent::StreamRead {
                    data: Some(line.into_bytes()),
                };
                if !handle.post(stdin, event) {
                    return;
                }
            }
            handle.post(stdin, NativeEvent::StreamClose);
        })
}

/// Whether brackets and quotes in `input` are balanced.
fn is_input_complete(input: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = None;
    let mut escape_next = false;

    for c in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match in_string {
            Some(quote) => {
                if c == '\\' {
                    escape_next = true;
                } else if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => in_string = Some(c),
                '{' | '[' | '(' => depth += 1,
                '}' | ']' | ')' => depth -= 1,
                _ => {}
            },
        }
    }

    depth <= 0 && in_string.is_none()
}
