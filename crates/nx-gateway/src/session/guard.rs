//! Live input guard
//!
//! Terminal input arrives as keystrokes, not commands. The guard mirrors the
//! line being typed so that, when the operator presses Enter, the complete
//! line can be checked by the policy engine before the shell sees the
//! terminator. A rejected line is never submitted: its terminator is replaced
//! with Ctrl-U, which makes the shell discard the line.
//!
//! Cursor movement and history recall are escape sequences the guard cannot
//! replay, so they are forwarded untouched and do not change the tracked line.

use nx_core::config::ConsoleConfig;
use nx_core::policy;

/// Line-kill control character (Ctrl-U)
pub const LINE_KILL: char = '\u{15}';

const INTERRUPT: char = '\u{3}';
const BACKSPACE: char = '\u{8}';
const DELETE: char = '\u{7f}';
const ESCAPE: char = '\u{1b}';

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Escape {
    #[default]
    None,
    Started,
    Sequence,
}

/// A line the policy refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The line as typed
    pub command: String,
    /// Why it was refused
    pub reason: String,
}

/// Input after filtering
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GuardedInput {
    /// Bytes to hand to the shell
    pub forward: String,
    /// Every line that was discarded
    pub rejections: Vec<Rejection>,
}

/// Per-session line tracker
#[derive(Debug, Default)]
pub struct LineGuard {
    line: String,
    escape: Escape,
}

impl LineGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The line typed so far
    pub fn pending_line(&self) -> &str {
        &self.line
    }

    /// Filter a chunk of terminal input against the current policy
    pub fn filter(&mut self, input: &str, config: &ConsoleConfig) -> GuardedInput {
        let mut out = GuardedInput {
            forward: String::with_capacity(input.len()),
            rejections: Vec::new(),
        };

        for c in input.chars() {
            match self.escape {
                Escape::Started => {
                    self.escape = if c == '[' || c == 'O' {
                        Escape::Sequence
                    } else {
                        Escape::None
                    };
                    out.forward.push(c);
                    continue;
                }
                Escape::Sequence => {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        self.escape = Escape::None;
                    }
                    out.forward.push(c);
                    continue;
                }
                Escape::None => {}
            }

            match c {
                '\r' | '\n' => {
                    let result = policy::validate(&self.line, config);
                    if result.allowed {
                        out.forward.push(c);
                    } else {
                        out.forward.push(LINE_KILL);
                        out.rejections.push(Rejection {
                            command: std::mem::take(&mut self.line),
                            reason: result
                                .reason
                                .unwrap_or_else(|| "Command blocked".to_string()),
                        });
                    }
                    self.line.clear();
                }
                BACKSPACE | DELETE => {
                    self.line.pop();
                    out.forward.push(c);
                }
                LINE_KILL | INTERRUPT => {
                    self.line.clear();
                    out.forward.push(c);
                }
                ESCAPE => {
                    self.escape = Escape::Started;
                    out.forward.push(c);
                }
                c if c.is_control() => out.forward.push(c),
                c => {
                    self.line.push(c);
                    out.forward.push(c);
                }
            }
        }

        out
    }
}
