//! # repdb-script: Operation scripts for `repdb`
//!
//! A script is plain text with one operation per line:
//!
//! ```text
//! // T2 waits for T1, then overwrites its value.
//! begin(T1)
//! begin(T2)
//! W(T1, x2, 1)
//! W(T2, x2, 2)
//! end(T1)
//! end(T2)
//! dump()
//! ```
//!
//! Every line that is not blank or a comment takes one tick, including
//! lines that fail to parse. [`ScriptReader`] pairs each such line with its
//! tick so the caller can feed the engine and report errors in place.

mod error;
pub mod parser;


use std::iter::Enumerate;
use std::str::Lines;

use repdb_types::{Operation, Tick};

pub use error::{Result, ScriptError};
pub use parser::{is_skippable, parse_line, parse_operation};

/// One operation line of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// 1-based line number in the source text.
    pub line_number: usize,
    pub tick: Tick,
    pub text: String,
    pub parsed: Result<Operation>,
}

/// Iterates the operation lines of a script, assigning ticks from 1.
#[derive(Debug, Clone)]
pub struct ScriptReader<'a> {
    lines: Enumerate<Lines<'a>>,
    tick: Tick,
}

impl<'a> ScriptReader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines().enumerate(),
            tick: Tick::ZERO,
        }
    }
}

impl Iterator for ScriptReader<'_> {
    type Item = ScriptLine;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, text) in self.lines.by_ref() {
            if is_skippable(text) {
                continue;
            }

            self.tick = self.tick.next();
            let parsed = parse_operation(text.trim());
            if let Err(error) = &parsed {
                tracing::warn!(line = index + 1, %error, "skipping malformed line");
            }
            return Some(ScriptLine {
                line_number: index + 1,
                tick: self.tick,
                text: text.trim().to_string(),
                parsed,
            });
        }
        None
    }
}

/// Parses a whole script, stopping at the first malformed line.
pub fn parse_script(source: &str) -> Result<Vec<(Tick, Operation)>> {
    ScriptReader::new(source)
        .map(|line| line.parsed.map(|op| (line.tick, op)))
        .collect()
}
