// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Output buffer that keeps `#line` directives lazy.
//!
//! A line mark is only written right before the next content line (or when
//! the unit ends), and a newer mark replaces one that was never written.
//! A mark equal to where the compiler already is gets dropped, unless it was
//! requested as a forced re-sync.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mark {
    line: usize,
    file: String,
}

#[derive(Debug)]
pub(crate) struct LineEmitter {
    out: String,
    pending: Option<(Mark, bool)>,
    position: Option<Mark>,
    cpp_style: bool,
}

impl LineEmitter {
    pub(crate) fn new(cpp_style: bool) -> Self {
        Self {
            out: String::new(),
            pending: None,
            position: None,
            cpp_style,
        }
    }

    /// The next content line comes from `file:line`.
    pub(crate) fn mark(&mut self, line: usize, file: &str) {
        let forced = self.pending.as_ref().is_some_and(|(_, f)| *f);
        self.pending = Some((
            Mark {
                line,
                file: file.to_string(),
            },
            forced,
        ));
    }

    /// Like [`LineEmitter::mark`], but always written.
    pub(crate) fn resync(&mut self, line: usize, file: &str) {
        self.mark(line, file);
        if let Some((_, forced)) = self.pending.as_mut() {
            *forced = true;
        }
    }

    /// Appends one content line.
    pub(crate) fn line(&mut self, text: &str) {
        self.flush();
        self.out.push_str(text);
        self.out.push('\n');
        if let Some(position) = self.position.as_mut() {
            position.line += 1;
        }
    }

    pub(crate) fn is_cpp_style(&self) -> bool {
        self.cpp_style
    }

    pub(crate) fn finish(mut self) -> String {
        self.flush();
        self.out
    }

    fn flush(&mut self) {
        let Some((mark, forced)) = self.pending.take() else {
            return;
        };
        if forced || self.position.as_ref() != Some(&mark) {
            // Writing into a String cannot fail.
            let _ = if self.cpp_style {
                writeln!(self.out, "#line {} \"{}\"", mark.line, mark.file)
            } else {
                writeln!(self.out, "#line {}", mark.line)
            };
        }
        self.position = Some(mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unflushed_marks_collapse() {
        let mut e = LineEmitter::new(false);
        e.mark(1, "A.glsl");
        e.mark(7, "A.glsl");
        e.line("x");
        assert_eq!(e.finish(), "#line 7\nx\n");
    }

    #[test]
    fn marks_matching_the_position_are_dropped() {
        let mut e = LineEmitter::new(false);
        e.mark(1, "A.glsl");
        e.line("a");
        e.mark(2, "A.glsl");
        e.line("b");
        e.mark(5, "A.glsl");
        assert_eq!(e.finish(), "#line 1\na\nb\n#line 5\n");
    }

    #[test]
    fn resync_is_always_written() {
        let mut e = LineEmitter::new(true);
        e.mark(1, "A.glsl");
        e.line("#endif");
        e.resync(2, "A.glsl");
        e.line("c");
        assert_eq!(e.finish(), "#line 1 \"A.glsl\"\n#endif\n#line 2 \"A.glsl\"\nc\n");
    }
}
