//! Source positions and the diagnostic sink.
//!
//! A [`Sink`] never aborts a pass: every verification function keeps going
//! after recording a diagnostic, and it is up to the caller (via
//! [`Sink::error_count`]) to decide whether the result of a pass is usable.

use std::fmt;
use std::rc::Rc;

/// A location in a single source file: line and column are 1-based, `length`
/// is the span's extent in bytes on that line.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Range {
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
    pub length: u32,
}

impl Range {
    #[must_use]
    pub fn new(file: Rc<str>, line: u32, col: u32, length: u32) -> Self {
        Range { file, line, col, length }
    }

    /// A zero-length range at the start of `file`, used where no real
    /// position is available (e.g. a synthesized constructor).
    #[must_use]
    pub fn synthetic(file: Rc<str>) -> Self {
        Range { file, line: 0, col: 0, length: 0 }
    }

    /// Two ranges on the same file and line compose into the covering range.
    /// Ranges on different files or lines simply keep the first one; this
    /// never panics because every diagnostic needs *some* primary range.
    #[must_use]
    pub fn cover(&self, other: &Range) -> Range {
        if self.file != other.file || self.line != other.line {
            return self.clone();
        }
        let start = self.col.min(other.col);
        let self_end = self.col + self.length;
        let other_end = other.col + other.length;
        let end = self_end.max(other_end);
        Range { file: self.file.clone(), line: self.line, col: start, length: end - start }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

#[derive(Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub range: Range,
    pub notes: Vec<(Range, String)>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        writeln!(f, "{}: {}: {}", self.range, tag, self.message)?;
        for (range, note) in &self.notes {
            writeln!(f, "{}: note: {}", range, note)?;
        }
        Ok(())
    }
}

/// The diagnostic collection for one compilation unit. Never global: every
/// pass receives its sink explicitly.
#[derive(Default, Debug)]
pub struct Sink {
    diags: Vec<Diagnostic>,
}

/// A handle to a just-recorded diagnostic, returned by [`Sink::error`] and
/// [`Sink::warning`], that accepts further [`DiagHandle::note`] calls in a
/// fluent chain.
pub struct DiagHandle<'a> {
    sink: &'a mut Sink,
    index: usize,
}

impl<'a> DiagHandle<'a> {
    pub fn note(self, range: Range, message: impl Into<String>) -> Self {
        self.sink.diags[self.index].notes.push((range, message.into()));
        self
    }
}

impl Sink {
    #[must_use]
    pub fn new() -> Self {
        Sink::default()
    }

    pub fn error(&mut self, range: Range, message: impl Into<String>) -> DiagHandle<'_> {
        self.push(Severity::Error, range, message.into())
    }

    pub fn warning(&mut self, range: Range, message: impl Into<String>) -> DiagHandle<'_> {
        self.push(Severity::Warning, range, message.into())
    }

    /// Records an error only when `cond` is false; returns `cond` unchanged
    /// either way, so callers can write `if !sink.iassert(...) { return None }`.
    pub fn iassert(&mut self, cond: bool, range: Range, message: impl Into<String>) -> bool {
        if !cond {
            self.error(range, message);
        }
        cond
    }

    fn push(&mut self, severity: Severity, range: Range, message: String) -> DiagHandle<'_> {
        self.diags.push(Diagnostic { severity, message, range, notes: Vec::new() });
        let index = self.diags.len() - 1;
        DiagHandle { sink: self, index }
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diags.iter().filter(|d| d.severity == Severity::Error).count()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(line: u32, col: u32, len: u32) -> Range {
        Range::new(Rc::from("test.kl"), line, col, len)
    }

    #[test]
    fn fluent_note_attaches_to_the_right_diagnostic() {
        let mut sink = Sink::new();
        sink.error(r(1, 1, 1), "first").note(r(1, 5, 1), "note for first");
        sink.error(r(2, 1, 1), "second");
        assert_eq!(sink.error_count(), 2);
        assert_eq!(sink.diagnostics()[0].notes.len(), 1);
        assert_eq!(sink.diagnostics()[1].notes.len(), 0);
    }

    #[test]
    fn iassert_records_only_on_failure() {
        let mut sink = Sink::new();
        assert!(sink.iassert(true, r(1, 1, 1), "unreachable"));
        assert_eq!(sink.error_count(), 0);
        assert!(!sink.iassert(false, r(1, 1, 1), "recorded"));
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut sink = Sink::new();
        sink.warning(r(1, 1, 1), "just a warning");
        assert_eq!(sink.error_count(), 0);
    }
}
