//! Diagnostic queue: collects, deduplicates and sorts diagnostics.
//!
//! - error limit (further errors are dropped once reached, leaving a single
//!   "aborting" error in their place)
//! - deduplication of the same code at the same span, and of errors on the
//!   same line whose messages share a prefix
//! - follow-on filtering for messages about `<error>` placeholders

use std::hash::{Hash, Hasher};

use kes_ir::Span;
use rustc_hash::FxHashSet;

use crate::{span_utils::LineOffsetTable, Diagnostic, ErrorCode, ErrorGuaranteed};

const MESSAGE_PREFIX_LEN: usize = 30;

#[inline]
fn message_prefix_hash(msg: &str) -> u64 {
    let byte_end = msg
        .char_indices()
        .nth(MESSAGE_PREFIX_LEN)
        .map_or(msg.len(), |(idx, _)| idx);
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    msg[..byte_end].hash(&mut hasher);
    hasher.finish()
}

/// Configuration for diagnostic processing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DiagnosticConfig {
    /// Maximum number of errors kept (0 = unlimited).
    pub error_limit: usize,
    /// Drop errors that only describe an earlier error's placeholder.
    pub filter_follow_on: bool,
    pub deduplicate: bool,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        DiagnosticConfig {
            error_limit: 20,
            filter_follow_on: true,
            deduplicate: true,
        }
    }
}

impl DiagnosticConfig {
    /// No limits and no filtering, for tests.
    pub fn unlimited() -> Self {
        DiagnosticConfig {
            error_limit: 0,
            filter_follow_on: false,
            deduplicate: false,
        }
    }
}

#[derive(Clone, Debug)]
struct QueuedDiagnostic {
    diagnostic: Diagnostic,
    line: u32,
    column: u32,
}

/// Queue for collecting diagnostics across the analysis phases.
///
/// Positions come from the module source when one is attached; otherwise
/// the byte offset of the primary span stands in for the line so that
/// ordering and deduplication still work.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticQueue {
    diagnostics: Vec<QueuedDiagnostic>,
    error_count: usize,
    last_error: Option<(u32, u64)>,
    seen: FxHashSet<(ErrorCode, Span)>,
    /// The error limit was hit and the abort error queued.
    aborted: bool,
    lines: Option<(String, LineOffsetTable)>,
    config: DiagnosticConfig,
}

impl DiagnosticQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DiagnosticConfig) -> Self {
        DiagnosticQueue {
            config,
            ..Self::default()
        }
    }

    /// Attach the module source so positions are real line/column pairs.
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.lines = Some((source.to_owned(), LineOffsetTable::build(source)));
        self
    }

    fn position(&self, diag: &Diagnostic) -> (u32, u32) {
        let Some(span) = diag.primary_span() else {
            return (0, 0);
        };
        match &self.lines {
            Some((source, table)) => table.offset_to_line_col(source, span.start),
            None => (span.start, 0),
        }
    }

    /// Add a diagnostic. Returns `false` if it was filtered out.
    pub fn add(&mut self, diag: Diagnostic) -> bool {
        let (line, column) = self.position(&diag);
        self.add_at(diag, line, column)
    }

    /// Add a diagnostic at an explicit 1-based position.
    pub fn add_at(&mut self, diag: Diagnostic, line: u32, column: u32) -> bool {
        if self.limit_reached() {
            if diag.is_error() && !self.aborted {
                self.aborted = true;
                let span = diag.primary_span().unwrap_or(Span::DUMMY);
                self.diagnostics.push(QueuedDiagnostic {
                    diagnostic: too_many_errors(self.config.error_limit, span),
                    line,
                    column,
                });
            }
            return false;
        }
        let is_error = diag.is_error();

        if self.config.filter_follow_on && Self::is_follow_on(&diag) {
            return false;
        }
        if self.config.deduplicate && self.is_duplicate(&diag, line) {
            return false;
        }

        if is_error {
            self.last_error = Some((line, message_prefix_hash(&diag.message)));
            self.error_count += 1;
        }
        if let Some(span) = diag.primary_span() {
            self.seen.insert((diag.code, span));
        }
        self.diagnostics.push(QueuedDiagnostic {
            diagnostic: diag,
            line,
            column,
        });
        true
    }

    /// Emit an error and get proof it was reported.
    ///
    /// A filtered duplicate still yields proof: the original is queued.
    pub fn emit_error(&mut self, diag: Diagnostic) -> ErrorGuaranteed {
        self.add(diag);
        ErrorGuaranteed::new()
    }

    pub fn limit_reached(&self) -> bool {
        self.config.error_limit > 0 && self.error_count >= self.config.error_limit
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_errors(&self) -> Option<ErrorGuaranteed> {
        ErrorGuaranteed::from_error_count(self.error_count)
    }

    /// Sort by position and drain the queue.
    pub fn flush(&mut self) -> Vec<Diagnostic> {
        let already_sorted = self
            .diagnostics
            .windows(2)
            .all(|w| (w[0].line, w[0].column) <= (w[1].line, w[1].column));
        if !already_sorted {
            self.diagnostics.sort_by_key(|d| (d.line, d.column));
        }

        let result = self.diagnostics.drain(..).map(|d| d.diagnostic).collect();
        self.error_count = 0;
        self.aborted = false;
        self.last_error = None;
        self.seen.clear();
        result
    }

    fn is_follow_on(diag: &Diagnostic) -> bool {
        diag.is_error() && diag.message.contains("<error>")
    }

    fn is_duplicate(&self, diag: &Diagnostic, line: u32) -> bool {
        if !diag.is_error() {
            return false;
        }
        if let Some(span) = diag.primary_span() {
            if self.seen.contains(&(diag.code, span)) {
                return true;
            }
        }
        matches!(
            self.last_error,
            Some((last_line, last_hash))
                if last_line == line && last_hash == message_prefix_hash(&diag.message)
        )
    }
}

/// "aborting due to N previous errors".
#[cold]
fn too_many_errors(limit: usize, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorCode::E9002)
        .with_message(format!("aborting due to {limit} previous errors"))
        .with_label(span, "error limit reached here")
}
