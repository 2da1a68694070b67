//! Offset-based text edits.

use std::ops::Range;

/// Replace `range` of the original text with `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub text: String,
}

impl Edit {
    #[must_use]
    pub fn new(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::new(at..at, text)
    }
}

/// Apply non-overlapping edits from the highest offset to the lowest, so every
/// range still refers to the original text when it is applied.
///
/// Edits that overlap an already applied one or fall outside `code` are dropped.
#[must_use]
pub fn apply_edits(code: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| {
        b.range
            .start
            .cmp(&a.range.start)
            .then_with(|| b.range.end.cmp(&a.range.end))
    });

    let mut out = code.to_string();
    let mut floor = code.len();
    for edit in edits {
        let Range { start, end } = edit.range;
        if start > end || end > floor || !code.is_char_boundary(start) || !code.is_char_boundary(end) {
            continue;
        }
        out.replace_range(start..end, &edit.text);
        floor = start;
    }
    out
}
