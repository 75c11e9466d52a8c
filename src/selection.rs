/// A position in the visible text: `line` indexes the rendered rows
/// (scrollback-prefixed when scrolled), `col` is a character index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

/// Character-range selection over the currently rendered content.
///
/// Coordinates are view-relative, so a resize invalidates them; the pane
/// clears the selection on resize rather than trying to remap.
#[derive(Debug, Default)]
pub struct Selection {
    anchor: Option<Pos>,
    head: Option<Pos>,
    active: bool,
    complete: bool,
}

impl Selection {
    pub fn start(&mut self, line: usize, col: usize) {
        let pos = Pos::new(line, col);
        self.anchor = Some(pos);
        self.head = Some(pos);
        self.active = true;
        self.complete = false;
    }

    pub fn update(&mut self, line: usize, col: usize) {
        if self.active {
            self.head = Some(Pos::new(line, col));
        }
    }

    pub fn end(&mut self) {
        if self.active {
            self.active = false;
            self.complete = true;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The normalized (start <= end) range, or `None` when no real
    /// selection exists (start == end counts as nothing selected).
    pub fn normalized(&self) -> Option<(Pos, Pos)> {
        let a = self.anchor?;
        let b = self.head?;
        if a == b {
            return None;
        }
        if a <= b {
            Some((a, b))
        } else {
            Some((b, a))
        }
    }

    /// Whether the cell at (line, col) falls inside the selection.
    /// The range is start-inclusive, end-exclusive.
    pub fn contains(&self, line: usize, col: usize) -> bool {
        let Some((start, end)) = self.normalized() else {
            return false;
        };
        let pos = Pos::new(line, col);
        pos >= start && pos < end
    }

    /// Extract the selected text from the given visible lines. Indices
    /// past the available content are clamped, never an error.
    pub fn selected_text(&self, lines: &[String]) -> Option<String> {
        let (start, end) = self.normalized()?;
        if lines.is_empty() {
            return None;
        }
        let last = lines.len() - 1;
        let start_line = start.line.min(last);
        let end_line = end.line.min(last);

        if start_line == end_line {
            return Some(substring(&lines[start_line], start.col, end.col));
        }

        let mut parts = Vec::with_capacity(end_line - start_line + 1);
        parts.push(tail(&lines[start_line], start.col));
        for line in &lines[start_line + 1..end_line] {
            parts.push(line.clone());
        }
        parts.push(head(&lines[end_line], end.col));
        Some(parts.join("\n"))
    }
}

fn byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn substring(s: &str, from: usize, to: usize) -> String {
    let start = byte_index(s, from);
    let end = byte_index(s, to.max(from));
    s[start..end].to_string()
}

fn tail(s: &str, from: usize) -> String {
    s[byte_index(s, from)..].to_string()
}

fn head(s: &str, to: usize) -> String {
    s[..byte_index(s, to)].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(rows: &[&str]) -> Vec<String> {
        rows.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn single_line_round_trip() {
        let content = lines(&["Hello, World!"]);
        let mut sel = Selection::default();
        sel.start(0, 7);
        sel.update(0, 12);
        sel.end();
        assert_eq!(sel.selected_text(&content).as_deref(), Some("World"));
    }

    #[test]
    fn reversed_drag_normalizes() {
        let content = lines(&["Hello, World!"]);
        let mut sel = Selection::default();
        sel.start(0, 12);
        sel.update(0, 7);
        sel.end();
        assert_eq!(sel.selected_text(&content).as_deref(), Some("World"));
    }

    #[test]
    fn multi_line_extraction() {
        let content = lines(&["First line", "Second line", "Third line"]);
        let mut sel = Selection::default();
        sel.start(0, 6);
        sel.update(2, 5);
        sel.end();
        assert_eq!(
            sel.selected_text(&content).as_deref(),
            Some("line\nSecond line\nThird")
        );
    }

    #[test]
    fn upward_drag_across_lines() {
        let content = lines(&["First line", "Second line", "Third line"]);
        let mut sel = Selection::default();
        sel.start(2, 5);
        sel.update(0, 6);
        sel.end();
        assert_eq!(
            sel.selected_text(&content).as_deref(),
            Some("line\nSecond line\nThird")
        );
    }

    #[test]
    fn zero_width_selection_is_not_real() {
        let content = lines(&["Hello"]);
        let mut sel = Selection::default();
        sel.start(0, 3);
        sel.update(0, 3);
        sel.end();
        assert_eq!(sel.selected_text(&content), None);
        assert!(!sel.contains(0, 3));
    }

    #[test]
    fn extraction_clamps_out_of_range_positions() {
        let content = lines(&["short"]);
        let mut sel = Selection::default();
        sel.start(0, 2);
        sel.update(9, 40);
        sel.end();
        assert_eq!(sel.selected_text(&content).as_deref(), Some("ort"));
    }

    #[test]
    fn membership_is_end_exclusive() {
        let mut sel = Selection::default();
        sel.start(0, 7);
        sel.update(0, 12);
        sel.end();
        assert!(sel.contains(0, 7));
        assert!(sel.contains(0, 11));
        assert!(!sel.contains(0, 12));
        assert!(!sel.contains(0, 6));
    }

    #[test]
    fn membership_spans_whole_middle_lines() {
        let mut sel = Selection::default();
        sel.start(0, 6);
        sel.update(2, 5);
        sel.end();
        assert!(sel.contains(1, 0));
        assert!(sel.contains(1, 500));
        assert!(!sel.contains(2, 5));
    }

    #[test]
    fn update_ignored_after_release() {
        let content = lines(&["Hello, World!"]);
        let mut sel = Selection::default();
        sel.start(0, 7);
        sel.update(0, 12);
        sel.end();
        sel.update(0, 2);
        assert_eq!(sel.selected_text(&content).as_deref(), Some("World"));
    }

    #[test]
    fn multibyte_content_uses_char_indices() {
        let content = lines(&["héllo wörld"]);
        let mut sel = Selection::default();
        sel.start(0, 6);
        sel.update(0, 11);
        sel.end();
        assert_eq!(sel.selected_text(&content).as_deref(), Some("wörld"));
    }
}
