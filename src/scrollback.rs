use std::collections::VecDeque;

/// Default number of captured lines kept before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// How many recent entries are checked when suppressing duplicate captures.
pub const DEDUP_LOOKBACK: usize = 20;

/// Lines scrolled per mouse wheel tick.
pub const SCROLL_STEP: usize = 3;

/// One row captured off the top of the live screen: plain text for
/// comparison and extraction, styled text for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedLine {
    pub text: String,
    pub styled: String,
}

impl CapturedLine {
    pub fn new(text: impl Into<String>, styled: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            styled: styled.into(),
        }
    }
}

/// Bounded FIFO of rows that have scrolled off the live grid.
pub struct ScrollbackStore {
    lines: VecDeque<CapturedLine>,
    capacity: usize,
}

impl ScrollbackStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&CapturedLine> {
        self.lines.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedLine> {
        self.lines.iter()
    }

    /// Append a captured line unless an identical one sits within the
    /// dedup lookback window. Returns `true` if the line was stored.
    ///
    /// The window suppresses duplicate capture artifacts from partial or
    /// overlapping scroll detection — it is not general content dedup, so
    /// a line may legitimately appear again further apart.
    pub fn push(&mut self, line: CapturedLine) -> bool {
        let duplicate = self
            .lines
            .iter()
            .rev()
            .take(DEDUP_LOOKBACK)
            .any(|l| l.styled == line.styled);
        if duplicate {
            return false;
        }
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        true
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for ScrollbackStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Capture rows that scrolled off the top of the screen.
///
/// `old_rows` is the snapshot taken before the new output was written;
/// `new_top_text` is the plain text of row 0 after the write. If the new
/// top row is found in the snapshot, everything above it scrolled off and
/// is stored. If it is not found and the old top row was non-blank, the
/// scroll amount is undetectable (large burst) and every non-blank old row
/// is stored — over-capturing beats silently losing history.
///
/// Returns the number of lines actually stored (dedup-suppressed lines
/// don't count).
pub fn capture_scrolled(
    store: &mut ScrollbackStore,
    old_rows: &[CapturedLine],
    new_top_text: &str,
) -> usize {
    if old_rows.is_empty() {
        return 0;
    }
    let mut stored = 0;
    match old_rows.iter().position(|r| r.text == new_top_text) {
        Some(amount) => {
            for row in &old_rows[..amount] {
                if store.push(row.clone()) {
                    stored += 1;
                }
            }
        }
        None => {
            if !old_rows[0].text.trim().is_empty() {
                for row in old_rows {
                    if row.text.trim().is_empty() {
                        continue;
                    }
                    if store.push(row.clone()) {
                        stored += 1;
                    }
                }
            }
        }
    }
    stored
}

/// View position within live output + scrollback.
#[derive(Debug, Default)]
pub struct ScrollState {
    offset: usize,
    locked: bool,
}

impl ScrollState {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn is_live(&self) -> bool {
        self.offset == 0
    }

    pub fn scroll_up(&mut self, step: usize, max: usize) {
        self.offset = (self.offset + step).min(max);
        if self.offset > 0 {
            self.locked = true;
        }
    }

    pub fn scroll_down(&mut self, step: usize) {
        self.offset = self.offset.saturating_sub(step);
        if self.offset == 0 {
            self.locked = false;
        }
    }

    pub fn jump_oldest(&mut self, max: usize) {
        self.offset = max;
        self.locked = max > 0;
    }

    pub fn jump_live(&mut self) {
        self.offset = 0;
        self.locked = false;
    }

    pub fn reset(&mut self) {
        self.jump_live();
    }

    /// Keep the displayed history from shifting while locked: new captures
    /// push the live tail down, so the offset grows by exactly the number
    /// of lines stored.
    pub fn on_captured(&mut self, stored: usize, max: usize) {
        if self.locked && stored > 0 {
            self.offset = (self.offset + stored).min(max);
        }
    }
}
