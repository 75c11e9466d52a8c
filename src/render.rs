use std::time::{Duration, Instant};

use crate::scrollback::{CapturedLine, ScrollbackStore};
use crate::selection::Selection;

/// Default minimum interval between frame recomputations.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(50);

/// Explicit style configuration passed into the encoding functions, so a
/// frame is a pure function of (grid, overlays, palette).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    pub fg: (u8, u8, u8),
    pub bg: (u8, u8, u8),
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            fg: (220, 220, 230),
            bg: (18, 18, 24),
        }
    }
}

/// Rendering overlay for a single cell. Cursor takes precedence over
/// selection, selection over the base attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overlay {
    None,
    Selection,
    Cursor,
}

pub fn resolve_overlay(is_cursor: bool, is_selected: bool) -> Overlay {
    if is_cursor {
        Overlay::Cursor
    } else if is_selected {
        Overlay::Selection
    } else {
        Overlay::None
    }
}

#[derive(PartialEq, Eq, Clone)]
struct CellStyle {
    fg: vt100::Color,
    bg: vt100::Color,
    bold: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
}

impl CellStyle {
    fn from_vt(cell: &vt100::Cell) -> Self {
        Self {
            fg: cell.fgcolor(),
            bg: cell.bgcolor(),
            bold: cell.bold(),
            italic: cell.italic(),
            underline: cell.underline(),
            inverse: cell.inverse(),
        }
    }

    fn default_cell() -> Self {
        Self {
            fg: vt100::Color::Default,
            bg: vt100::Color::Default,
            bold: false,
            italic: false,
            underline: false,
            inverse: false,
        }
    }

    /// Both overlays render as reverse video; cursor wins by construction
    /// of [`resolve_overlay`].
    fn with_overlay(mut self, overlay: Overlay) -> Self {
        if overlay != Overlay::None {
            self.inverse = !self.inverse;
        }
        self
    }
}

/// Push a u8 decimal representation without going through `std::fmt`.
#[inline(always)]
fn push_u8(buf: &mut String, n: u8) {
    if n >= 100 {
        buf.push((b'0' + n / 100) as char);
    }
    if n >= 10 {
        buf.push((b'0' + (n / 10) % 10) as char);
    }
    buf.push((b'0' + n % 10) as char);
}

fn write_sgr(buf: &mut String, s: &CellStyle, palette: &Palette) {
    buf.push_str("\x1b[0");
    if s.bold {
        buf.push_str(";1");
    }
    if s.italic {
        buf.push_str(";3");
    }
    if s.underline {
        buf.push_str(";4");
    }
    if s.inverse {
        write_color(buf, s.bg, true, palette);
        write_color(buf, s.fg, false, palette);
    } else {
        write_color(buf, s.fg, true, palette);
        write_color(buf, s.bg, false, palette);
    }
    buf.push('m');
}

fn write_color(buf: &mut String, color: vt100::Color, is_fg: bool, palette: &Palette) {
    match color {
        vt100::Color::Default => {
            let (r, g, b) = if is_fg { palette.fg } else { palette.bg };
            buf.push_str(if is_fg { ";38;2;" } else { ";48;2;" });
            push_u8(buf, r);
            buf.push(';');
            push_u8(buf, g);
            buf.push(';');
            push_u8(buf, b);
        }
        vt100::Color::Idx(i) if i < 8 => {
            buf.push(';');
            push_u8(buf, if is_fg { 30 + i } else { 40 + i });
        }
        vt100::Color::Idx(i) if i < 16 => {
            buf.push(';');
            push_u8(buf, if is_fg { 90 + (i - 8) } else { 100 + (i - 8) });
        }
        vt100::Color::Idx(i) => {
            buf.push(';');
            push_u8(buf, if is_fg { 38 } else { 48 });
            buf.push_str(";5;");
            push_u8(buf, i);
        }
        vt100::Color::Rgb(r, g, b) => {
            buf.push(';');
            push_u8(buf, if is_fg { 38 } else { 48 });
            buf.push_str(";2;");
            push_u8(buf, r);
            buf.push(';');
            push_u8(buf, g);
            buf.push(';');
            push_u8(buf, b);
        }
    }
}

/// Everything the encoder needs to build one styled frame.
pub struct FrameView<'a> {
    pub screen: &'a vt100::Screen,
    pub scrollback: &'a ScrollbackStore,
    pub offset: usize,
    pub selection: Option<&'a Selection>,
    /// True only when the pane has focus, the application wants the cursor
    /// shown, and the view is live.
    pub cursor_overlay: bool,
    pub palette: Palette,
}

/// Encode the whole visible frame as styled text, one line per row.
///
/// Live view: every screen row, with cursor/selection overlays resolved
/// per cell. Scrolled view: the tail of the scrollback store (pre-rendered,
/// immutable — overlays never touch these) followed by as many live rows
/// as remain.
pub fn encode_frame(view: &FrameView) -> String {
    let (rows, _) = view.screen.size();
    let rows = rows as usize;
    let mut lines = Vec::with_capacity(rows);

    if view.offset == 0 {
        for row in 0..rows {
            lines.push(encode_row(
                view.screen,
                row as u16,
                row,
                view.selection,
                view.cursor_overlay,
                &view.palette,
            ));
        }
    } else {
        let len = view.scrollback.len();
        let offset = view.offset.min(len);
        let start = len - offset;
        let sb_count = offset.min(rows);
        for i in 0..sb_count {
            // Stored styled lines are immutable; cursor/selection overlays
            // only apply to live rows.
            match view.scrollback.get(start + i) {
                Some(line) => lines.push(line.styled.clone()),
                None => lines.push(String::new()),
            }
        }
        for row in 0..rows - sb_count {
            lines.push(encode_row(
                view.screen,
                row as u16,
                sb_count + row,
                view.selection,
                false,
                &view.palette,
            ));
        }
    }

    lines.join("\n")
}

/// Encode one live screen row, applying overlays at the given visible
/// row index. Style changes flush as a single SGR per run.
fn encode_row(
    screen: &vt100::Screen,
    row: u16,
    vrow: usize,
    selection: Option<&Selection>,
    cursor_overlay: bool,
    palette: &Palette,
) -> String {
    let (_, cols) = screen.size();
    let (cursor_row, cursor_col) = screen.cursor_position();
    let mut buf = String::with_capacity(cols as usize * 4);
    let mut prev_style: Option<CellStyle> = None;

    for col in 0..cols {
        let is_cursor = cursor_overlay && row == cursor_row && col == cursor_col;
        let is_selected = selection.is_some_and(|s| s.contains(vrow, col as usize));
        let overlay = resolve_overlay(is_cursor, is_selected);

        match screen.cell(row, col) {
            Some(cell) if cell.is_wide_continuation() => continue,
            Some(cell) => {
                let style = CellStyle::from_vt(cell).with_overlay(overlay);
                if prev_style.as_ref() != Some(&style) {
                    write_sgr(&mut buf, &style, palette);
                    prev_style = Some(style);
                }
                let contents = cell.contents();
                if contents.is_empty() {
                    buf.push(' ');
                } else {
                    buf.push_str(&contents);
                }
            }
            None => {
                let style = CellStyle::default_cell().with_overlay(overlay);
                if prev_style.as_ref() != Some(&style) {
                    write_sgr(&mut buf, &style, palette);
                    prev_style = Some(style);
                }
                buf.push(' ');
            }
        }
    }

    buf.push_str("\x1b[0m");
    buf
}

/// Plain text of one screen row, trailing blanks trimmed.
pub fn row_text(screen: &vt100::Screen, row: u16) -> String {
    let (_, cols) = screen.size();
    let mut text = String::with_capacity(cols as usize);
    for col in 0..cols {
        if let Some(cell) = screen.cell(row, col) {
            if cell.is_wide_continuation() {
                continue;
            }
            let contents = cell.contents();
            if contents.is_empty() {
                text.push(' ');
            } else {
                text.push_str(&contents);
            }
        }
    }
    text.truncate(text.trim_end().len());
    text
}

/// Snapshot every screen row as (plain, styled) for scrollback capture.
pub fn snapshot_rows(screen: &vt100::Screen, palette: Palette) -> Vec<CapturedLine> {
    let (rows, _) = screen.size();
    (0..rows)
        .map(|row| {
            CapturedLine::new(
                row_text(screen, row),
                encode_row(screen, row, row as usize, None, false, &palette),
            )
        })
        .collect()
}

/// Plain text of the visible rows (scrollback-prefixed when scrolled),
/// the content the selection model extracts from.
pub fn visible_lines(
    screen: &vt100::Screen,
    scrollback: &ScrollbackStore,
    offset: usize,
) -> Vec<String> {
    let (rows, _) = screen.size();
    let rows = rows as usize;
    let mut lines = Vec::with_capacity(rows);
    if offset == 0 {
        for row in 0..rows {
            lines.push(row_text(screen, row as u16));
        }
        return lines;
    }
    let len = scrollback.len();
    let offset = offset.min(len);
    let start = len - offset;
    let sb_count = offset.min(rows);
    for i in 0..sb_count {
        lines.push(
            scrollback
                .get(start + i)
                .map(|l| l.text.clone())
                .unwrap_or_default(),
        );
    }
    for row in 0..rows - sb_count {
        lines.push(row_text(screen, row as u16));
    }
    lines
}

/// Cached styled frame. Replaced only when the fresh frame differs, so
/// no-visual-change recomputations (spinner frames with identical glyphs)
/// never reach the terminal.
#[derive(Default)]
pub struct RenderCache {
    frame: String,
    replacements: u64,
}

impl RenderCache {
    pub fn frame(&self) -> &str {
        &self.frame
    }

    /// Number of times the cache actually changed — instrumentation for
    /// redraw-stability checks.
    pub fn replacements(&self) -> u64 {
        self.replacements
    }

    pub fn replace_if_changed(&mut self, frame: String) -> bool {
        if frame == self.frame {
            return false;
        }
        self.frame = frame;
        self.replacements += 1;
        true
    }

    pub fn clear(&mut self) {
        self.frame.clear();
    }
}

/// Two-state throttle between output arrival and frame recomputation:
/// *idle* until something marks the view dirty, then one *tick* scheduled
/// no sooner than `min_interval` after the last actual render. While the
/// session keeps running each tick reschedules the next, so output can
/// arrive arbitrarily fast without forcing a re-encode per chunk.
pub struct RenderScheduler {
    min_interval: Duration,
    dirty: bool,
    tick_at: Option<Instant>,
    last_render: Instant,
}

impl RenderScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            dirty: false,
            tick_at: None,
            last_render: Instant::now() - min_interval,
        }
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        self.dirty = true;
        if self.tick_at.is_none() {
            self.tick_at = Some((self.last_render + self.min_interval).max(now));
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// When the next tick should fire, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        self.tick_at
    }

    pub fn tick_due(&self, now: Instant) -> bool {
        self.tick_at.is_some_and(|t| t <= now)
    }

    /// Consume the scheduled tick; returns whether a recompute is needed.
    pub fn begin_tick(&mut self) -> bool {
        self.tick_at = None;
        std::mem::take(&mut self.dirty)
    }

    /// Record the tick outcome. `rendered` advances the throttle clock;
    /// `still_running` keeps the tick chain alive for flowing output.
    pub fn finish_tick(&mut self, now: Instant, rendered: bool, still_running: bool) {
        if rendered {
            self.last_render = now;
        }
        if still_running && self.tick_at.is_none() {
            self.tick_at = Some(now + self.min_interval);
        }
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_INTERVAL)
    }
}
