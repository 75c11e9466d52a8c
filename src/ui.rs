use std::io::Write;
use std::time::Instant;

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use crate::app::{App, Focus};
use crate::pane::{PaneRole, ProcessPane};

// ── Palette — ALL explicit Rgb, zero ANSI named colors ─────
const BASE_BG: Color = Color::Rgb(18, 18, 24);
const FG: Color = Color::Rgb(220, 220, 230);
const FG_BRIGHT: Color = Color::Rgb(255, 255, 255);
const DIM: Color = Color::Rgb(100, 100, 110);
const ACCENT: Color = Color::Rgb(180, 180, 255);
const BORDER_FG: Color = Color::Rgb(60, 60, 80);
const ACTIVE_PANE_BORDER: Color = Color::Rgb(120, 160, 255);
const HELP_FG: Color = Color::Rgb(120, 120, 140);
const STATUS_OK: Color = Color::Rgb(140, 220, 140);
const STATUS_ERR: Color = Color::Rgb(220, 140, 140);
const VERSION_FG: Color = Color::Rgb(80, 80, 100);
const MODE_BG: Color = Color::Rgb(60, 60, 120);
const RUNNING_FG: Color = Color::Rgb(80, 200, 120);

/// Screen regions of the two-pane layout: the assistant pane on top, the
/// shell mini-buffer below it, one status line at the bottom.
pub struct PaneAreas {
    pub assistant_box: Rect,
    pub assistant_grid: Rect,
    /// Reserved overlay row under the assistant grid (command role).
    pub assistant_status: Rect,
    pub shell_box: Rect,
    pub shell_grid: Rect,
    pub status: Rect,
}

pub fn layout(area: Rect, minibuffer_rows: u16) -> PaneAreas {
    let shell_h = minibuffer_rows.saturating_add(2).min(area.height.saturating_sub(4));
    let chunks = Layout::vertical([
        Constraint::Min(3),
        Constraint::Length(shell_h),
        Constraint::Length(1),
    ])
    .split(area);

    let assistant_inner = inner(chunks[0]);
    let assistant_grid = Rect {
        height: assistant_inner.height.saturating_sub(PaneRole::Command.reserved_rows()),
        ..assistant_inner
    };
    let assistant_status = Rect {
        y: assistant_inner.y + assistant_grid.height,
        height: assistant_inner.height.saturating_sub(assistant_grid.height),
        ..assistant_inner
    };

    PaneAreas {
        assistant_box: chunks[0],
        assistant_grid,
        assistant_status,
        shell_box: chunks[1],
        shell_grid: inner(chunks[1]),
        status: chunks[2],
    }
}

fn inner(rect: Rect) -> Rect {
    Rect {
        x: rect.x + 1,
        y: rect.y + 1,
        width: rect.width.saturating_sub(2),
        height: rect.height.saturating_sub(2),
    }
}

/// Map a screen position to the pane under it and its content
/// coordinates (visible row, column).
pub fn hit_test(areas: &PaneAreas, col: u16, row: u16) -> Option<(Focus, usize, usize)> {
    let hit = |grid: Rect| {
        (col >= grid.x && col < grid.x + grid.width && row >= grid.y && row < grid.y + grid.height)
            .then(|| ((row - grid.y) as usize, (col - grid.x) as usize))
    };
    if let Some((line, column)) = hit(areas.assistant_grid) {
        return Some((Focus::Assistant, line, column));
    }
    if let Some((line, column)) = hit(areas.shell_grid) {
        return Some((Focus::Shell, line, column));
    }
    None
}

/// Draw the chrome. Pane interiors are marked `skip` so ratatui never
/// repaints them; their content goes straight to stdout via
/// [`blit_frame`].
pub fn draw(f: &mut Frame, app: &App, now: Instant) {
    let area = f.area();
    let buf = f.buffer_mut();
    for y in area.top()..area.bottom() {
        for x in area.left()..area.right() {
            if let Some(cell) = buf.cell_mut((x, y)) {
                cell.set_fg(FG);
                cell.set_bg(BASE_BG);
                cell.set_symbol(" ");
            }
        }
    }

    let areas = layout(area, app.minibuffer_rows);
    draw_assistant_box(f, app, &areas);
    draw_shell_box(f, app, &areas);
    draw_status_bar(f, app, areas.status, now);
}

fn pane_border(focused: bool) -> Style {
    let fg = if focused { ACTIVE_PANE_BORDER } else { BORDER_FG };
    Style::default().fg(fg).bg(BASE_BG)
}

fn state_span(pane: &ProcessPane) -> Span<'static> {
    if pane.is_running() {
        Span::styled("running ", Style::default().fg(RUNNING_FG).bg(BASE_BG))
    } else {
        let label = pane.exit_label().unwrap_or_else(|| "stopped".to_string());
        let fg = if pane.last_exit().is_some_and(|s| s.success()) {
            STATUS_OK
        } else {
            STATUS_ERR
        };
        Span::styled(format!("{label} "), Style::default().fg(fg).bg(BASE_BG))
    }
}

fn draw_assistant_box(f: &mut Frame, app: &App, areas: &PaneAreas) {
    let mut title = vec![
        Span::styled(
            " quarterdeck ",
            Style::default()
                .fg(ACCENT)
                .bg(BASE_BG)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("v{} ", env!("CARGO_PKG_VERSION")),
            Style::default().fg(VERSION_FG).bg(BASE_BG),
        ),
    ];
    if let Some(assistant) = &app.assistant {
        title.push(Span::styled(
            format!("{} ", assistant.program()),
            Style::default().fg(FG_BRIGHT).bg(BASE_BG),
        ));
        title.push(state_span(assistant));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(pane_border(app.focus == Focus::Assistant))
        .style(Style::default().fg(FG).bg(BASE_BG))
        .title(Line::from(title));
    f.render_widget(block, areas.assistant_box);

    match &app.assistant {
        Some(assistant) => {
            mark_skip(f, areas.assistant_grid);
            draw_assistant_status(f, assistant, areas.assistant_status);
        }
        None => {
            let hint = Paragraph::new(Line::from(Span::styled(
                " no assistant configured (set one with --assistant or in config.toml)",
                Style::default().fg(DIM).bg(BASE_BG),
            )));
            f.render_widget(hint, areas.assistant_grid);
        }
    }
}

fn draw_assistant_status(f: &mut Frame, assistant: &ProcessPane, area: Rect) {
    if area.height == 0 {
        return;
    }
    let line = if assistant.is_running() {
        Line::from(vec![
            Span::styled(" running ", Style::default().fg(RUNNING_FG).bg(BASE_BG)),
            Span::styled("F4:Stop ", Style::default().fg(HELP_FG).bg(BASE_BG)),
        ])
    } else {
        let label = assistant.exit_label().unwrap_or_else(|| "stopped".to_string());
        let fg = if assistant.last_exit().is_some_and(|s| s.success()) {
            STATUS_OK
        } else {
            STATUS_ERR
        };
        Line::from(vec![
            Span::styled(format!(" {label} "), Style::default().fg(fg).bg(BASE_BG)),
            Span::styled("F4:Run ", Style::default().fg(HELP_FG).bg(BASE_BG)),
        ])
    };
    f.render_widget(
        Paragraph::new(line).style(Style::default().fg(FG).bg(BASE_BG)),
        area,
    );
}

fn draw_shell_box(f: &mut Frame, app: &App, areas: &PaneAreas) {
    let title = Line::from(vec![
        Span::styled(
            " shell ",
            Style::default()
                .fg(ACCENT)
                .bg(BASE_BG)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{} ", app.shell.program()),
            Style::default().fg(FG_BRIGHT).bg(BASE_BG),
        ),
    ]);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(pane_border(app.focus == Focus::Shell))
        .style(Style::default().fg(FG).bg(BASE_BG))
        .title(title);
    f.render_widget(block, areas.shell_box);
    mark_skip(f, areas.shell_grid);
}

fn mark_skip(f: &mut Frame, area: Rect) {
    let buf = f.buffer_mut();
    for y in area.top()..area.bottom() {
        for x in area.left()..area.right() {
            if let Some(cell) = buf.cell_mut((x, y)) {
                cell.skip = true;
            }
        }
    }
}

fn draw_status_bar(f: &mut Frame, app: &App, area: Rect, now: Instant) {
    let focus_label = match app.focus {
        Focus::Shell => " SHELL ",
        Focus::Assistant => " ASSISTANT ",
    };
    let mut spans = vec![
        Span::styled(
            focus_label,
            Style::default()
                .bg(MODE_BG)
                .fg(FG_BRIGHT)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            " Ctrl+Q:Quit  F2/F3:Focus  F4:Assistant  Wheel:Scroll  Ctrl+Shift+C:Copy ",
            Style::default().fg(HELP_FG).bg(BASE_BG),
        ),
    ];
    if let Some(msg) = app.status_line(now) {
        spans.push(Span::styled(
            format!(" {msg}"),
            Style::default().fg(STATUS_OK).bg(BASE_BG),
        ));
    }
    f.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().fg(FG).bg(BASE_BG)),
        area,
    );
}

/// Push the decimal representation of a u16 directly into a byte buffer,
/// avoiding `write!`/`std::fmt` overhead.
#[inline(always)]
fn push_u16(buf: &mut Vec<u8>, n: u16) {
    if n >= 10000 {
        buf.push(b'0' + (n / 10000) as u8);
    }
    if n >= 1000 {
        buf.push(b'0' + ((n / 1000) % 10) as u8);
    }
    if n >= 100 {
        buf.push(b'0' + ((n / 100) % 10) as u8);
    }
    if n >= 10 {
        buf.push(b'0' + ((n / 10) % 10) as u8);
    }
    buf.push(b'0' + (n % 10) as u8);
}

/// Push CSI sequence start (`\x1b[`) into a byte buffer.
#[inline(always)]
fn push_csi(buf: &mut Vec<u8>) {
    buf.push(0x1b);
    buf.push(b'[');
}

/// Push a CUP (cursor position) sequence: `\x1b[{row};{col}H`
#[inline(always)]
fn push_cup(buf: &mut Vec<u8>, row: u16, col: u16) {
    push_csi(buf);
    push_u16(buf, row);
    buf.push(b';');
    push_u16(buf, col);
    buf.push(b'H');
}

/// Write a pane's cached styled frame directly to the terminal,
/// bypassing ratatui. One CUP per row; rows carry their own SGR runs.
pub fn blit_frame(w: &mut impl Write, frame: &str, grid: Rect) -> std::io::Result<()> {
    if frame.is_empty() || grid.width == 0 {
        return Ok(());
    }
    let mut buf = Vec::with_capacity(frame.len() + grid.height as usize * 12);
    for (i, line) in frame.split('\n').enumerate() {
        if i >= grid.height as usize {
            break;
        }
        push_cup(&mut buf, grid.y + i as u16 + 1, grid.x + 1);
        buf.extend_from_slice(line.as_bytes());
    }
    buf.extend_from_slice(b"\x1b[0m");
    w.write_all(&buf)
}

/// Position the terminal cursor at the pane's cursor location and show
/// it, but only if the embedded app wants the cursor visible.
///
/// Call this once per frame, after all blits, for the focused pane.
pub fn write_pty_cursor(
    w: &mut impl Write,
    screen: &vt100::Screen,
    grid: Rect,
) -> std::io::Result<()> {
    if screen.hide_cursor() {
        return Ok(());
    }
    let (cr, cc) = screen.cursor_position();
    let mut buf = Vec::with_capacity(16);
    push_cup(&mut buf, grid.y + cr + 1, grid.x + cc + 1);
    buf.extend_from_slice(b"\x1b[?25h");
    w.write_all(&buf)
}

/// Render a scrollbar on the right edge of the pane when scrolled back.
/// The scrollbar overlays the rightmost column of the content area.
pub fn render_scrollbar(
    w: &mut impl Write,
    scroll_offset: usize,
    total_scrollback: usize,
    grid: Rect,
) -> std::io::Result<()> {
    if total_scrollback == 0 || grid.height < 2 || grid.width < 2 {
        return Ok(());
    }

    let track_height = grid.height as usize;
    let total_content = total_scrollback + track_height;

    // Thumb size: proportional to viewport vs total content, at least 1
    let thumb_size = ((track_height * track_height) / total_content).max(1);

    // scroll_offset=0 → thumb at bottom (live), max offset → thumb at top
    let scroll_fraction = scroll_offset as f64 / total_scrollback as f64;
    let max_thumb_pos = track_height.saturating_sub(thumb_size);
    let thumb_top = ((1.0 - scroll_fraction) * max_thumb_pos as f64) as usize;

    let x = grid.x + grid.width;
    let mut buf = Vec::with_capacity(track_height * 16);

    for i in 0..track_height {
        push_cup(&mut buf, grid.y + i as u16 + 1, x);
        if i >= thumb_top && i < thumb_top + thumb_size {
            buf.extend_from_slice(b"\x1b[0;38;2;140;140;200m\xe2\x96\x88"); // █
        } else {
            buf.extend_from_slice(b"\x1b[0;38;2;40;40;60m\xe2\x94\x82"); // │
        }
    }
    buf.extend_from_slice(b"\x1b[0m");

    // Line position indicator at top-right of content area
    let mut label = Vec::with_capacity(32);
    label.extend_from_slice(b" [");
    push_u16(&mut label, scroll_offset.min(u16::MAX as usize) as u16);
    label.push(b'/');
    push_u16(&mut label, total_scrollback.min(u16::MAX as usize) as u16);
    label.extend_from_slice(b"] ");

    let len = label.len() as u16;
    if len < grid.width {
        let lx = grid.x + grid.width - len;
        push_cup(&mut buf, grid.y + 1, lx + 1);
        buf.extend_from_slice(b"\x1b[0;7m"); // reverse video
        buf.extend_from_slice(&label);
        buf.extend_from_slice(b"\x1b[0m");
    }

    w.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn layout_partitions_the_screen() {
        let areas = layout(Rect::new(0, 0, 80, 40), 10);
        assert_eq!(areas.shell_box.height, 12);
        assert_eq!(areas.shell_grid.height, 10);
        assert_eq!(areas.status.height, 1);
        assert_eq!(areas.assistant_box.height, 27);
        // Command role keeps one interior row for its status overlay.
        assert_eq!(areas.assistant_grid.height, 24);
        assert_eq!(areas.assistant_status.height, 1);
        assert_eq!(
            areas.assistant_status.y,
            areas.assistant_grid.y + areas.assistant_grid.height
        );
    }

    #[test]
    fn hit_test_translates_to_content_coordinates() {
        let areas = layout(Rect::new(0, 0, 80, 40), 10);
        let grid = areas.shell_grid;
        assert_eq!(
            hit_test(&areas, grid.x, grid.y),
            Some((Focus::Shell, 0, 0))
        );
        assert_eq!(
            hit_test(&areas, grid.x + 5, grid.y + 2),
            Some((Focus::Shell, 2, 5))
        );
        let grid = areas.assistant_grid;
        assert_eq!(
            hit_test(&areas, grid.x + 1, grid.y),
            Some((Focus::Assistant, 0, 1))
        );
        // Borders and the status row belong to the chrome.
        assert_eq!(hit_test(&areas, 0, 0), None);
        assert_eq!(
            hit_test(&areas, areas.assistant_status.x, areas.assistant_status.y),
            None
        );
    }

    #[test]
    fn blit_positions_each_row() {
        let mut out = Vec::new();
        blit_frame(&mut out, "row0\nrow1", Rect::new(1, 1, 10, 5)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\x1b[2;2Hrow0"));
        assert!(text.contains("\x1b[3;2Hrow1"));
        assert!(text.ends_with("\x1b[0m"));
    }

    #[test]
    fn blit_clips_to_grid_height() {
        let mut out = Vec::new();
        blit_frame(&mut out, "a\nb\nc\nd", Rect::new(0, 0, 10, 2)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains('a'));
        assert!(text.contains('b'));
        assert!(!text.contains('c'));
    }

    #[test]
    fn scrollbar_is_silent_without_history() {
        let mut out = Vec::new();
        render_scrollbar(&mut out, 0, 0, Rect::new(0, 0, 80, 20)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn scrollbar_shows_position_label() {
        let mut out = Vec::new();
        render_scrollbar(&mut out, 25, 100, Rect::new(1, 1, 78, 20)).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("[25/100]"));
    }
}
