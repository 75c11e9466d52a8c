use std::process::ExitStatus;
use std::sync::mpsc::Sender;
use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent};
use tracing::{debug, info, warn};

use crate::pty::{
    key_to_bytes, looks_like_csi_fragment, looks_like_mouse_report, PaneId, ProcessSession,
    SessionEvent,
};
use crate::render::{
    encode_frame, snapshot_rows, visible_lines, FrameView, Palette, RenderCache,
    RenderScheduler,
};
use crate::scrollback::{capture_scrolled, ScrollState, ScrollbackStore, SCROLL_STEP};
use crate::selection::Selection;

/// What the pane does when its process exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaneRole {
    /// Always-on shell: restarts unconditionally after exit.
    Shell,
    /// One-shot command: stays stopped and exposes the exit status.
    Command,
}

impl PaneRole {
    pub fn restarts(&self) -> bool {
        matches!(self, PaneRole::Shell)
    }

    /// Rows the chrome reserves below the grid (the command role keeps
    /// one for its status overlay line).
    pub fn reserved_rows(&self) -> u16 {
        match self {
            PaneRole::Shell => 0,
            PaneRole::Command => 1,
        }
    }
}

/// An interactive process behind a pty, rendered through a virtual
/// screen with scrollback, selection, and throttled re-encoding.
pub struct ProcessPane {
    id: PaneId,
    role: PaneRole,
    program: String,
    args: Vec<String>,
    events: Sender<SessionEvent>,

    parser: vt100::Parser,
    session: Option<ProcessSession>,
    last_exit: Option<ExitStatus>,
    restart_count: u32,

    scrollback: ScrollbackStore,
    scroll: ScrollState,
    selection: Selection,

    scheduler: RenderScheduler,
    cache: RenderCache,
    palette: Palette,
    focused: bool,

    cols: u16,
    rows: u16,
}

impl ProcessPane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PaneId,
        role: PaneRole,
        program: String,
        args: Vec<String>,
        cols: u16,
        rows: u16,
        scrollback_capacity: usize,
        scheduler: RenderScheduler,
        events: Sender<SessionEvent>,
    ) -> Self {
        let rows = rows.saturating_sub(role.reserved_rows()).max(1);
        let cols = cols.max(1);
        Self {
            id,
            role,
            program,
            args,
            events,
            parser: vt100::Parser::new(rows, cols, 0),
            session: None,
            last_exit: None,
            restart_count: 0,
            scrollback: ScrollbackStore::new(scrollback_capacity),
            scroll: ScrollState::default(),
            selection: Selection::default(),
            scheduler,
            cache: RenderCache::default(),
            palette: Palette::default(),
            focused: false,
            cols,
            rows,
        }
    }

    pub fn id(&self) -> PaneId {
        self.id
    }

    pub fn role(&self) -> PaneRole {
        self.role
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll.offset()
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    pub fn set_focused(&mut self, focused: bool, now: Instant) {
        if self.focused != focused {
            self.focused = focused;
            self.scheduler.mark_dirty(now);
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// One-line summary for the command role's status overlay.
    pub fn exit_label(&self) -> Option<String> {
        use std::os::unix::process::ExitStatusExt;
        let status = self.last_exit?;
        Some(match (status.code(), status.signal()) {
            (Some(code), _) => format!("exited ({code})"),
            (None, Some(sig)) => format!("killed (signal {sig})"),
            (None, None) => "exited".to_string(),
        })
    }

    /// Spawn the process. Failure is rendered as a red line inside the
    /// pane; the session never transitions to running and nothing
    /// propagates to the caller.
    pub fn start(&mut self, now: Instant) {
        if self.session.is_some() {
            return;
        }
        match ProcessSession::spawn(
            &self.program,
            &self.args,
            self.cols,
            self.rows,
            self.events.clone(),
            self.id,
        ) {
            Ok(session) => {
                info!(pane = self.id, program = %self.program, "pane started");
                self.session = Some(session);
                self.last_exit = None;
            }
            Err(err) => {
                warn!(pane = self.id, program = %self.program, %err, "spawn failed");
                let msg = format!(
                    "\r\n\x1b[31mfailed to start {}: {}\x1b[0m\r\n",
                    self.program, err
                );
                self.parser.process(msg.as_bytes());
            }
        }
        self.scheduler.mark_dirty(now);
    }

    pub fn stop(&mut self) {
        if let Some(session) = &self.session {
            session.stop();
        }
    }

    /// Feed output from the session's worker into the virtual screen,
    /// capturing whatever scrolls off the top.
    pub fn handle_output(&mut self, bytes: &[u8], now: Instant) {
        let was_alt = self.parser.screen().alternate_screen();
        // Full-screen apps manage their own history; capture only applies
        // to the primary screen.
        if was_alt {
            self.parser.process(bytes);
        } else {
            let old_rows = snapshot_rows(self.parser.screen(), self.palette);
            self.parser.process(bytes);
            if !self.parser.screen().alternate_screen() {
                let new_top = crate::render::row_text(self.parser.screen(), 0);
                let stored = capture_scrolled(&mut self.scrollback, &old_rows, &new_top);
                self.scroll.on_captured(stored, self.scrollback.len());
            }
        }
        self.scheduler.mark_dirty(now);
    }

    /// The session is gone; apply the role's policy.
    pub fn handle_exit(&mut self, status: Option<ExitStatus>, now: Instant) {
        debug!(pane = self.id, ?status, "pane process exited");
        self.session = None;
        self.last_exit = status;
        if self.role.restarts() {
            self.restart_count += 1;
            self.start(now);
        }
        self.scheduler.mark_dirty(now);
    }

    /// Resize to a new interior size. View coordinates become
    /// meaningless, so scroll and selection reset.
    pub fn resize(&mut self, cols: u16, rows: u16, now: Instant) {
        let rows = rows.saturating_sub(self.role.reserved_rows()).max(1);
        let cols = cols.max(1);
        if (cols, rows) == (self.cols, self.rows) {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        self.parser.set_size(rows, cols);
        if let Some(session) = &self.session {
            session.resize(cols, rows);
        }
        self.scroll.reset();
        self.selection.clear();
        self.scheduler.mark_dirty(now);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        // Writes while stopped are dropped.
        if let Some(session) = &self.session {
            session.write_all(bytes);
        }
    }

    /// Route a key press. While scrolled back, navigation keys move the
    /// view and anything else snaps back to live before forwarding.
    pub fn handle_key(&mut self, key: &KeyEvent, now: Instant) {
        if !self.scroll.is_live() {
            match key.code {
                KeyCode::Home => {
                    self.scroll.jump_oldest(self.scrollback.len());
                    self.scheduler.mark_dirty(now);
                    return;
                }
                KeyCode::End => {
                    self.scroll.jump_live();
                    self.scheduler.mark_dirty(now);
                    return;
                }
                KeyCode::PageUp => {
                    self.scroll
                        .scroll_up(self.rows as usize, self.scrollback.len());
                    self.scheduler.mark_dirty(now);
                    return;
                }
                KeyCode::PageDown => {
                    self.scroll.scroll_down(self.rows as usize);
                    self.scheduler.mark_dirty(now);
                    return;
                }
                _ => {
                    self.scroll.jump_live();
                    self.scheduler.mark_dirty(now);
                }
            }
        }
        let app_cursor = self.parser.screen().application_cursor();
        let bytes = key_to_bytes(key, app_cursor);
        self.write_bytes(&bytes);
    }

    /// Write pasted text to the pty, dropping fragments that are really
    /// stray terminal reports.
    pub fn paste(&mut self, text: &str) {
        if looks_like_mouse_report(text) || looks_like_csi_fragment(text) {
            debug!(pane = self.id, "dropped input fragment");
            return;
        }
        self.write_bytes(text.as_bytes());
    }

    pub fn scroll_up(&mut self, now: Instant) {
        self.scroll.scroll_up(SCROLL_STEP, self.scrollback.len());
        self.scheduler.mark_dirty(now);
    }

    pub fn scroll_down(&mut self, now: Instant) {
        self.scroll.scroll_down(SCROLL_STEP);
        self.scheduler.mark_dirty(now);
    }

    pub fn selection_start(&mut self, line: usize, col: usize, now: Instant) {
        self.selection.start(line, col);
        self.scheduler.mark_dirty(now);
    }

    pub fn selection_update(&mut self, line: usize, col: usize, now: Instant) {
        if self.selection.is_active() {
            self.selection.update(line, col);
            self.scheduler.mark_dirty(now);
        }
    }

    pub fn selection_end(&mut self) {
        self.selection.end();
    }

    pub fn clear_selection(&mut self, now: Instant) {
        self.selection.clear();
        self.scheduler.mark_dirty(now);
    }

    pub fn has_selection(&self) -> bool {
        self.selection.normalized().is_some()
    }

    /// Extract the selected text and clear the selection. The caller
    /// owns the clipboard.
    pub fn take_selected_text(&mut self, now: Instant) -> Option<String> {
        let lines = visible_lines(
            self.parser.screen(),
            &self.scrollback,
            self.scroll.offset(),
        );
        let text = self.selection.selected_text(&lines);
        if text.is_some() {
            self.selection.clear();
            self.scheduler.mark_dirty(now);
        }
        text
    }

    /// Plain text of what the pane currently shows.
    pub fn visible_text(&self) -> Vec<String> {
        visible_lines(
            self.parser.screen(),
            &self.scrollback,
            self.scroll.offset(),
        )
    }

    pub fn render_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        self.scheduler.mark_dirty(now);
    }

    /// Run a scheduled render tick. Returns `true` when the cached frame
    /// actually changed and must be blitted.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.scheduler.tick_due(now) {
            return false;
        }
        let recompute = self.scheduler.begin_tick();
        let mut changed = false;
        if recompute {
            let screen = self.parser.screen();
            let cursor_overlay = self.focused
                && self.session.is_some()
                && !screen.hide_cursor()
                && self.scroll.is_live();
            let frame = encode_frame(&FrameView {
                screen,
                scrollback: &self.scrollback,
                offset: self.scroll.offset(),
                selection: Some(&self.selection),
                cursor_overlay,
                palette: self.palette,
            });
            changed = self.cache.replace_if_changed(frame);
        }
        self.scheduler
            .finish_tick(now, recompute, self.session.is_some());
        changed
    }

    pub fn frame(&self) -> &str {
        self.cache.frame()
    }

    pub fn frame_replacements(&self) -> u64 {
        self.cache.replacements()
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderScheduler;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    fn pane(
        role: PaneRole,
        program: &str,
        args: &[&str],
    ) -> (ProcessPane, Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        let pane = ProcessPane::new(
            0,
            role,
            program.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
            80,
            24,
            1000,
            RenderScheduler::default(),
            tx,
        );
        (pane, rx)
    }

    /// Pump session events into the pane until the first exit, with a
    /// hard timeout so a hung child fails the test instead of the run.
    fn pump_until_exit(pane: &mut ProcessPane, rx: &Receiver<SessionEvent>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(SessionEvent::Output(_, bytes)) => {
                    pane.handle_output(&bytes, Instant::now());
                }
                Ok(SessionEvent::Exited(_, status)) => {
                    pane.handle_exit(status, Instant::now());
                    return;
                }
                Err(_) => panic!("session never exited"),
            }
        }
    }

    #[test]
    fn command_pane_runs_to_completion_and_stays_stopped() {
        let (mut pane, rx) = pane(PaneRole::Command, "/bin/sh", &["-c", "echo hi"]);
        pane.start(Instant::now());
        assert!(pane.is_running());
        pump_until_exit(&mut pane, &rx);

        assert!(!pane.is_running());
        assert!(pane.last_exit().is_some_and(|s| s.success()));
        assert_eq!(pane.exit_label().as_deref(), Some("exited (0)"));
        let text = pane.visible_text().join("\n");
        assert!(text.contains("hi"), "visible text: {text:?}");
    }

    #[test]
    fn shell_pane_restarts_after_exit() {
        let (mut pane, rx) = pane(PaneRole::Shell, "/bin/sh", &["-c", "exit 3"]);
        pane.start(Instant::now());
        pump_until_exit(&mut pane, &rx);

        // The exit handler relaunched the shell.
        assert!(pane.is_running());
        assert_eq!(pane.restart_count(), 1);
        pane.stop();
        pump_until_exit(&mut pane, &rx);
        assert_eq!(pane.restart_count(), 2);
        pane.stop();
    }

    #[test]
    fn spawn_failure_renders_inline_and_stays_stopped() {
        let (mut pane, _rx) = pane(PaneRole::Command, "/nonexistent/quarterdeck-test", &[]);
        pane.start(Instant::now());
        assert!(!pane.is_running());
        let text = pane.visible_text().join("\n");
        assert!(text.contains("failed to start"), "visible text: {text:?}");
    }

    #[test]
    fn command_role_reserves_a_status_row() {
        let (command, _rx1) = pane(PaneRole::Command, "/bin/sh", &[]);
        assert_eq!(command.size(), (80, 23));
        let (shell, _rx2) = pane(PaneRole::Shell, "/bin/sh", &[]);
        assert_eq!(shell.size(), (80, 24));
    }

    #[test]
    fn resize_resets_scroll_and_selection() {
        let (mut pane, rx) = pane(PaneRole::Command, "/bin/sh", &["-c", "seq 1 100"]);
        pane.start(Instant::now());
        pump_until_exit(&mut pane, &rx);
        assert!(pane.scrollback_len() > 0);

        pane.scroll_up(Instant::now());
        pane.selection_start(0, 0, Instant::now());
        pane.selection_update(1, 4, Instant::now());
        pane.selection_end();
        assert!(pane.scroll_offset() > 0);
        assert!(pane.has_selection());

        pane.resize(100, 30, Instant::now());
        assert_eq!(pane.scroll_offset(), 0);
        assert!(!pane.has_selection());
    }

    #[test]
    fn scrolled_output_lands_in_the_store() {
        let (mut pane, rx) = pane(PaneRole::Command, "/bin/sh", &["-c", "seq 1 100"]);
        pane.start(Instant::now());
        pump_until_exit(&mut pane, &rx);
        // 100 numbered lines through a 23-row grid: most scrolled off.
        assert!(pane.scrollback_len() >= 50, "len = {}", pane.scrollback_len());
        pane.scroll_up(Instant::now());
        let text = pane.visible_text().join("\n");
        assert!(text.contains('1'));
    }

    #[test]
    fn selection_extracts_from_visible_text() {
        let (mut pane, rx) = pane(PaneRole::Command, "/bin/sh", &["-c", "echo Hello, World!"]);
        pane.start(Instant::now());
        pump_until_exit(&mut pane, &rx);

        let lines = pane.visible_text();
        let row = lines
            .iter()
            .position(|l| l.contains("Hello, World!"))
            .expect("echoed line visible");
        let col = lines[row].find("World").unwrap();
        pane.selection_start(row, col, Instant::now());
        pane.selection_update(row, col + 5, Instant::now());
        pane.selection_end();
        assert_eq!(
            pane.take_selected_text(Instant::now()).as_deref(),
            Some("World")
        );
        assert!(!pane.has_selection());
    }

    #[test]
    fn tick_replaces_cache_only_on_change() {
        let (mut pane, _rx) = pane(PaneRole::Command, "/bin/sh", &[]);
        let now = Instant::now();
        pane.mark_dirty(now);
        assert!(pane.tick(now));
        assert_eq!(pane.frame_replacements(), 1);

        // Dirty again with identical content: recompute, no replacement.
        let later = now + Duration::from_millis(100);
        pane.mark_dirty(later);
        assert!(!pane.tick(later));
        assert_eq!(pane.frame_replacements(), 1);
    }

    #[test]
    fn keys_snap_back_to_live_before_forwarding() {
        let (mut pane, rx) = pane(PaneRole::Command, "/bin/sh", &["-c", "seq 1 100"]);
        pane.start(Instant::now());
        pump_until_exit(&mut pane, &rx);

        pane.scroll_up(Instant::now());
        assert!(pane.scroll_offset() > 0);
        let key = KeyEvent::new(KeyCode::Char('x'), crossterm::event::KeyModifiers::NONE);
        pane.handle_key(&key, Instant::now());
        assert_eq!(pane.scroll_offset(), 0);
    }

    #[test]
    fn home_and_end_navigate_history_while_scrolled() {
        let (mut pane, rx) = pane(PaneRole::Command, "/bin/sh", &["-c", "seq 1 100"]);
        pane.start(Instant::now());
        pump_until_exit(&mut pane, &rx);

        pane.scroll_up(Instant::now());
        let key = KeyEvent::new(KeyCode::Home, crossterm::event::KeyModifiers::NONE);
        pane.handle_key(&key, Instant::now());
        assert_eq!(pane.scroll_offset(), pane.scrollback_len());

        let key = KeyEvent::new(KeyCode::End, crossterm::event::KeyModifiers::NONE);
        pane.handle_key(&key, Instant::now());
        assert_eq!(pane.scroll_offset(), 0);
    }
}
