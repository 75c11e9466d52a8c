use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use arboard::Clipboard;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::pane::{PaneRole, ProcessPane};
use crate::pty::{PaneId, SessionEvent};
use crate::render::RenderScheduler;

pub const SHELL_PANE: PaneId = 0;
pub const ASSISTANT_PANE: PaneId = 1;

const STATUS_TTL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Shell,
    Assistant,
}

/// Notifications from collaborators outside this crate's scope. They
/// only surface as status-bar text.
pub enum CollaboratorEvent {
    DirectoryChanged(PathBuf),
    GitStatusChanged(String),
}

pub struct App {
    pub shell: ProcessPane,
    pub assistant: Option<ProcessPane>,
    pub focus: Focus,
    pub minibuffer_rows: u16,
    status_msg: String,
    status_at: Option<Instant>,
    clipboard: Option<Clipboard>,
    /// Timestamp of the last Esc forwarded to the assistant pane, for
    /// the double-Esc back-to-shell gesture.
    pub last_esc: Option<Instant>,
}

impl App {
    pub fn new(
        config: &Config,
        shell_command: String,
        assistant_command: Option<(String, Vec<String>)>,
        events: Sender<SessionEvent>,
    ) -> Self {
        let scheduler = || {
            RenderScheduler::new(Duration::from_millis(config.render_interval_ms.max(1)))
        };
        let shell = ProcessPane::new(
            SHELL_PANE,
            PaneRole::Shell,
            shell_command,
            Vec::new(),
            80,
            config.minibuffer_rows,
            config.scrollback_lines,
            scheduler(),
            events.clone(),
        );
        let assistant = assistant_command.map(|(program, args)| {
            ProcessPane::new(
                ASSISTANT_PANE,
                PaneRole::Command,
                program,
                args,
                80,
                24,
                config.scrollback_lines,
                scheduler(),
                events,
            )
        });
        let clipboard = match Clipboard::new() {
            Ok(c) => Some(c),
            Err(err) => {
                warn!(%err, "clipboard unavailable");
                None
            }
        };
        Self {
            shell,
            assistant,
            focus: Focus::Shell,
            minibuffer_rows: config.minibuffer_rows,
            status_msg: String::new(),
            status_at: None,
            clipboard,
            last_esc: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.shell.start(now);
        self.shell.set_focused(true, now);
        if let Some(assistant) = &mut self.assistant {
            assistant.start(now);
        }
    }

    pub fn pane_mut(&mut self, id: PaneId) -> Option<&mut ProcessPane> {
        if id == SHELL_PANE {
            Some(&mut self.shell)
        } else {
            self.assistant.as_mut().filter(|p| p.id() == id)
        }
    }

    pub fn focused_pane_mut(&mut self) -> &mut ProcessPane {
        match self.focus {
            Focus::Assistant => match self.assistant.as_mut() {
                Some(assistant) => assistant,
                None => &mut self.shell,
            },
            Focus::Shell => &mut self.shell,
        }
    }

    pub fn set_focus(&mut self, focus: Focus, now: Instant) {
        let focus = match focus {
            Focus::Assistant if self.assistant.is_none() => Focus::Shell,
            other => other,
        };
        self.focus = focus;
        self.shell.set_focused(focus == Focus::Shell, now);
        if let Some(assistant) = &mut self.assistant {
            assistant.set_focused(focus == Focus::Assistant, now);
        }
    }

    pub fn handle_session_event(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Output(id, bytes) => {
                if let Some(pane) = self.pane_mut(id) {
                    pane.handle_output(&bytes, now);
                }
            }
            SessionEvent::Exited(id, status) => {
                if let Some(pane) = self.pane_mut(id) {
                    pane.handle_exit(status, now);
                }
                if id == ASSISTANT_PANE {
                    let label = self
                        .assistant
                        .as_ref()
                        .and_then(|p| p.exit_label())
                        .unwrap_or_else(|| "exited".to_string());
                    self.set_status(format!("assistant {label}"), now);
                }
            }
        }
    }

    pub fn set_status(&mut self, msg: impl Into<String>, now: Instant) {
        self.status_msg = msg.into();
        self.status_at = Some(now);
    }

    /// Transient status message, if it hasn't expired.
    pub fn status_line(&self, now: Instant) -> Option<&str> {
        let at = self.status_at?;
        if now.duration_since(at) > STATUS_TTL || self.status_msg.is_empty() {
            return None;
        }
        Some(&self.status_msg)
    }

    pub fn notify(&mut self, event: CollaboratorEvent, now: Instant) {
        let msg = match event {
            CollaboratorEvent::DirectoryChanged(path) => {
                format!("dir: {}", path.display())
            }
            CollaboratorEvent::GitStatusChanged(summary) => format!("git: {summary}"),
        };
        debug!(%msg, "collaborator notification");
        self.set_status(msg, now);
    }

    /// Copy the focused pane's selection to the system clipboard.
    /// Clipboard trouble is never fatal.
    pub fn copy_selection(&mut self, now: Instant) {
        let Some(text) = self.focused_pane_mut().take_selected_text(now) else {
            return;
        };
        let chars = text.chars().count();
        match self.clipboard.as_mut().map(|c| c.set_text(text)) {
            Some(Ok(())) => {
                info!(chars, "copied selection");
                self.set_status(format!("copied {chars} chars"), now);
            }
            Some(Err(err)) => debug!(%err, "clipboard write failed"),
            None => {}
        }
    }

    pub fn paste_clipboard(&mut self, now: Instant) {
        let text = match self.clipboard.as_mut().map(|c| c.get_text()) {
            Some(Ok(text)) => text,
            Some(Err(err)) => {
                debug!(%err, "clipboard read failed");
                return;
            }
            None => return,
        };
        if !text.is_empty() {
            let pane = self.focused_pane_mut();
            pane.paste(&text);
            pane.mark_dirty(now);
        }
    }

    /// Start the assistant if stopped, stop it if running.
    pub fn toggle_assistant(&mut self, now: Instant) {
        let Some(assistant) = &mut self.assistant else {
            self.set_status("no assistant configured", now);
            return;
        };
        if assistant.is_running() {
            assistant.stop();
            self.set_status("stopping assistant", now);
        } else {
            assistant.start(now);
            self.set_status("assistant started", now);
        }
    }

    pub fn resize(&mut self, shell_size: (u16, u16), assistant_size: (u16, u16), now: Instant) {
        self.shell.resize(shell_size.0, shell_size.1, now);
        if let Some(assistant) = &mut self.assistant {
            assistant.resize(assistant_size.0, assistant_size.1, now);
        }
    }

    pub fn render_deadline(&self) -> Option<Instant> {
        match (
            self.shell.render_deadline(),
            self.assistant.as_ref().and_then(|p| p.render_deadline()),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run due render ticks; returns which panes' frames changed.
    pub fn tick(&mut self, now: Instant) -> (bool, bool) {
        let shell = self.shell.tick(now);
        let assistant = self
            .assistant
            .as_mut()
            .map(|p| p.tick(now))
            .unwrap_or(false);
        (shell, assistant)
    }

    pub fn stop_all(&mut self) {
        self.shell.stop();
        if let Some(assistant) = &mut self.assistant {
            assistant.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn app() -> App {
        let (tx, _rx) = mpsc::channel();
        let config = Config::default();
        App::new(
            &config,
            "/bin/sh".to_string(),
            Some(("/bin/cat".to_string(), Vec::new())),
            tx,
        )
    }

    #[test]
    fn focus_falls_back_to_shell_without_assistant() {
        let (tx, _rx) = mpsc::channel();
        let mut app = App::new(&Config::default(), "/bin/sh".to_string(), None, tx);
        app.set_focus(Focus::Assistant, Instant::now());
        assert_eq!(app.focus, Focus::Shell);
    }

    #[test]
    fn status_messages_expire() {
        let mut app = app();
        let now = Instant::now();
        app.set_status("hello", now);
        assert_eq!(app.status_line(now), Some("hello"));
        assert_eq!(app.status_line(now + Duration::from_secs(6)), None);
    }

    #[test]
    fn collaborator_events_surface_as_status() {
        let mut app = app();
        let now = Instant::now();
        app.notify(
            CollaboratorEvent::GitStatusChanged("2 modified".to_string()),
            now,
        );
        assert_eq!(app.status_line(now), Some("git: 2 modified"));
        app.notify(
            CollaboratorEvent::DirectoryChanged(PathBuf::from("/tmp")),
            now,
        );
        assert_eq!(app.status_line(now), Some("dir: /tmp"));
    }

    #[test]
    fn focus_switch_updates_both_panes() {
        let mut app = app();
        let now = Instant::now();
        app.set_focus(Focus::Assistant, now);
        assert!(!app.shell.is_focused());
        assert!(app.assistant.as_ref().unwrap().is_focused());
        app.set_focus(Focus::Shell, now);
        assert!(app.shell.is_focused());
        assert!(!app.assistant.as_ref().unwrap().is_focused());
    }
}
