mod app;
mod config;
mod logging;
mod pane;
mod pty;
mod render;
mod scrollback;
mod selection;
mod ui;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{
    self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste,
    EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton,
    MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::Terminal;
use tracing::{info, warn};

use app::{App, Focus};
use config::Config;
use pty::SessionEvent;

const DOUBLE_ESC_WINDOW: Duration = Duration::from_millis(300);

#[derive(Parser)]
#[command(name = "quarterdeck", version, about = "Terminal commander with embedded process panes")]
struct Args {
    /// Path to an alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Shell for the mini-buffer (overrides config and $SHELL)
    #[arg(long)]
    shell: Option<String>,

    /// Assistant command line (overrides config)
    #[arg(long)]
    assistant: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.debug)?;
    logging::setup_panic_hook();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "config unreadable, using defaults");
            Config::default()
        }
    };

    let shell = config::resolve_shell(args.shell.as_deref(), &config);
    let assistant = args
        .assistant
        .as_deref()
        .or(config.assistant.as_deref())
        .and_then(config::split_command);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        %shell,
        assistant = assistant.as_ref().map(|(p, _)| p.as_str()),
        "starting"
    );

    let (tx, rx) = mpsc::channel();
    let mut app = App::new(&config, shell, assistant, tx);

    let mut stdout = io::stdout();
    enable_raw_mode().context("enabling raw mode")?;
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableBracketedPaste
    )
    .context("entering alternate screen")?;
    let mut terminal =
        Terminal::new(CrosstermBackend::new(stdout)).context("creating terminal")?;
    terminal.clear()?;

    let result = run(&mut terminal, &mut app, &rx);

    app.stop_all();
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableBracketedPaste,
        DisableMouseCapture,
        LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    info!("shut down");
    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    rx: &Receiver<SessionEvent>,
) -> Result<()> {
    let now = Instant::now();
    let size = terminal.size()?;
    resize_panes(app, size.width, size.height, now);
    app.start(now);

    let mut chrome_dirty = true;
    let mut force_blit = true;

    loop {
        let now = Instant::now();

        while let Ok(event) = rx.try_recv() {
            app.handle_session_event(event, now);
            chrome_dirty = true;
        }

        let (shell_changed, assistant_changed) = app.tick(now);

        if chrome_dirty || force_blit {
            terminal.draw(|f| ui::draw(f, app, now))?;
            chrome_dirty = false;
        }
        if shell_changed || assistant_changed || force_blit {
            blit_panes(terminal, app, force_blit, shell_changed, assistant_changed)?;
            force_blit = false;
        }

        let timeout = app
            .render_deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(100))
            .min(Duration::from_millis(100));

        if !event::poll(timeout)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                let now = Instant::now();
                if is_quit(&key) {
                    return Ok(());
                }
                handle_key(app, &key, now);
                chrome_dirty = true;
            }
            Event::Paste(text) => {
                let pane = app.focused_pane_mut();
                pane.paste(&text);
                pane.mark_dirty(Instant::now());
            }
            Event::Mouse(mouse) => {
                let now = Instant::now();
                let size = terminal.size()?;
                let areas = ui::layout(Rect::new(0, 0, size.width, size.height), app.minibuffer_rows);
                handle_mouse(app, &areas, mouse, now);
                chrome_dirty = true;
            }
            Event::Resize(cols, rows) => {
                let now = Instant::now();
                resize_panes(app, cols, rows, now);
                terminal.clear()?;
                chrome_dirty = true;
                force_blit = true;
            }
            _ => {}
        }
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('q')
}

fn handle_key(app: &mut App, key: &KeyEvent, now: Instant) {
    let ctrl_shift = KeyModifiers::CONTROL | KeyModifiers::SHIFT;

    // Copy/paste carry several bindings since terminals intercept some.
    let is_copy = (key.modifiers.contains(ctrl_shift)
        && matches!(key.code, KeyCode::Char('c' | 'C')))
        || (key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Insert);
    let is_paste = (key.modifiers.contains(ctrl_shift)
        && matches!(key.code, KeyCode::Char('v' | 'V')))
        || (key.modifiers.contains(KeyModifiers::SHIFT) && key.code == KeyCode::Insert);

    if is_copy {
        app.copy_selection(now);
        return;
    }
    if is_paste {
        app.paste_clipboard(now);
        return;
    }

    match key.code {
        KeyCode::F(2) => {
            app.set_focus(Focus::Shell, now);
            return;
        }
        KeyCode::F(3) => {
            app.set_focus(Focus::Assistant, now);
            return;
        }
        KeyCode::F(4) => {
            app.toggle_assistant(now);
            return;
        }
        _ => {}
    }

    // Esc cancels a pending selection before anything else sees it.
    if key.code == KeyCode::Esc && app.focused_pane_mut().has_selection() {
        app.focused_pane_mut().clear_selection(now);
        return;
    }

    // Double-Esc in the assistant pane returns focus to the shell; a
    // single Esc still reaches the process.
    if key.code == KeyCode::Esc && app.focus == Focus::Assistant {
        if app
            .last_esc
            .is_some_and(|t| now.duration_since(t) < DOUBLE_ESC_WINDOW)
        {
            app.last_esc = None;
            app.set_focus(Focus::Shell, now);
            return;
        }
        app.last_esc = Some(now);
    } else {
        app.last_esc = None;
    }

    app.focused_pane_mut().handle_key(key, now);
}

fn handle_mouse(
    app: &mut App,
    areas: &ui::PaneAreas,
    mouse: crossterm::event::MouseEvent,
    now: Instant,
) {
    let hit = ui::hit_test(areas, mouse.column, mouse.row);
    match mouse.kind {
        MouseEventKind::ScrollUp => {
            if let Some((focus, _, _)) = hit {
                if let Some(pane) = pane_for(app, focus) {
                    pane.scroll_up(now);
                }
            }
        }
        MouseEventKind::ScrollDown => {
            if let Some((focus, _, _)) = hit {
                if let Some(pane) = pane_for(app, focus) {
                    pane.scroll_down(now);
                }
            }
        }
        MouseEventKind::Down(MouseButton::Left) => {
            if let Some((focus, line, col)) = hit {
                app.set_focus(focus, now);
                app.focused_pane_mut().selection_start(line, col, now);
            }
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            if let Some((focus, line, col)) = hit {
                if let Some(pane) = pane_for(app, focus) {
                    pane.selection_update(line, col, now);
                }
            }
        }
        MouseEventKind::Up(MouseButton::Left) => {
            app.shell.selection_end();
            if let Some(assistant) = &mut app.assistant {
                assistant.selection_end();
            }
        }
        _ => {}
    }
}

fn pane_for(app: &mut App, focus: Focus) -> Option<&mut pane::ProcessPane> {
    match focus {
        Focus::Shell => Some(&mut app.shell),
        Focus::Assistant => app.assistant.as_mut(),
    }
}

fn resize_panes(app: &mut App, cols: u16, rows: u16, now: Instant) {
    let areas = ui::layout(Rect::new(0, 0, cols, rows), app.minibuffer_rows);
    // Panes get their box interior; the command role subtracts its own
    // reserved row from that.
    let assistant_rows = areas.assistant_grid.height + areas.assistant_status.height;
    app.resize(
        (areas.shell_grid.width, areas.shell_grid.height),
        (areas.assistant_grid.width, assistant_rows),
        now,
    );
}

/// Write the changed pane frames straight to stdout, then place the
/// terminal cursor for the focused pane.
fn blit_panes(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &App,
    force: bool,
    shell_changed: bool,
    assistant_changed: bool,
) -> Result<()> {
    let size = terminal.size()?;
    let areas = ui::layout(Rect::new(0, 0, size.width, size.height), app.minibuffer_rows);
    let mut out = io::stdout().lock();
    out.write_all(b"\x1b[?25l")?;

    if force || shell_changed {
        ui::blit_frame(&mut out, app.shell.frame(), areas.shell_grid)?;
        if app.shell.scroll_offset() > 0 {
            ui::render_scrollbar(
                &mut out,
                app.shell.scroll_offset(),
                app.shell.scrollback_len(),
                areas.shell_grid,
            )?;
        }
    }
    if let Some(assistant) = &app.assistant {
        if force || assistant_changed {
            ui::blit_frame(&mut out, assistant.frame(), areas.assistant_grid)?;
            if assistant.scroll_offset() > 0 {
                ui::render_scrollbar(
                    &mut out,
                    assistant.scroll_offset(),
                    assistant.scrollback_len(),
                    areas.assistant_grid,
                )?;
            }
        }
    }

    let (pane, grid) = match app.focus {
        Focus::Shell => (Some(&app.shell), areas.shell_grid),
        Focus::Assistant => (app.assistant.as_ref(), areas.assistant_grid),
    };
    if let Some(pane) = pane {
        if pane.is_running() && pane.scroll_offset() == 0 {
            ui::write_pty_cursor(&mut out, pane.screen(), grid)?;
        }
    }
    out.flush()?;
    Ok(())
}
