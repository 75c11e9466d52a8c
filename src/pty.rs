use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

pub type PaneId = usize;

/// Messages from a session's reader worker to the event loop.
pub enum SessionEvent {
    Output(PaneId, Vec<u8>),
    /// Always the last message a session sends. `None` when the exit
    /// status could not be collected.
    Exited(PaneId, Option<ExitStatus>),
}

/// A child process attached to a pty, with a dedicated worker thread
/// streaming its output to the event loop as [`SessionEvent`]s.
///
/// The worker blocks in `poll`/`read` and never touches UI state; the
/// child handle sits behind a mutex because `stop()` on the event loop
/// and the final `wait()` on the worker both need it.
pub struct ProcessSession {
    master: Arc<OwnedFd>,
    child: Arc<Mutex<Child>>,
    pid: i32,
}

impl ProcessSession {
    pub fn spawn(
        program: &str,
        args: &[String],
        cols: u16,
        rows: u16,
        events: Sender<SessionEvent>,
        id: PaneId,
    ) -> io::Result<Self> {
        let (cols, rows) = if cols == 0 || rows == 0 {
            (80, 24)
        } else {
            (cols, rows)
        };

        let (master, slave) = open_pty()?;
        set_pty_size(master.as_raw_fd(), rows, cols);
        set_nonblocking(master.as_raw_fd())?;

        let slave_raw = slave.into_raw_fd();
        let dup1 = dup_fd(slave_raw)?;
        let dup2 = dup_fd(slave_raw)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("TERM", "xterm-256color")
            .env("COLORTERM", "truecolor");
        let child = unsafe {
            cmd.stdin(Stdio::from_raw_fd(slave_raw))
                .stdout(Stdio::from_raw_fd(dup1))
                .stderr(Stdio::from_raw_fd(dup2))
                .pre_exec(|| {
                    libc::setsid();
                    Ok(())
                })
                .spawn()?
        };
        let pid = child.id() as i32;
        debug!(pid, program, cols, rows, "session spawned");

        let master = Arc::new(master);
        let child = Arc::new(Mutex::new(child));
        {
            let master = Arc::clone(&master);
            let child = Arc::clone(&child);
            thread::spawn(move || read_worker(master, child, events, id));
        }

        Ok(Self { master, child, pid })
    }

    /// Send input bytes to the pty, handling partial writes and back-pressure.
    pub fn write_all(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let fd = self.master.as_raw_fd();
        let mut offset = 0;
        while offset < data.len() {
            let n = unsafe {
                libc::write(fd, data[offset..].as_ptr().cast(), data[offset..].len())
            };
            if n > 0 {
                offset += n as usize;
            } else {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    // PTY buffer full — wait for it to drain
                    let mut pfd = libc::pollfd {
                        fd,
                        events: libc::POLLOUT,
                        revents: 0,
                    };
                    unsafe {
                        libc::poll(&mut pfd, 1, 100);
                    }
                } else if err.kind() != io::ErrorKind::Interrupted {
                    break;
                }
            }
        }
    }

    /// Resize the pty and signal the child.
    pub fn resize(&self, cols: u16, rows: u16) {
        set_pty_size(self.master.as_raw_fd(), rows, cols);
        // Explicitly signal the child in case TIOCSWINSZ didn't deliver SIGWINCH
        unsafe {
            libc::kill(self.pid, libc::SIGWINCH);
        }
    }

    /// Terminate the child: SIGTERM, a short grace period, then a hard
    /// kill. The blocked read observes EOF once the process dies, so the
    /// worker always emits the final exit event.
    pub fn stop(&self) {
        let Ok(mut child) = self.child.lock() else {
            return;
        };
        if !matches!(child.try_wait(), Ok(None)) {
            return;
        }
        debug!(pid = self.pid, "stopping session");
        unsafe {
            libc::kill(self.pid, libc::SIGTERM);
        }
        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline {
            if !matches!(child.try_wait(), Ok(None)) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let _ = child.kill();
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Blocking read loop on the master fd. Each chunk is forwarded as an
/// output event; EOF or a read error means the child is gone, so the
/// worker collects the exit status and sends the terminal event.
fn read_worker(
    master: Arc<OwnedFd>,
    child: Arc<Mutex<Child>>,
    events: Sender<SessionEvent>,
    id: PaneId,
) {
    let fd = master.as_raw_fd();
    let mut buf = [0u8; 65536];
    'outer: loop {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let pr = unsafe { libc::poll(&mut pfd, 1, -1) };
        if pr < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n > 0 {
                if events
                    .send(SessionEvent::Output(id, buf[..n as usize].to_vec()))
                    .is_err()
                {
                    break 'outer;
                }
            } else if n == 0 {
                break 'outer;
            } else {
                match io::Error::last_os_error().kind() {
                    io::ErrorKind::WouldBlock => continue 'outer,
                    io::ErrorKind::Interrupted => continue,
                    _ => break 'outer,
                }
            }
        }
    }
    // `wait` returns the cached status even if `stop()` reaped first.
    let status = child.lock().ok().and_then(|mut c| c.wait().ok());
    debug!(pane = id, ?status, "session exited");
    let _ = events.send(SessionEvent::Exited(id, status));
}

/// Convert a crossterm KeyEvent to raw bytes for the pty.
/// When `app_cursor` is true the terminal is in application cursor mode
/// (DECCKM), so arrow keys use `\x1bO` prefix instead of `\x1b[`.
pub fn key_to_bytes(key: &KeyEvent, app_cursor: bool) -> Vec<u8> {
    // Ctrl+key
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = key.code {
            let byte = (c.to_ascii_lowercase() as u8) & 0x1f;
            return vec![byte];
        }
    }

    // Alt+key (ESC prefix)
    if key.modifiers.contains(KeyModifiers::ALT) {
        if key.code == KeyCode::Backspace {
            return vec![0x1b, 0x7f];
        }
        if let KeyCode::Char(c) = key.code {
            let mut bytes = vec![0x1b];
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf);
            bytes.extend_from_slice(&buf[..c.len_utf8()]);
            return bytes;
        }
    }

    // Arrow keys: application mode uses \x1bO prefix, normal uses \x1b[
    let arrow_prefix: &[u8] = if app_cursor { b"\x1bO" } else { b"\x1b[" };

    match key.code {
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf);
            buf[..c.len_utf8()].to_vec()
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => [arrow_prefix, b"A"].concat(),
        KeyCode::Down => [arrow_prefix, b"B"].concat(),
        KeyCode::Right => [arrow_prefix, b"C"].concat(),
        KeyCode::Left => [arrow_prefix, b"D"].concat(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::F(n) => f_key_bytes(n),
        _ => vec![],
    }
}

fn f_key_bytes(n: u8) -> Vec<u8> {
    match n {
        1 => b"\x1bOP".to_vec(),
        2 => b"\x1bOQ".to_vec(),
        3 => b"\x1bOR".to_vec(),
        4 => b"\x1bOS".to_vec(),
        5 => b"\x1b[15~".to_vec(),
        6 => b"\x1b[17~".to_vec(),
        7 => b"\x1b[18~".to_vec(),
        8 => b"\x1b[19~".to_vec(),
        9 => b"\x1b[20~".to_vec(),
        10 => b"\x1b[21~".to_vec(),
        11 => b"\x1b[23~".to_vec(),
        12 => b"\x1b[24~".to_vec(),
        _ => vec![],
    }
}

/// Whether pasted text looks like a stray SGR mouse report (`[<35;10;5M`,
/// with or without its leading ESC) rather than something the user typed.
/// Terminals occasionally deliver these as text when the escape byte gets
/// split off at a read boundary.
pub fn looks_like_mouse_report(text: &str) -> bool {
    let t = text.strip_prefix('\x1b').unwrap_or(text);
    let Some(body) = t.strip_prefix("[<") else {
        return false;
    };
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || c == ';' || c == 'm' || c == 'M')
}

/// Whether the text is a bare CSI fragment: `[` + parameter bytes + at
/// most one final byte, e.g. `[5~` or `[1;2A`.
pub fn looks_like_csi_fragment(text: &str) -> bool {
    let t = text.strip_prefix('\x1b').unwrap_or(text);
    let Some(body) = t.strip_prefix('[') else {
        return false;
    };
    let mut chars = body.chars().peekable();
    let mut saw_param = false;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == ';' {
            saw_param = true;
            chars.next();
        } else {
            break;
        }
    }
    match chars.next() {
        Some(fin) => saw_param && matches!(fin, 'A'..='Z' | '~') && chars.next().is_none(),
        None => saw_param,
    }
}

fn open_pty() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut master: libc::c_int = 0;
    let mut slave: libc::c_int = 0;
    let ret = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    unsafe { Ok((OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave))) }
}

fn set_pty_size(fd: i32, rows: u16, cols: u16) {
    let ws = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe {
        libc::ioctl(fd, libc::TIOCSWINSZ, &ws);
    }
}

fn set_nonblocking(fd: i32) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn dup_fd(fd: i32) -> io::Result<i32> {
    let new_fd = unsafe { libc::dup(fd) };
    if new_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(new_fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn key_mod(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn basic_keys_encode_to_control_bytes() {
        assert_eq!(key_to_bytes(&key(KeyCode::Enter), false), b"\r");
        assert_eq!(key_to_bytes(&key(KeyCode::Tab), false), b"\t");
        assert_eq!(key_to_bytes(&key(KeyCode::Backspace), false), [0x7f]);
        assert_eq!(key_to_bytes(&key(KeyCode::Esc), false), [0x1b]);
        assert_eq!(key_to_bytes(&key(KeyCode::Char('x')), false), b"x");
    }

    #[test]
    fn arrows_respect_application_cursor_mode() {
        assert_eq!(key_to_bytes(&key(KeyCode::Up), false), b"\x1b[A");
        assert_eq!(key_to_bytes(&key(KeyCode::Down), false), b"\x1b[B");
        assert_eq!(key_to_bytes(&key(KeyCode::Right), false), b"\x1b[C");
        assert_eq!(key_to_bytes(&key(KeyCode::Left), false), b"\x1b[D");
        assert_eq!(key_to_bytes(&key(KeyCode::Up), true), b"\x1bOA");
        assert_eq!(key_to_bytes(&key(KeyCode::Left), true), b"\x1bOD");
    }

    #[test]
    fn navigation_keys_use_xterm_sequences() {
        assert_eq!(key_to_bytes(&key(KeyCode::Home), false), b"\x1b[H");
        assert_eq!(key_to_bytes(&key(KeyCode::End), false), b"\x1b[F");
        assert_eq!(key_to_bytes(&key(KeyCode::PageUp), false), b"\x1b[5~");
        assert_eq!(key_to_bytes(&key(KeyCode::PageDown), false), b"\x1b[6~");
        assert_eq!(key_to_bytes(&key(KeyCode::Delete), false), b"\x1b[3~");
        assert_eq!(key_to_bytes(&key(KeyCode::F(1)), false), b"\x1bOP");
        assert_eq!(key_to_bytes(&key(KeyCode::F(5)), false), b"\x1b[15~");
    }

    #[test]
    fn ctrl_letters_map_to_low_bytes() {
        let bytes = key_to_bytes(
            &key_mod(KeyCode::Char('c'), KeyModifiers::CONTROL),
            false,
        );
        assert_eq!(bytes, [3]);
        let bytes = key_to_bytes(
            &key_mod(KeyCode::Char('Z'), KeyModifiers::CONTROL),
            false,
        );
        assert_eq!(bytes, [26]);
    }

    #[test]
    fn alt_prefixes_escape() {
        let bytes = key_to_bytes(&key_mod(KeyCode::Char('f'), KeyModifiers::ALT), false);
        assert_eq!(bytes, [0x1b, b'f']);
        let bytes = key_to_bytes(&key_mod(KeyCode::Backspace, KeyModifiers::ALT), false);
        assert_eq!(bytes, [0x1b, 0x7f]);
    }

    #[test]
    fn mouse_report_fragments_are_recognized() {
        assert!(looks_like_mouse_report("[<35;10;5M"));
        assert!(looks_like_mouse_report("[<0;1;1m"));
        assert!(looks_like_mouse_report("\x1b[<64;12;3M"));
        assert!(!looks_like_mouse_report("[hello]"));
        assert!(!looks_like_mouse_report("ls -la"));
    }

    #[test]
    fn csi_fragments_are_recognized() {
        assert!(looks_like_csi_fragment("[5~"));
        assert!(looks_like_csi_fragment("[1;2A"));
        assert!(looks_like_csi_fragment("[200"));
        assert!(!looks_like_csi_fragment("[ok]"));
        assert!(!looks_like_csi_fragment("plain text"));
        assert!(!looks_like_csi_fragment("[2026]"));
    }

    #[test]
    fn session_streams_output_and_exit() {
        let (tx, rx) = mpsc::channel();
        let session =
            ProcessSession::spawn("/bin/echo", &["hello".to_string()], 80, 24, tx, 7)
                .unwrap();

        let mut output = Vec::new();
        let mut status = None;
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(SessionEvent::Output(id, bytes)) => {
                    assert_eq!(id, 7);
                    output.extend_from_slice(&bytes);
                }
                Ok(SessionEvent::Exited(id, st)) => {
                    assert_eq!(id, 7);
                    status = st;
                    break;
                }
                Err(_) => panic!("no exit event within timeout"),
            }
        }
        assert!(String::from_utf8_lossy(&output).contains("hello"));
        assert!(status.is_some_and(|s| s.success()));
        drop(session);
    }

    #[test]
    fn stop_terminates_a_long_running_child() {
        let (tx, rx) = mpsc::channel();
        let session =
            ProcessSession::spawn("/bin/sleep", &["100".to_string()], 80, 24, tx, 1)
                .unwrap();
        session.stop();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(SessionEvent::Exited(_, status)) => {
                    assert!(!status.is_some_and(|s| s.success()));
                    break;
                }
                Ok(_) => {}
                Err(_) => panic!("no exit event after stop"),
            }
        }
    }
}
