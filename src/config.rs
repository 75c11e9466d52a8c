use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Settings from `~/.config/quarterdeck/config.toml`. Every field is
/// optional in the file; CLI flags take precedence where both exist.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell for the mini-buffer pane. Falls back to `$SHELL`.
    pub shell: Option<String>,
    /// Command line for the assistant pane.
    pub assistant: Option<String>,
    pub scrollback_lines: usize,
    pub render_interval_ms: u64,
    /// Height of the shell mini-buffer at the bottom of the layout.
    pub minibuffer_rows: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            assistant: None,
            scrollback_lines: 10_000,
            render_interval_ms: 50,
            minibuffer_rows: 10,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }
}

/// CLI flag > config file > `$SHELL` > `/bin/sh`.
pub fn resolve_shell(cli: Option<&str>, config: &Config) -> String {
    cli.map(str::to_string)
        .or_else(|| config.shell.clone())
        .or_else(|| std::env::var("SHELL").ok())
        .map(|s| expand_tilde(&s).to_string_lossy().into_owned())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Split a configured command line into program and arguments.
pub fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((
        expand_tilde(&program).to_string_lossy().into_owned(),
        parts.collect(),
    ))
}

fn default_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("quarterdeck")
            .join("config.toml"),
    )
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.scrollback_lines, 10_000);
        assert_eq!(config.render_interval_ms, 50);
        assert_eq!(config.minibuffer_rows, 10);
        assert!(config.shell.is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shell = \"/usr/bin/fish\"").unwrap();
        writeln!(file, "scrollback_lines = 500").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.shell.as_deref(), Some("/usr/bin/fish"));
        assert_eq!(config.scrollback_lines, 500);
        assert_eq!(config.render_interval_ms, 50);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scrollback_lines = \"many\"").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn shell_resolution_order() {
        let config = Config {
            shell: Some("/from/config".to_string()),
            ..Config::default()
        };
        assert_eq!(resolve_shell(Some("/from/cli"), &config), "/from/cli");
        assert_eq!(resolve_shell(None, &config), "/from/config");
    }

    #[test]
    fn command_splitting() {
        assert_eq!(
            split_command("assistant --verbose run"),
            Some((
                "assistant".to_string(),
                vec!["--verbose".to_string(), "run".to_string()]
            ))
        );
        assert_eq!(split_command("   "), None);
    }
}
