//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `SSHPOKE_SHELL`, `SSHPOKE_MAX_DEPTH`
//! 2. **Config file** — path via `--config <path>`, or `sshpoke.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [probe]
//! max_depth = 6
//! echo_timeout_ms = 1000
//!
//! [inject]
//! prompt_timeout_ms = 1000
//!
//! [escape]
//! escape_char = "~"
//! command_char = "C"
//!
//! [shell]
//! shell = ""   # empty = $SHELL, falling back to /bin/sh
//!
//! [logging]
//! level = "warn"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub inject: InjectConfig,
    #[serde(default)]
    pub escape: EscapeConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Depth-probe settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Maximum nesting depth probed for (default 6). Depths beyond this are
    /// under-reported, so it must exceed any realistic stack of sessions.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// How long to wait for probe bytes to echo back, in milliseconds
    /// (default 1000).
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
}

/// Cascade-injection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InjectConfig {
    /// Per-hop timeout waiting for the `ssh>` banner, in milliseconds
    /// (default 1000). Also bounds the best-effort reply drain.
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,
}

/// Escape-protocol bytes. These must match what the nested ssh sessions
/// themselves are configured with (`~` and `C` by default).
#[derive(Debug, Clone, Deserialize)]
pub struct EscapeConfig {
    /// Escape trigger character (default `~`). Must be a single byte.
    #[serde(default = "default_escape_char")]
    pub escape_char: String,
    /// Command letter that opens a session's command line (default `C`).
    #[serde(default = "default_command_char")]
    pub command_char: String,
}

/// Shell selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary to wrap. Empty means `$SHELL`, falling back to `/bin/sh`.
    #[serde(default)]
    pub shell: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `warn`; the terminal is in raw mode
    /// most of the time, so verbose logging garbles the display).
    /// Overridden by the `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_depth() -> usize {
    6
}
fn default_echo_timeout_ms() -> u64 {
    1000
}
fn default_prompt_timeout_ms() -> u64 {
    1000
}
fn default_escape_char() -> String {
    "~".to_string()
}
fn default_command_char() -> String {
    "C".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            echo_timeout_ms: default_echo_timeout_ms(),
        }
    }
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            prompt_timeout_ms: default_prompt_timeout_ms(),
        }
    }
}

impl Default for EscapeConfig {
    fn default() -> Self {
        Self {
            escape_char: default_escape_char(),
            command_char: default_command_char(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            inject: InjectConfig::default(),
            escape: EscapeConfig::default(),
            shell: ShellConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `sshpoke.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("sshpoke.toml").exists() {
            let content =
                std::fs::read_to_string("sshpoke.toml").expect("Failed to read sshpoke.toml");
            toml::from_str(&content).expect("Failed to parse sshpoke.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(shell) = std::env::var("SSHPOKE_SHELL") {
            config.shell.shell = shell;
        }
        if let Ok(depth) = std::env::var("SSHPOKE_MAX_DEPTH") {
            match depth.parse() {
                Ok(d) => config.probe.max_depth = d,
                Err(_) => tracing::warn!("Ignoring unparseable SSHPOKE_MAX_DEPTH={depth}"),
            }
        }

        config
    }

    /// The escape trigger byte. Falls back to `~` if the configured string
    /// is not exactly one byte.
    pub fn escape_byte(&self) -> u8 {
        single_byte(&self.escape.escape_char, b'~')
    }

    /// The command-letter byte. Falls back to `C` if the configured string
    /// is not exactly one byte.
    pub fn command_byte(&self) -> u8 {
        single_byte(&self.escape.command_char, b'C')
    }

    /// Resolve the shell to wrap: config/env value, then `$SHELL`, then
    /// `/bin/sh`.
    pub fn resolve_shell(&self) -> String {
        if !self.shell.shell.is_empty() {
            return self.shell.shell.clone();
        }
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

fn single_byte(s: &str, fallback: u8) -> u8 {
    if s.len() == 1 {
        s.as_bytes()[0]
    } else {
        tracing::warn!("Configured character {s:?} is not a single byte, using default");
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let config = Config::default();
        assert_eq!(config.probe.max_depth, 6);
        assert_eq!(config.probe.echo_timeout_ms, 1000);
        assert_eq!(config.inject.prompt_timeout_ms, 1000);
        assert_eq!(config.escape_byte(), b'~');
        assert_eq!(config.command_byte(), b'C');
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[probe]\nmax_depth = 3\n").unwrap();
        assert_eq!(config.probe.max_depth, 3);
        assert_eq!(config.probe.echo_timeout_ms, 1000);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn bad_escape_char_falls_back() {
        let config: Config = toml::from_str("[escape]\nescape_char = \"~~\"\n").unwrap();
        assert_eq!(config.escape_byte(), b'~');
    }
}
