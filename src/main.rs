#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # sshpoke
//!
//! Transparently add SSH port forwards to an already-open chain of nested
//! interactive ssh sessions, without restarting any of them.
//!
//! sshpoke wraps the operator's shell in a pseudo-terminal and relays
//! bytes both ways. Typing `~C` at the start of a line opens a one-line
//! command prompt; the entered forward specification (`L`, `R`, or `D`
//! form, same shapes ssh itself accepts) is compiled into per-hop
//! directives, the number of nested ssh sessions inside the shell is
//! measured by probing their escape handling, and the matching directive
//! is injected into each session through its own `~C` command line.
//!
//! ## Architecture
//!
//! ```text
//! main.rs     — entry point, clap options, PTY + shell startup, exit status
//! config.rs   — TOML + env-var configuration
//! error.rs    — error taxonomy (parse, probe, prompt-timeout, channel)
//! term.rs     — cooked/raw termios management for the controlling terminal
//! pty.rs      — PTY allocation, shell spawn, resize
//! channel.rs  — Channel trait + PtyChannel over the master fd
//! escape.rs   — trigger-sequence detection in operator keystrokes
//! forward.rs  — forward-spec parsing, per-hop directive compilation
//! probe.rs    — nested-session depth measurement
//! inject.rs   — cascaded directive injection, hop by hop
//! relay.rs    — select! relay loop and the command-prompt boundary
//! ```

mod channel;
mod config;
mod error;
mod escape;
mod forward;
mod inject;
mod probe;
mod pty;
mod relay;
mod term;

use std::io;

use clap::Parser;
use tracing::info;

use channel::PtyChannel;
use config::Config;
use pty::PtyPair;
use relay::Relay;
use term::TerminalModes;

/// Add SSH port forwards through an already-running chain of nested ssh
/// sessions.
#[derive(Parser)]
#[command(name = "sshpoke", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Shell to wrap (default: $SHELL, falling back to /bin/sh).
    #[arg(long)]
    shell: Option<String>,
    /// Maximum nesting depth probed for.
    #[arg(long)]
    max_depth: Option<usize>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref());
    if let Some(shell) = cli.shell {
        config.shell.shell = shell;
    }
    if let Some(depth) = cli.max_depth {
        config.probe.max_depth = depth;
    }

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(io::stderr)
        .init();

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("sshpoke: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> io::Result<i32> {
    let term = TerminalModes::capture()?;
    let winsize = term::window_size();

    let PtyPair { master, slave } = pty::allocate_pty(winsize.as_ref(), Some(term.cooked()))?;
    let shell = config.resolve_shell();
    info!("wrapping shell {shell}");
    let child = pty::spawn_shell(&slave, &shell)?;
    // The child holds its own copies of the slave fd; the parent only
    // needs the master.
    drop(slave);

    let channel = PtyChannel::new(&master)?;
    term.enter_raw()?;
    let stdin_rx = relay::spawn_stdin_reader();

    let code = Relay::new(config, channel, master, child, term, stdin_rx)
        .run()
        .await;
    Ok(code)
}
