//! The byte relay between the controlling terminal and the wrapped shell,
//! and the command-prompt boundary where forward commands are handled.
//!
//! A single task multiplexes four event sources with `tokio::select!`:
//! operator keystrokes (via a blocking stdin reader thread), PTY master
//! output, child exit, and SIGWINCH. When the escape detector fires, the
//! loop itself runs the command prompt (probe and injection included) to
//! completion before polling any source again, so nothing else can touch
//! the channel mid-cycle.
//!
//! Every error raised below the prompt boundary is reported to the
//! operator as advisory text and the relay resumes; only a closed channel
//! or child exit ends the process.

use std::os::fd::OwnedFd;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{Channel, PtyChannel};
use crate::config::Config;
use crate::error::Error;
use crate::escape::{EscapeDetector, ScanOutcome};
use crate::forward::ForwardRequest;
use crate::term::{self, TerminalModes};
use crate::{inject, probe, pty};

/// Banner for the tool's own one-line command prompt.
const COMMAND_PROMPT: &[u8] = b"\r\nsshpoke> ";

/// Longest accepted command line.
const MAX_COMMAND_LEN: usize = 1024;

/// Spawn the blocking stdin reader thread feeding the relay.
///
/// Reads raw chunks from the process stdin and hands them over a bounded
/// channel; exits on EOF or when the relay goes away.
pub fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// The relay loop and its process-scoped state.
pub struct Relay {
    config: Config,
    channel: PtyChannel,
    master: OwnedFd,
    child: Child,
    term: TerminalModes,
    detector: EscapeDetector,
    stdin_rx: mpsc::Receiver<Vec<u8>>,
}

impl Relay {
    pub fn new(
        config: Config,
        channel: PtyChannel,
        master: OwnedFd,
        child: Child,
        term: TerminalModes,
        stdin_rx: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        let detector = EscapeDetector::new(config.escape_byte(), config.command_byte());
        Self {
            config,
            channel,
            master,
            child,
            term,
            detector,
            stdin_rx,
        }
    }

    /// Run the relay until the shell exits or the channel dies. Restores
    /// the terminal before returning the child's exit status.
    pub async fn run(mut self) -> i32 {
        let mut sigwinch =
            signal(SignalKind::window_change()).expect("failed to register SIGWINCH handler");
        let mut stdout = tokio::io::stdout();
        let mut obuf = [0u8; 4096];
        let mut exit_code = 1;

        loop {
            tokio::select! {
                // Operator keystrokes → escape detection → shell
                chunk = self.stdin_rx.recv() => {
                    let Some(chunk) = chunk else { break };
                    // The detector only ever withholds the chunk's first
                    // byte, regardless of where in the chunk it matched.
                    let off = match self.detector.scan(&chunk) {
                        ScanOutcome::Forward => 0,
                        ScanOutcome::StripFirst => 1,
                        ScanOutcome::OpenPrompt => {
                            self.command_prompt().await;
                            1
                        }
                    };
                    if chunk.len() > off {
                        if let Err(e) = self.channel.send(&chunk[off..]).await {
                            debug!("relay write to shell failed: {e}");
                            break;
                        }
                    }
                }

                // Shell output → operator's terminal
                res = self.channel.read(&mut obuf) => {
                    match res {
                        Ok(n) => {
                            if stdout.write_all(&obuf[..n]).await.is_err() {
                                break;
                            }
                            let _ = stdout.flush().await;
                        }
                        Err(e) => {
                            debug!("relay read from shell failed: {e}");
                            break;
                        }
                    }
                }

                // Child exit ends the relay
                status = self.child.wait() => {
                    match status {
                        Ok(s) => {
                            exit_code = s.code().unwrap_or(1);
                            info!("shell exited with code {exit_code}");
                        }
                        Err(e) => warn!("wait for shell failed: {e}"),
                    }
                    break;
                }

                // Window size changes propagate to the PTY; the kernel
                // signals the shell's foreground group itself.
                _ = sigwinch.recv() => {
                    if let Some(ws) = term::window_size() {
                        if let Err(e) = pty::resize_pty(&self.master, &ws) {
                            warn!("PTY resize failed: {e}");
                        }
                    }
                }
            }
        }

        if let Err(e) = self.term.enter_cooked() {
            warn!("failed to restore terminal modes: {e}");
        }
        exit_code
    }

    /// The command-prompt boundary: cooked mode in, one command handled,
    /// raw mode out. All core errors stop here as advisory text.
    async fn command_prompt(&mut self) {
        if let Err(e) = self.term.enter_cooked() {
            warn!("failed to enter cooked mode: {e}");
        }
        match self.handle_command().await {
            Ok(()) => {}
            Err(Error::ChannelClosed) => {
                // The relay loop will observe the dead channel and shut down.
                eprintln!("sshpoke: channel closed");
            }
            Err(e) => eprintln!("sshpoke: {e}"),
        }
        if let Err(e) = self.term.enter_raw() {
            warn!("failed to re-enter raw mode: {e}");
        }
    }

    async fn handle_command(&mut self) -> Result<(), Error> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(COMMAND_PROMPT).await?;
        stdout.flush().await?;

        let Some(line) = self.read_command_line().await else {
            return Ok(());
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            return Ok(());
        }
        if matches!(line.as_str(), "h" | "H" | "?") {
            print_help();
            return Ok(());
        }

        forward_command(&mut self.channel, &mut stdout, &line, &self.config).await
    }

    /// Read one line of operator input from the stdin reader. The terminal
    /// is in cooked mode here, so the line usually arrives as one chunk.
    /// Returns `None` when stdin is gone.
    async fn read_command_line(&mut self) -> Option<String> {
        let mut line = Vec::new();
        loop {
            let chunk = self.stdin_rx.recv().await?;
            for &b in &chunk {
                if b == b'\r' || b == b'\n' {
                    return Some(String::from_utf8_lossy(&line).into_owned());
                }
                if line.len() < MAX_COMMAND_LEN {
                    line.push(b);
                }
            }
        }
    }
}

fn print_help() {
    eprintln!("\rCommands:");
    eprintln!("      L[bind_address:]port:host:hostport    Request local forward");
    eprintln!("      R[bind_address:]port:host:hostport    Request remote forward");
    eprintln!("      D[bind_address:]port                  Request dynamic forward");
}

/// Handle one entered forward command: parse it, probe the session stack,
/// and inject the compiled directives into each discovered layer.
///
/// With no nested sessions the line goes nowhere; the shell is already
/// where the operator wants the forward, so they are told to use ssh's
/// own escape instead. Advisory text goes to stderr, session output to
/// `display`.
async fn forward_command<C, W>(
    channel: &mut C,
    display: &mut W,
    line: &str,
    config: &Config,
) -> Result<(), Error>
where
    C: Channel,
    W: tokio::io::AsyncWrite + Unpin,
{
    let plan = ForwardRequest::parse(line)?.compile();

    let depth = probe::measure_depth(
        channel,
        config.escape_byte(),
        config.probe.max_depth,
        Duration::from_millis(config.probe.echo_timeout_ms),
    )
    .await?;

    if depth == 0 {
        eprintln!("No ssh sessions found.");
        return Ok(());
    }
    eprintln!("Forwarding port through {depth} ssh sessions.");

    inject::cascade(
        channel,
        display,
        &plan,
        depth,
        config.escape_byte(),
        config.command_byte(),
        Duration::from_millis(config.inject.prompt_timeout_ms),
    )
    .await
}
