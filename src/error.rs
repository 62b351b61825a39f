//! Error types for sshpoke.
//!
//! Everything except [`Error::ChannelClosed`] is recoverable at the command
//! prompt boundary: the error is reported to the operator as advisory text
//! and the relay resumes. A closed channel means the wrapped shell is gone,
//! so the process restores the terminal and exits.

use std::io;
use thiserror::Error;

/// Top-level error for probe and injection runs.
#[derive(Error, Debug)]
pub enum Error {
    /// The forward specification could not be parsed. Nothing was written
    /// to the channel.
    #[error("invalid forward specification: {0}")]
    Parse(#[from] ParseError),

    /// More bytes came back during the probe than were sent, so the
    /// one-byte-per-layer assumption did not hold for this cycle.
    #[error("scan failure: {received} bytes echoed for {sent} probe bytes")]
    ProbeInconsistency { sent: usize, received: usize },

    /// A hop's command interpreter never produced its prompt banner.
    #[error("timeout waiting for ssh> prompt at hop {hop}")]
    PromptTimeout { hop: usize },

    /// The PTY channel stopped accepting or producing bytes.
    #[error("channel closed")]
    ChannelClosed,

    /// I/O error on the channel or the operator's terminal.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Forward-specification parse errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Empty command line.
    #[error("empty command")]
    Empty,

    /// The type selector was not `L`, `R`, or `D`.
    #[error("unknown forward type '{0}'")]
    UnknownType(char),

    /// A specification whose colon count is outside the range its form
    /// accepts: `[2, 3]` for `L`/`R`, `[0, 1]` for `D`.
    #[error("wrong number of colons in specification: {0}")]
    ColonCount(usize),

    /// The listen port was missing, non-numeric, or zero.
    #[error("invalid listen port '{0}'")]
    BadPort(String),
}
