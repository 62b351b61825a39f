//! Terminal line-discipline management for the controlling terminal.
//!
//! The relay runs with stdin in raw mode so every keystroke passes through
//! unmodified. The command prompt temporarily restores the original cooked
//! mode so the operator sees what they type. Both termios structs are
//! captured once at startup and kept for the process lifetime.

use std::io;
use std::os::fd::AsRawFd;

use nix::pty::Winsize;
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

/// The cooked/raw termios pair for the controlling terminal.
pub struct TerminalModes {
    cooked: Termios,
    raw: Termios,
}

impl TerminalModes {
    /// Capture the current (cooked) stdin termios and derive the raw copy
    /// used during relay: `cfmakeraw` plus `ECHO` cleared.
    pub fn capture() -> io::Result<Self> {
        let cooked = termios::tcgetattr(io::stdin())?;
        let mut raw = cooked.clone();
        termios::cfmakeraw(&mut raw);
        raw.local_flags.remove(LocalFlags::ECHO);
        Ok(Self { cooked, raw })
    }

    /// Switch stdin to raw mode (relay pass-through).
    pub fn enter_raw(&self) -> io::Result<()> {
        termios::tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &self.raw)?;
        Ok(())
    }

    /// Restore the original cooked mode (command prompt, shutdown).
    pub fn enter_cooked(&self) -> io::Result<()> {
        termios::tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &self.cooked)?;
        Ok(())
    }

    /// The captured cooked termios, used to seed the PTY slave so the
    /// wrapped shell starts with the operator's terminal settings.
    pub fn cooked(&self) -> &Termios {
        &self.cooked
    }
}

/// Query the controlling terminal's window size.
///
/// Returns `None` when stdin is not a terminal (the relay still works, the
/// PTY just gets a default size).
pub fn window_size() -> Option<Winsize> {
    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ reads a Winsize struct and nothing else.
    let ret = unsafe {
        libc::ioctl(
            io::stdin().as_raw_fd(),
            libc::TIOCGWINSZ,
            std::ptr::addr_of_mut!(ws),
        )
    };
    if ret == -1 {
        None
    } else {
        Some(ws)
    }
}
