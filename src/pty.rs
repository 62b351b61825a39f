//! PTY allocation, shell spawning, and terminal resize.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd is kept alive
//! for the process lifetime so I/O and resize operations can be performed
//! on it.

use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::Termios;
use tokio::process::{Child, Command};

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocate a PTY pair seeded with the controlling terminal's attributes
/// and window size, so the wrapped shell inherits both.
pub fn allocate_pty(
    winsize: Option<&Winsize>,
    termios: Option<&Termios>,
) -> Result<PtyPair, nix::Error> {
    let OpenptyResult { master, slave } = openpty(winsize, termios)?;
    Ok(PtyPair { master, slave })
}

/// Spawn the operator's shell on the slave side of the PTY.
///
/// The child becomes a session leader with the PTY slave as its controlling
/// terminal. stdin/stdout/stderr are all connected to the slave fd. The
/// shell is started interactive + login (`-il`) so it behaves like the
/// shell the operator was already sitting in.
pub fn spawn_shell(slave: &OwnedFd, shell: &str) -> std::io::Result<Child> {
    let slave_fd = slave.as_raw_fd();
    let mut cmd = Command::new(shell);
    cmd.arg("-il");
    cmd.kill_on_drop(true);

    // The child's stdio is handled by pre_exec (dup2 to PTY slave), so tell
    // tokio not to set up pipes.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: All syscalls used here are async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(move || {
            // Create a new session so the child is the session leader
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Set the PTY slave as the controlling terminal
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Redirect stdin/stdout/stderr to the PTY slave
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Resize the PTY's terminal window.
///
/// The kernel delivers SIGWINCH to the slave's foreground process group as
/// part of `TIOCSWINSZ`, so no explicit signalling is needed.
pub fn resize_pty(master: &OwnedFd, winsize: &Winsize) -> Result<(), nix::Error> {
    // SAFETY: TIOCSWINSZ is a well-defined ioctl that reads a Winsize struct.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCSWINSZ,
            std::ptr::addr_of!(*winsize),
        )
    };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(())
    }
}
