//! Controlling-terminal handle for the shell.
//!
//! The shell keeps exactly one descriptor for the terminal, duplicated from
//! stdin at startup and marked close-on-exec so it is never inherited by a
//! spawned command. It is used only to move the terminal's foreground
//! process group between the shell and its jobs and to save/restore
//! line-discipline modes.

use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use nix::unistd::{getpgrp, tcsetpgrp, Pid};

use crate::error::{Error, Result};

/// The shell's handle on its controlling terminal.
pub struct Terminal {
    tty: OwnedFd,
    shell_pgid: Pid,
    shell_modes: Termios,
}

impl Terminal {
    /// Claim the controlling terminal.
    ///
    /// Fails with [`Error::NotInteractive`] when stdin is not a tty; job
    /// control is impossible without one, so callers treat this as fatal.
    /// On success the shell's process group owns the terminal and its
    /// current modes are saved.
    pub fn open() -> Result<Self> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Err(Error::NotInteractive);
        }

        // Duplicate the descriptor so redirections of fd 0 never cost us the
        // terminal, and keep it out of exec'd children.
        let tty: OwnedFd = stdin.as_fd().try_clone_to_owned()?;
        fcntl(tty.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;

        let shell_pgid = getpgrp();
        tcsetpgrp(tty.as_fd(), shell_pgid)?;
        let shell_modes = tcgetattr(tty.as_fd())?;

        Ok(Self {
            tty,
            shell_pgid,
            shell_modes,
        })
    }

    /// The shell's own process group.
    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// The terminal modes saved at startup.
    pub fn shell_modes(&self) -> &Termios {
        &self.shell_modes
    }

    /// Current terminal modes.
    pub fn attrs(&self) -> Result<Termios> {
        Ok(tcgetattr(self.tty.as_fd())?)
    }

    /// Restore previously saved terminal modes.
    pub fn set_attrs(&self, modes: &Termios) -> Result<()> {
        Ok(tcsetattr(self.tty.as_fd(), SetArg::TCSADRAIN, modes)?)
    }

    /// Hand the terminal's foreground process group to `pgid`.
    pub fn give_terminal_to(&self, pgid: Pid) -> Result<()> {
        Ok(tcsetpgrp(self.tty.as_fd(), pgid)?)
    }

    /// Take the terminal back for the shell.
    pub fn reclaim_terminal(&self) -> Result<()> {
        Ok(tcsetpgrp(self.tty.as_fd(), self.shell_pgid)?)
    }
}
