//! Job control for husk — the job table, the SIGCHLD reaper, the
//! foreground monitor, and the user-level job operations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  SIGCHLD   ┌──────────────────────────────────┐
//! │ signal-hook  │───────────▶│ reaper thread                    │
//! │ iterator     │            │   lock table → reconcile → notify│
//! └──────────────┘            └───────────────┬──────────────────┘
//!                                             │ Condvar
//! ┌─────────────────────────────┐             ▼
//! │ shell flow (one thread)     │   ┌──────────────────────┐
//! │  launch / monitor / resume  │──▶│ Mutex<JobTable>      │
//! │  kill / report / shutdown   │   │ slot 0 = foreground  │
//! └─────────────────────────────┘   └──────────────────────┘
//! ```
//!
//! Every read-then-act section of shell flow holds the table mutex, so the
//! reaper cannot interleave with it. Waiting for a state change is always
//! `Condvar::wait` on the table guard in a re-check loop: the lock is
//! released and the wait begun in one step, so a notification delivered in
//! between cannot be missed.

mod reaper;
mod table;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use nix::sys::signal::{killpg, Signal};
use nix::sys::termios::Termios;
use signal_hook::iterator::Handle;
use tracing::{debug, warn};

pub use table::{ExitStatus, Job, JobId, JobInfo, JobState, Process};
pub(crate) use table::JobTable;

use crate::error::{Error, Result};
use crate::pipeline::{self, Stage};
use crate::terminal::Terminal;

/// State shared with the reaper thread.
pub(crate) struct Shared {
    table: Mutex<JobTable>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, JobTable> {
        // A poisoned lock means a panic elsewhere; the table itself is
        // still sound, so keep going rather than tear down the shell.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The job-control engine: owns the job table and the reaper thread.
pub struct JobControl {
    shared: Arc<Shared>,
    signals: Handle,
    reaper: Option<thread::JoinHandle<()>>,
}

impl JobControl {
    /// Create the table and start the SIGCHLD reaper thread.
    ///
    /// Must run before the first child is spawned, or an early exit could
    /// be reported before the reaper is listening.
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Shared {
            table: Mutex::new(JobTable::new()),
            cond: Condvar::new(),
        });
        let (signals, thread) = reaper::spawn(shared.clone())?;
        Ok(Self {
            shared,
            signals,
            reaper: Some(thread),
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.shared.lock()
    }

    /// Block until the reaper reports any change, re-acquiring the table.
    fn wait_for_change<'a>(&self, guard: MutexGuard<'a, JobTable>) -> MutexGuard<'a, JobTable> {
        self.shared
            .cond
            .wait(guard)
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn and register a pipeline without monitoring it; the background
    /// start notice is emitted for background jobs. Used directly by
    /// callers that do their own waiting (and by tests, which have no
    /// terminal to monitor with).
    pub fn launch(
        &self,
        stages: Vec<Stage>,
        background: bool,
        tmodes: Option<Termios>,
    ) -> Result<JobId> {
        let mut table = self.lock();
        let id = pipeline::spawn_pipeline(&mut table, stages, background, tmodes)?;
        if background {
            println!("[{id}] running '{}'", table.command(id));
        }
        Ok(id)
    }

    /// Run a pipeline: spawn it, register it, and for foreground jobs
    /// monitor it to completion. Build, registration, and monitor entry are
    /// one critical section, so the reaper can only observe a fully
    /// registered job.
    pub fn run(&self, term: &Terminal, stages: Vec<Stage>, background: bool) -> Result<i32> {
        let mut table = self.lock();
        let tmodes = term.attrs().ok();
        let id = pipeline::spawn_pipeline(&mut table, stages, background, tmodes)?;
        if background {
            println!("[{id}] running '{}'", table.command(id));
            return Ok(0);
        }
        Ok(self.monitor(table, term))
    }

    /// Foreground monitor: give the terminal to the foreground job and
    /// block until the reaper reports it Stopped or Finished.
    ///
    /// On Stopped the job keeps its terminal modes and moves to a fresh
    /// background slot; on Finished its aggregate status becomes the return
    /// value. Either way the shell takes the terminal back and restores its
    /// own modes before returning.
    fn monitor(&self, mut table: MutexGuard<'_, JobTable>, term: &Terminal) -> i32 {
        let fg = JobId::FOREGROUND;
        let shell_modes = term.attrs().unwrap_or_else(|_| term.shell_modes().clone());

        let pgid = table.job(fg).pgid();
        if let Err(e) = term.give_terminal_to(pgid) {
            warn!("failed to give terminal to {pgid}: {e}");
        }
        if let Some(modes) = table.job(fg).tmodes().cloned() {
            let _ = term.set_attrs(&modes);
        }

        let mut code = 0;
        loop {
            match table.state(fg) {
                JobState::Running => table = self.wait_for_change(table),
                JobState::Stopped => {
                    if let Ok(modes) = term.attrs() {
                        table.job_mut(fg).set_tmodes(modes);
                    }
                    let slot = table.free_background_slot();
                    table.move_job(fg, slot);
                    debug!(slot = slot.0, "foreground job suspended");
                    break;
                }
                JobState::Finished => {
                    let (_, status) = table.reap_state(fg);
                    code = status.map_or(0, |s| s.code());
                    break;
                }
            }
        }
        drop(table);

        if let Err(e) = term.reclaim_terminal() {
            warn!("failed to reclaim terminal: {e}");
        }
        let _ = term.set_attrs(&shell_modes);
        code
    }

    /// Block until the job at `id` is Finished, then extract its aggregate
    /// exit status and reclaim the slot. `None` if the slot is already
    /// free.
    pub fn wait_finished(&self, id: JobId) -> Option<ExitStatus> {
        let mut table = self.lock();
        while table.get(id).is_some_and(|j| j.state() != JobState::Finished) {
            table = self.wait_for_change(table);
        }
        table.get(id)?;
        let (_, status) = table.reap_state(id);
        status
    }

    /// Resolve an explicit or "most recent" job target to a live job.
    fn resolve(&self, table: &JobTable, id: Option<JobId>) -> Result<JobId> {
        match id {
            Some(id) => match table.get(id) {
                Some(job) if job.state() != JobState::Finished => Ok(id),
                _ => Err(Error::NoSuchJob(id)),
            },
            None => table.most_recent().ok_or(Error::NoCurrentJob),
        }
    }

    /// Continue a job in the background.
    pub fn resume_background(&self, id: Option<JobId>) -> Result<()> {
        let mut table = self.lock();
        let id = self.resolve(&table, id)?;
        println!("[{id}] continue '{}'", table.command(id));
        let pgid = table.job(id).pgid();
        table.job_mut(id).state = JobState::Running;
        killpg(pgid, Signal::SIGCONT)?;
        Ok(())
    }

    /// Continue a job in the foreground and monitor it.
    ///
    /// If another job currently occupies the foreground slot it is demoted
    /// first: its terminal modes are snapshotted, it is stopped, and it
    /// moves to a fresh background slot rather than being discarded.
    pub fn resume_foreground(&self, id: Option<JobId>, term: &Terminal) -> Result<i32> {
        let mut table = self.lock();
        let id = self.resolve(&table, id)?;
        println!("[{id}] continue '{}'", table.command(id));

        let fg = JobId::FOREGROUND;
        if id != fg && table.get(fg).is_some() {
            if let Ok(modes) = term.attrs() {
                table.job_mut(fg).set_tmodes(modes);
            }
            let _ = killpg(table.job(fg).pgid(), Signal::SIGSTOP);
            let slot = table.free_background_slot();
            table.move_job(fg, slot);
        }
        if id != fg {
            table.move_job(id, fg);
        }
        table.job_mut(fg).state = JobState::Running;

        // The job must own the terminal before it is continued, or its
        // first read would stop it again with SIGTTIN.
        let pgid = table.job(fg).pgid();
        let _ = term.give_terminal_to(pgid);
        if let Some(modes) = table.job(fg).tmodes().cloned() {
            let _ = term.set_attrs(&modes);
        }
        killpg(pgid, Signal::SIGCONT)?;

        Ok(self.monitor(table, term))
    }

    /// Terminate a job. The continue signal must precede the termination
    /// signal: a group stopped by job control never acts on SIGTERM while
    /// it stays stopped.
    pub fn kill(&self, id: JobId) -> Result<()> {
        let table = self.lock();
        let job = table
            .get(id)
            .filter(|j| j.state() != JobState::Finished)
            .ok_or(Error::NoSuchJob(id))?;
        debug!(slot = id.0, "killing '{}'", job.command());
        killpg(job.pgid(), Signal::SIGCONT)?;
        killpg(job.pgid(), Signal::SIGTERM)?;
        Ok(())
    }

    /// Produce a report line for every occupied background slot matching
    /// `filter` (`None` reports them all). A Finished job is reclaimed
    /// immediately after its line is produced; it is never reclaimed before
    /// it has been reported and never kept past its first report.
    pub fn report(&self, filter: Option<JobState>) -> Vec<String> {
        let mut table = self.lock();
        let mut lines = Vec::new();
        for i in 1..table.len() {
            let id = JobId(i);
            let Some(job) = table.get(id) else { continue };
            let state = job.state();
            if filter.is_some_and(|f| f != state) {
                continue;
            }
            lines.push(match state {
                JobState::Running => format!("[{id}] running '{}'", job.command()),
                JobState::Stopped => format!("[{id}] suspended '{}'", job.command()),
                JobState::Finished => match job.exit_status() {
                    Some(ExitStatus::Signaled(sig)) => {
                        format!("[{id}] killed '{}' by signal {}", job.command(), sig as i32)
                    }
                    Some(ExitStatus::Exited(code)) => {
                        format!("[{id}] exited '{}', status={code}", job.command())
                    }
                    None => format!("[{id}] exited '{}', status=0", job.command()),
                },
            });
            if state == JobState::Finished {
                table.reap_state(id);
            }
        }
        lines
    }

    /// Snapshot every occupied slot.
    pub fn list(&self) -> Vec<JobInfo> {
        self.lock().list()
    }

    /// Drain every outstanding job before the shell exits: terminate each
    /// live job and block until the reaper has seen it through, then report
    /// the finished jobs so none disappears unannounced. Returns the report
    /// lines.
    pub fn shutdown(&self) -> Vec<String> {
        let mut table = self.lock();
        for i in 0..table.len() {
            let id = JobId(i);
            loop {
                match table.get(id).map(|j| j.state()) {
                    None | Some(JobState::Finished) => break,
                    Some(_) => {
                        let pgid = table.job(id).pgid();
                        let _ = killpg(pgid, Signal::SIGCONT);
                        let _ = killpg(pgid, Signal::SIGTERM);
                        table = self.wait_for_change(table);
                    }
                }
            }
        }
        drop(table);
        self.report(Some(JobState::Finished))
    }
}

impl Drop for JobControl {
    fn drop(&mut self) {
        self.signals.close();
        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.join();
        }
    }
}
