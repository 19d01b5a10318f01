//! The job table: the authoritative registry of process groups.
//!
//! The table owns every [`Job`] and [`Process`] record. Everyone else holds
//! slot indices ([`JobId`]), which stay valid until the slot is reclaimed.
//! Slot 0 is reserved for the current foreground job; background jobs live
//! in slots 1 and up, the lowest free slot being reused before the table
//! grows.

use std::fmt;

use nix::sys::signal::Signal;
use nix::sys::termios::Termios;
use nix::unistd::Pid;
use tracing::debug;

/// A job handle: the index of a slot in the [`JobTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub usize);

impl JobId {
    /// The fixed slot of the current foreground job.
    pub const FOREGROUND: JobId = JobId(0);
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state shared by processes and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Finished,
}

/// How a finished process left the system.
///
/// Decoded from the raw kernel wait status exactly once, at the reaper
/// boundary; nothing else ever looks at the raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(Signal),
}

impl ExitStatus {
    /// The shell-level exit code: the exit code itself, or 128 plus the
    /// signal number for a signal death.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(sig) => 128 + *sig as i32,
        }
    }
}

/// One OS process belonging to a job.
#[derive(Debug)]
pub struct Process {
    pub(crate) pid: Pid,
    pub(crate) state: JobState,
    pub(crate) status: Option<ExitStatus>,
}

impl Process {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Undefined (None) until the process is Finished.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }
}

/// One process group launched from one command line.
pub struct Job {
    pub(crate) pgid: Pid,
    pub(crate) procs: Vec<Process>,
    pub(crate) tmodes: Option<Termios>,
    pub(crate) state: JobState,
    pub(crate) command: String,
}

impl Job {
    pub fn pgid(&self) -> Pid {
        self.pgid
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn processes(&self) -> &[Process] {
        &self.procs
    }

    pub(crate) fn tmodes(&self) -> Option<&Termios> {
        self.tmodes.as_ref()
    }

    pub(crate) fn set_tmodes(&mut self, modes: Termios) {
        self.tmodes = Some(modes);
    }

    /// The aggregate exit status of a pipeline is the last stage's.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.procs.last().and_then(|p| p.status)
    }
}

/// A snapshot of one occupied slot, for listings and tests.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: JobId,
    pub pgid: Pid,
    pub state: JobState,
    pub pids: Vec<Pid>,
    pub command: String,
}

/// Growable table of job slots.
///
/// Referencing a handle outside the table's bounds, or an op-specific
/// contract violation (deleting an unfinished job, moving onto an occupied
/// slot), is a programming error and panics. User-supplied indices are
/// validated with [`JobTable::get`] before they get anywhere near the
/// panicking accessors.
pub(crate) struct JobTable {
    slots: Vec<Option<Job>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self { slots: vec![None] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Bounds-checked lookup; `None` for free or out-of-range slots.
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// The job at `id`. Panics if the slot is free.
    pub fn job(&self, id: JobId) -> &Job {
        self.slots[id.0].as_ref().expect("job slot is free")
    }

    pub fn job_mut(&mut self, id: JobId) -> &mut Job {
        self.slots[id.0].as_mut().expect("job slot is free")
    }

    /// Allocate a slot for a new job: the fixed foreground slot, or the
    /// first free background slot. The job starts Running with no
    /// processes and no command text.
    pub fn add_job(&mut self, pgid: Pid, background: bool, tmodes: Option<Termios>) -> JobId {
        debug_assert!(
            !self.slots.iter().flatten().any(|j| j.pgid == pgid),
            "process group {pgid} is already registered"
        );
        let id = if background {
            self.free_background_slot()
        } else {
            assert!(
                self.slots[0].is_none(),
                "foreground slot is already occupied"
            );
            JobId::FOREGROUND
        };
        self.slots[id.0] = Some(Job {
            pgid,
            procs: Vec::new(),
            tmodes,
            state: JobState::Running,
            command: String::new(),
        });
        debug!(slot = id.0, pgid = pgid.as_raw(), "job registered");
        id
    }

    /// First free slot at index >= 1, growing the table when all are taken.
    pub fn free_background_slot(&mut self) -> JobId {
        for (i, slot) in self.slots.iter().enumerate().skip(1) {
            if slot.is_none() {
                return JobId(i);
            }
        }
        self.slots.push(None);
        JobId(self.slots.len() - 1)
    }

    /// Append a process (one pipeline stage) to the job at `id`.
    ///
    /// The display text grows by the stage's argv, words joined by spaces
    /// and stages by `" | "`.
    pub fn add_process(&mut self, id: JobId, pid: Pid, argv: &[String]) {
        let job = self.job_mut(id);
        if !job.command.is_empty() {
            job.command.push_str(" | ");
        }
        job.command.push_str(&argv.join(" "));
        job.procs.push(Process {
            pid,
            state: JobState::Running,
            status: None,
        });
    }

    pub fn command(&self, id: JobId) -> &str {
        &self.job(id).command
    }

    pub fn state(&self, id: JobId) -> JobState {
        self.job(id).state
    }

    /// Like [`JobTable::state`], but a Finished job is consumed: its
    /// aggregate exit status is extracted and the slot reclaimed.
    pub fn reap_state(&mut self, id: JobId) -> (JobState, Option<ExitStatus>) {
        let state = self.state(id);
        if state == JobState::Finished {
            let status = self.job(id).exit_status();
            self.delete(id);
            (state, status)
        } else {
            (state, None)
        }
    }

    /// Free a slot. The job must be Finished.
    fn delete(&mut self, id: JobId) {
        assert_eq!(
            self.job(id).state,
            JobState::Finished,
            "deleting an unfinished job"
        );
        debug!(slot = id.0, "job reclaimed");
        self.slots[id.0] = None;
    }

    /// Relocate a job between slots. The destination must be free.
    pub fn move_job(&mut self, from: JobId, to: JobId) {
        assert!(self.slots[to.0].is_none(), "destination slot is occupied");
        self.slots[to.0] = self.slots[from.0].take();
    }

    /// Highest-indexed slot holding a job that is not yet Finished.
    pub fn most_recent(&self) -> Option<JobId> {
        self.slots
            .iter()
            .enumerate()
            .rev()
            .find(|(_, slot)| {
                slot.as_ref()
                    .is_some_and(|j| j.state != JobState::Finished)
            })
            .map(|(i, _)| JobId(i))
    }

    /// Every occupied slot, for the reaper's reconciliation pass.
    pub fn iter_occupied_mut(&mut self) -> impl Iterator<Item = (JobId, &mut Job)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|job| (JobId(i), job)))
    }

    pub fn list(&self) -> Vec<JobInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref().map(|job| JobInfo {
                    id: JobId(i),
                    pgid: job.pgid,
                    state: job.state,
                    pids: job.procs.iter().map(|p| p.pid).collect(),
                    command: job.command.clone(),
                })
            })
            .collect()
    }
}
