//! SIGCHLD-driven reconciliation of process and job state.
//!
//! A dedicated thread owns a `signal-hook` iterator for SIGCHLD. Each
//! delivery runs one reconciliation pass over the job table under the table
//! lock and then wakes every waiter on the condition variable. Because the
//! pass scans every tracked process, coalesced signals are harmless, and
//! because waiters block through `Condvar::wait` on the same lock, a signal
//! can never slip between a state check and the wait for the next one.
//!
//! This thread is the only writer of process state and of the state
//! transitions it implies for jobs.

use std::sync::Arc;
use std::thread;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use signal_hook::consts::signal::SIGCHLD;
use signal_hook::iterator::{Handle, Signals};
use tracing::debug;

use super::table::{ExitStatus, Job, JobState, JobTable};
use super::Shared;
use crate::error::Result;

/// Start the reaper thread. Returns a handle that shuts the iterator down
/// and the thread's join handle.
pub(super) fn spawn(shared: Arc<Shared>) -> Result<(Handle, thread::JoinHandle<()>)> {
    let mut signals = Signals::new([SIGCHLD])?;
    let handle = signals.handle();
    let thread = thread::Builder::new()
        .name("husk-reaper".into())
        .spawn(move || {
            for _ in signals.forever() {
                let mut table = shared.lock();
                reap(&mut table);
                shared.cond.notify_all();
            }
        })?;
    Ok((handle, thread))
}

/// One reconciliation pass: a non-blocking status query for every process
/// the table tracks, draining all pending stop/continue/exit events.
///
/// Stages of a pipeline finish independently and not in stage order, so the
/// query is per process, never per group; waiting on the group would report
/// a job finished while a downstream stage is still draining its pipe.
pub(super) fn reap(table: &mut JobTable) {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    for (_, job) in table.iter_occupied_mut() {
        for i in 0..job.procs.len() {
            while job.procs[i].state != JobState::Finished {
                match waitpid(job.procs[i].pid, Some(flags)) {
                    Ok(WaitStatus::StillAlive) | Err(_) => break,
                    Ok(status) => apply(job, i, status),
                }
            }
        }
    }
}

/// Apply one kernel-reported status change to stage `i` of `job`.
pub(super) fn apply(job: &mut Job, i: usize, status: WaitStatus) {
    let proc = &mut job.procs[i];
    match status {
        WaitStatus::Stopped(pid, _) => {
            debug!(pid = pid.as_raw(), "stopped");
            proc.state = JobState::Stopped;
            job.state = JobState::Stopped;
        }
        WaitStatus::Continued(pid) => {
            debug!(pid = pid.as_raw(), "continued");
            proc.state = JobState::Running;
            job.state = JobState::Running;
        }
        WaitStatus::Exited(pid, code) => {
            debug!(pid = pid.as_raw(), code, "exited");
            finish(job, i, ExitStatus::Exited(code));
        }
        WaitStatus::Signaled(pid, sig, _) => {
            debug!(pid = pid.as_raw(), signal = sig as i32, "killed");
            finish(job, i, ExitStatus::Signaled(sig));
        }
        // Ptrace stops are nothing we asked for; leave the state alone.
        _ => {}
    }
}

fn finish(job: &mut Job, i: usize, status: ExitStatus) {
    job.procs[i].state = JobState::Finished;
    job.procs[i].status = Some(status);
    if job.procs.iter().all(|p| p.state == JobState::Finished) {
        job.state = JobState::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    /// A three-stage job with synthetic pids 100, 101, 102.
    fn three_stage_job(table: &mut JobTable) -> super::super::JobId {
        let id = table.add_job(pid(100), true, None);
        for (p, name) in [(100, "cat"), (101, "grep x"), (102, "wc")] {
            let argv: Vec<String> = name.split(' ').map(str::to_string).collect();
            table.add_process(id, pid(p), &argv);
        }
        id
    }

    #[test]
    fn test_stop_event_stops_the_job() {
        let mut table = JobTable::new();
        let id = three_stage_job(&mut table);
        apply(
            table.job_mut(id),
            1,
            WaitStatus::Stopped(pid(101), Signal::SIGTSTP),
        );
        assert_eq!(table.state(id), JobState::Stopped);
        assert_eq!(table.job(id).processes()[1].state(), JobState::Stopped);
        assert_eq!(table.job(id).processes()[0].state(), JobState::Running);
    }

    #[test]
    fn test_continue_event_resumes_the_job() {
        let mut table = JobTable::new();
        let id = three_stage_job(&mut table);
        apply(
            table.job_mut(id),
            0,
            WaitStatus::Stopped(pid(100), Signal::SIGTSTP),
        );
        apply(table.job_mut(id), 0, WaitStatus::Continued(pid(100)));
        assert_eq!(table.state(id), JobState::Running);
    }

    #[test]
    fn test_job_finishes_only_when_every_stage_has() {
        let mut table = JobTable::new();
        let id = three_stage_job(&mut table);

        // Stages retire out of order.
        apply(table.job_mut(id), 2, WaitStatus::Exited(pid(102), 0));
        assert_eq!(table.state(id), JobState::Running);
        apply(table.job_mut(id), 0, WaitStatus::Exited(pid(100), 0));
        assert_eq!(table.state(id), JobState::Running);
        apply(table.job_mut(id), 1, WaitStatus::Exited(pid(101), 1));
        assert_eq!(table.state(id), JobState::Finished);

        // Aggregate status is the last stage's, not the last to exit.
        assert_eq!(table.job(id).exit_status(), Some(ExitStatus::Exited(0)));
    }

    #[test]
    fn test_partial_finish_keeps_a_stopped_job_stopped() {
        let mut table = JobTable::new();
        let id = three_stage_job(&mut table);
        apply(
            table.job_mut(id),
            0,
            WaitStatus::Stopped(pid(100), Signal::SIGSTOP),
        );
        apply(table.job_mut(id), 2, WaitStatus::Exited(pid(102), 0));
        assert_eq!(table.state(id), JobState::Stopped);
    }

    #[test]
    fn test_signal_death_is_decoded() {
        let mut table = JobTable::new();
        let id = table.add_job(pid(200), true, None);
        table.add_process(id, pid(200), &["sleep".to_string(), "9".to_string()]);
        apply(
            table.job_mut(id),
            0,
            WaitStatus::Signaled(pid(200), Signal::SIGTERM, false),
        );
        assert_eq!(table.state(id), JobState::Finished);
        assert_eq!(
            table.job(id).exit_status(),
            Some(ExitStatus::Signaled(Signal::SIGTERM))
        );
    }
}
