//! Process entry and supervision (component B): per-backend-process
//! state, load counter, and non-blocking reaping.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Overloaded,
    DiedWaitForPid,
    Died,
    Killed,
}

/// A single backend process (or remote connection) within a Host.
pub struct Process {
    pub id: u32,
    /// `None` for a remote (non-`is_local`) backend.
    pub child: Option<tokio::process::Child>,
    pub pid: u32,
    pub is_local: bool,
    pub state: ProcessState,
    pub load: u32,
    pub requests: u64,
    pub disabled_until: Option<Instant>,
    /// Bumped every time a respawn replaces the backing child at this
    /// slot. A request's cached back-reference carries the generation
    /// it observed so a respawned proc can never be mistaken for the
    /// one the request was originally bound to.
    pub generation: u32,
}

impl Process {
    pub fn new_local(id: u32) -> Self {
        Process {
            id,
            child: None,
            pid: 0,
            is_local: true,
            // Starts DIED and flips to RUNNING only after a successful
            // spawn; active_procs briefly underreports during startup,
            // kept deliberately rather than optimistically marking it
            // running before the child actually exists.
            state: ProcessState::Died,
            load: 0,
            requests: 0,
            disabled_until: None,
            generation: 0,
        }
    }

    pub fn new_remote(id: u32) -> Self {
        Process {
            id,
            child: None,
            pid: 0,
            is_local: false,
            state: ProcessState::Running,
            load: 0,
            requests: 0,
            disabled_until: None,
            generation: 0,
        }
    }

    pub fn adopt_child(&mut self, child: tokio::process::Child, pid: u32) {
        self.child = Some(child);
        self.pid = pid;
        self.state = ProcessState::Running;
        self.generation += 1;
    }

    /// Non-blocking reap. For a local process with a live handle, calls
    /// `try_wait()` (the idiomatic equivalent of `waitpid(pid, &status,
    /// WNOHANG)`): `Ok(None)` means still alive, `Ok(Some(status))`
    /// means it exited and is moved to `DIED`, `Err` is logged as an
    /// anomaly and also treated as dead.
    pub fn reap(&mut self) {
        if !self.is_local {
            return;
        }
        let Some(child) = self.child.as_mut() else { return };
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                log_exit(self.pid, status);
                self.pid = 0;
                self.child = None;
                self.state = ProcessState::Died;
            }
            Err(err) => {
                warn!(pid = self.pid, %err, "waitpid anomaly reaping backend process");
                self.pid = 0;
                self.child = None;
                self.state = ProcessState::Died;
            }
        }
    }

    /// Disables this process per the disable policy: a non-zero
    /// `disable_time` on the Host, OR this process being the one a
    /// failing request's cached pid identified as having just died.
    /// Local procs move to `DiedWaitForPid` (awaiting reap); remote
    /// procs move straight to `Died`.
    pub fn disable(&mut self, disable_time_secs: u16) {
        self.disabled_until = Some(Instant::now() + Duration::from_secs(disable_time_secs as u64));
        self.state = if self.is_local { ProcessState::DiedWaitForPid } else { ProcessState::Died };
    }

    pub fn mark_overloaded(&mut self, disable_time_secs: u16) {
        self.disabled_until = Some(Instant::now() + Duration::from_secs(disable_time_secs as u64));
        self.state = ProcessState::Overloaded;
    }

    pub fn disable_window_elapsed(&self) -> bool {
        match self.disabled_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    pub fn incr_load(&mut self) {
        self.load += 1;
        self.requests += 1;
    }

    pub fn decr_load(&mut self) {
        self.load = self.load.saturating_sub(1);
    }

    /// Sends `signal` to a locally-spawned, still-running process and
    /// marks it `KILLED` (`* -> KILLED`: explicit teardown only). A
    /// no-op for remote procs, which this crate never owns the
    /// lifetime of, and for procs with no live pid.
    pub fn kill(&mut self, signal: u8) {
        if self.is_local && self.pid != 0 {
            // SAFETY: `pid` is a plain integer identifying a process this
            // crate itself forked; no memory is shared with the kernel call.
            unsafe {
                libc::kill(self.pid as libc::pid_t, signal as libc::c_int);
            }
        }
        self.state = ProcessState::Killed;
    }
}

fn log_exit(pid: u32, status: std::process::ExitStatus) {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
        // SIGTERM(15)/SIGINT(2) are the expected shutdown signals; anything
        // else is worth a louder log line.
        if signal == 15 || signal == 2 {
            debug!(pid, signal, "backend process terminated");
        } else {
            warn!(pid, signal, "backend process killed by signal");
        }
    } else if let Some(code) = status.code() {
        debug!(pid, code, "backend process exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_local_process_starts_in_died_state() {
        let proc = Process::new_local(1);
        assert_eq!(proc.state, ProcessState::Died);
    }

    #[test]
    fn new_remote_process_starts_running() {
        let proc = Process::new_remote(1);
        assert_eq!(proc.state, ProcessState::Running);
    }

    #[test]
    fn disable_local_goes_to_died_wait_for_pid() {
        let mut proc = Process::new_remote(1);
        proc.is_local = true;
        proc.disable(1);
        assert_eq!(proc.state, ProcessState::DiedWaitForPid);
        assert!(!proc.disable_window_elapsed());
    }

    #[test]
    fn disable_remote_goes_straight_to_died() {
        let mut proc = Process::new_remote(1);
        proc.disable(1);
        assert_eq!(proc.state, ProcessState::Died);
    }

    #[test]
    fn kill_marks_remote_proc_killed_without_signaling() {
        // A remote proc has no pid this crate owns; kill() must never
        // attempt to signal it, only record the state transition.
        let mut proc = Process::new_remote(1);
        proc.kill(15);
        assert_eq!(proc.state, ProcessState::Killed);
    }

    #[test]
    fn kill_marks_local_proc_with_no_pid_killed_without_signaling() {
        let mut proc = Process::new_local(1);
        proc.kill(15);
        assert_eq!(proc.state, ProcessState::Killed);
    }

    #[test]
    fn load_increments_and_decrements() {
        let mut proc = Process::new_remote(1);
        proc.incr_load();
        proc.incr_load();
        assert_eq!(proc.load, 2);
        assert_eq!(proc.requests, 2);
        proc.decr_load();
        assert_eq!(proc.load, 1);
    }

    #[test]
    fn decr_load_never_underflows() {
        let mut proc = Process::new_remote(1);
        proc.decr_load();
        assert_eq!(proc.load, 0);
    }
}
