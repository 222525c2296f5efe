//! Host (component C): the runtime backend pool for one logical
//! upstream — its processes, spawn policy and disable window.

use tracing::warn;

use crate::config::{EndpointConfig, HostConfig};
use crate::process::{Process, ProcessState};

/// Runtime state for one configured Host. Processes are kept in a
/// flat vector rather than an intrusive linked list: least-load
/// selection is already O(n) over this list, so a linked list would
/// offer no benefit and only complicate ownership.
pub struct Host {
    pub config: HostConfig,
    pub procs: Vec<Process>,
    pub max_id: u32,
    /// `>1` when shared between the authorizer and responder extension
    /// maps, or via duplicate-unix-socket detection.
    pub refcount: u32,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        Host { config, procs: Vec::new(), max_id: 0, refcount: 1 }
    }

    pub fn push_proc(&mut self, proc: Process) {
        self.max_id = self.max_id.max(proc.id);
        self.procs.push(proc);
    }

    /// `host.load == Σ proc.load` invariant, computed rather than
    /// cached so it can never drift out of sync.
    pub fn load(&self) -> u32 {
        self.procs.iter().map(|p| p.load).sum()
    }

    pub fn active_procs(&self) -> usize {
        self.procs.iter().filter(|p| p.state == ProcessState::Running).count()
    }

    /// Linear scan for the least-loaded `RUNNING` process: starts with
    /// the first such process and replaces the candidate whenever a
    /// later one has strictly smaller load (ties keep the earlier
    /// pick, i.e. first-in-list wins on equal load).
    pub fn select_best_proc(&mut self) -> Option<&mut Process> {
        let mut best_ndx: Option<usize> = None;
        for (ndx, proc) in self.procs.iter().enumerate() {
            if proc.state != ProcessState::Running {
                continue;
            }
            match best_ndx {
                None => best_ndx = Some(ndx),
                Some(cur) if proc.load < self.procs[cur].load => best_ndx = Some(ndx),
                Some(_) => {}
            }
        }
        best_ndx.map(move |ndx| &mut self.procs[ndx])
    }

    pub fn find_proc_mut(&mut self, proc_id: u32) -> Option<&mut Process> {
        self.procs.iter_mut().find(|p| p.id == proc_id)
    }

    /// Disable policy: disabled when the Host has a non-zero
    /// `disable_time`, OR the process is local and its pid matches the
    /// pid this failing request had cached — i.e. this request is
    /// known to have just killed exactly this process. Even a Host
    /// configured with `disable_time == 0` still disables that specific
    /// process (with a zero-length window): a blanket disable window
    /// and "this one process just died" are independent triggers.
    pub fn disable_proc(&mut self, proc_id: u32, failing_request_pid: Option<u32>) {
        let disable_time = self.config.disable_time;
        let this_proc_just_died = self
            .procs
            .iter()
            .find(|p| p.id == proc_id)
            .is_some_and(|p| p.is_local && failing_request_pid == Some(p.pid) && p.pid != 0);

        if disable_time == 0 && !this_proc_just_died {
            return;
        }
        if let Some(proc) = self.find_proc_mut(proc_id) {
            proc.disable(disable_time);
        }
    }

    pub fn mark_overloaded(&mut self, proc_id: u32) {
        let disable_time = self.config.disable_time;
        if let Some(proc) = self.find_proc_mut(proc_id) {
            proc.mark_overloaded(disable_time);
        }
    }

    /// Reaps every process and, for local processes in `Died` with
    /// zero load, leaves them ready for the supervisor to respawn; a
    /// `Died` process with `load > 0` is left alone until it drains.
    pub fn reap_all(&mut self) {
        for proc in &mut self.procs {
            proc.reap();
        }
    }

    /// Processes eligible for respawn right now: local, `Died`, and
    /// fully drained. A proc in `DIED` with `load > 0` is never
    /// respawned until load reaches 0.
    pub fn respawn_candidates(&self) -> Vec<u32> {
        self.procs
            .iter()
            .filter(|p| p.is_local && p.state == ProcessState::Died && p.load == 0)
            .map(|p| p.id)
            .collect()
    }

    /// Processes whose disable window has expired and should come back
    /// to `RUNNING` this tick: a remote process in `DIED` (remote death
    /// is just the disable window, since nothing here reaps a remote
    /// pid), or any process still `OVERLOADED`/`DIED_WAIT_FOR_PID` that
    /// reaping this tick did not confirm as actually exited (`reap`
    /// would have already moved a truly-dead local proc to `DIED`).
    pub fn reenable_candidates(&self) -> Vec<u32> {
        self.procs
            .iter()
            .filter(|p| {
                p.disable_window_elapsed()
                    && match p.state {
                        ProcessState::Died => !p.is_local,
                        ProcessState::Overloaded | ProcessState::DiedWaitForPid => true,
                        _ => false,
                    }
            })
            .map(|p| p.id)
            .collect()
    }

    /// Explicit teardown (`mod_fastcgi_free`'s shutdown loop): sends
    /// `kill_signal` to every locally-spawned process still holding a
    /// pid, then unlinks this Host's UNIX socket path if it owns one.
    /// Remote procs are left untouched — this crate never owns their
    /// lifetime.
    pub fn shutdown(&mut self) {
        for proc in &mut self.procs {
            if proc.is_local && proc.pid != 0 {
                proc.kill(self.config.kill_signal);
            }
        }
        if let EndpointConfig::Unix { path } = &self.config.endpoint {
            if self.procs.iter().any(|p| p.is_local) {
                if let Err(err) = std::fs::remove_file(path) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(%path, %err, "failed to unlink backend socket during shutdown");
                    }
                }
            }
        }
    }
}
