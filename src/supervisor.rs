//! Periodic supervisor (component H): reap and respawn, once per
//! heartbeat tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::env_provider::EnvironmentProvider;
use crate::process::{Process, ProcessState};
use crate::registry::Gateway;
use crate::spawner::{self, SpawnOutcome};

/// One heartbeat: reap every proc, respawn drained local `Died`
/// procs, and re-enable remote procs whose disable window has
/// elapsed. Safe to call as often as once per second, which the
/// design calls "sufficient".
pub async fn heartbeat_tick(gateway: &mut Gateway, env_provider: &dyn EnvironmentProvider) {
    let host_ids: Vec<String> = gateway.hosts.iter().map(|(id, _)| id.clone()).collect();

    for host_id in host_ids {
        let Some(host) = gateway.hosts.get_mut(&host_id) else { continue };
        host.reap_all();

        let reenable_ids = host.reenable_candidates();
        for proc_id in reenable_ids {
            if let Some(proc) = host.find_proc_mut(proc_id) {
                proc.state = ProcessState::Running;
            }
        }

        respawn_drained_procs(gateway, &host_id, env_provider).await;
    }
}

/// Respawns every local proc of `host_id` that's `Died` and fully
/// drained (`Host::respawn_candidates`). Assumes the caller has
/// already reaped the host this tick, so a proc whose child actually
/// exited is visible as `Died` rather than still `DiedWaitForPid`.
async fn respawn_drained_procs(gateway: &mut Gateway, host_id: &str, env_provider: &dyn EnvironmentProvider) {
    let Some(host) = gateway.hosts.get(host_id) else { return };
    let respawn_ids = host.respawn_candidates();
    if respawn_ids.is_empty() {
        return;
    }
    let config = host.config.clone();

    for proc_id in respawn_ids {
        match spawner::spawn(&config, env_provider).await {
            Ok(SpawnOutcome::Local(spawned)) => {
                if let Some(host) = gateway.hosts.get_mut(host_id) {
                    if let Some(proc) = host.find_proc_mut(proc_id) {
                        proc.adopt_child(spawned.child, spawned.pid);
                    }
                }
                debug!(host = %host_id, proc_id, "backend respawned");
            }
            Ok(SpawnOutcome::ExternallyManaged) => {
                if let Some(host) = gateway.hosts.get_mut(host_id) {
                    if let Some(proc) = host.find_proc_mut(proc_id) {
                        proc.state = ProcessState::Running;
                    }
                }
            }
            Err(err) => {
                error!(host = %host_id, proc_id, %err, "respawn failed, backend remains dead");
            }
        }
    }
}

/// The reconnect policy's `fcgi_restart_dead_procs` step (spec §4.E):
/// reaps and respawns exactly one Host's drained local procs between
/// reconnect attempts, so a request that just killed its only local
/// proc can recover within its own reconnect budget instead of
/// waiting for the next heartbeat tick.
pub async fn restart_dead_procs(gateway: &mut Gateway, host_id: &str, env_provider: &dyn EnvironmentProvider) {
    if let Some(host) = gateway.hosts.get_mut(host_id) {
        host.reap_all();
    }
    respawn_drained_procs(gateway, host_id, env_provider).await;
}

/// Spawns a background task that drives [`heartbeat_tick`] on a fixed
/// interval until `shutdown` is cancelled, the way `core/triggers.rs`
/// and `core/monitoring.rs` drive their own periodic work via
/// `tokio::select!` over a sleep and a cancellation token.
pub fn spawn_supervisor(
    gateway: Arc<Mutex<Gateway>>,
    env_provider: Arc<dyn EnvironmentProvider>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let mut guard = gateway.lock().await;
                    heartbeat_tick(&mut guard, env_provider.as_ref()).await;
                }
            }
        }
    })
}
