//! Top-level wiring: the Host registry and the `Gateway` handle an
//! embedding server owns and drives requests through.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::env_provider::{AmbientEnvironmentProvider, EnvironmentProvider};
use crate::error::{GatewayError, GatewayErrorKind, GatewayResult};
use crate::extension::{Extension, ExtensionRegistry};
use crate::host::Host;
use crate::metrics::{Metrics, NoopMetrics};

/// A request's back-reference to the proc it is bound to: an index
/// pair plus the generation observed at bind time, so a respawn at
/// the same proc id can never be mistaken for the original process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcHandle {
    pub proc_id: u32,
    pub generation: u32,
}

pub struct HostRegistry {
    hosts: HashMap<String, Host>,
}

impl HostRegistry {
    pub fn get(&self, host_id: &str) -> Option<&Host> {
        self.hosts.get(host_id)
    }

    pub fn get_mut(&mut self, host_id: &str) -> Option<&mut Host> {
        self.hosts.get_mut(host_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Host)> {
        self.hosts.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Host)> {
        self.hosts.iter()
    }

    /// Tears down every Host's locally-spawned processes
    /// (`mod_fastcgi_free`'s shutdown loop). Called once by the
    /// embedder on server shutdown; a Gateway is not expected to serve
    /// requests afterward.
    pub fn shutdown_all(&mut self) {
        for host in self.hosts.values_mut() {
            host.shutdown();
        }
    }
}

/// The gateway: a validated configuration's runtime image plus its
/// injected collaborators (metrics sink, environment provider).
pub struct Gateway {
    pub hosts: HostRegistry,
    pub extensions: ExtensionRegistry,
    pub metrics: Arc<dyn Metrics>,
    pub env_provider: Arc<dyn EnvironmentProvider>,
}

impl Gateway {
    /// Builds the runtime image from an already-validated
    /// configuration. Call [`GatewayConfig::validate`] first; this
    /// does not re-validate.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        Self::with_collaborators(config, Arc::new(NoopMetrics), Arc::new(AmbientEnvironmentProvider))
    }

    pub fn with_collaborators(
        config: GatewayConfig,
        metrics: Arc<dyn Metrics>,
        env_provider: Arc<dyn EnvironmentProvider>,
    ) -> GatewayResult<Self> {
        let mut hosts = HashMap::new();
        for host_config in config.hosts {
            let id = host_config.id.clone();
            if hosts.contains_key(&id) {
                return Err(GatewayError::new(GatewayErrorKind::Configuration(format!("duplicate host id {id:?}"))));
            }
            hosts.insert(id, Host::new(host_config));
        }

        let resp: Vec<Extension> = config.extensions.iter().map(Extension::from_config).collect();
        let auth: Vec<Extension> = config.authorizer_extensions.iter().map(Extension::from_config).collect();

        Ok(Gateway {
            hosts: HostRegistry { hosts },
            extensions: ExtensionRegistry::new(resp, auth, config.map_extensions),
            metrics,
            env_provider,
        })
    }

    /// Tears down every locally-spawned backend process across every
    /// Host. See [`HostRegistry::shutdown_all`].
    pub fn shutdown(&mut self) {
        self.hosts.shutdown_all();
    }
}
