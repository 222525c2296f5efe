//! Aggregate, validated configuration tree handed to [`crate::Gateway`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::extension::ExtensionConfig;
use super::host::{EndpointConfig, HostConfig};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    pub hosts: Vec<HostConfig>,
    /// Extensions consulted in RESPONDER mode.
    pub extensions: Vec<ExtensionConfig>,
    /// Extensions consulted in AUTHORIZER mode, checked first.
    #[serde(default)]
    pub authorizer_extensions: Vec<ExtensionConfig>,
    /// `.alias -> .canonical`, applied before direct extension matching.
    #[serde(default)]
    pub map_extensions: Vec<(String, String)>,
}

impl GatewayConfig {
    pub fn sanitize(&mut self) {
        for host in &mut self.hosts {
            host.sanitize();
        }
        for ext in self.extensions.iter_mut().chain(self.authorizer_extensions.iter_mut()) {
            ext.sanitize();
        }
    }

    /// Validates every host and extension, then the cross-cutting
    /// invariants from the data model (duplicate unix-socket sharing,
    /// extensions referencing real hosts). Every problem is collected
    /// into one diagnostic rather than failing on the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let mut seen_ids = HashMap::new();
        for host in &self.hosts {
            if let Err(sub_errors) = host.validate() {
                for e in sub_errors {
                    errors.push(format!("host {:?}: {e}", host.id));
                }
            }
            if let Some(prev) = seen_ids.insert(host.id.clone(), host) {
                let _ = prev;
                errors.push(format!("duplicate host id {:?}", host.id));
            }
        }

        for ext in self.extensions.iter().chain(self.authorizer_extensions.iter()) {
            if let Err(sub_errors) = ext.validate() {
                for e in sub_errors {
                    errors.push(format!("extension {:?}: {e}", ext.key));
                }
            }
            for host_id in &ext.host_ids {
                if !seen_ids.contains_key(host_id) {
                    errors.push(format!("extension {:?} references unknown host {host_id:?}", ext.key));
                }
            }
        }

        for err in self.duplicate_unix_socket_errors() {
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Two Hosts sharing a unix-socket path must share `bin_path`; this
    /// is the rule that lets the spawner skip re-spawning a duplicate
    /// and share one child (refcount) instead. Any other divergence
    /// between two hosts on the same path is rejected.
    fn duplicate_unix_socket_errors(&self) -> Vec<String> {
        let mut by_path: HashMap<&str, &HostConfig> = HashMap::new();
        let mut errors = Vec::new();
        for host in &self.hosts {
            let EndpointConfig::Unix { path } = &host.endpoint else { continue };
            match by_path.get(path.as_str()) {
                None => {
                    by_path.insert(path.as_str(), host);
                }
                Some(first) => {
                    if first.bin_path != host.bin_path {
                        errors.push(format!(
                            "hosts {:?} and {:?} share socket {path:?} but disagree on bin-path",
                            first.id, host.id
                        ));
                    }
                }
            }
        }
        errors
    }
}
