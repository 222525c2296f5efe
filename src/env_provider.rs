//! Injected source of the ambient process environment, so the
//! spawner never reads `std::env` directly and tests can supply
//! deterministic inputs.

use std::collections::HashMap;

pub trait EnvironmentProvider: Send + Sync {
    fn ambient_env(&self) -> HashMap<String, String>;
}

/// Reads the real process environment. The default outside tests.
#[derive(Debug, Default)]
pub struct AmbientEnvironmentProvider;

impl EnvironmentProvider for AmbientEnvironmentProvider {
    fn ambient_env(&self) -> HashMap<String, String> {
        std::env::vars().collect()
    }
}

/// Deterministic stand-in for tests.
#[derive(Debug, Default, Clone)]
pub struct FixedEnvironmentProvider {
    env: HashMap<String, String>,
}

impl FixedEnvironmentProvider {
    pub fn new(env: HashMap<String, String>) -> Self {
        FixedEnvironmentProvider { env }
    }
}

impl EnvironmentProvider for FixedEnvironmentProvider {
    fn ambient_env(&self) -> HashMap<String, String> {
        self.env.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_provider_returns_exactly_what_was_given() {
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/bin".to_string());
        let provider = FixedEnvironmentProvider::new(env.clone());
        assert_eq!(provider.ambient_env(), env);
    }
}
