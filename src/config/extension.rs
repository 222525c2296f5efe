//! Typed configuration for one Extension bucket.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// `.php`-style suffix, or a `/`-prefixed URI path.
    pub key: String,
    /// Host ids, in the order they should be tried.
    pub host_ids: Vec<String>,
}

impl ExtensionConfig {
    pub fn sanitize(&mut self) {
        self.key = self.key.trim().to_string();
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.key.is_empty() {
            errors.push("extension key must not be empty".to_string());
        }
        if self.host_ids.is_empty() {
            errors.push(format!("extension {:?} lists no hosts", self.key));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn is_path_prefix(&self) -> bool {
        self.key.starts_with('/')
    }
}
