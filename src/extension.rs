//! Extension registry (component D): `extension key -> ordered host
//! list`, split into authorizer and responder buckets, plus the
//! matching and PATH_INFO logic shared by both.

use crate::config::ExtensionConfig;

/// Runtime state for one Extension bucket: the ordered host-id list
/// plus the round-robin anchor and the one-shot "all handlers down"
/// log latch.
pub struct Extension {
    pub key: String,
    pub host_ids: Vec<String>,
    pub last_used_ndx: usize,
    pub note_is_sent: bool,
}

impl Extension {
    pub fn from_config(config: &ExtensionConfig) -> Self {
        Extension { key: config.key.clone(), host_ids: config.host_ids.clone(), last_used_ndx: 0, note_is_sent: false }
    }

    pub fn is_path_prefix(&self) -> bool {
        self.key.starts_with('/')
    }
}

/// The three parallel maps from the data model collapse to two lists
/// here (`auth`, `resp`); `exts` (the union, used for lifecycle and
/// supervision) is whatever the embedding `HostRegistry` iterates, so
/// it isn't duplicated as a third structure.
pub struct ExtensionRegistry {
    pub auth: Vec<Extension>,
    pub resp: Vec<Extension>,
    pub map_extensions: Vec<(String, String)>,
}

impl ExtensionRegistry {
    pub fn new(resp: Vec<Extension>, auth: Vec<Extension>, map_extensions: Vec<(String, String)>) -> Self {
        ExtensionRegistry { auth, resp, map_extensions }
    }

    pub fn match_authorizer(&mut self, filename: &str) -> Option<usize> {
        match_in_list(&self.auth, filename, &self.map_extensions)
    }

    pub fn match_responder(&mut self, filename: &str) -> Option<usize> {
        match_in_list(&self.resp, filename, &self.map_extensions)
    }
}

/// Map-extension rewrite, then direct suffix/prefix match, first hit
/// in list order.
fn match_in_list(list: &[Extension], filename: &str, map_extensions: &[(String, String)]) -> Option<usize> {
    for (from, to) in map_extensions {
        if filename.ends_with(from.as_str()) {
            if let Some(ndx) = list.iter().position(|e| &e.key == to) {
                return Some(ndx);
            }
        }
    }
    list.iter().position(|ext| {
        if ext.is_path_prefix() {
            filename.starts_with(ext.key.as_str())
        } else {
            filename.ends_with(ext.key.as_str())
        }
    })
}

/// PATH_INFO split for a path-prefix extension key, responder mode
/// only (the authorizer branch never splits path info). When
/// `fix_root_path_name` is set and `key == "/"`, the entire URI path
/// becomes `PATH_INFO` and `SCRIPT_NAME` is emptied.
pub fn split_path_info(key: &str, uri_path: &str, fix_root_path_name: bool) -> (String, String) {
    if fix_root_path_name && key == "/" {
        return (String::new(), uri_path.to_string());
    }
    let tail = &uri_path[key.len().min(uri_path.len())..];
    let split_at = match tail.find('/') {
        Some(offset) => key.len() + offset,
        None => uri_path.len(),
    };
    (uri_path[..split_at].to_string(), uri_path[split_at..].to_string())
}
