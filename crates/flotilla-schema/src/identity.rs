use crate::types::{FolderId, TriggerId};

/// Hex prefix length used for every short content-derived id.
const SHORT_LEN: usize = 12;

/// Hash the given parts (separated so `["ab", "c"]` and `["a", "bc"]` differ)
/// and return the first 12 hex characters of the blake3 digest.
pub fn short_hash(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let hex = hasher.finalize().to_hex().to_string();
    hex[..SHORT_LEN].to_owned()
}

/// Default id of a synced folder: derived from its guest path only, so a
/// changed host path is still recognized as the same folder when diffing.
pub fn folder_id(guest_path: &str) -> FolderId {
    FolderId::new(short_hash(&["folder", guest_path]))
}

/// Id of a folder proxied through a host VM on behalf of `machine`.
///
/// Content-derived so repeated runs recognize folders the host VM already
/// shares regardless of declaration order.
pub fn proxy_folder_id(root: &str, host_path: &str, guest_path: &str, machine: &str) -> FolderId {
    FolderId::new(short_hash(&[root, host_path, guest_path, machine]))
}

pub fn trigger_id(scope: &str, stage: &str, index: usize, commands: &[String]) -> TriggerId {
    let index = index.to_string();
    let commands = commands.join(",");
    TriggerId::new(short_hash(&["trigger", scope, stage, &index, &commands]))
}
