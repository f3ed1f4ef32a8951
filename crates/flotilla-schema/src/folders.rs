use crate::config::{extra_to_string, ConfigError, SyncedFolderSection};
use crate::identity::folder_id;
use crate::types::FolderId;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// A validated synced folder declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedFolderSpec {
    pub id: FolderId,
    /// Absolute host path.
    pub host_path: PathBuf,
    pub guest_path: String,
    /// Implementation key (`bind`, `guest`, ...); `None` selects the default.
    pub kind: Option<String>,
    pub disabled: bool,
    pub extra: BTreeMap<String, String>,
}

impl SyncedFolderSpec {
    pub(crate) fn from_section(
        machine: &str,
        root: &Path,
        section: &SyncedFolderSection,
    ) -> Result<Self, ConfigError> {
        let guest_path = section.guest.trim().to_owned();
        if guest_path.is_empty() {
            return Err(ConfigError::MissingField {
                machine: machine.to_owned(),
                field: "guest".to_owned(),
                context: "synced_folder".to_owned(),
            });
        }
        if section.host.trim().is_empty() {
            return Err(ConfigError::MissingField {
                machine: machine.to_owned(),
                field: "host".to_owned(),
                context: "synced_folder".to_owned(),
            });
        }

        let id = section
            .id
            .as_deref()
            .map_or_else(|| folder_id(&guest_path), FolderId::from);

        Ok(Self {
            id,
            host_path: absolutize(root, Path::new(section.host.trim())),
            guest_path,
            kind: section.kind.clone(),
            disabled: section.disabled,
            extra: section
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), extra_to_string(v)))
                .collect(),
        })
    }
}

/// Resolve `path` against `root` and drop `.`/`..` components lexically.
pub(crate) fn absolutize(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
