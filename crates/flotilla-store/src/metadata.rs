use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;

const RECORD_FILE: &str = "record.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    NotCreated,
    Preparing,
    Running,
    Stopped,
    Unknown,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineState::NotCreated => write!(f, "not_created"),
            MachineState::Preparing => write!(f, "preparing"),
            MachineState::Running => write!(f, "running"),
            MachineState::Stopped => write!(f, "stopped"),
            MachineState::Unknown => write!(f, "unknown"),
        }
    }
}

/// What flotilla last recorded about a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineRecord {
    pub name: String,
    pub provider: String,
    pub state: MachineState,
    /// Networks the machine was connected to, for teardown on destroy.
    #[serde(default)]
    pub networks: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MachineRecord {
    pub fn new(name: &str, provider: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: name.to_owned(),
            provider: provider.to_owned(),
            state: MachineState::NotCreated,
            networks: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Machine names double as data directory names.
pub fn validate_machine_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::InvalidName(
            "machine name must be 1-64 characters".to_owned(),
        ));
    }
    if name.starts_with('.')
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(StoreError::InvalidName(format!(
            "'{name}' must match [a-zA-Z0-9_.-] and not start with '.'"
        )));
    }
    Ok(())
}

pub struct MetadataStore {
    layout: StoreLayout,
}

impl MetadataStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn put(&self, record: &MachineRecord) -> Result<(), StoreError> {
        validate_machine_name(&record.name)?;
        let dest = self.layout.machine_dir(&record.name).join(RECORD_FILE);
        let content = serde_json::to_string_pretty(record)?;
        write_atomic(&dest, content.as_bytes())
    }

    pub fn get(&self, name: &str) -> Result<MachineRecord, StoreError> {
        self.find(name)?
            .ok_or_else(|| StoreError::MachineNotFound(name.to_owned()))
    }

    pub fn find(&self, name: &str) -> Result<Option<MachineRecord>, StoreError> {
        let path = self.layout.machine_dir(name).join(RECORD_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn update_state(&self, name: &str, state: MachineState) -> Result<(), StoreError> {
        let mut record = self.get(name)?;
        record.state = state;
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.put(&record)
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.layout.machine_dir(name).join(RECORD_FILE);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<MachineRecord>, StoreError> {
        let dir = self.layout.machines_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_str().unwrap_or("");
            match self.find(name_str) {
                Ok(Some(record)) => results.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("skipping unreadable machine record '{name_str}': {e}");
                }
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}
