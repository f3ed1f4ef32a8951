use crate::{write_atomic, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Small single-value files kept in a machine's data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Id the provider driver assigned on create.
    Id,
    /// Id of the image built for this machine.
    Image,
    /// Stable id naming this machine's folders on its host VM.
    HostVmSyncId,
}

impl Marker {
    pub fn file_name(self) -> &'static str {
        match self {
            Marker::Id => "id",
            Marker::Image => "image",
            Marker::HostVmSyncId => "host_vm_sync_id",
        }
    }
}

/// Plain-text marker files, one value per file. A missing or empty file
/// reads as `None`.
#[derive(Debug, Clone)]
pub struct MarkerFiles {
    dir: PathBuf,
}

impl MarkerFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read(&self, marker: Marker) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.dir.join(marker.file_name())) {
            Ok(content) => {
                let value = content.trim();
                Ok((!value.is_empty()).then(|| value.to_owned()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, marker: Marker, value: &str) -> Result<(), StoreError> {
        write_atomic(&self.dir.join(marker.file_name()), value.as_bytes())
    }

    pub fn clear(&self, marker: Marker) -> Result<(), StoreError> {
        match fs::remove_file(self.dir.join(marker.file_name())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_marker_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let markers = MarkerFiles::new(dir.path().join("web"));
        assert_eq!(markers.read(Marker::Id).unwrap(), None);
    }

    #[test]
    fn write_read_clear() {
        let dir = tempfile::tempdir().unwrap();
        let markers = MarkerFiles::new(dir.path().join("web"));
        markers.write(Marker::Image, "sha256:abc").unwrap();
        assert_eq!(
            markers.read(Marker::Image).unwrap().as_deref(),
            Some("sha256:abc")
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("web").join("image")).unwrap(),
            "sha256:abc"
        );
        markers.clear(Marker::Image).unwrap();
        assert_eq!(markers.read(Marker::Image).unwrap(), None);
        markers.clear(Marker::Image).unwrap();
    }

    #[test]
    fn whitespace_is_trimmed_and_empty_is_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("id"), "abc\n").unwrap();
        fs::write(dir.path().join("image"), "  \n").unwrap();
        let markers = MarkerFiles::new(dir.path());
        assert_eq!(markers.read(Marker::Id).unwrap().as_deref(), Some("abc"));
        assert_eq!(markers.read(Marker::Image).unwrap(), None);
    }
}
