use std::{
    collections::BTreeMap,
    fs::File,
    io::Read,
    path::PathBuf,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

use tracing::debug;

use crate::utils::error::EngineError;

pub const CHUNK_SIZE: usize = 64 * 1024;

/// Where artifact bytes come from. Implementations report progress as a
/// percentage and give up at the next chunk boundary once `cancel` is set.
pub trait ArtifactSource: Send + Sync {
    fn fetch(
        &self,
        location: &str,
        headers: &BTreeMap<String, String>,
        progress: &AtomicU8,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, EngineError>;
}

/// Reads artifacts from the local filesystem, relative to `root` when set.
#[derive(Clone, Debug, Default)]
pub struct FileSource {
    root: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(location),
            None => PathBuf::from(location),
        }
    }
}

impl ArtifactSource for FileSource {
    fn fetch(
        &self,
        location: &str,
        _headers: &BTreeMap<String, String>,
        progress: &AtomicU8,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, EngineError> {
        let path = self.resolve(location);
        let mut file = File::open(&path)?;
        let total = file.metadata()?.len() as usize;
        debug!(path = %path.display(), bytes = total, "reading artifact");

        let mut bytes = Vec::with_capacity(total);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled(location.to_string()));
            }
            let read = file.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
            if total > 0 {
                let percent = (bytes.len().min(total) * 100 / total) as u8;
                progress.store(percent, Ordering::Relaxed);
            }
        }
        progress.store(100, Ordering::Relaxed);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, len: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!("layerflow-{}-{}", std::process::id(), name));
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![7u8; len]).unwrap();
        path
    }

    #[test]
    fn reads_in_chunks_and_reports_progress() {
        let path = temp_file("chunks", CHUNK_SIZE * 2 + 10);
        let progress = AtomicU8::new(0);
        let cancel = AtomicBool::new(false);
        let bytes = FileSource::new()
            .fetch(path.to_str().unwrap(), &BTreeMap::new(), &progress, &cancel)
            .unwrap();
        assert_eq!(bytes.len(), CHUNK_SIZE * 2 + 10);
        assert_eq!(progress.load(Ordering::Relaxed), 100);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn stops_when_cancelled() {
        let path = temp_file("cancel", 16);
        let result = FileSource::new().fetch(
            path.to_str().unwrap(),
            &BTreeMap::new(),
            &AtomicU8::new(0),
            &AtomicBool::new(true),
        );
        assert!(matches!(result, Err(EngineError::Cancelled(_))));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = FileSource::with_root("/nonexistent-layerflow").fetch(
            "model.json",
            &BTreeMap::new(),
            &AtomicU8::new(0),
            &AtomicBool::new(false),
        );
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
