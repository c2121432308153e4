//! Artifact persistence.
//!
//! File formats are out of scope for this crate: an [`ArtifactStore`] only has to keep artifacts
//! apart by device name. [`MemoryStore`] is the in-process implementation used by the demo binary
//! and the tests.

use indexmap::IndexMap;

use pscompiler_backend::*;

use crate::encoder::*;

pub trait ArtifactStore {
    fn contains(&self, device: &str) -> bool;

    /// Stores `artifact` under its device name. Writing a name twice is a
    /// [`CompileError::NamespaceCollision`].
    fn put(&mut self, artifact: DeviceArtifact) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: IndexMap<String, DeviceArtifact>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: &str) -> Option<&DeviceArtifact> {
        self.artifacts.get(device)
    }

    pub fn names(&self) -> Vec<&str> {
        self.artifacts.keys().map(|name| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl ArtifactStore for MemoryStore {
    fn contains(&self, device: &str) -> bool {
        self.artifacts.contains_key(device)
    }

    fn put(&mut self, artifact: DeviceArtifact) -> Result<()> {
        if self.contains(&artifact.device) {
            return Err(CompileError::NamespaceCollision {
                name: artifact.device,
            });
        }
        self.artifacts.insert(artifact.device.clone(), artifact);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::store::*;

    #[test]
    fn rejects_second_write() {
        let mut store = MemoryStore::new();
        store.put(DeviceArtifact::new("board1")).unwrap();
        assert!(matches!(
            store.put(DeviceArtifact::new("board1")),
            Err(CompileError::NamespaceCollision { .. })
        ));
        assert_eq!(store.names(), vec!["board1"]);
    }
}
