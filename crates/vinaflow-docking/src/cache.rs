//! Per-batch object metadata cache.

use std::collections::HashMap;

use vinaflow_common::{ObjectRef, Result, VinaflowError};

use crate::repository::ObjectInfo;

/// Metadata for the objects in one batch, filled by a single bulk fetch.
///
/// Owned by one orchestrator run and cleared at the start of the next, so it
/// is never visible to another batch.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: HashMap<ObjectRef, ObjectInfo>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store fetched metadata and check every requested reference came back.
    pub fn populate(&mut self, requested: &[ObjectRef], infos: Vec<ObjectInfo>) -> Result<()> {
        for info in infos {
            self.entries.insert(info.upa, info);
        }
        if let Some(missing) = requested.iter().find(|r| !self.entries.contains_key(r)) {
            return Err(VinaflowError::Repository(format!(
                "no metadata returned for object {missing}"
            )));
        }
        Ok(())
    }

    pub fn get(&self, upa: &ObjectRef) -> Option<&ObjectInfo> {
        self.entries.get(upa)
    }

    /// Display name, falling back to the reference string.
    pub fn name_of(&self, upa: &ObjectRef) -> String {
        self.get(upa).map(|i| i.name.clone()).unwrap_or_else(|| upa.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
