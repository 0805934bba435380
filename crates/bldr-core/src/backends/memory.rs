use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ProjectStore, relative_path};
use crate::error::Result;

#[derive(Default)]
struct Contents {
    files: BTreeMap<String, String>,
    folders: BTreeSet<String>,
}

/// An in-memory project, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryProjectStore {
    contents: Mutex<Contents>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All files, keyed by normalized relative path.
    pub fn files(&self) -> BTreeMap<String, String> {
        self.contents.lock().files.clone()
    }

    pub fn folders(&self) -> Vec<String> {
        self.contents.lock().folders.iter().cloned().collect()
    }
}

fn key(path: &str) -> Result<String> {
    Ok(relative_path(path)?.to_string_lossy().replace('\\', "/"))
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let key = key(path)?;
        let mut contents = self.contents.lock();
        let mut parent = key.as_str();
        while let Some((dir, _)) = parent.rsplit_once('/') {
            contents.folders.insert(dir.to_string());
            parent = dir;
        }
        contents.files.insert(key, content.to_string());
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let key = key(path)?;
        self.contents.lock().folders.insert(key);
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let key = key(path)?;
        Ok(self.contents.lock().files.get(&key).cloned())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = key(path)?;
        let contents = self.contents.lock();
        Ok(contents.files.contains_key(&key) || contents.folders.contains(&key))
    }
}
