#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use schema_governor::governance::{Coordinator, CoordinatorConfig};
use schema_governor::source::InMemorySource;
use schema_governor::store::FileVersionStore;
use serde_json::Value;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn write_json(&self, name: &str, value: &Value) -> PathBuf {
        self.write(name, &serde_json::to_string_pretty(value).expect("json"))
    }

    pub fn read_json(&self, path: &Path) -> Value {
        let contents = fs::read_to_string(path).expect("read output");
        serde_json::from_str(&contents).expect("parse output json")
    }

    /// Root of a version store inside the workspace.
    pub fn store_root(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    pub fn file_store(&self) -> Arc<FileVersionStore> {
        Arc::new(FileVersionStore::new(self.store_root()))
    }
}

pub fn coordinator(
    source: InMemorySource,
    store: Arc<FileVersionStore>,
    config: CoordinatorConfig,
) -> Coordinator {
    Coordinator::new(Arc::new(source), store, config)
}
