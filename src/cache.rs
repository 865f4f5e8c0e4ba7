use serde::{de::DeserializeOwned, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Storage for serialized stage results ("stubs").
pub trait StubCache {
    /// `Ok(None)` when nothing is stored under `key`.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Stubs as files, the key being a path relative to `root`.
#[derive(Debug, Clone, Default)]
pub struct FileStubCache {
    root: PathBuf,
}

impl FileStubCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[inline]
    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl StubCache for FileStubCache {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, bytes)?;

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStubCache {
    entries: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryStubCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }
}

impl StubCache for MemoryStubCache {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), bytes.to_vec());

        Ok(())
    }
}

/// Where a stage reads its stub from and writes it to.
#[derive(Clone, Copy)]
pub struct Stub<'a> {
    pub cache: &'a dyn StubCache,
    pub key: &'a str,
    pub read_from_stub: bool,
}

impl<'a> Stub<'a> {
    pub fn new(cache: &'a dyn StubCache, key: &'a str, read_from_stub: bool) -> Self {
        Self {
            cache,
            key,
            read_from_stub,
        }
    }

    /// Cached value if reading is enabled and a readable stub exists. Any
    /// failure means "recompute".
    pub fn read<T: DeserializeOwned>(&self) -> Option<T> {
        if !self.read_from_stub {
            return None;
        }

        let bytes = match self.cache.load(self.key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = self.key, "no stub");
                return None;
            }
            Err(err) => {
                warn!(key = self.key, %err, "stub unreadable, recomputing");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                info!(key = self.key, "loaded stub");
                Some(value)
            }
            Err(err) => {
                warn!(key = self.key, %err, "stub corrupt, recomputing");
                None
            }
        }
    }

    /// Stores `value`; failures are reported and otherwise ignored.
    pub fn write<T: Serialize>(&self, value: &T) {
        let res = serde_json::to_vec(value)
            .map_err(Error::from)
            .and_then(|bytes| self.cache.store(self.key, &bytes));

        match res {
            Ok(()) => debug!(key = self.key, "stored stub"),
            Err(err) => warn!(key = self.key, %err, "failed to store stub"),
        }
    }
}
