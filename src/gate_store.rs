use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use log::debug;

use crate::error::ConfigurationError;
use crate::gate::GateHierarchy;

/// Where a [GateStore] reads its gate document from.
pub trait GateSource: Send + Sync {
    fn load(&self) -> Result<GateHierarchy, ConfigurationError>;
}

/// A gate document held in memory.
#[derive(Clone, Debug)]
pub struct JsonGateSource {
    document: String,
}

impl JsonGateSource {
    pub fn new(document: impl Into<String>) -> Self {
        JsonGateSource {
            document: document.into(),
        }
    }
}

impl GateSource for JsonGateSource {
    fn load(&self) -> Result<GateHierarchy, ConfigurationError> {
        GateHierarchy::load(&self.document)
    }
}

/// A gate document read from disk on every load.
#[derive(Clone, Debug)]
pub struct FileGateSource {
    path: PathBuf,
}

impl FileGateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileGateSource { path: path.into() }
    }
}

impl GateSource for FileGateSource {
    fn load(&self) -> Result<GateHierarchy, ConfigurationError> {
        let document =
            std::fs::read_to_string(&self.path).map_err(|source| ConfigurationError::Io {
                path: self.path.clone(),
                source,
            })?;
        GateHierarchy::load(&document)
    }
}

/// Publishes the current [GateHierarchy] snapshot.
///
/// Readers take a snapshot without locking and keep a consistent view for as long as they hold
/// it. Reloads build a complete new hierarchy and swap it in; they are serialized so every
/// published snapshot has a higher version than the one before.
pub struct GateStore {
    source: Box<dyn GateSource>,
    current: ArcSwap<GateHierarchy>,
    last_version: Mutex<u64>,
}

impl GateStore {
    /// Loads the source once. A failure here is fatal: there is no previous snapshot to keep.
    pub fn new(source: impl GateSource + 'static) -> Result<Self, ConfigurationError> {
        let hierarchy = source.load()?.with_version(1);
        Ok(GateStore {
            source: Box::new(source),
            current: ArcSwap::from_pointee(hierarchy),
            last_version: Mutex::new(1),
        })
    }

    pub fn from_json_str(document: &str) -> Result<Self, ConfigurationError> {
        Self::new(JsonGateSource::new(document))
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<GateHierarchy> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    /// Re-reads the source and publishes the result, returning its version. On error the
    /// previous snapshot stays published.
    pub fn reload(&self) -> Result<u64, ConfigurationError> {
        let mut last_version = self
            .last_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let version = *last_version + 1;
        let hierarchy = self.source.load()?.with_version(version);
        let gate_count = hierarchy.len();
        self.current.store(Arc::new(hierarchy));
        *last_version = version;
        debug!(
            "published gate snapshot version {} with {} gates",
            version, gate_count
        );
        Ok(version)
    }
}
