//! Scheme → adaptor factory routing.
//!
//! The registry is how callers open a filesystem without naming a concrete
//! backend type: `registry.connect("file", "/srv/data")` or
//! `registry.connect_url("memory://scratch")`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::adaptor::Adaptor;
use crate::backends::MemoryBackend;
use crate::config::EngineConfig;
use crate::error::{VfsError, VfsResult};
use crate::filesystem::FileSystem;

/// Opens adaptors for one scheme.
#[async_trait]
pub trait AdaptorFactory: Send + Sync {
    /// Scheme served, e.g. `"sftp"`.
    fn scheme(&self) -> &str;

    /// Connect to `location` (host, root directory, store name, …).
    async fn open(&self, location: &str) -> VfsResult<Arc<dyn Adaptor>>;
}

/// Factory for named in-memory stores.
///
/// Connecting twice to the same name yields two filesystems over the same
/// data, which is what lets tests copy between "remote" memory backends.
#[derive(Debug, Default)]
pub struct MemoryFactory {
    stores: Mutex<HashMap<String, MemoryBackend>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdaptorFactory for MemoryFactory {
    fn scheme(&self) -> &str {
        "memory"
    }

    async fn open(&self, location: &str) -> VfsResult<Arc<dyn Adaptor>> {
        let backend = self
            .stores
            .lock()
            .entry(location.to_string())
            .or_insert_with(|| MemoryBackend::named(location))
            .clone();
        Ok(Arc::new(backend))
    }
}

/// Factory for local directories; the location is the root directory.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct LocalFactory;

#[cfg(unix)]
#[async_trait]
impl AdaptorFactory for LocalFactory {
    fn scheme(&self) -> &str {
        "file"
    }

    async fn open(&self, location: &str) -> VfsResult<Arc<dyn Adaptor>> {
        let meta = tokio::fs::metadata(location)
            .await
            .map_err(|e| VfsError::from_io(e, location))?;
        if !meta.is_dir() {
            return Err(VfsError::invalid_path(format!(
                "{location} is not a directory"
            )));
        }
        Ok(Arc::new(crate::backends::LocalBackend::new(location)))
    }
}

/// Routes connection requests to registered factories.
pub struct AdaptorRegistry {
    factories: RwLock<BTreeMap<String, Arc<dyn AdaptorFactory>>>,
    config: EngineConfig,
}

impl std::fmt::Debug for AdaptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptorRegistry")
            .field("schemes", &self.schemes())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for AdaptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(BTreeMap::new()),
            config: EngineConfig::default(),
        }
    }

    /// Create a registry with the in-tree `memory` and `file` schemes.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(MemoryFactory::new());
        #[cfg(unix)]
        registry.register(LocalFactory);
        registry
    }

    /// Engine settings applied to every filesystem this registry opens.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a factory, replacing any previous one for its scheme.
    pub fn register(&self, factory: impl AdaptorFactory + 'static) {
        self.register_arc(Arc::new(factory));
    }

    /// Register a factory already wrapped in `Arc`.
    pub fn register_arc(&self, factory: Arc<dyn AdaptorFactory>) {
        let scheme = factory.scheme().to_string();
        if self.factories.write().insert(scheme.clone(), factory).is_some() {
            tracing::debug!("replaced factory for scheme {scheme}");
        }
    }

    /// Remove the factory for `scheme`.
    ///
    /// Returns `true` if one was removed.
    pub fn unregister(&self, scheme: &str) -> bool {
        self.factories.write().remove(scheme).is_some()
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    fn factory(&self, scheme: &str) -> VfsResult<Arc<dyn AdaptorFactory>> {
        self.factories
            .read()
            .get(scheme)
            .cloned()
            .ok_or_else(|| VfsError::unsupported(format!("no adaptor for scheme {scheme:?}")))
    }

    /// Open a filesystem for `location` on `scheme`.
    #[tracing::instrument(skip(self), name = "registry.connect")]
    pub async fn connect(&self, scheme: &str, location: &str) -> VfsResult<FileSystem> {
        let factory = self.factory(scheme)?;
        let adaptor = factory.open(location).await?;
        FileSystem::with_config(adaptor, self.config.clone())
    }

    /// Open a filesystem from a `scheme://location` string.
    pub async fn connect_url(&self, url: &str) -> VfsResult<FileSystem> {
        let (scheme, location) = url
            .split_once("://")
            .ok_or_else(|| VfsError::invalid_path(format!("{url} has no scheme")))?;
        self.connect(scheme, location).await
    }
}
