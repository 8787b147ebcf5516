//! Shared state for every manager in a process

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::{
    error::Result,
    loader::{LoaderDescriptor, LoaderRegistry},
    manager::{ContentManager, ManagerState},
    manifest::PackManifest,
};

/// Owns the loader registry, the manifest cache and the list of live managers
///
/// Create one per process (or per test) and share it behind an [`Arc`]. Locks are only held
/// while a map or list is updated. Manifests are read and loaders probed outside of them.
///
/// ```no_run
/// # fn doit() -> cpak_content::error::Result<()> {
/// use cpak_content::{ByteArray, ContentServices};
///
/// let services = ContentServices::new();
/// let ui = services.open_manager("build/ui.cpak")?;
/// let sounds = services.open_manager("build/ui.cpak")?;
/// assert!(std::sync::Arc::ptr_eq(ui.manifest(), sounds.manifest()));
///
/// let click = sounds.load::<ByteArray>("sounds/click.wav")?;
/// services.shutdown_all();
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ContentServices {
    loaders: RwLock<LoaderRegistry>,
    manifests: Mutex<HashMap<PathBuf, Arc<PackManifest>>>,
    managers: Mutex<Vec<Weak<Mutex<ManagerState>>>>,
}

impl ContentServices {
    /// Services with the built-in loaders registered
    pub fn new() -> Self {
        Self::with_registry(LoaderRegistry::with_builtins())
    }

    pub fn with_registry(registry: LoaderRegistry) -> Self {
        ContentServices {
            loaders: RwLock::new(registry),
            ..Default::default()
        }
    }

    /// Register a loader for manifests opened from now on
    pub fn register_loader(&self, descriptor: LoaderDescriptor) -> Result<()> {
        self.loaders.write().register(descriptor)
    }

    /// A snapshot of the loader registry
    pub fn registry(&self) -> LoaderRegistry {
        self.loaders.read().clone()
    }

    /// Open a manifest, or return the cached one for the same file
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn open_manifest(&self, path: impl AsRef<Path>) -> Result<Arc<PackManifest>> {
        let key = path.as_ref().canonicalize()?;

        if let Some(manifest) = self.manifests.lock().get(&key) {
            debug!("manifest cache hit");
            return Ok(manifest.clone());
        }

        let registry = self.registry();
        let manifest = Arc::new(PackManifest::open(&key, &registry)?);

        // another caller may have opened the same file meanwhile, keep the first one
        Ok(self
            .manifests
            .lock()
            .entry(key)
            .or_insert(manifest)
            .clone())
    }

    /// Drop a manifest from the cache
    ///
    /// Managers already holding it keep their copy. Returns true if it was cached.
    pub fn evict_manifest(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.manifests.lock().remove(&key).is_some()
    }

    /// Number of cached manifests
    pub fn cached_manifests(&self) -> usize {
        self.manifests.lock().len()
    }

    /// Create a manager over a cached manifest and track it for [`Self::shutdown_all`]
    pub fn open_manager(&self, path: impl AsRef<Path>) -> Result<ContentManager> {
        let manager = ContentManager::new(self.open_manifest(path)?);

        let mut managers = self.managers.lock();
        managers.retain(|state| state.strong_count() > 0);
        managers.push(Arc::downgrade(manager.state()));

        Ok(manager)
    }

    /// Number of managers created by [`Self::open_manager`] that are still alive
    pub fn live_managers(&self) -> usize {
        let mut managers = self.managers.lock();
        managers.retain(|state| state.strong_count() > 0);
        managers.len()
    }

    /// Unload every live manager
    ///
    /// Returns the total number of cached values cleared and tracked values disposed.
    pub fn shutdown_all(&self) -> (usize, usize) {
        let live: Vec<_> = {
            let mut managers = self.managers.lock();
            managers.retain(|state| state.strong_count() > 0);
            managers.iter().filter_map(Weak::upgrade).collect()
        };

        let (cached, disposed) = live
            .iter()
            .map(|state| {
                let unloaded = state.lock().take_all();
                unloaded.release()
            })
            .fold((0, 0), |(c, d), (cached, disposed)| (c + cached, d + disposed));

        info!(managers = live.len(), cached, disposed, "shut down content managers");
        (cached, disposed)
    }
}
