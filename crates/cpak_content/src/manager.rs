//! Runtime entry point for loading, caching and disposing pack content

use std::{
    any::{type_name, Any, TypeId},
    collections::{hash_map, HashMap},
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use bon::Builder;
use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use crate::{
    error::{Error, LoaderResolutionError, Result},
    loader::{Content, Disposable, ErasedLoader, LoadContext, Loaded, LoaderRegistry},
    manifest::PackManifest,
    stream::ContentStream,
};

/// Per call options for [`ContentManager::load_with`]
#[derive(Debug, Clone, Copy, Builder)]
pub struct LoadOptions {
    /// Keep the result in the object cache
    #[builder(default = true)]
    pub cache: bool,

    /// Track a disposable result so [`ContentManager::unload_all`] releases it
    #[builder(default = true)]
    pub manage: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            cache: true,
            manage: true,
        }
    }
}

type CacheKey = (Box<str>, TypeId);

type Value = Arc<dyn Any + Send + Sync>;

/// A disposable handle kept next to the value it was produced from
struct Tracked {
    value: Value,
    disposable: Arc<dyn Disposable>,
}

#[derive(Default)]
pub(crate) struct ManagerState {
    loaders: HashMap<u32, Box<dyn ErasedLoader>>,
    cache: HashMap<CacheKey, Value>,
    tracked: Vec<Tracked>,
    last_load_time: Duration,
}

impl ManagerState {
    /// Empty the cache and tracking list without running any disposal
    pub(crate) fn take_all(&mut self) -> Unloaded {
        Unloaded {
            cache: std::mem::take(&mut self.cache),
            tracked: std::mem::take(&mut self.tracked),
        }
    }
}

/// Content taken out of a manager, released once the manager lock is gone
///
/// Dispose callbacks may call back into the manager, so [`Unloaded::release`] must run
/// after the guard passed to [`ManagerState::take_all`] is dropped.
#[must_use]
pub(crate) struct Unloaded {
    cache: HashMap<CacheKey, Value>,
    tracked: Vec<Tracked>,
}

impl Unloaded {
    pub(crate) fn release(self) -> (usize, usize) {
        let cached = self.cache.len();
        drop(self.cache);

        let disposed = self.tracked.len();
        for item in self.tracked {
            item.disposable.dispose();
        }

        (cached, disposed)
    }
}

/// Loads items from one pack manifest and owns what it loads
///
/// Decoded values are cached by item name and requested type, so loading the same item
/// twice returns the same [`Arc`]. Disposable values are tracked and released by
/// [`ContentManager::unload_all`], by [`ContentManager::dispose`] or when the manager is
/// dropped. Hand a value back to the caller with [`ContentManager::stop_managing`] to keep
/// it alive past the manager.
///
/// A manager is meant to be driven by one caller at a time. Use one manager per worker
/// thread rather than sharing one.
///
/// ```no_run
/// # fn doit() -> cpak_content::error::Result<()> {
/// use cpak_content::{ByteArray, ContentManager, LoaderRegistry};
///
/// let manager = ContentManager::open("build/content.cpak", &LoaderRegistry::with_builtins())?;
/// let logo = manager.load::<ByteArray>("ui/logo.png")?;
/// let greeting = manager.load_localized::<String>("text/greeting", "en-US")?;
/// # Ok(())
/// # }
/// ```
pub struct ContentManager {
    manifest: Arc<PackManifest>,
    state: Arc<Mutex<ManagerState>>,
}

impl ContentManager {
    /// Create a manager over an already opened manifest
    pub fn new(manifest: Arc<PackManifest>) -> Self {
        ContentManager {
            manifest,
            state: Arc::default(),
        }
    }

    /// Open a manifest and create a manager over it
    ///
    /// Use [`crate::ContentServices::open_manager`] to share manifests between managers.
    pub fn open(path: impl AsRef<Path>, registry: &LoaderRegistry) -> Result<Self> {
        Ok(Self::new(Arc::new(PackManifest::open(path, registry)?)))
    }

    pub fn manifest(&self) -> &Arc<PackManifest> {
        &self.manifest
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<ManagerState>> {
        &self.state
    }

    /// Load an item as `T`, caching and tracking the result
    pub fn load<T: Content>(&self, name: &str) -> Result<Arc<T>> {
        self.load_with(name, LoadOptions::default())
    }

    /// Load an item as `T`, returning the cached value if there is one
    pub fn load_with<T: Content>(&self, name: &str, options: LoadOptions) -> Result<Arc<T>> {
        self.load_inner(name, options, true)
    }

    /// Decode an item again, replacing any cached value
    pub fn reload<T: Content>(&self, name: &str) -> Result<Arc<T>> {
        self.reload_with(name, LoadOptions::default())
    }

    pub fn reload_with<T: Content>(&self, name: &str, options: LoadOptions) -> Result<Arc<T>> {
        self.load_inner(name, options, false)
    }

    /// Load the best match for `locale`
    ///
    /// For `en-US` this tries `{name}.en-US`, then `{name}.en`, then `name`. Only a missing
    /// item moves on to the next candidate; any other failure is returned as is.
    pub fn load_localized<T: Content>(&self, name: &str, locale: &str) -> Result<Arc<T>> {
        for candidate in localized_names(name, locale) {
            match self.load::<T>(&candidate) {
                Err(e) if e.is_not_found() => {
                    trace!(candidate, "no localized item");
                    continue;
                }
                result => return result,
            }
        }
        self.load::<T>(name)
    }

    /// Read an item's decompressed bytes without going through a loader
    #[instrument(skip(self), err)]
    pub fn load_raw(&self, name: &str) -> Result<Vec<u8>> {
        self.manifest
            .get_item(name)
            .and_then(|item| ContentStream::open(&item)?.read_remaining())
            .map_err(|e| e.for_item(name))
    }

    /// Clear the cache and dispose every tracked value
    ///
    /// Returns how many values were cached and how many were disposed.
    pub fn unload_all(&self) -> (usize, usize) {
        let unloaded = self.state.lock().take_all();
        let (cached, disposed) = unloaded.release();
        debug!(cached, disposed, "unloaded content");
        (cached, disposed)
    }

    /// Stop caching and tracking `item`, optionally disposing it now
    ///
    /// Returns true if the manager was holding the item. Matching is by allocation, so a
    /// value whose [`Content::into_disposable`] hands out an inner handle is released too.
    pub fn stop_managing<T: Content>(&self, item: &Arc<T>, dispose: bool) -> bool {
        let target = Arc::as_ptr(item) as *const ();

        let found = {
            let mut state = self.state.lock();
            let before = state.cache.len() + state.tracked.len();
            state
                .cache
                .retain(|_, value| Arc::as_ptr(value) as *const () != target);
            state
                .tracked
                .retain(|tracked| Arc::as_ptr(&tracked.value) as *const () != target);
            before != state.cache.len() + state.tracked.len()
        };

        if dispose {
            if let Some(disposable) = Content::into_disposable(item.clone()) {
                disposable.dispose();
            }
        }

        found
    }

    /// Duration of the most recent load attempt, failed or not. Zero when it was served
    /// from the cache.
    pub fn last_load_time(&self) -> Duration {
        self.state.lock().last_load_time
    }

    /// Number of values in the object cache
    pub fn cached_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Number of values awaiting disposal
    pub fn tracked_count(&self) -> usize {
        self.state.lock().tracked.len()
    }

    /// Dispose every tracked value and drop the manager
    pub fn dispose(self) -> (usize, usize) {
        self.unload_all()
    }

    #[instrument(skip(self, options), fields(ty = type_name::<T>()), err)]
    fn load_inner<T: Content>(
        &self,
        name: &str,
        options: LoadOptions,
        read_cache: bool,
    ) -> Result<Arc<T>> {
        let key: CacheKey = (name.into(), TypeId::of::<T>());
        let mut state = self.state.lock();

        if read_cache {
            if let Some(value) = state.cache.get(&key).cloned() {
                if let Ok(value) = value.downcast::<T>() {
                    trace!("cache hit");
                    state.last_load_time = Duration::ZERO;
                    return Ok(value);
                }
            }
        }

        let started = Instant::now();
        let loaded = match self.decode::<T>(&mut state, name) {
            Ok(loaded) => loaded,
            Err(e) => {
                state.last_load_time = started.elapsed();
                return Err(e.for_item(name));
            }
        };

        let Loaded { value, disposable } = loaded;
        let typed = match value.clone().downcast::<T>() {
            Ok(typed) => typed,
            Err(_) => {
                state.last_load_time = started.elapsed();
                return Err(Error::TypeMismatch {
                    requested: type_name::<T>(),
                    produced: "another type",
                }
                .for_item(name));
            }
        };

        let replaced = if options.cache {
            state.cache.insert(key, value.clone())
        } else {
            None
        };
        if options.manage {
            if let Some(disposable) = disposable {
                state.tracked.push(Tracked { value, disposable });
            }
        }

        state.last_load_time = started.elapsed();
        debug!(elapsed = ?state.last_load_time, "loaded item");

        // a reload may drop the last handle to the old value
        drop(state);
        drop(replaced);

        Ok(typed)
    }

    fn decode<T: Content>(&self, state: &mut ManagerState, name: &str) -> Result<Loaded> {
        let item = self.manifest.get_item(name)?;
        let loader_id = item.entry().loader_id;

        let descriptor = self
            .manifest
            .loader(loader_id)
            .ok_or(LoaderResolutionError::Identifier(loader_id))?;

        if !descriptor.produces::<T>() {
            return Err(Error::TypeMismatch {
                requested: type_name::<T>(),
                produced: descriptor.output_type_name(),
            });
        }

        let loader = match state.loaders.entry(loader_id) {
            hash_map::Entry::Occupied(entry) => entry.into_mut(),
            hash_map::Entry::Vacant(entry) => {
                debug!(loader = descriptor.display_name(), "constructing loader");
                entry.insert(descriptor.construct()?)
            }
        };

        loader.reset();
        let mut stream = ContentStream::open(&item)?;
        let context = LoadContext::new(&item);
        let result = loader.load_erased(&mut stream, &context);
        drop(stream);

        result?.ok_or(Error::EmptyResult)
    }
}

impl Drop for ContentManager {
    fn drop(&mut self) {
        let unloaded = self.state.lock().take_all();
        unloaded.release();
    }
}

fn localized_names(name: &str, locale: &str) -> Vec<String> {
    let mut names = Vec::with_capacity(2);
    if locale.is_empty() {
        return names;
    }

    names.push(format!("{name}.{locale}"));
    if let Some((language, _)) = locale.split_once(['-', '_']) {
        if !language.is_empty() {
            names.push(format!("{name}.{language}"));
        }
    }
    names
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::manager::{localized_names, LoadOptions};

    #[test]
    fn localized_names_for_region() {
        assert_eq!(
            localized_names("greeting", "en-US"),
            vec!["greeting.en-US".to_string(), "greeting.en".to_string()]
        );
    }

    #[test]
    fn localized_names_for_language_only() {
        assert_eq!(localized_names("greeting", "fr"), vec!["greeting.fr"]);
        assert!(localized_names("greeting", "").is_empty());
    }

    #[test]
    fn load_options_default_to_cache_and_manage() {
        let options = LoadOptions::builder().build();
        assert!(options.cache);
        assert!(options.manage);

        let options = LoadOptions::builder().cache(false).build();
        assert!(!options.cache);
        assert!(options.manage);
    }
}
