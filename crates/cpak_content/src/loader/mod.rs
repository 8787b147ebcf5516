//! Loader traits, descriptors and the registry that maps names to them

pub mod builtin;

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    fmt::{self, Debug},
    sync::Arc,
};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    error::{Error, LoaderResolutionError, Result},
    manifest::Item,
    stream::ContentStream,
};

pub use builtin::{
    ByteArray, ByteArrayLoader, StringTable, StringTableLoader, TextLoader, BYTE_ARRAY_LOADER_ID,
    STRING_TABLE_LOADER_ID, TEXT_LOADER_ID,
};

/// A value a loader can produce
///
/// Content that holds releasable resources (GPU handles, audio voices) returns itself from
/// [`Content::into_disposable`] so a [`crate::ContentManager`] can track and release it.
pub trait Content: Any + Send + Sync {
    fn into_disposable(self: Arc<Self>) -> Option<Arc<dyn Disposable>> {
        None
    }
}

/// Content with resources that must be released explicitly
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// What a loader is told about the item it is decoding
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    item_name: &'a str,
    is_compressed: bool,
    data_size: u64,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(item: &'a Item) -> Self {
        LoadContext {
            item_name: item.name(),
            is_compressed: item.entry().is_compressed(),
            data_size: item.entry().uncompressed_size as u64,
        }
    }

    pub fn item_name(&self) -> &str {
        self.item_name
    }

    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }

    /// Uncompressed size of the item
    pub fn data_size(&self) -> u64 {
        self.data_size
    }
}

/// Decodes the bytes of one kind of item into a runtime value
///
/// A [`crate::ContentManager`] keeps one instance per loader identifier and calls
/// [`ContentLoader::reset`] before every [`ContentLoader::load`]. The stream is only
/// borrowed for the call; use [`ContentStream::duplicate`] to keep reading afterwards.
pub trait ContentLoader: Send + 'static {
    type Output: Content;

    /// Clear any state left over from the previous item
    fn reset(&mut self) {}

    /// Decode one item. Returning `Ok(None)` is reported as [`Error::EmptyResult`].
    fn load(
        &mut self,
        stream: &mut ContentStream,
        context: &LoadContext<'_>,
    ) -> Result<Option<Self::Output>>;
}

pub(crate) struct Loaded {
    pub value: Arc<dyn Any + Send + Sync>,
    pub disposable: Option<Arc<dyn Disposable>>,
}

pub(crate) trait ErasedLoader: Send {
    fn reset(&mut self);

    fn load_erased(
        &mut self,
        stream: &mut ContentStream,
        context: &LoadContext<'_>,
    ) -> Result<Option<Loaded>>;
}

impl<L: ContentLoader> ErasedLoader for L {
    fn reset(&mut self) {
        ContentLoader::reset(self)
    }

    fn load_erased(
        &mut self,
        stream: &mut ContentStream,
        context: &LoadContext<'_>,
    ) -> Result<Option<Loaded>> {
        Ok(self.load(stream, context)?.map(|output| {
            let value = Arc::new(output);
            let disposable = Content::into_disposable(value.clone());
            Loaded { value, disposable }
        }))
    }
}

type Constructor =
    Arc<dyn Fn() -> core::result::Result<Box<dyn ErasedLoader>, String> + Send + Sync>;

/// Describes a loader: its identifier, display name, output type and how to build it
#[derive(Clone)]
pub struct LoaderDescriptor {
    identifier: u32,
    display_name: Arc<str>,
    output_type: TypeId,
    output_type_name: &'static str,
    construct: Constructor,
}

impl Debug for LoaderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LoaderDescriptor")
            .field("identifier", &self.identifier)
            .field("display_name", &self.display_name)
            .field("output", &self.output_type_name)
            .finish()
    }
}

impl LoaderDescriptor {
    /// Describe a loader built with [`Default`]
    pub fn new<L: ContentLoader + Default>(
        identifier: u32,
        display_name: impl Into<Arc<str>>,
    ) -> Self {
        Self::with_constructor(identifier, display_name, || Ok::<L, std::convert::Infallible>(L::default()))
    }

    /// Describe a loader whose construction can fail
    pub fn with_constructor<L, F, E>(
        identifier: u32,
        display_name: impl Into<Arc<str>>,
        construct: F,
    ) -> Self
    where
        L: ContentLoader,
        F: Fn() -> core::result::Result<L, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        LoaderDescriptor {
            identifier,
            display_name: display_name.into(),
            output_type: TypeId::of::<L::Output>(),
            output_type_name: type_name::<L::Output>(),
            construct: Arc::new(move || {
                construct()
                    .map(|loader| Box::new(loader) as Box<dyn ErasedLoader>)
                    .map_err(|e| e.to_string())
            }),
        }
    }

    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Name of the type this loader produces
    pub fn output_type_name(&self) -> &'static str {
        self.output_type_name
    }

    /// Whether this loader produces values of type `T`
    pub fn produces<T: Any>(&self) -> bool {
        self.output_type == TypeId::of::<T>()
    }

    pub(crate) fn construct(&self) -> Result<Box<dyn ErasedLoader>> {
        (self.construct)().map_err(|reason| {
            LoaderResolutionError::Construction {
                name: self.display_name.to_string(),
                reason,
            }
            .into()
        })
    }
}

/// Append-only table of known loaders
///
/// Registration never constructs a loader. Instances are created lazily by each
/// [`crate::ContentManager`], so decode state is never shared between managers.
#[derive(Debug, Clone, Default)]
pub struct LoaderRegistry {
    loaders: IndexMap<u32, LoaderDescriptor>,
    names: HashMap<Arc<str>, u32>,
}

impl LoaderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding [`ByteArrayLoader`], [`TextLoader`] and [`StringTableLoader`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin::descriptors() {
            let registered = registry.register(descriptor);
            debug_assert!(registered.is_ok(), "built-in loaders collide: {registered:?}");
        }
        registry
    }

    /// Add a loader, rejecting identifier or display name collisions
    pub fn register(&mut self, descriptor: LoaderDescriptor) -> Result<()> {
        if self.loaders.contains_key(&descriptor.identifier)
            || self.names.contains_key(&descriptor.display_name)
        {
            return Err(Error::DuplicateLoader {
                identifier: descriptor.identifier,
                name: descriptor.display_name.to_string(),
            });
        }

        debug!(
            identifier = descriptor.identifier,
            name = %descriptor.display_name,
            output = descriptor.output_type_name,
            "registered loader"
        );

        self.names
            .insert(descriptor.display_name.clone(), descriptor.identifier);
        self.loaders.insert(descriptor.identifier, descriptor);
        Ok(())
    }

    pub fn resolve_id(&self, identifier: u32) -> Option<&LoaderDescriptor> {
        self.loaders.get(&identifier)
    }

    pub fn resolve_name(&self, name: &str) -> Option<&LoaderDescriptor> {
        self.names
            .get(name)
            .and_then(|identifier| self.loaders.get(identifier))
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered descriptors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &LoaderDescriptor> {
        self.loaders.values()
    }
}

#[cfg(test)]
mod test {
    use std::convert::Infallible;

    use crate::{
        error::{Error, Result},
        loader::{
            builtin, ByteArray, ByteArrayLoader, ContentLoader, LoadContext, LoaderDescriptor,
            LoaderRegistry, TextLoader, BYTE_ARRAY_LOADER_ID,
        },
        stream::ContentStream,
    };

    struct NeverLoader;

    impl ContentLoader for NeverLoader {
        type Output = ByteArray;

        fn load(
            &mut self,
            _stream: &mut ContentStream,
            _context: &LoadContext<'_>,
        ) -> Result<Option<ByteArray>> {
            Ok(None)
        }
    }

    #[test]
    fn builtins_resolve_by_id_and_name() {
        let registry = LoaderRegistry::with_builtins();
        assert_eq!(registry.len(), 3);

        let by_id = registry.resolve_id(BYTE_ARRAY_LOADER_ID);
        let by_name = registry.resolve_name("ByteArray");
        assert!(by_id.is_some());
        assert_eq!(
            by_id.map(|d| d.display_name()),
            by_name.map(|d| d.display_name())
        );
        assert!(registry.resolve_name("Texture").is_none());
        assert!(registry.resolve_id(99).is_none());
    }

    #[test]
    fn builtin_descriptors_register_cleanly() -> Result<()> {
        let mut registry = LoaderRegistry::new();
        for descriptor in builtin::descriptors() {
            registry.register(descriptor)?;
        }
        assert_eq!(registry.len(), 3);

        Ok(())
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let mut registry = LoaderRegistry::with_builtins();
        let result = registry.register(LoaderDescriptor::new::<TextLoader>(
            BYTE_ARRAY_LOADER_ID,
            "OtherText",
        ));
        assert!(matches!(result, Err(Error::DuplicateLoader { identifier: 1, .. })));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_display_name_is_rejected() {
        let mut registry = LoaderRegistry::with_builtins();
        let result = registry.register(LoaderDescriptor::new::<ByteArrayLoader>(40, "Text"));
        assert!(matches!(result, Err(Error::DuplicateLoader { .. })));
        assert!(registry.resolve_id(40).is_none());
    }

    #[test]
    fn descriptor_declares_output_type() {
        let descriptor = LoaderDescriptor::new::<TextLoader>(7, "Notes");
        assert!(descriptor.produces::<String>());
        assert!(!descriptor.produces::<ByteArray>());
    }

    #[test]
    fn failing_constructor_reports_loader_name() {
        let descriptor = LoaderDescriptor::with_constructor(8, "Broken", || {
            Err::<NeverLoader, _>("missing codec")
        });
        let error = descriptor.construct().err().map(|e| e.to_string());
        assert_eq!(
            error.as_deref(),
            Some("loader Broken could not be constructed: missing codec")
        );

        let working =
            LoaderDescriptor::with_constructor(9, "Works", || Ok::<_, Infallible>(NeverLoader));
        assert!(working.construct().is_ok());
    }
}
