use {
    super::{
        dataurl::DataUrlProtocol,
        fs::FsProtocol,
        loader::{DynFactory, Factory},
        protocol::{DynProtocol, Protocol},
    },
    hashbrown::HashMap,
    std::{path::PathBuf, sync::Arc},
};

/// Normalizes mime-type or scheme name for lookup.
///
/// Applied identically on insertion and lookup.
pub fn normalize(name: &str) -> Box<str> {
    name.trim().to_ascii_uppercase().into_boxed_str()
}

/// Immutable mapping of mime-types to factories and scheme names to protocols.
///
/// Lookups are case-insensitive.
/// Safe to share between any number of threads.
pub struct TypeRegistry<B> {
    factories: HashMap<Box<str>, Arc<dyn DynFactory<B>>>,
    protocols: HashMap<Box<str>, Arc<dyn DynProtocol>>,
}

impl<B> TypeRegistry<B>
where
    B: 'static,
{
    /// Returns [`TypeRegistryBuilder`] instance.
    pub fn builder() -> TypeRegistryBuilder<B> {
        TypeRegistryBuilder::new()
    }

    /// Returns factory registered for the mime-type.
    pub fn factory(&self, mime: &str) -> Option<&Arc<dyn DynFactory<B>>> {
        self.factories.get(&normalize(mime))
    }

    /// Returns protocol registered for the scheme.
    pub fn protocol(&self, scheme: &str) -> Option<&Arc<dyn DynProtocol>> {
        self.protocols.get(&normalize(scheme))
    }

    /// Adds protocol for the scheme unless one is registered already.
    pub(crate) fn ensure_protocol(&mut self, scheme: &str, protocol: impl Protocol) {
        self.protocols
            .entry(normalize(scheme))
            .or_insert_with(|| Arc::new(protocol));
    }
}

/// Builder for [`TypeRegistry`].
///
/// Registering second factory for the same mime-type or second protocol for the
/// same scheme replaces the previous one.
pub struct TypeRegistryBuilder<B> {
    factories: HashMap<Box<str>, Arc<dyn DynFactory<B>>>,
    protocols: HashMap<Box<str>, Arc<dyn DynProtocol>>,
}

impl<B> Default for TypeRegistryBuilder<B>
where
    B: 'static,
{
    fn default() -> Self {
        TypeRegistryBuilder::new()
    }
}

impl<B> TypeRegistryBuilder<B>
where
    B: 'static,
{
    /// Returns new [`TypeRegistryBuilder`] without factories and protocols.
    pub fn new() -> Self {
        TypeRegistryBuilder {
            factories: HashMap::new(),
            protocols: HashMap::new(),
        }
    }

    /// Adds factory for its mime-type.
    pub fn add_factory<F>(&mut self, factory: F) -> &mut Self
    where
        F: Factory<B>,
    {
        let mime = normalize(Factory::mime_type(&factory));
        if let Some(replaced) = self.factories.insert(mime, Arc::new(factory)) {
            tracing::debug!("Factory for `{}` replaced", replaced.mime_type());
        }
        self
    }

    /// Adds factory for its mime-type.
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Factory<B>,
    {
        self.add_factory(factory);
        self
    }

    /// Adds protocol for the scheme.
    pub fn add_protocol(&mut self, scheme: &str, protocol: impl Protocol) -> &mut Self {
        if self
            .protocols
            .insert(normalize(scheme), Arc::new(protocol))
            .is_some()
        {
            tracing::debug!("Protocol for `{}` replaced", scheme);
        }
        self
    }

    /// Adds protocol for the scheme.
    pub fn with_protocol(mut self, scheme: &str, protocol: impl Protocol) -> Self {
        self.add_protocol(scheme, protocol);
        self
    }

    /// Convenience method to add default protocols.
    /// Default protocols are [`FsProtocol`] with provided root and [`DataUrlProtocol`].
    pub fn add_default_protocols(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.add_protocol(FsProtocol::SCHEME, FsProtocol::with_root(root));
        self.add_protocol(DataUrlProtocol::SCHEME, DataUrlProtocol);
        self
    }

    /// Convenience method to add default protocols.
    /// Default protocols are [`FsProtocol`] with provided root and [`DataUrlProtocol`].
    pub fn with_default_protocols(mut self, root: impl Into<PathBuf>) -> Self {
        self.add_default_protocols(root);
        self
    }

    /// Builds and returns new [`TypeRegistry`] instance.
    pub fn build(self) -> TypeRegistry<B> {
        TypeRegistry {
            factories: self.factories,
            protocols: self.protocols,
        }
    }
}
