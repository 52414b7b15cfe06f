use {
    super::{
        deps::Dependencies,
        error::{DecodeError, LoadError},
        protocol::AssetStream,
        url::AssetUrl,
    },
    std::{
        any::{type_name, Any},
        sync::Arc,
    },
};

/// Finalized asset resource as stored in the cache.
pub type AnyAsset = Arc<dyn Any + Send + Sync>;

/// Outcome of single [`Loader::load`] invocation.
#[derive(Debug)]
pub enum LoadResult<D> {
    /// Asset is decoded.
    Ready(D),

    /// Loader waits for dependencies it requested.
    /// It will be invoked again once all of them are resolved.
    Pending,
}

/// Decodes single asset.
///
/// Runs on loader worker. `load` is invoked again after every
/// [`LoadResult::Pending`] until it returns `Ready` or an error,
/// so implementations must consume and cache stream bytes on the first pass.
pub trait Loader: Send + 'static {
    /// Decoded representation handed to [`Factory::create_asset`].
    type Decoded: Send + 'static;

    fn load(&mut self, deps: &mut Dependencies<'_>) -> Result<LoadResult<Self::Decoded>, LoadError>;
}

/// Decoder of assets of single mime-type.
///
/// `B` is the context owned by the resource-owning thread.
pub trait Factory<B>: Send + Sync + 'static {
    /// Finalized resource type.
    type Asset: Send + Sync + 'static;

    type Loader: Loader;

    /// Mime-type this factory decodes.
    fn mime_type(&self) -> &str;

    /// Returns loader for asset opened from `stream`.
    fn new_loader(&self, url: &AssetUrl, stream: AssetStream) -> Self::Loader;

    /// Turns decoded representation into the final resource.
    ///
    /// Always called on the owning thread. Must not block on I/O.
    fn create_asset(
        &self,
        decoded: <Self::Loader as Loader>::Decoded,
        builder: &mut B,
    ) -> Result<Self::Asset, DecodeError>;

    /// Destroys resource after its last reference is released.
    ///
    /// Always called on the owning thread.
    fn destroy_asset(&self, asset: Self::Asset, builder: &mut B) {
        let _ = builder;
        drop(asset);
    }
}

/// Object-safe version of [`Loader`].
pub trait DynLoader: Send {
    fn load(
        &mut self,
        deps: &mut Dependencies<'_>,
    ) -> Result<LoadResult<Box<dyn Any + Send>>, LoadError>;
}

impl<L> DynLoader for L
where
    L: Loader,
{
    fn load(
        &mut self,
        deps: &mut Dependencies<'_>,
    ) -> Result<LoadResult<Box<dyn Any + Send>>, LoadError> {
        match Loader::load(self, deps)? {
            LoadResult::Ready(decoded) => Ok(LoadResult::Ready(Box::new(decoded))),
            LoadResult::Pending => Ok(LoadResult::Pending),
        }
    }
}

/// Object-safe version of [`Factory`] stored in the registry.
pub trait DynFactory<B>: Send + Sync + 'static {
    fn mime_type(&self) -> &str;

    fn asset_type_name(&self) -> &'static str;

    fn new_loader(&self, url: &AssetUrl, stream: AssetStream) -> Box<dyn DynLoader>;

    fn create_asset(
        &self,
        decoded: Box<dyn Any + Send>,
        builder: &mut B,
    ) -> Result<AnyAsset, DecodeError>;

    fn destroy_asset(&self, asset: AnyAsset, builder: &mut B);
}

impl<B, F> DynFactory<B> for F
where
    F: Factory<B>,
{
    fn mime_type(&self) -> &str {
        Factory::mime_type(self)
    }

    fn asset_type_name(&self) -> &'static str {
        type_name::<F::Asset>()
    }

    fn new_loader(&self, url: &AssetUrl, stream: AssetStream) -> Box<dyn DynLoader> {
        Box::new(Factory::new_loader(self, url, stream))
    }

    fn create_asset(
        &self,
        decoded: Box<dyn Any + Send>,
        builder: &mut B,
    ) -> Result<AnyAsset, DecodeError> {
        let decoded = match decoded.downcast::<<F::Loader as Loader>::Decoded>() {
            Ok(decoded) => *decoded,
            Err(_) => unreachable!("Decoded value produced by foreign loader"),
        };
        let asset = Factory::create_asset(self, decoded, builder)?;
        Ok(Arc::new(asset))
    }

    fn destroy_asset(&self, asset: AnyAsset, builder: &mut B) {
        let asset = match asset.downcast::<F::Asset>() {
            Ok(asset) => asset,
            Err(_) => unreachable!("Asset produced by foreign factory"),
        };

        match Arc::try_unwrap(asset) {
            Ok(asset) => Factory::destroy_asset(self, asset, builder),
            Err(_) => {
                tracing::warn!(
                    "Asset `{}` is still shared on teardown",
                    type_name::<F::Asset>()
                );
            }
        }
    }
}
