//! Asset loading facility.
//!
//! Assets are addressed by [`AssetUrl`], opened by a [`Protocol`] registered
//! for the identifier's scheme and decoded by a [`Factory`] registered for
//! the stream's mime-type.
//! [`AssetManager`] runs loaders on worker threads, caches results in
//! [`AssetStore`] and creates final resources on the thread that owns it.

mod dataurl;
mod deps;
mod error;
mod fs;
mod loader;
mod manager;
mod pak;
mod protocol;
mod registry;
mod store;
mod url;

pub mod font;
pub mod image;
pub mod layout;
pub mod mime;
pub mod sprite_sheet;

pub use self::{
    dataurl::{DataUrlError, DataUrlProtocol},
    deps::{Dependencies, DependencyContext, DependencyState},
    error::{DecodeError, Error, LoadError},
    fs::FsProtocol,
    loader::{AnyAsset, DynFactory, DynLoader, Factory, LoadResult, Loader},
    manager::{AssetHandle, AssetManager},
    pak::{Pak, PakEntry, PakProtocol},
    protocol::{AssetStream, DynProtocol, Protocol},
    registry::{normalize, TypeRegistry, TypeRegistryBuilder},
    store::{AssetStatus, AssetStore, Evicted, Lease, Ref},
    url::{AssetUrl, DEFAULT_PROTOCOL},
};
