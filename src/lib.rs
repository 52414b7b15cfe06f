//!
//! Asset facility of arcana engine.
//!
//! Assets are requested by identifier from any thread, decoded on a pool of
//! loader workers, shared through reference-counted [`assets::Ref`]s and
//! turned into final resources on the single thread that owns the
//! [`assets::AssetManager`].
//!
//! # Getting started
//!
//! Build a [`assets::TypeRegistry`] with protocols and factories,
//! create [`assets::AssetManager`] with [`cfg::Config`] and keep calling
//! [`assets::AssetManager::run_once`] on the owning thread.
//!

pub mod assets;
pub mod cfg;

/// Installs default eyre handler.
pub fn install_eyre_handler() {
    if let Err(err) = color_eyre::install() {
        panic!("Failed to install eyre report handler: {}", err);
    }
}

/// Installs default tracing subscriber.
pub fn install_tracing_subscriber() {
    use tracing_subscriber::layer::SubscriberExt as _;
    if let Err(err) = tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish()
            .with(tracing_error::ErrorLayer::default()),
    ) {
        panic!("Failed to install tracing subscriber: {}", err);
    }
}
