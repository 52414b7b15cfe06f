use {
    super::url::AssetUrl,
    std::{
        fmt::{self, Debug, Display},
        sync::Arc,
    },
};

/// Type-erased error produced while decoding asset bytes
/// or creating the final resource.
///
/// Cheap to clone, so single failure can be handed to every waiter.
#[derive(Clone)]
#[repr(transparent)]
pub struct DecodeError(Arc<dyn std::error::Error + Send + Sync>);

impl DecodeError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DecodeError(Arc::new(error))
    }

    /// Returns error with plain message.
    pub fn msg(message: impl Into<Box<str>>) -> Self {
        DecodeError::new(Message(message.into()))
    }
}

impl Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&*self.0)
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        DecodeError::new(err)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(Box<str>);

/// Error of an asset request.
///
/// Every requester of a failed asset observes the same error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("no protocol registered for scheme `{0}`")]
    NoProtocol(Box<str>),

    #[error("no factory registered for mime-type `{0}`")]
    NoFactory(Box<str>),

    #[error("asset `{url}` not found")]
    Missing { url: AssetUrl },

    #[error("mime-type of asset `{url}` is unknown")]
    NoMimeType { url: AssetUrl },

    #[error("failed to decode asset `{url}`")]
    Decode {
        url: AssetUrl,
        #[source]
        source: DecodeError,
    },

    #[error("dependency `{dependency}` of asset `{url}` failed")]
    DependencyFailed {
        url: AssetUrl,
        dependency: AssetUrl,
        #[source]
        source: Box<Error>,
    },

    #[error("asset `{url}` depends on `{dependency}` which waits for `{url}`")]
    DependencyCycle { url: AssetUrl, dependency: AssetUrl },

    #[error("asset manager was dropped before asset `{url}` was finalized")]
    Abandoned { url: AssetUrl },

    #[error("asset `{url}` is not of type `{expected}`")]
    TypeMismatch {
        url: AssetUrl,
        expected: &'static str,
    },
}

impl Error {
    /// Returns `true` for errors that mean the asset could not be located
    /// or no decoder exists for it.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NoProtocol(_)
                | Error::NoFactory(_)
                | Error::Missing { .. }
                | Error::NoMimeType { .. }
        )
    }

    /// Returns `true` if asset bytes were found but could not be turned into a resource.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }

    /// Returns `true` if this asset failed because an asset it depends on failed.
    pub fn is_dependency_failed(&self) -> bool {
        matches!(
            self,
            Error::DependencyFailed { .. } | Error::DependencyCycle { .. }
        )
    }
}

/// Error returned by [`Loader::load`](super::Loader::load).
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("dependency `{url}` failed")]
    Dependency {
        url: AssetUrl,
        #[source]
        source: Error,
    },
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        LoadError::Decode(DecodeError::new(err))
    }
}

impl LoadError {
    pub(crate) fn into_error(self, url: &AssetUrl) -> Error {
        match self {
            LoadError::Decode(source) => Error::Decode {
                url: url.clone(),
                source,
            },
            LoadError::Dependency {
                url: dependency,
                source,
            } => Error::DependencyFailed {
                url: url.clone(),
                dependency,
                source: Box::new(source),
            },
        }
    }
}
