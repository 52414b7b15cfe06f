use {
    super::{
        mime,
        protocol::{AssetStream, Protocol},
    },
    std::{
        fs::File,
        io::{BufReader, Error, ErrorKind},
        path::{Path, PathBuf},
    },
};

/// Opens assets from file-system.
#[derive(Debug)]
pub struct FsProtocol {
    root: Option<PathBuf>,
}

impl FsProtocol {
    /// Scheme this protocol is registered under by default.
    pub const SCHEME: &'static str = "file";

    /// Returns new [`FsProtocol`] instance with no root provided.
    /// Root-less [`FsProtocol`] will interpret asset path as file-system path.
    pub const fn new() -> Self {
        FsProtocol { root: None }
    }

    /// Returns new [`FsProtocol`] instance with root provided.
    /// Rooted [`FsProtocol`] will interpret asset path as a path relative to root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        FsProtocol {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path),
            None => Path::new(path).to_owned(),
        }
    }
}

impl Protocol for FsProtocol {
    type Error = Error;

    #[tracing::instrument(skip(self))]
    fn open(&self, path: &str) -> Result<Option<AssetStream>, Error> {
        let fs_path = self.resolve(path);

        match File::open(&fs_path) {
            Ok(file) => {
                tracing::trace!("Opened `{}`", fs_path.display());
                let stream = AssetStream::new(BufReader::new(file));
                match mime::from_path(path) {
                    Some(mime) => Ok(Some(stream.with_mime(mime))),
                    None => Ok(Some(stream)),
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}
