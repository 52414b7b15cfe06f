use {
    super::{
        mime,
        protocol::{AssetStream, Protocol},
    },
    hashbrown::HashMap,
    std::{convert::Infallible, path::Path, sync::Arc},
};

/// Single file stored in [`Pak`] archive.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PakEntry {
    pub path: Box<str>,

    #[serde(default)]
    pub mime: Option<Box<str>>,

    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

/// Archive of asset files.
///
/// Serialized with `bincode` as a sequence of [`PakEntry`].
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Pak {
    entries: Vec<PakEntry>,
}

impl Pak {
    pub fn new() -> Self {
        Pak::default()
    }

    /// Adds file to the archive.
    /// Mime-type will be sniffed from path extension when file is opened.
    pub fn add(&mut self, path: &str, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.push(PakEntry {
            path: path.into(),
            mime: None,
            bytes: bytes.into(),
        });
        self
    }

    /// Adds file with explicit mime-type to the archive.
    pub fn add_with_mime(
        &mut self,
        path: &str,
        mime: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.entries.push(PakEntry {
            path: path.into(),
            mime: Some(mime.into()),
            bytes: bytes.into(),
        });
        self
    }

    pub fn with(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.add(path, bytes);
        self
    }

    pub fn entries(&self) -> &[PakEntry] {
        &self.entries
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

struct Stored {
    mime: Option<Box<str>>,
    bytes: Arc<[u8]>,
}

/// Opens assets from [`Pak`] archive kept in memory.
///
/// When archive contains several files with the same path, the last one wins.
pub struct PakProtocol {
    files: HashMap<Box<str>, Stored>,
}

impl PakProtocol {
    /// Scheme this protocol is registered under by default.
    pub const SCHEME: &'static str = "pak";

    pub fn new(pak: Pak) -> Self {
        let files = pak
            .entries
            .into_iter()
            .map(|entry| {
                let path = entry.path.trim_start_matches('/').into();
                let stored = Stored {
                    mime: entry.mime,
                    bytes: entry.bytes.into(),
                };
                (path, stored)
            })
            .collect();

        PakProtocol { files }
    }

    /// Reads archive file from disk.
    #[tracing::instrument]
    pub fn open_file(path: &Path) -> eyre::Result<Self> {
        let bytes = std::fs::read(path)?;
        let pak = Pak::from_bytes(&bytes)?;
        tracing::debug!("Loaded pak with {} entries", pak.entries.len());
        Ok(PakProtocol::new(pak))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Protocol for PakProtocol {
    type Error = Infallible;

    fn open(&self, path: &str) -> Result<Option<AssetStream>, Infallible> {
        let stored = match self.files.get(path.trim_start_matches('/')) {
            None => return Ok(None),
            Some(stored) => stored,
        };

        let stream = AssetStream::new(std::io::Cursor::new(stored.bytes.clone()));
        let mime = stored.mime.as_deref().or_else(|| mime::from_path(path));

        match mime {
            Some(mime) => Ok(Some(stream.with_mime(mime))),
            None => Ok(Some(stream)),
        }
    }
}
