use {
    super::error::DecodeError,
    std::{
        fmt::{self, Debug},
        io::{self, Cursor, Read},
    },
};

/// Byte source opened by a [`Protocol`] for single load attempt.
///
/// Carries mime-type sniffed by the protocol, if any.
/// Stream is dropped as soon as the load attempt finishes.
pub struct AssetStream {
    mime: Option<Box<str>>,
    reader: Box<dyn Read + Send>,
}

impl AssetStream {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        AssetStream {
            mime: None,
            reader: Box::new(reader),
        }
    }

    /// Returns stream over in-memory bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        AssetStream::new(Cursor::new(bytes.into()))
    }

    /// Attaches sniffed mime-type to the stream.
    pub fn with_mime(mut self, mime: impl Into<Box<str>>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Mime-type sniffed by the protocol.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Reads remaining bytes of the stream.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Read for AssetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Debug for AssetStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetStream")
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

/// Named source capability that turns asset path into a byte stream.
pub trait Protocol: Send + Sync + 'static {
    /// Error that may occur opening the stream.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens stream for the asset at `path`.
    /// Returns `Ok(None)` if there is no asset at `path`.
    fn open(&self, path: &str) -> Result<Option<AssetStream>, Self::Error>;
}

/// Object-safe version of [`Protocol`] stored in the registry.
pub trait DynProtocol: Send + Sync + 'static {
    fn open(&self, path: &str) -> Result<Option<AssetStream>, DecodeError>;
}

impl<P> DynProtocol for P
where
    P: Protocol,
{
    fn open(&self, path: &str) -> Result<Option<AssetStream>, DecodeError> {
        Protocol::open(self, path).map_err(DecodeError::new)
    }
}
