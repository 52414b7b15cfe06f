use {
    super::protocol::{AssetStream, Protocol},
    url::Url,
};

/// Opens asset data embedded directly into URL with [data scheme](https://tools.ietf.org/html/rfc2397).
///
/// Mime-type from the URL header is reported as sniffed mime-type of the stream.
#[derive(Debug)]
pub struct DataUrlProtocol;

impl DataUrlProtocol {
    /// Scheme this protocol is registered under by default.
    pub const SCHEME: &'static str = "data";
}

#[derive(Debug, thiserror::Error)]
pub enum DataUrlError {
    #[error("Data url is malformed")]
    InvalidUrl {
        #[from]
        source: url::ParseError,
    },

    #[error("Url head is not followed by the data")]
    MissingData,

    #[error("Failed to decode from base64")]
    DecodeBase64Error {
        #[from]
        source: base64::DecodeError,
    },
}

impl Protocol for DataUrlProtocol {
    type Error = DataUrlError;

    fn open(&self, path: &str) -> Result<Option<AssetStream>, DataUrlError> {
        let url = format!("data:{}", path).parse::<Url>()?;
        if url.scheme() != Self::SCHEME {
            return Ok(None);
        }

        let dataurl = url.path().as_bytes();
        let comma = dataurl
            .iter()
            .position(|&b| b == b',')
            .ok_or(DataUrlError::MissingData)?;

        let head = &url.path()[..comma];
        let data = &dataurl[comma + 1..];

        let (mime, bytes) = match head.strip_suffix(";base64") {
            Some(mime) => (mime, base64::decode(data)?),
            None => (head, percent_encoding::percent_decode(data).collect()),
        };

        // Parameters such as `charset` do not select a decoder.
        let mime = mime.split(';').next().unwrap_or("").trim();

        let stream = AssetStream::from_bytes(bytes);
        if mime.is_empty() {
            Ok(Some(stream))
        } else {
            Ok(Some(stream.with_mime(mime)))
        }
    }
}
