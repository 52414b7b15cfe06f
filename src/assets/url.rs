use {
    percent_encoding::percent_decode_str,
    std::{
        convert::Infallible,
        fmt::{self, Debug, Display},
        hash::{Hash, Hasher},
        str::FromStr,
    },
    url::Url,
};

/// Protocol assumed for paths without explicit scheme.
pub const DEFAULT_PROTOCOL: &str = "file";

const DATA_PROTOCOL: &str = "data";

/// Logical address of an asset.
///
/// Written as `<protocol>://<path>`. Paths without scheme use a default protocol.
/// Data URLs (`data:<mime>,<data>`) are recognized as well.
///
/// Two identifiers are equal when their protocol and normalized path are equal.
/// Explicit mime-type does not participate in equality,
/// it only bypasses mime-type sniffing of the opened stream.
#[derive(Clone)]
pub struct AssetUrl {
    protocol: Box<str>,
    path: Box<str>,
    mime: Option<Box<str>>,
}

impl AssetUrl {
    /// Returns identifier with given protocol and path.
    ///
    /// Dot segments are resolved and backslashes become separators.
    /// Identifiers that do not form a valid URL are kept verbatim.
    pub fn new(protocol: &str, path: &str) -> Self {
        if !protocol.eq_ignore_ascii_case(DATA_PROTOCOL) {
            if let Some(url) = rooted(protocol, path) {
                return url;
            }
        }

        AssetUrl {
            protocol: protocol.to_ascii_lowercase().into(),
            path: path.into(),
            mime: None,
        }
    }

    /// Parses identifier, using [`DEFAULT_PROTOCOL`] if scheme is omitted.
    pub fn parse(url: &str) -> Self {
        AssetUrl::parse_with_default(url, DEFAULT_PROTOCOL)
    }

    /// Parses identifier, using `default_protocol` if scheme is omitted.
    pub fn parse_with_default(url: &str, default_protocol: &str) -> Self {
        if let Some((scheme, path)) = url.split_once("://") {
            if let Some(url) = rooted(scheme, path) {
                return url;
            }
        }

        match url.parse::<Url>() {
            Ok(data) if data.scheme() == DATA_PROTOCOL => AssetUrl::from_data(&data),
            _ => AssetUrl::new(default_protocol, url),
        }
    }

    fn from_data(url: &Url) -> Self {
        let mut path = url.path().to_owned();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        AssetUrl {
            protocol: DATA_PROTOCOL.into(),
            path: path.into(),
            mime: None,
        }
    }

    /// Attaches explicit mime-type to this identifier.
    pub fn with_mime(mut self, mime: impl Into<Box<str>>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Explicit mime-type, if one was supplied.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Resolves `reference` relative to this identifier.
    ///
    /// References with a scheme are parsed as is.
    /// References starting with `/` are rooted in this identifier's protocol.
    /// Anything else is resolved against the directory of this identifier's path.
    pub fn join(&self, reference: &str) -> AssetUrl {
        if reference.contains("://") || reference.parse::<Url>().is_ok() {
            return AssetUrl::parse_with_default(reference, &self.protocol);
        }

        let base = match Url::parse(&format!("{}:///{}", self.protocol, self.path)) {
            Ok(base) if *self.protocol != *DATA_PROTOCOL => base,
            _ => return AssetUrl::new(&self.protocol, reference),
        };

        match resolve(&base, reference) {
            Some(url) => url,
            None => AssetUrl::new(&self.protocol, reference),
        }
    }
}

/// Resolves `path` from the root of `scheme`.
///
/// Returns `None` if `scheme` is not a valid URL scheme.
fn rooted(scheme: &str, path: &str) -> Option<AssetUrl> {
    let root = Url::parse(&format!("{}:///", scheme)).ok()?;
    let path = path.trim_start_matches(|c: char| c == '/' || c == '\\');
    resolve(&root, &format!("./{}", path))
}

/// Resolves `reference` against `base` and converts result back to identifier.
///
/// Host of a resolved absolute reference is the first segment of the path.
fn resolve(base: &Url, reference: &str) -> Option<AssetUrl> {
    let url = base.join(&reference.replace('\\', "/")).ok()?;

    let mut path = String::new();
    if let Some(host) = url.host_str() {
        path.push_str(host);
    }
    path.push_str(&percent_decode_str(url.path()).decode_utf8_lossy());
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Some(AssetUrl {
        protocol: url.scheme().into(),
        path: path.trim_start_matches('/').into(),
        mime: None,
    })
}

impl FromStr for AssetUrl {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Infallible> {
        Ok(AssetUrl::parse(s))
    }
}

impl PartialEq for AssetUrl {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol && self.path == other.path
    }
}

impl Eq for AssetUrl {}

impl Hash for AssetUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.path.hash(state);
    }
}

impl Display for AssetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self.protocol == *DATA_PROTOCOL {
            write!(f, "{}:{}", self.protocol, self.path)
        } else {
            write!(f, "{}://{}", self.protocol, self.path)
        }
    }
}

impl Debug for AssetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mime {
            None => write!(f, "`{}`", self),
            Some(mime) => write!(f, "`{}` ({})", self, mime),
        }
    }
}
