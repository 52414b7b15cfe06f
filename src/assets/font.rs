use {
    super::{
        deps::Dependencies,
        error::{DecodeError, LoadError},
        image::Texture,
        loader::{Factory, LoadResult, Loader},
        mime,
        protocol::AssetStream,
        store::Ref,
        url::AssetUrl,
    },
    hashbrown::HashMap,
};

/// Glyph rectangle in the atlas texture.
#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize)]
pub struct Glyph {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,

    #[serde(default)]
    pub advance: f32,
}

#[derive(Debug, serde::Deserialize)]
struct FontInfo {
    atlas: Box<str>,

    #[serde(default = "default_size")]
    size: f32,

    glyphs: HashMap<char, Glyph>,
}

fn default_size() -> f32 {
    16.0
}

/// Bitmap font.
#[derive(Clone, Debug)]
pub struct Font {
    atlas: Ref<Texture>,
    size: f32,
    glyphs: HashMap<char, Glyph>,
}

impl Font {
    pub fn atlas(&self) -> &Ref<Texture> {
        &self.atlas
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn glyph(&self, c: char) -> Option<&Glyph> {
        self.glyphs.get(&c)
    }
}

pub struct FontLoader {
    stream: Option<AssetStream>,
    info: Option<FontInfo>,
}

impl Loader for FontLoader {
    type Decoded = Font;

    fn load(&mut self, deps: &mut Dependencies<'_>) -> Result<LoadResult<Font>, LoadError> {
        if let Some(mut stream) = self.stream.take() {
            let bytes = stream.read_all()?;
            let info = serde_json::from_slice(&bytes).map_err(DecodeError::new)?;
            self.info = Some(info);
        }

        let info = match &self.info {
            Some(info) => info,
            None => return Err(DecodeError::msg("Font descriptor is consumed").into()),
        };

        let atlas = match deps.require::<Texture>(&info.atlas)? {
            Some(atlas) => atlas,
            None => return Ok(LoadResult::Pending),
        };

        match self.info.take() {
            Some(info) => Ok(LoadResult::Ready(Font {
                atlas,
                size: info.size,
                glyphs: info.glyphs,
            })),
            None => unreachable!(),
        }
    }
}

/// Factory of [`Font`] assets.
///
/// Font descriptor is JSON document that names atlas texture
/// relative to itself and maps characters to atlas rectangles.
#[derive(Clone, Copy, Debug, Default)]
pub struct FontFactory;

impl<B> Factory<B> for FontFactory {
    type Asset = Font;
    type Loader = FontLoader;

    fn mime_type(&self) -> &str {
        mime::FONT
    }

    fn new_loader(&self, _url: &AssetUrl, stream: AssetStream) -> FontLoader {
        FontLoader {
            stream: Some(stream),
            info: None,
        }
    }

    fn create_asset(&self, font: Font, _builder: &mut B) -> Result<Font, DecodeError> {
        Ok(font)
    }
}
