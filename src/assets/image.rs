use {
    super::{
        deps::Dependencies,
        error::{DecodeError, LoadError},
        loader::{Factory, LoadResult, Loader},
        mime,
        protocol::AssetStream,
        url::AssetUrl,
    },
    image::{load_from_memory_with_format, ImageFormat},
};

/// Identifier of an image allocated by [`TextureAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ImageId(pub u64);

/// Decoded RGBA8 pixels.
#[derive(Clone)]
pub struct Pixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for Pixels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pixels")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Host graphics context that owns image memory.
///
/// Implemented by the owning-thread context of the asset manager.
pub trait TextureAllocator {
    fn create_image(&mut self, pixels: &Pixels) -> Result<ImageId, DecodeError>;

    fn destroy_image(&mut self, id: ImageId);
}

/// Texture asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Texture {
    pub image: ImageId,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum TextureError {
    #[error("texture has zero size")]
    ZeroSize,

    #[error("texture size {width}x{height} is not power of two")]
    NotPowerOfTwo { width: u32, height: u32 },
}

pub struct TextureLoader {
    stream: Option<AssetStream>,
}

impl Loader for TextureLoader {
    type Decoded = Pixels;

    fn load(&mut self, _deps: &mut Dependencies<'_>) -> Result<LoadResult<Pixels>, LoadError> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => return Err(DecodeError::msg("Texture stream is consumed").into()),
        };

        let bytes = stream.read_all()?;
        let image = load_from_memory_with_format(&bytes, ImageFormat::Png).map_err(DecodeError::new)?;

        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(DecodeError::new(TextureError::ZeroSize).into());
        }
        if !width.is_power_of_two() || !height.is_power_of_two() {
            return Err(DecodeError::new(TextureError::NotPowerOfTwo { width, height }).into());
        }

        tracing::trace!("Decoded {}x{} image", width, height);

        Ok(LoadResult::Ready(Pixels {
            width,
            height,
            rgba: image.into_rgba8().into_raw(),
        }))
    }
}

/// Factory of [`Texture`] assets decoded from PNG images.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextureFactory;

impl<B> Factory<B> for TextureFactory
where
    B: TextureAllocator,
{
    type Asset = Texture;
    type Loader = TextureLoader;

    fn mime_type(&self) -> &str {
        mime::PNG
    }

    fn new_loader(&self, _url: &AssetUrl, stream: AssetStream) -> TextureLoader {
        TextureLoader {
            stream: Some(stream),
        }
    }

    fn create_asset(&self, pixels: Pixels, builder: &mut B) -> Result<Texture, DecodeError> {
        let image = builder.create_image(&pixels)?;
        Ok(Texture {
            image,
            width: pixels.width,
            height: pixels.height,
        })
    }

    fn destroy_asset(&self, texture: Texture, builder: &mut B) {
        builder.destroy_image(texture.image);
    }
}
