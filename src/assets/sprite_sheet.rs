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
    std::sync::Arc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SpriteSize {
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SpriteRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SpriteFrame {
    pub tex: SpriteRect,
    pub src: SpriteRect,
    pub src_size: SpriteSize,

    /// Frame duration in milliseconds.
    pub duration: u32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SpriteAnimation {
    pub name: Box<str>,
    pub from: usize,
    pub to: usize,

    #[serde(default)]
    pub features: serde_json::Value,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SpriteSheetInfo {
    texture: Box<str>,
    frames: Arc<[SpriteFrame]>,

    #[serde(default = "default_distances")]
    frame_distances: Arc<[f32]>,

    #[serde(default = "default_animations")]
    animations: Arc<[SpriteAnimation]>,

    tex_size: SpriteSize,
}

fn default_distances() -> Arc<[f32]> {
    Arc::new([])
}

fn default_animations() -> Arc<[SpriteAnimation]> {
    Arc::new([])
}

/// Animated sprite frames over single texture.
#[derive(Clone, Debug)]
pub struct SpriteSheet {
    pub frames: Arc<[SpriteFrame]>,
    pub frame_distances: Arc<[f32]>,
    pub animations: Arc<[SpriteAnimation]>,
    pub tex_size: SpriteSize,
    pub texture: Ref<Texture>,
}

impl SpriteSheet {
    pub fn animation(&self, name: &str) -> Option<&SpriteAnimation> {
        self.animations.iter().find(|a| *a.name == *name)
    }

    /// Frames of the named animation.
    pub fn animation_frames(&self, name: &str) -> Option<&[SpriteFrame]> {
        let animation = self.animation(name)?;
        self.frames.get(animation.from..=animation.to)
    }
}

pub struct SpriteSheetLoader {
    stream: Option<AssetStream>,
    info: Option<SpriteSheetInfo>,
}

impl Loader for SpriteSheetLoader {
    type Decoded = SpriteSheet;

    fn load(&mut self, deps: &mut Dependencies<'_>) -> Result<LoadResult<SpriteSheet>, LoadError> {
        if let Some(mut stream) = self.stream.take() {
            let bytes = stream.read_all()?;
            let info: SpriteSheetInfo = serde_json::from_slice(&bytes).map_err(DecodeError::new)?;

            if let Some(animation) = info
                .animations
                .iter()
                .find(|a| a.from > a.to || a.to >= info.frames.len())
            {
                return Err(DecodeError::msg(format!(
                    "Animation `{}` frames {}..={} are out of {} frames",
                    animation.name,
                    animation.from,
                    animation.to,
                    info.frames.len(),
                ))
                .into());
            }

            self.info = Some(info);
        }

        let info = match &self.info {
            Some(info) => info,
            None => return Err(DecodeError::msg("Sprite sheet descriptor is consumed").into()),
        };

        let texture = match deps.require::<Texture>(&info.texture)? {
            Some(texture) => texture,
            None => return Ok(LoadResult::Pending),
        };

        match self.info.take() {
            Some(info) => Ok(LoadResult::Ready(SpriteSheet {
                frames: info.frames,
                frame_distances: info.frame_distances,
                animations: info.animations,
                tex_size: info.tex_size,
                texture,
            })),
            None => unreachable!(),
        }
    }
}

/// Factory of [`SpriteSheet`] assets.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpriteSheetFactory;

impl<B> Factory<B> for SpriteSheetFactory {
    type Asset = SpriteSheet;
    type Loader = SpriteSheetLoader;

    fn mime_type(&self) -> &str {
        mime::SPRITE_SHEET
    }

    fn new_loader(&self, _url: &AssetUrl, stream: AssetStream) -> SpriteSheetLoader {
        SpriteSheetLoader {
            stream: Some(stream),
            info: None,
        }
    }

    fn create_asset(&self, sheet: SpriteSheet, _builder: &mut B) -> Result<SpriteSheet, DecodeError> {
        Ok(sheet)
    }
}
