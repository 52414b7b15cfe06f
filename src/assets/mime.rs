//! Mime-types of asset formats known to this crate
//! and sniffing of mime-type from path extension.

pub const PNG: &str = "image/png";
pub const FONT: &str = "application/x-font";
pub const SPRITE_SHEET: &str = "application/x-sprite-sheet";
pub const LAYOUT: &str = "application/x-layout";
pub const JSON: &str = "application/json";
pub const RON: &str = "application/ron";

/// Guesses mime-type from extension of the path.
pub fn from_path(path: &str) -> Option<&'static str> {
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;

    match &*ext.to_ascii_lowercase() {
        "png" => Some(PNG),
        "font" => Some(FONT),
        "anim" => Some(SPRITE_SHEET),
        "layout" => Some(LAYOUT),
        "json" => Some(JSON),
        "ron" => Some(RON),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_sniffing() {
        assert_eq!(from_path("textures/init.png"), Some(PNG));
        assert_eq!(from_path("textures/INIT.PNG"), Some(PNG));
        assert_eq!(from_path("ui/main.layout"), Some(LAYOUT));
        assert_eq!(from_path("some.dir/readme"), None);
        assert_eq!(from_path("noext"), None);
    }
}
