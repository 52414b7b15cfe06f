use super::{
    deps::Dependencies,
    error::{DecodeError, LoadError},
    font::Font,
    image::Texture,
    loader::{Factory, LoadResult, Loader},
    mime,
    protocol::AssetStream,
    store::Ref,
    url::AssetUrl,
};

#[derive(Debug, serde::Deserialize)]
enum NodeInfo {
    Panel {
        #[serde(default)]
        children: Vec<NodeInfo>,
    },
    Label {
        text: Box<str>,
        font: Box<str>,
    },
    Image {
        image: Box<str>,
    },
}

#[derive(Debug, serde::Deserialize)]
struct LayoutInfo {
    #[serde(default)]
    name: Option<Box<str>>,
    root: NodeInfo,
}

/// Node of UI layout tree.
#[derive(Clone, Debug)]
pub enum Node {
    Panel { children: Vec<Node> },
    Label { text: Box<str>, font: Ref<Font> },
    Image { texture: Ref<Texture> },
}

impl Node {
    /// Visits this node and all its descendants depth-first.
    pub fn walk(&self, f: &mut impl FnMut(&Node)) {
        f(self);
        if let Node::Panel { children } = self {
            for child in children {
                child.walk(f);
            }
        }
    }
}

/// UI layout tree with all referenced fonts and images loaded.
#[derive(Clone, Debug)]
pub struct Layout {
    pub name: Option<Box<str>>,
    pub root: Node,
}

pub struct LayoutLoader {
    stream: Option<AssetStream>,
    info: Option<LayoutInfo>,
}

impl Loader for LayoutLoader {
    type Decoded = Layout;

    fn load(&mut self, deps: &mut Dependencies<'_>) -> Result<LoadResult<Layout>, LoadError> {
        if let Some(mut stream) = self.stream.take() {
            let bytes = stream.read_all()?;
            let info = ron::de::from_bytes(&bytes).map_err(DecodeError::new)?;
            self.info = Some(info);
        }

        let info = match &self.info {
            Some(info) => info,
            None => return Err(DecodeError::msg("Layout descriptor is consumed").into()),
        };

        // Every reference is requested before returning, so all of them load in parallel.
        match resolve(&info.root, deps)? {
            None => Ok(LoadResult::Pending),
            Some(root) => Ok(LoadResult::Ready(Layout {
                name: info.name.clone(),
                root,
            })),
        }
    }
}

fn resolve(node: &NodeInfo, deps: &mut Dependencies<'_>) -> Result<Option<Node>, LoadError> {
    match node {
        NodeInfo::Panel { children } => {
            let mut resolved = Vec::with_capacity(children.len());
            let mut pending = false;

            for child in children {
                match resolve(child, deps)? {
                    Some(node) => resolved.push(node),
                    None => pending = true,
                }
            }

            if pending {
                Ok(None)
            } else {
                Ok(Some(Node::Panel { children: resolved }))
            }
        }
        NodeInfo::Label { text, font } => Ok(deps.require::<Font>(font)?.map(|font| Node::Label {
            text: text.clone(),
            font,
        })),
        NodeInfo::Image { image } => Ok(deps
            .require::<Texture>(image)?
            .map(|texture| Node::Image { texture })),
    }
}

/// Factory of [`Layout`] assets decoded from RON documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct LayoutFactory;

impl<B> Factory<B> for LayoutFactory {
    type Asset = Layout;
    type Loader = LayoutLoader;

    fn mime_type(&self) -> &str {
        mime::LAYOUT
    }

    fn new_loader(&self, _url: &AssetUrl, stream: AssetStream) -> LayoutLoader {
        LayoutLoader {
            stream: Some(stream),
            info: None,
        }
    }

    fn create_asset(&self, layout: Layout, _builder: &mut B) -> Result<Layout, DecodeError> {
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ron_tree_parses() {
        let info: LayoutInfo = ron::de::from_str(
            r#"(
                name: Some("menu"),
                root: Panel(children: [
                    Label(text: "Start", font: "fonts/mono.font"),
                    Image(image: "textures/logo.png"),
                    Panel(children: []),
                ]),
            )"#,
        )
        .unwrap();

        assert_eq!(info.name.as_deref(), Some("menu"));
        match info.root {
            NodeInfo::Panel { children } => assert_eq!(children.len(), 3),
            _ => panic!("root must be panel"),
        }
    }
}
