use {
    arcana_assets::{
        assets::{
            font::{Font, FontFactory},
            image::{ImageId, Pixels, Texture, TextureAllocator, TextureFactory},
            layout::{Layout, LayoutFactory, Node},
            sprite_sheet::{SpriteSheet, SpriteSheetFactory},
            AssetStatus, AssetStream, AssetUrl, DecodeError, Dependencies, Error, Factory,
            LoadError, LoadResult, Loader, Pak, PakProtocol, Protocol, Ref, TypeRegistry,
        },
        cfg::Config,
    },
    image::{codecs::png::PngEncoder, ColorType, ImageEncoder},
    std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread::{self, ThreadId},
        time::Duration,
    },
};

/// Owning-thread context that records where images are created and destroyed.
struct Host {
    next: u64,
    created: Vec<(ImageId, ThreadId)>,
    destroyed: Vec<(ImageId, ThreadId)>,
}

impl Host {
    fn new() -> Self {
        Host {
            next: 0,
            created: Vec::new(),
            destroyed: Vec::new(),
        }
    }
}

impl TextureAllocator for Host {
    fn create_image(&mut self, _pixels: &Pixels) -> Result<ImageId, DecodeError> {
        self.next += 1;
        let id = ImageId(self.next);
        self.created.push((id, thread::current().id()));
        Ok(id)
    }

    fn destroy_image(&mut self, id: ImageId) {
        self.destroyed.push((id, thread::current().id()));
    }
}

/// Pak protocol that counts opened streams.
struct Counting {
    pak: PakProtocol,
    opens: Arc<AtomicUsize>,
}

impl Protocol for Counting {
    type Error = Infallible;

    fn open(&self, path: &str) -> Result<Option<AssetStream>, Infallible> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Protocol::open(&self.pak, path)
    }
}

/// Asset that links to another asset of the same kind.
#[derive(Debug)]
struct Link {
    target: Option<Ref<Link>>,

    /// Number of dependencies in the load attempt when link was decoded.
    context_len: usize,
}

struct LinkLoader {
    stream: Option<AssetStream>,
    target: Option<String>,
}

impl Loader for LinkLoader {
    type Decoded = Link;

    fn load(&mut self, deps: &mut Dependencies<'_>) -> Result<LoadResult<Link>, LoadError> {
        if let Some(mut stream) = self.stream.take() {
            let bytes = stream.read_all()?;
            let target = String::from_utf8(bytes).map_err(DecodeError::new)?;
            self.target = Some(target.trim().to_owned()).filter(|t| !t.is_empty());
        }

        let target = match &self.target {
            None => None,
            Some(target) => match deps.require::<Link>(target)? {
                None => return Ok(LoadResult::Pending),
                Some(target) => Some(target),
            },
        };

        Ok(LoadResult::Ready(Link {
            target,
            context_len: deps.context().len(),
        }))
    }
}

const LINK: &str = "application/x-link";

struct LinkFactory;

impl Factory<Host> for LinkFactory {
    type Asset = Link;
    type Loader = LinkLoader;

    fn mime_type(&self) -> &str {
        LINK
    }

    fn new_loader(&self, _url: &AssetUrl, stream: AssetStream) -> LinkLoader {
        LinkLoader {
            stream: Some(stream),
            target: None,
        }
    }

    fn create_asset(&self, link: Link, _builder: &mut Host) -> Result<Link, DecodeError> {
        Ok(link)
    }
}

/// Loader that never becomes ready and never waits for anything.
struct Stalled;

impl Loader for Stalled {
    type Decoded = ();

    fn load(&mut self, _deps: &mut Dependencies<'_>) -> Result<LoadResult<()>, LoadError> {
        Ok(LoadResult::Pending)
    }
}

struct StalledFactory;

impl Factory<Host> for StalledFactory {
    type Asset = ();
    type Loader = Stalled;

    fn mime_type(&self) -> &str {
        "application/x-stalled"
    }

    fn new_loader(&self, _url: &AssetUrl, _stream: AssetStream) -> Stalled {
        Stalled
    }

    fn create_asset(&self, _: (), _builder: &mut Host) -> Result<(), DecodeError> {
        Ok(())
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let pixels = vec![0xff; (width * height * 4) as usize];
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(&pixels, width, height, ColorType::Rgba8)
        .unwrap();
    bytes
}

fn pak() -> Pak {
    let mut pak = Pak::new();
    pak.add("textures/init.png", png(64, 64))
        .add("textures/wide.png", png(100, 60))
        .add("fonts/mono.png", png(128, 128))
        .add(
            "fonts/mono.font",
            r#"{ "atlas": "mono.png", "glyphs": { "A": { "x": 0, "y": 0, "w": 8, "h": 16 } } }"#,
        )
        .add(
            "fonts/broken.font",
            r#"{ "atlas": "../textures/wide.png", "glyphs": {} }"#,
        )
        .add(
            "fonts/lost.font",
            r#"{ "atlas": "lost.png", "glyphs": {} }"#,
        )
        .add(
            "ui/menu.layout",
            r#"(
                name: Some("menu"),
                root: Panel(children: [
                    Label(text: "Start", font: "../fonts/mono.font"),
                    Image(image: "/textures/init.png"),
                    Panel(children: [Image(image: "/fonts/mono.png")]),
                ]),
            )"#,
        )
        .add(
            "sprites/hero.anim",
            r#"{
                "texture": "../textures/init.png",
                "frames": [
                    {
                        "tex": { "x": 0, "y": 0, "w": 32, "h": 32 },
                        "src": { "x": 0, "y": 0, "w": 32, "h": 32 },
                        "src-size": { "w": 32, "h": 32 },
                        "duration": 100
                    },
                    {
                        "tex": { "x": 32, "y": 0, "w": 32, "h": 32 },
                        "src": { "x": 0, "y": 0, "w": 32, "h": 32 },
                        "src-size": { "w": 32, "h": 32 },
                        "duration": 150
                    }
                ],
                "animations": [{ "name": "walk", "from": 0, "to": 1 }],
                "tex-size": { "w": 64, "h": 64 }
            }"#,
        )
        .add("notes.txt", "no mime")
        .add_with_mime("links/a", LINK, "b")
        .add_with_mime("links/b", LINK, "a")
        .add_with_mime("links/c", LINK, "a")
        .add_with_mime("links/end", LINK, "")
        .add_with_mime("links/start", LINK, "end")
        .add_with_mime("links/x", LINK, "y")
        .add_with_mime("links/y", LINK, "z")
        .add_with_mime("links/z", LINK, vec![0xff, 0xfe, 0xfd])
        .add_with_mime("stalled", "application/x-stalled", "");
    pak
}

fn registry(protocol: impl Protocol) -> TypeRegistry<Host> {
    TypeRegistry::builder()
        .with_protocol(PakProtocol::SCHEME, protocol)
        .with_factory(TextureFactory)
        .with_factory(FontFactory)
        .with_factory(LayoutFactory)
        .with_factory(SpriteSheetFactory)
        .with_factory(LinkFactory)
        .with_factory(StalledFactory)
        .build()
}

fn config() -> Config {
    let mut config = Config::default();
    config.workers = 4;
    config.default_protocol = PakProtocol::SCHEME.into();
    config
}

type AssetManager = arcana_assets::assets::AssetManager<Host>;

fn manager() -> AssetManager {
    AssetManager::new(registry(PakProtocol::new(pak())), &config()).unwrap()
}

#[test]
fn power_of_two_texture_is_created_on_owning_thread() {
    let manager = manager();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();

    assert_eq!((texture.width, texture.height), (64, 64));
    assert_eq!(texture.url(), &AssetUrl::parse("pak://textures/init.png"));
    assert_eq!(host.created, [(texture.image, thread::current().id())]);
}

#[test]
fn non_power_of_two_texture_fails_without_resource() {
    let manager = manager();
    let mut host = Host::new();

    let err = manager
        .wait(manager.load::<Texture>("textures/wide.png"), &mut host)
        .unwrap_err();

    assert!(err.is_decode(), "{}", err);
    assert!(host.created.is_empty());
}

#[test]
fn concurrent_requests_share_single_load() {
    let opens = Arc::new(AtomicUsize::new(0));
    let protocol = Counting {
        pak: PakProtocol::new(pak()),
        opens: opens.clone(),
    };
    let manager = AssetManager::new(registry(protocol), &config()).unwrap();
    let mut host = Host::new();

    let refs: Vec<Ref<Texture>> = thread::scope(|scope| {
        let threads: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| manager.get::<Texture>("textures/init.png")))
            .collect();

        while !threads.iter().all(|t| t.is_finished()) {
            manager.run_once(&mut host);
            thread::sleep(Duration::from_millis(1));
        }

        threads
            .into_iter()
            .map(|t| t.join().unwrap().unwrap())
            .collect()
    });

    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(host.created.len(), 1);
    assert!(refs.iter().all(|r| Ref::ptr_eq(r, &refs[0])));

    let url = refs[0].url().clone();
    assert_eq!(manager.store().refcount(&url), 8);
    assert_eq!(manager.store().len(), 1);
}

#[test]
fn released_refs_tear_down_on_owning_thread() {
    let manager = manager();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("pak://textures/init.png"), &mut host)
        .unwrap();
    let url = texture.url().clone();

    let mut refs: Vec<_> = (0..4).map(|_| texture.clone()).collect();
    refs.push(texture);
    assert_eq!(manager.store().refcount(&url), 5);

    refs.pop().unwrap().release();
    refs.pop();
    assert_eq!(manager.store().refcount(&url), 3);
    assert!(matches!(manager.store().status(&url), Some(AssetStatus::Ready)));

    manager.run_once(&mut host);
    assert!(host.destroyed.is_empty());

    let image = refs[0].image;
    refs.clear();
    assert_eq!(manager.store().refcount(&url), 0);
    assert!(manager.store().status(&url).is_none());

    // Teardown is deferred to the owning thread.
    assert!(host.destroyed.is_empty());
    assert_eq!(manager.run_once(&mut host), 1);
    assert_eq!(host.destroyed, [(image, thread::current().id())]);
}

#[test]
fn teardown_runs_on_owning_thread_when_released_elsewhere() {
    let manager = manager();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();
    let image = texture.image;

    thread::spawn(move || drop(texture)).join().unwrap();

    manager.run_once(&mut host);
    assert_eq!(host.destroyed, [(image, thread::current().id())]);
}

#[test]
fn dependencies_are_ready_before_dependent() {
    let manager = manager();
    let mut host = Host::new();

    let font = manager
        .wait(manager.load::<Font>("fonts/mono.font"), &mut host)
        .unwrap();

    let atlas = font.atlas();
    assert_eq!(atlas.url(), &AssetUrl::parse("pak://fonts/mono.png"));
    assert_eq!((atlas.width, atlas.height), (128, 128));
    assert!(host.created.iter().any(|(id, _)| *id == atlas.image));
    assert!(font.glyph('A').is_some());

    // Dependency is kept alive by the dependent.
    assert!(matches!(
        manager.store().status(atlas.url()),
        Some(AssetStatus::Ready)
    ));
}

#[test]
fn layout_resolves_whole_tree() {
    let manager = manager();
    let mut host = Host::new();

    let layout = manager
        .wait(manager.load::<Layout>("ui/menu.layout"), &mut host)
        .unwrap();
    assert_eq!(layout.name.as_deref(), Some("menu"));

    let mut fonts = 0;
    let mut images = Vec::new();
    layout.root.walk(&mut |node| match node {
        Node::Label { font, .. } => {
            assert!(font.glyph('A').is_some());
            fonts += 1;
        }
        Node::Image { texture } => images.push(texture.url().clone()),
        Node::Panel { .. } => {}
    });

    assert_eq!(fonts, 1);
    assert_eq!(
        images,
        [
            AssetUrl::parse("pak://textures/init.png"),
            AssetUrl::parse("pak://fonts/mono.png")
        ]
    );

    // Font atlas and the image node share one entry.
    assert_eq!(host.created.len(), 2);
}

#[test]
fn sprite_sheet_shares_texture() {
    let manager = manager();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();
    let sheet = manager
        .wait(manager.load::<SpriteSheet>("sprites/hero.anim"), &mut host)
        .unwrap();

    assert!(Ref::ptr_eq(&sheet.texture, &texture));
    assert_eq!(sheet.animation_frames("walk").unwrap().len(), 2);
    assert!(sheet.animation("run").is_none());
    assert_eq!(host.created.len(), 1);
}

#[test]
fn dependency_failure_propagates() {
    let manager = manager();
    let mut host = Host::new();

    match manager.wait(manager.load::<Font>("fonts/broken.font"), &mut host) {
        Err(Error::DependencyFailed {
            dependency, source, ..
        }) => {
            assert_eq!(dependency, AssetUrl::parse("pak://textures/wide.png"));
            assert!(source.is_decode());
        }
        Err(err) => panic!("unexpected error: {}", err),
        Ok(_) => panic!("font with broken atlas must fail"),
    }

    match manager.wait(manager.load::<Font>("fonts/lost.font"), &mut host) {
        Err(Error::DependencyFailed { source, .. }) => assert!(source.is_not_found()),
        Err(err) => panic!("unexpected error: {}", err),
        Ok(_) => panic!("font with missing atlas must fail"),
    }

    assert!(host.created.is_empty());
}

#[test]
fn dependency_chain_loads() {
    let manager = manager();
    let mut host = Host::new();

    let start = manager
        .wait(manager.load::<Link>("links/start"), &mut host)
        .unwrap();

    let end = start.target.as_ref().unwrap();
    assert_eq!(end.url(), &AssetUrl::parse("pak://links/end"));
    assert!(end.target.is_none());
}

#[test]
fn decode_failure_propagates_through_chain() {
    let manager = manager();
    let mut host = Host::new();

    let err = match manager.wait(manager.load::<Link>("links/x"), &mut host) {
        Err(err) => err,
        Ok(_) => panic!("chain with undecodable leaf must fail"),
    };

    match err {
        Error::DependencyFailed {
            url,
            dependency,
            source,
        } => {
            assert_eq!(url, AssetUrl::parse("pak://links/x"));
            assert_eq!(dependency, AssetUrl::parse("pak://links/y"));
            match *source {
                Error::DependencyFailed {
                    dependency, source, ..
                } => {
                    assert_eq!(dependency, AssetUrl::parse("pak://links/z"));
                    assert!(source.is_decode(), "{}", source);
                }
                err => panic!("unexpected error: {}", err),
            }
        }
        err => panic!("unexpected error: {}", err),
    }

    // Every waiter observes the same failure of the leaf.
    let err = manager
        .wait(manager.load::<Link>("links/z"), &mut host)
        .unwrap_err();
    assert!(err.is_decode(), "{}", err);
}

#[test]
fn transitive_dependency_shares_context_and_releases_leases() {
    let manager = manager();
    let mut host = Host::new();

    let start = manager
        .wait(manager.load::<Link>("links/start"), &mut host)
        .unwrap();
    let end = start.target.clone().unwrap();

    // `links/end` sees itself requested by `links/start` in the same attempt.
    assert_eq!(start.context_len, 1);
    assert_eq!(end.context_len, 1);

    // Only refs keep entries alive once the attempt is over.
    assert_eq!(manager.store().refcount(start.url()), 1);
    assert_eq!(manager.store().refcount(end.url()), 2);

    drop(end);
    drop(start);
    manager.run_once(&mut host);
    assert!(manager.store().is_empty());
}

#[test]
fn dependency_cycle_fails() {
    let manager = manager();
    let mut host = Host::new();

    let err = match manager.wait(manager.load::<Link>("links/a"), &mut host) {
        Err(err) => err,
        Ok(_) => panic!("cyclic assets must fail"),
    };
    assert!(err.is_dependency_failed(), "{}", err);

    let err = match manager.wait(manager.load::<Link>("links/c"), &mut host) {
        Err(err) => err,
        Ok(_) => panic!("asset depending on cycle must fail"),
    };
    assert!(err.is_dependency_failed(), "{}", err);
}

#[test]
fn stalled_loader_fails() {
    let manager = manager();
    let mut host = Host::new();

    let err = manager
        .wait(manager.load::<()>("stalled"), &mut host)
        .unwrap_err();
    assert!(err.is_decode(), "{}", err);
}

#[test]
fn not_found_errors() {
    let manager = manager();
    let mut host = Host::new();

    let err = manager
        .wait(manager.load::<Texture>("textures/missing.png"), &mut host)
        .unwrap_err();
    assert!(matches!(err, Error::Missing { .. }));
    assert!(err.is_not_found());

    let mut handle = manager.load::<Texture>("ftp://textures/init.png");
    assert!(handle.url().is_none());
    assert!(matches!(
        handle.get_ready(),
        Some(Err(Error::NoProtocol(_)))
    ));

    let err = manager
        .wait(manager.load::<Texture>("notes.txt"), &mut host)
        .unwrap_err();
    assert!(matches!(err, Error::NoMimeType { .. }));

    let url = AssetUrl::parse("pak://notes.txt").with_mime("text/plain");
    let mut handle = manager.load_url::<Texture>(url);
    assert!(matches!(handle.get_ready(), Some(Err(Error::NoFactory(_)))));

    // Failed entries are not kept once nobody references them.
    assert!(manager.store().is_empty());
}

#[test]
fn mime_override_bypasses_sniffing() {
    let manager = manager();
    let mut host = Host::new();

    let url = AssetUrl::parse("pak://notes.txt").with_mime(LINK);
    let link = manager.wait(manager.load_url::<Link>(url), &mut host);

    // "no mime" is not a path of an existing asset.
    match link {
        Err(Error::DependencyFailed { source, .. }) => assert!(source.is_not_found()),
        Err(err) => panic!("unexpected error: {}", err),
        Ok(_) => panic!("link target does not exist"),
    }
}

#[test]
fn type_mismatch_keeps_entry_valid() {
    let manager = manager();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();

    let err = manager
        .wait(manager.load::<Font>("textures/init.png"), &mut host)
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));

    let again = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();
    assert!(Ref::ptr_eq(&texture, &again));
    assert_eq!(host.created.len(), 1);
}

#[test]
#[should_panic]
fn blocking_get_on_owning_thread_panics() {
    let manager = manager();
    let _ = manager.get::<Texture>("textures/init.png");
}

#[test]
fn futures_resolve_from_other_threads() {
    let manager = manager();
    let mut host = Host::new();

    let handle = manager.load::<Texture>("textures/init.png");
    thread::scope(|scope| {
        let waiter = scope.spawn(move || futures::executor::block_on(handle));

        while !waiter.is_finished() {
            manager.run_once(&mut host);
            thread::sleep(Duration::from_millis(1));
        }

        let texture = waiter.join().unwrap().unwrap();
        assert_eq!(texture.width, 64);
    });
}

#[test]
fn filesystem_and_data_url_protocols() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("textures")).unwrap();
    std::fs::write(dir.path().join("textures/init.png"), png(32, 32)).unwrap();

    let registry = TypeRegistry::builder()
        .with_default_protocols(dir.path())
        .with_factory(TextureFactory)
        .build();
    let manager = AssetManager::new(registry, &Config::new(dir.path().into())).unwrap();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();
    assert_eq!(texture.url(), &AssetUrl::parse("file://textures/init.png"));
    assert_eq!(texture.width, 32);

    let url = format!("data:image/png;base64,{}", base64::encode(png(16, 16)));
    let texture = manager
        .wait(manager.load::<Texture>(&url), &mut host)
        .unwrap();
    assert_eq!(texture.width, 16);
    assert_eq!(host.created.len(), 2);
}

#[test]
#[should_panic]
fn run_once_off_owning_thread_panics() {
    let manager = manager();

    thread::scope(|scope| {
        scope
            .spawn(|| manager.run_once(&mut Host::new()))
            .join()
            .unwrap()
    });
}

#[test]
#[should_panic]
fn wait_off_owning_thread_panics() {
    let manager = manager();

    let _ = thread::scope(|scope| {
        scope
            .spawn(|| {
                let handle = manager.load::<Texture>("textures/init.png");
                manager.wait(handle, &mut Host::new())
            })
            .join()
            .unwrap()
    });
}

#[test]
fn teardown_runs_remaining_owner_work() {
    let manager = manager();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();
    let released = texture.image;
    drop(texture);

    let mut pending = manager.load::<Texture>("fonts/mono.png");
    thread::sleep(Duration::from_millis(300));

    manager.teardown(&mut host);

    assert_eq!(host.destroyed, [(released, thread::current().id())]);
    assert_eq!(host.created.len(), 2);

    let atlas = pending.get_ready().unwrap().unwrap();
    assert_eq!(atlas.width, 128);
    assert!(host.created.iter().any(|(id, _)| *id == atlas.image));
}

#[test]
fn handles_fail_once_manager_is_dropped() {
    let manager = manager();

    let mut texture = manager.load::<Texture>("textures/init.png");
    let mut font = manager.load::<Font>("fonts/mono.font");
    thread::sleep(Duration::from_millis(300));
    drop(manager);

    match texture.get_ready() {
        Some(Err(Error::Abandoned { url })) => {
            assert_eq!(url, AssetUrl::parse("pak://textures/init.png"))
        }
        Some(Err(err)) => panic!("unexpected error: {}", err),
        Some(Ok(_)) => panic!("texture can not be finalized without manager"),
        None => panic!("handle must resolve once manager is dropped"),
    }

    match font.get_ready() {
        Some(Err(err)) => assert!(
            matches!(err, Error::Abandoned { .. }) || err.is_dependency_failed(),
            "{}",
            err
        ),
        Some(Ok(_)) => panic!("font can not be finalized without manager"),
        None => panic!("handle must resolve once manager is dropped"),
    }
}

#[test]
fn config_root_serves_file_protocol() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data/textures")).unwrap();
    std::fs::write(dir.path().join("data/textures/init.png"), png(32, 32)).unwrap();

    let path = dir.path().join("Assets.toml");
    std::fs::write(&path, "root = \"data\"\nworkers = 2\n").unwrap();
    let config = Config::load(&path).unwrap();

    // No `file` protocol registered, manager serves it from `config.root`.
    let registry = TypeRegistry::builder().with_factory(TextureFactory).build();
    let manager = AssetManager::new(registry, &config).unwrap();
    let mut host = Host::new();

    let texture = manager
        .wait(manager.load::<Texture>("textures/init.png"), &mut host)
        .unwrap();
    assert_eq!(texture.url(), &AssetUrl::parse("file://textures/init.png"));
    assert_eq!(texture.width, 32);

    let err = manager
        .wait(manager.load::<Texture>("textures/missing.png"), &mut host)
        .unwrap_err();
    assert!(matches!(err, Error::Missing { .. }));
}
