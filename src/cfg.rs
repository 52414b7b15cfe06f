use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::assets::DEFAULT_PROTOCOL;

const CONFIG_DEFAULT_NAME: &str = "Assets.toml";

/// This is default number of shards per CPU for shared map of cache entries.
const DEFAULT_SHARDS_PER_CPU: usize = 8;

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    /// Maximum number of loader threads.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of shards of the cache entry map.
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Protocol for asset paths without scheme.
    #[serde(default = "default_protocol")]
    pub default_protocol: Box<str>,

    /// Root directory for `file` protocol.
    #[serde(default = "default_root")]
    pub root: Box<Path>,

    /// How long to wait for in-flight loads when asset manager is dropped.
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config::new(".".into())
    }
}

impl Config {
    pub fn new(root: PathBuf) -> Self {
        Config {
            workers: default_workers(),
            shards: default_shards(),
            default_protocol: default_protocol(),
            root: root.into(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
        }
    }

    pub fn load(path: &Path) -> eyre::Result<Self> {
        load_config(path)
    }

    /// Loads `Assets.toml` nearest to the current directory
    /// or to the directory of the executable.
    ///
    /// Falls back to defaults rooted at the current directory
    /// if no file is found or it fails to load.
    pub fn load_default() -> Self {
        let found = std::env::current_dir()
            .ok()
            .and_then(|dir| Config::find(&dir))
            .or_else(|| {
                let exe = std::env::current_exe().ok()?;
                Config::find(exe.parent()?)
            });

        match found {
            None => {
                tracing::debug!("`{}` not found. Using defaults", CONFIG_DEFAULT_NAME);
                Config::default()
            }
            Some(path) => match load_config(&path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("Failed to load `{}`. Using defaults. {:#}", path.display(), err);
                    Config::default()
                }
            },
        }
    }

    /// Returns path to `Assets.toml` in `dir` or the closest of its ancestors.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        dir.ancestors()
            .map(|dir| dir.join(CONFIG_DEFAULT_NAME))
            .find(|candidate| candidate.is_file())
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_shards() -> usize {
    DEFAULT_SHARDS_PER_CPU * num_cpus::get()
}

fn default_protocol() -> Box<str> {
    DEFAULT_PROTOCOL.into()
}

fn default_root() -> Box<Path> {
    PathBuf::new().into_boxed_path()
}

fn default_teardown_timeout_ms() -> u64 {
    5000
}

#[tracing::instrument]
fn load_config(path: &Path) -> eyre::Result<Config> {
    let bytes = std::fs::read(&path)?;
    let mut cfg: Config = toml::from_slice(&bytes)?;

    if cfg.workers == 0 {
        eyre::bail!("`workers` must be positive");
    }

    if *cfg.root == *Path::new("") {
        if let Some(cfg_dir) = path.parent() {
            cfg.root = cfg_dir.to_owned().into_boxed_path();
        }
    } else if cfg.root.is_relative() {
        if let Some(cfg_dir) = path.parent() {
            cfg.root = cfg_dir.join(&cfg.root).into_boxed_path();
        }
    }

    if let Ok(path) = dunce::canonicalize(&cfg.root) {
        cfg.root = path.into_boxed_path();
    }

    Ok(cfg)
}
