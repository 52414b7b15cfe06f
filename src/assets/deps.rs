use {
    super::{
        error::{Error, LoadError},
        store::{AnyRef, Lease, Ref},
        url::AssetUrl,
    },
    hashbrown::HashMap,
    parking_lot::Mutex,
    std::{
        sync::Arc,
        task::{Poll, Waker},
    },
};

/// Starts loading of assets requested as dependencies.
pub(crate) trait Requester: Send + Sync {
    fn request(&self, url: &AssetUrl, cx: &DependencyContext) -> Result<Lease, Error>;
}

enum Dependency {
    Resolving(Lease),
    Resolved(AnyRef),
    Failed(Error),
}

impl Dependency {
    fn advance(self, waker: Option<&Waker>) -> Self {
        match self {
            Dependency::Resolving(lease) => match lease.poll(waker) {
                Poll::Pending => Dependency::Resolving(lease),
                Poll::Ready(Ok(asset)) => Dependency::Resolved(AnyRef::new(lease, asset)),
                Poll::Ready(Err(err)) => Dependency::Failed(err),
            },
            resolved => resolved,
        }
    }
}

/// Resolution state of a dependency.
#[derive(Clone, Debug)]
pub enum DependencyState {
    /// Dependency was not requested in this context.
    Unresolved,
    /// Dependency is loading.
    Resolving,
    /// Dependency is ready.
    Resolved,
    /// Dependency failed.
    Failed(Error),
}

/// Dependencies requested during one top-level load attempt.
///
/// Shared by all loaders participating in the attempt, including loaders of
/// dependencies started from it. Holds references to requested dependencies
/// until the last participating loader finishes.
#[derive(Clone, Default)]
pub struct DependencyContext {
    map: Arc<Mutex<HashMap<AssetUrl, Dependency>>>,
}

impl DependencyContext {
    pub fn new() -> Self {
        DependencyContext::default()
    }

    pub fn state(&self, url: &AssetUrl) -> DependencyState {
        match self.map.lock().get(url) {
            None => DependencyState::Unresolved,
            Some(Dependency::Resolving(_)) => DependencyState::Resolving,
            Some(Dependency::Resolved(_)) => DependencyState::Resolved,
            Some(Dependency::Failed(err)) => DependencyState::Failed(err.clone()),
        }
    }

    /// Number of dependencies requested in this context.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Checks whether all `urls` are resolved.
    ///
    /// Registers `waker` on every dependency that is still loading.
    /// Returns first failed dependency.
    pub(crate) fn poll_ready(
        &self,
        urls: &[AssetUrl],
        waker: &Waker,
    ) -> Poll<Result<(), (AssetUrl, Error)>> {
        let mut map = self.map.lock();
        let mut pending = false;

        for url in urls {
            let dependency = match map.remove(url) {
                Some(dependency) => dependency.advance(Some(waker)),
                None => {
                    debug_assert!(false, "Awaited dependency {:?} was never requested", url);
                    continue;
                }
            };

            match &dependency {
                Dependency::Resolving(_) => pending = true,
                Dependency::Resolved(_) => {}
                Dependency::Failed(err) => {
                    let err = err.clone();
                    map.insert(url.clone(), dependency);
                    return Poll::Ready(Err((url.clone(), err)));
                }
            }

            map.insert(url.clone(), dependency);
        }

        if pending {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }
}

/// Access to dependencies for a [`Loader`](super::Loader).
pub struct Dependencies<'a> {
    requester: &'a dyn Requester,
    cx: &'a DependencyContext,
    url: &'a AssetUrl,
    waiting: &'a mut Vec<AssetUrl>,
}

impl<'a> Dependencies<'a> {
    pub(crate) fn new(
        requester: &'a dyn Requester,
        cx: &'a DependencyContext,
        url: &'a AssetUrl,
        waiting: &'a mut Vec<AssetUrl>,
    ) -> Self {
        Dependencies {
            requester,
            cx,
            url,
            waiting,
        }
    }

    /// Identifier of the asset being loaded.
    pub fn url(&self) -> &AssetUrl {
        self.url
    }

    pub fn context(&self) -> &DependencyContext {
        self.cx
    }

    /// Requests asset at `path` resolved relative to the asset being loaded.
    ///
    /// Returns `Ok(None)` if dependency is not ready yet.
    /// In that case loader should request all other dependencies it needs
    /// and return [`LoadResult::Pending`](super::LoadResult::Pending).
    pub fn require<T>(&mut self, path: &str) -> Result<Option<Ref<T>>, LoadError>
    where
        T: Send + Sync + 'static,
    {
        let url = self.url.join(path);
        self.require_url(url)
    }

    /// Requests asset with given identifier.
    pub fn require_url<T>(&mut self, url: AssetUrl) -> Result<Option<Ref<T>>, LoadError>
    where
        T: Send + Sync + 'static,
    {
        let mut map = self.cx.map.lock();

        let dependency = match map.remove(&url) {
            Some(dependency) => dependency,
            None => {
                tracing::trace!("Asset {:?} requires {:?}", self.url, url);
                match self.requester.request(&url, self.cx) {
                    Ok(lease) => Dependency::Resolving(lease),
                    Err(err) => Dependency::Failed(err),
                }
            }
        };
        let dependency = dependency.advance(None);

        let result = match &dependency {
            Dependency::Resolving(_) => {
                if !self.waiting.contains(&url) {
                    self.waiting.push(url.clone());
                }
                Ok(None)
            }
            Dependency::Resolved(any) => match any.typed::<T>() {
                Ok(asset) => Ok(Some(asset)),
                Err(source) => Err(LoadError::Dependency {
                    url: url.clone(),
                    source,
                }),
            },
            Dependency::Failed(err) => Err(LoadError::Dependency {
                url: url.clone(),
                source: err.clone(),
            }),
        };

        map.insert(url, dependency);
        result
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::assets::{loader::AnyAsset, store::AssetStore},
        futures::task::noop_waker_ref,
    };

    struct StoreRequester(AssetStore);

    impl Requester for StoreRequester {
        fn request(&self, url: &AssetUrl, _cx: &DependencyContext) -> Result<Lease, Error> {
            if url.protocol() != "pak" {
                return Err(Error::NoProtocol(url.protocol().into()));
            }
            Ok(self.0.acquire(url).0)
        }
    }

    fn complete(store: &AssetStore, url: &AssetUrl, value: u32) {
        let asset: AnyAsset = Arc::new(value);
        store.complete(url, Ok((asset, "application/x-number".into())));
    }

    #[test]
    fn require_tracks_resolution() {
        let store = AssetStore::new(1, |_| {});
        let requester = StoreRequester(store.clone());
        let cx = DependencyContext::new();
        let owner = AssetUrl::parse("pak://fonts/mono.font");
        let atlas = AssetUrl::parse("pak://fonts/mono.png");
        let mut waiting = Vec::new();

        assert!(matches!(cx.state(&atlas), DependencyState::Unresolved));

        let mut deps = Dependencies::new(&requester, &cx, &owner, &mut waiting);
        assert!(deps.require::<u32>("mono.png").unwrap().is_none());
        assert!(deps.require::<u32>("mono.png").unwrap().is_none());
        assert_eq!(waiting, [atlas.clone()]);
        assert!(matches!(cx.state(&atlas), DependencyState::Resolving));
        assert_eq!(store.refcount(&atlas), 1);

        assert!(cx.poll_ready(&waiting, noop_waker_ref()).is_pending());
        complete(&store, &atlas, 5);
        assert!(matches!(
            cx.poll_ready(&waiting, noop_waker_ref()),
            Poll::Ready(Ok(()))
        ));
        assert!(matches!(cx.state(&atlas), DependencyState::Resolved));

        waiting.clear();
        let mut deps = Dependencies::new(&requester, &cx, &owner, &mut waiting);
        let value = deps.require::<u32>("mono.png").unwrap().unwrap();
        assert_eq!(*value, 5);
        assert_eq!(store.refcount(&atlas), 2);
        assert!(waiting.is_empty());

        drop(value);
        drop(cx);
        assert_eq!(store.refcount(&atlas), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn failed_dependencies() {
        let store = AssetStore::new(1, |_| {});
        let requester = StoreRequester(store.clone());
        let cx = DependencyContext::new();
        let owner = AssetUrl::parse("pak://ui/main.layout");
        let mut waiting = Vec::new();

        let mut deps = Dependencies::new(&requester, &cx, &owner, &mut waiting);
        let err = deps.require::<u32>("file://missing.png").unwrap_err();
        assert!(matches!(
            err,
            LoadError::Dependency {
                source: Error::NoProtocol(_),
                ..
            }
        ));

        let broken = AssetUrl::parse("pak://ui/broken.png");
        assert!(deps.require::<u32>("broken.png").unwrap().is_none());
        store.complete(&broken, Err(Error::Missing { url: broken.clone() }));

        match cx.poll_ready(&waiting, noop_waker_ref()) {
            Poll::Ready(Err((url, Error::Missing { .. }))) => assert_eq!(url, broken),
            _ => panic!("dependency must fail"),
        }
        assert!(matches!(cx.state(&broken), DependencyState::Failed(_)));
    }

    #[test]
    fn type_mismatch_fails_dependency() {
        let store = AssetStore::new(1, |_| {});
        let requester = StoreRequester(store.clone());
        let cx = DependencyContext::new();
        let owner = AssetUrl::parse("pak://a");
        let mut waiting = Vec::new();

        let number = AssetUrl::parse("pak://number");
        let _lease = store.acquire(&number).0;
        complete(&store, &number, 1);

        let mut deps = Dependencies::new(&requester, &cx, &owner, &mut waiting);
        assert!(matches!(
            deps.require::<String>("number"),
            Err(LoadError::Dependency {
                source: Error::TypeMismatch { .. },
                ..
            })
        ));
    }
}
