use {
    super::{
        deps::{Dependencies, DependencyContext, Requester},
        error::{DecodeError, Error},
        fs::FsProtocol,
        loader::{DynFactory, DynLoader, LoadResult},
        registry::TypeRegistry,
        store::{AssetStore, Evicted, Lease, Ref},
        url::AssetUrl,
    },
    crate::cfg::Config,
    futures::task::{waker, ArcWake},
    hashbrown::{HashMap, HashSet},
    parking_lot::Mutex,
    std::{
        any::Any,
        future::Future,
        marker::PhantomData,
        mem::replace,
        pin::Pin,
        sync::{Arc, Weak},
        task::{Context, Poll, Waker},
        thread::{self, ThreadId},
        time::Duration,
    },
};

/// Work executed on the owning thread.
enum OwnerTask<B> {
    Finalize {
        url: AssetUrl,
        factory: Arc<dyn DynFactory<B>>,
        decoded: Box<dyn Any + Send>,
    },
    Teardown(Evicted),

    /// Some asset failed. Wakes owning thread blocked in `AssetManager::wait`.
    Notify,
}

struct Job<B> {
    url: AssetUrl,
    cx: DependencyContext,
    factory: Arc<dyn DynFactory<B>>,
    loader: Box<dyn DynLoader>,

    /// Dependencies requested but not resolved during last pass.
    waiting: Vec<AssetUrl>,

    /// Decoded value of a loader that returned before its dependencies were resolved.
    decoded: Option<Box<dyn Any + Send>>,
    passes: u32,
}

struct Inner<B> {
    registry: TypeRegistry<B>,
    store: AssetStore,
    runtime: tokio::runtime::Handle,
    default_protocol: Box<str>,

    /// Taken when the manager is dropped.
    owner_tx: Mutex<Option<flume::Sender<OwnerTask<B>>>>,

    /// Dependencies each parked asset waits for.
    waits: Mutex<HashMap<AssetUrl, Vec<AssetUrl>>>,
}

/// Loads, caches and releases assets.
///
/// Loaders run on a pool of worker threads.
/// Final resources are created and destroyed on the thread that created
/// the manager, in [`AssetManager::run_once`] and [`AssetManager::wait`].
pub struct AssetManager<B> {
    inner: Arc<Inner<B>>,
    owner_rx: flume::Receiver<OwnerTask<B>>,
    owner: ThreadId,
    runtime: Option<tokio::runtime::Runtime>,
    teardown_timeout: Duration,
}

impl<B> AssetManager<B>
where
    B: 'static,
{
    /// Returns new asset manager owned by the calling thread.
    ///
    /// If `registry` has no protocol for `file` scheme,
    /// [`FsProtocol`] rooted at `config.root` is used.
    pub fn new(mut registry: TypeRegistry<B>, config: &Config) -> std::io::Result<Self> {
        if registry.protocol(FsProtocol::SCHEME).is_none() {
            tracing::debug!("Serving `file` protocol from `{}`", config.root.display());
            registry.ensure_protocol(FsProtocol::SCHEME, FsProtocol::with_root(&*config.root));
        }

        // Loaders run only in the blocking pool, runtime itself is never driven.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(config.workers.max(1))
            .thread_name("asset-loader")
            .build()?;

        let (owner_tx, owner_rx) = flume::unbounded();

        let store = AssetStore::new(config.shards, {
            let owner_tx = owner_tx.clone();
            move |evicted| {
                if let Err(err) = owner_tx.send(OwnerTask::Teardown(evicted)) {
                    if let OwnerTask::Teardown(evicted) = err.into_inner() {
                        tracing::warn!(
                            "Asset {:?} dropped without teardown. Asset manager is gone",
                            evicted.url
                        );
                    }
                }
            }
        });

        let inner = Arc::new(Inner {
            registry,
            store,
            runtime: runtime.handle().clone(),
            default_protocol: config.default_protocol.clone(),
            owner_tx: Mutex::new(Some(owner_tx)),
            waits: Mutex::new(HashMap::new()),
        });

        Ok(AssetManager {
            inner,
            owner_rx,
            owner: thread::current().id(),
            runtime: Some(runtime),
            teardown_timeout: config.teardown_timeout(),
        })
    }

    pub fn registry(&self) -> &TypeRegistry<B> {
        &self.inner.registry
    }

    pub fn store(&self) -> &AssetStore {
        &self.inner.store
    }

    /// Parses asset path using configured default protocol.
    pub fn parse(&self, path: &str) -> AssetUrl {
        AssetUrl::parse_with_default(path, &self.inner.default_protocol)
    }

    /// Requests asset at `path` and returns handle to it.
    ///
    /// If asset was requested before and is still referenced,
    /// handle to the same cache entry is returned,
    /// even if the first load was not successful.
    #[tracing::instrument(skip(self))]
    pub fn load<T>(&self, path: &str) -> AssetHandle<T>
    where
        T: Send + Sync + 'static,
    {
        let url = self.parse(path);
        self.load_url(url)
    }

    /// Requests asset with given identifier and returns handle to it.
    pub fn load_url<T>(&self, url: AssetUrl) -> AssetHandle<T>
    where
        T: Send + Sync + 'static,
    {
        match self.inner.request(&url, None) {
            Ok(lease) => AssetHandle {
                state: HandleState::Pending(lease),
                marker: PhantomData,
            },
            Err(err) => {
                tracing::error!("Failed to request asset {:?}. {}", url, err);
                AssetHandle {
                    state: HandleState::Failed(err),
                    marker: PhantomData,
                }
            }
        }
    }

    /// Requests asset at `path` and blocks until it is finalized.
    ///
    /// # Panics
    ///
    /// Panics if called on the owning thread, which must keep running
    /// [`AssetManager::run_once`] for assets to become ready.
    /// Use [`AssetManager::wait`] there instead.
    pub fn get<T>(&self, path: &str) -> Result<Ref<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        assert_ne!(
            thread::current().id(),
            self.owner,
            "`AssetManager::get` would block the owning thread forever"
        );
        futures::executor::block_on(self.load(path))
    }

    /// Blocks the owning thread until asset is finalized or failed,
    /// running owning-thread work in the meantime.
    ///
    /// # Panics
    ///
    /// Panics if called not on the owning thread.
    pub fn wait<T>(&self, mut handle: AssetHandle<T>, builder: &mut B) -> Result<Ref<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        self.assert_owner();

        loop {
            self.run_once(builder);

            if let Some(result) = handle.get_ready() {
                return result;
            }

            // Every transition to terminal state is followed by a task,
            // so blocking here cannot miss it.
            match self.owner_rx.recv() {
                Ok(task) => self.run_task(task, builder),
                Err(flume::RecvError::Disconnected) => unreachable!("Store holds a sender"),
            }
        }
    }

    /// Runs finalization and teardown work queued for the owning thread.
    /// Returns number of tasks executed.
    ///
    /// # Panics
    ///
    /// Panics if called not on the owning thread.
    pub fn run_once(&self, builder: &mut B) -> usize {
        self.assert_owner();

        let mut count = 0;
        while let Ok(task) = self.owner_rx.try_recv() {
            self.run_task(task, builder);
            count += 1;
        }
        count
    }

    /// Waits for in-flight loads and runs remaining owning-thread work.
    ///
    /// Resources still referenced afterwards are dropped
    /// without teardown hook when their last reference is released.
    pub fn teardown(mut self, builder: &mut B) {
        self.assert_owner();

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.teardown_timeout);
        }
        self.run_once(builder);
    }

    fn assert_owner(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "Asset resources must be created and destroyed on the thread owning the asset manager"
        );
    }

    fn run_task(&self, task: OwnerTask<B>, builder: &mut B) {
        match task {
            OwnerTask::Finalize {
                url,
                factory,
                decoded,
            } => {
                let _span = tracing::debug_span!("finalize", url = %url).entered();

                match factory.create_asset(decoded, builder) {
                    Ok(asset) => {
                        tracing::debug!("Asset {:?} is ready", url);
                        let mime = factory.mime_type().into();
                        self.inner.store.complete(&url, Ok((asset, mime)));
                    }
                    Err(source) => {
                        let err = Error::Decode {
                            url: url.clone(),
                            source,
                        };
                        tracing::error!("Failed to create asset. {:#}", eyre::Report::new(err.clone()));
                        self.inner.store.complete(&url, Err(err));
                    }
                }
            }
            OwnerTask::Teardown(evicted) => match self.inner.registry.factory(&evicted.mime) {
                Some(factory) => {
                    tracing::debug!("Destroying asset {:?}", evicted.url);
                    factory.destroy_asset(evicted.asset, builder);
                }
                None => {
                    tracing::warn!("No factory to destroy asset {:?}", evicted.url);
                }
            },
            OwnerTask::Notify => {}
        }
    }
}

impl<B> Drop for AssetManager<B> {
    fn drop(&mut self) {
        // Loaders completing from now on fail their assets instead of queueing them.
        drop(self.inner.owner_tx.lock().take());

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.teardown_timeout);
        }

        for task in self.owner_rx.drain() {
            self.inner.abandon(task);
        }
    }
}

impl<B> Inner<B> {
    /// Handles task that can not be delivered to the owning thread.
    fn abandon(&self, task: OwnerTask<B>) {
        match task {
            OwnerTask::Finalize { url, .. } => self.abandon_url(&url),
            OwnerTask::Teardown(evicted) => {
                tracing::warn!(
                    "Asset {:?} dropped without teardown. Asset manager is gone",
                    evicted.url
                );
            }
            OwnerTask::Notify => {}
        }
    }

    fn abandon_url(&self, url: &AssetUrl) {
        tracing::warn!("Asset manager is gone. Asset {:?} is not finalized", url);
        self.store.complete(url, Err(Error::Abandoned { url: url.clone() }));
    }
}

/// Fails the asset if worker pool drops the task without running it.
struct Unrun<B> {
    inner: Arc<Inner<B>>,
    url: AssetUrl,
    armed: bool,
}

impl<B> Drop for Unrun<B> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon_url(&self.url);
        }
    }
}

impl<B> Inner<B>
where
    B: 'static,
{
    fn request(
        self: &Arc<Self>,
        url: &AssetUrl,
        cx: Option<&DependencyContext>,
    ) -> Result<Lease, Error> {
        if self.registry.protocol(url.protocol()).is_none() {
            return Err(Error::NoProtocol(url.protocol().into()));
        }

        if let Some(mime) = url.mime() {
            if self.registry.factory(mime).is_none() {
                return Err(Error::NoFactory(mime.into()));
            }
        }

        let (lease, created) = self.store.acquire(url);
        if created {
            tracing::debug!("Loading asset {:?}", url);
            let owned_url = url.clone();
            let cx = cx.cloned().unwrap_or_default();
            self.spawn(url, move |inner| inner.open(owned_url, cx));
        }
        Ok(lease)
    }

    fn spawn(self: &Arc<Self>, url: &AssetUrl, f: impl FnOnce(&Arc<Self>) + Send + 'static) {
        if self.owner_tx.lock().is_none() {
            self.abandon_url(url);
            return;
        }

        let mut unrun = Unrun {
            inner: self.clone(),
            url: url.clone(),
            armed: true,
        };
        let span = tracing::Span::current();

        // Loads are not cancellable, the join handle is not needed.
        drop(self.runtime.spawn_blocking(move || {
            let _entered = span.enter();
            unrun.armed = false;
            f(&unrun.inner)
        }));
    }

    fn open(self: &Arc<Self>, url: AssetUrl, cx: DependencyContext) {
        let _span = tracing::debug_span!("load", url = %url).entered();

        match self.prepare(&url, cx) {
            Ok(job) => self.drive(job),
            Err(err) => self.fail(&url, err),
        }
    }

    fn prepare(&self, url: &AssetUrl, cx: DependencyContext) -> Result<Job<B>, Error> {
        let protocol = self
            .registry
            .protocol(url.protocol())
            .ok_or_else(|| Error::NoProtocol(url.protocol().into()))?;

        let stream = protocol
            .open(url.path())
            .map_err(|source| Error::Decode {
                url: url.clone(),
                source,
            })?
            .ok_or_else(|| Error::Missing { url: url.clone() })?;

        tracing::trace!("Stream opened");

        let mime = url
            .mime()
            .or_else(|| stream.mime())
            .ok_or_else(|| Error::NoMimeType { url: url.clone() })?;

        let factory = self
            .registry
            .factory(mime)
            .ok_or_else(|| Error::NoFactory(mime.into()))?
            .clone();

        let loader = factory.new_loader(url, stream);

        Ok(Job {
            url: url.clone(),
            cx,
            factory,
            loader,
            waiting: Vec::new(),
            decoded: None,
            passes: 0,
        })
    }

    fn drive(self: &Arc<Self>, mut job: Job<B>) {
        job.passes += 1;
        job.waiting.clear();

        let outcome = {
            let mut deps = Dependencies::new(self, &job.cx, &job.url, &mut job.waiting);
            job.loader.load(&mut deps)
        };

        match outcome {
            Ok(LoadResult::Ready(decoded)) if job.waiting.is_empty() => {
                self.finalize(job, decoded)
            }
            Ok(LoadResult::Ready(decoded)) => {
                // Dependent asset is never finalized before its dependencies.
                job.decoded = Some(decoded);
                self.park(job);
            }
            Ok(LoadResult::Pending) if job.waiting.is_empty() => {
                let err = Error::Decode {
                    url: job.url.clone(),
                    source: DecodeError::msg("Loader is pending without unresolved dependencies"),
                };
                self.fail(&job.url, err);
            }
            Ok(LoadResult::Pending) => self.park(job),
            Err(err) => {
                let err = err.into_error(&job.url);
                self.fail(&job.url, err);
            }
        }
    }

    fn resume(self: &Arc<Self>, mut job: Job<B>) {
        let _span = tracing::debug_span!("load", url = %job.url).entered();

        match job.decoded.take() {
            Some(decoded) => self.finalize(job, decoded),
            None => self.drive(job),
        }
    }

    fn finalize(&self, job: Job<B>, decoded: Box<dyn Any + Send>) {
        tracing::trace!("Asset decoded in {} passes", job.passes);

        // Dropping the loader closes the stream.
        // Leases of the attempt are released before the asset is finalized.
        let Job {
            url,
            factory,
            loader,
            cx,
            ..
        } = job;
        drop(loader);
        drop(cx);

        self.send(OwnerTask::Finalize {
            url,
            factory,
            decoded,
        });
    }

    fn park(self: &Arc<Self>, job: Job<B>) {
        {
            let mut waits = self.waits.lock();
            if let Some(dependency) = find_cycle(&waits, &job.url, &job.waiting) {
                drop(waits);
                let err = Error::DependencyCycle {
                    url: job.url.clone(),
                    dependency,
                };
                self.fail(&job.url, err);
                return;
            }
            waits.insert(job.url.clone(), job.waiting.clone());
        }

        tracing::trace!("Waiting for {:?}", job.waiting);

        let parked = Arc::new(Parked {
            inner: Arc::downgrade(self),
            store: self.store.clone(),
            job: Mutex::new(Some(job)),
        });
        ArcWake::wake_by_ref(&parked);
    }

    fn fail(&self, url: &AssetUrl, err: Error) {
        if err.is_dependency_failed() {
            tracing::warn!("{:#}", eyre::Report::new(err.clone()));
        } else {
            tracing::error!("{:#}", eyre::Report::new(err.clone()));
        }

        self.store.complete(url, Err(err));
        self.send(OwnerTask::Notify);
    }

    fn send(&self, task: OwnerTask<B>) {
        let task = match &*self.owner_tx.lock() {
            Some(owner_tx) => match owner_tx.send(task) {
                Ok(()) => return,
                Err(err) => err.into_inner(),
            },
            None => task,
        };
        self.abandon(task);
    }
}

impl<B> Requester for Arc<Inner<B>>
where
    B: 'static,
{
    fn request(&self, url: &AssetUrl, cx: &DependencyContext) -> Result<Lease, Error> {
        Inner::request(self, url, Some(cx))
    }
}

/// Returns dependency through which `url` would wait for itself.
fn find_cycle(
    waits: &HashMap<AssetUrl, Vec<AssetUrl>>,
    url: &AssetUrl,
    deps: &[AssetUrl],
) -> Option<AssetUrl> {
    let mut visited = HashSet::new();

    for dep in deps {
        let mut stack = vec![dep];
        while let Some(next) = stack.pop() {
            if next == url {
                return Some(dep.clone());
            }
            if !visited.insert(next) {
                continue;
            }
            if let Some(edges) = waits.get(next) {
                stack.extend(edges);
            }
        }
    }
    None
}

/// Loader waiting for its dependencies.
///
/// Registered as waker on every dependency that is still loading.
/// Resubmitted to the pool once all of them are resolved.
struct Parked<B> {
    inner: Weak<Inner<B>>,
    store: AssetStore,
    job: Mutex<Option<Job<B>>>,
}

impl<B> ArcWake for Parked<B>
where
    B: 'static,
{
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let mut slot = arc_self.job.lock();

        let ready = match &*slot {
            None => return,
            Some(job) => job.cx.poll_ready(&job.waiting, &waker(arc_self.clone())),
        };

        let result = match ready {
            Poll::Pending => return,
            Poll::Ready(result) => result,
        };

        let job = match slot.take() {
            None => return,
            Some(job) => job,
        };
        drop(slot);

        let inner = match arc_self.inner.upgrade() {
            None => {
                tracing::warn!("Asset manager is gone. Asset {:?} is not finalized", job.url);
                let err = Error::Abandoned {
                    url: job.url.clone(),
                };
                arc_self.store.complete(&job.url, Err(err));
                return;
            }
            Some(inner) => inner,
        };

        inner.waits.lock().remove(&job.url);

        match result {
            Ok(()) => {
                let url = job.url.clone();
                inner.spawn(&url, move |inner| inner.resume(job))
            }
            Err((dependency, source)) => {
                let err = Error::DependencyFailed {
                    url: job.url.clone(),
                    dependency,
                    source: Box::new(source),
                };
                inner.fail(&job.url, err);
            }
        }
    }
}

enum HandleState {
    Pending(Lease),
    Failed(Error),
    Done,
}

/// Handle to requested asset.
///
/// Holds reference to the cache entry while asset is loading.
/// Resolves into [`Ref`] once asset is finalized.
/// Dropping unresolved handle releases the reference, but does not cancel loading.
pub struct AssetHandle<T> {
    state: HandleState,
    marker: PhantomData<fn() -> T>,
}

impl<T> AssetHandle<T>
where
    T: Send + Sync + 'static,
{
    /// Identifier of requested asset, unless request failed immediately.
    pub fn url(&self) -> Option<&AssetUrl> {
        match &self.state {
            HandleState::Pending(lease) => Some(lease.url()),
            _ => None,
        }
    }

    /// Returns result if asset reached terminal state.
    ///
    /// # Panics
    ///
    /// Panics if result was already taken.
    pub fn get_ready(&mut self) -> Option<Result<Ref<T>, Error>> {
        self.poll_state(None)
    }

    fn poll_state(&mut self, waker: Option<&Waker>) -> Option<Result<Ref<T>, Error>> {
        match replace(&mut self.state, HandleState::Done) {
            HandleState::Pending(lease) => match lease.poll(waker) {
                Poll::Pending => {
                    self.state = HandleState::Pending(lease);
                    None
                }
                Poll::Ready(Ok(asset)) => Some(Ref::from_any(lease, asset)),
                Poll::Ready(Err(err)) => Some(Err(err)),
            },
            HandleState::Failed(err) => Some(Err(err)),
            HandleState::Done => panic!("`AssetHandle` result already taken"),
        }
    }
}

impl<T> Future for AssetHandle<T>
where
    T: Send + Sync + 'static,
{
    type Output = Result<Ref<T>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<Ref<T>, Error>> {
        match self.get_mut().poll_state(Some(cx.waker())) {
            None => Poll::Pending,
            Some(result) => Poll::Ready(result),
        }
    }
}
