use {
    super::{error::Error, loader::AnyAsset, url::AssetUrl},
    ahash::RandomState,
    hashbrown::hash_map::{Entry, HashMap},
    parking_lot::Mutex,
    std::{
        any::type_name,
        fmt::{self, Debug},
        hash::BuildHasher,
        mem::take,
        ops::Deref,
        sync::Arc,
        task::{Poll, Waker},
    },
};

/// Maximum number of shards of the entry map.
const MAX_SHARDS: usize = 512;

enum EntryState {
    Loading,
    Ready { asset: AnyAsset, mime: Box<str> },
    Failed(Error),
}

struct CacheEntry {
    refcount: usize,
    state: EntryState,
    waiters: Vec<Waker>,
}

impl CacheEntry {
    fn is_terminal(&self) -> bool {
        !matches!(self.state, EntryState::Loading)
    }
}

/// Resource removed from the store after its last reference was released.
///
/// Must be destroyed on the owning thread by the factory of `mime`.
pub struct Evicted {
    pub url: AssetUrl,
    pub mime: Box<str>,
    pub asset: AnyAsset,
}

impl Debug for Evicted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evicted")
            .field("url", &self.url)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

/// Snapshot of cache entry state.
#[derive(Clone, Debug)]
pub enum AssetStatus {
    Loading,
    Ready,
    Failed(Error),
}

struct StoreInner {
    shards: Box<[Mutex<HashMap<AssetUrl, CacheEntry>>]>,
    random_state: RandomState,
    on_evict: Box<dyn Fn(Evicted) + Send + Sync>,
}

impl StoreInner {
    fn shard(&self, url: &AssetUrl) -> &Mutex<HashMap<AssetUrl, CacheEntry>> {
        // Shard count is a power of two.
        let hash = self.random_state.hash_one(url);
        &self.shards[hash as usize & (self.shards.len() - 1)]
    }

    fn retain(&self, url: &AssetUrl) {
        let mut shard = self.shard(url).lock();
        match shard.get_mut(url) {
            Some(entry) => entry.refcount += 1,
            None => {
                tracing::error!("Asset {:?} retained after eviction", url);
                debug_assert!(false, "Asset {:?} retained after eviction", url);
            }
        }
    }

    fn release(&self, url: &AssetUrl) {
        let mut shard = self.shard(url).lock();

        let evicted = match shard.entry(url.clone()) {
            Entry::Vacant(_) => {
                tracing::error!("Asset {:?} released after eviction", url);
                debug_assert!(false, "Asset {:?} released after eviction", url);
                return;
            }
            Entry::Occupied(mut entry) => {
                let cache_entry = entry.get_mut();
                if cache_entry.refcount == 0 {
                    tracing::error!("Asset {:?} released more times than acquired", url);
                    debug_assert!(false, "Asset {:?} released more times than acquired", url);
                    return;
                }

                cache_entry.refcount -= 1;
                if cache_entry.refcount > 0 || !cache_entry.is_terminal() {
                    return;
                }

                tracing::debug!("Evicting asset {:?}", url);
                let (url, cache_entry) = entry.remove_entry();
                match cache_entry.state {
                    EntryState::Ready { asset, mime } => Some(Evicted { url, mime, asset }),
                    _ => None,
                }
            }
        };

        drop(shard);

        if let Some(evicted) = evicted {
            (self.on_evict)(evicted);
        }
    }
}

/// Reference-counted cache of assets keyed by [`AssetUrl`].
///
/// Entry is created in `Loading` state by the first request of the asset manager
/// and turns `Ready` or `Failed` exactly once.
/// It is removed when its reference count drops to zero in terminal state.
/// Removed `Ready` resources are handed to the eviction hook.
#[derive(Clone)]
pub struct AssetStore {
    inner: Arc<StoreInner>,
}

impl AssetStore {
    /// Returns new empty store.
    ///
    /// Actual number of shards is bumped to the next power of two
    /// and limited to 512.
    pub fn new(num_shards: usize, on_evict: impl Fn(Evicted) + Send + Sync + 'static) -> Self {
        let num_shards = num_shards.max(1).next_power_of_two().min(MAX_SHARDS);
        let shards = (0..num_shards).map(|_| Mutex::new(HashMap::new())).collect();

        AssetStore {
            inner: Arc::new(StoreInner {
                shards,
                random_state: RandomState::new(),
                on_evict: Box::new(on_evict),
            }),
        }
    }

    /// Acquires lease on the entry for `url`, creating `Loading` entry if absent.
    ///
    /// Returns `true` along with the lease if entry was created by this call.
    pub(crate) fn acquire(&self, url: &AssetUrl) -> (Lease, bool) {
        let mut shard = self.inner.shard(url).lock();

        let created = match shard.entry(url.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().refcount += 1;
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(CacheEntry {
                    refcount: 1,
                    state: EntryState::Loading,
                    waiters: Vec::new(),
                });
                true
            }
        };

        drop(shard);

        let lease = Lease {
            store: self.inner.clone(),
            url: url.clone(),
        };
        (lease, created)
    }

    /// Returns current state of the entry for `url`.
    pub fn status(&self, url: &AssetUrl) -> Option<AssetStatus> {
        let shard = self.inner.shard(url).lock();
        let entry = shard.get(url)?;
        Some(match &entry.state {
            EntryState::Loading => AssetStatus::Loading,
            EntryState::Ready { .. } => AssetStatus::Ready,
            EntryState::Failed(err) => AssetStatus::Failed(err.clone()),
        })
    }

    /// Returns number of outstanding leases for `url`.
    pub fn refcount(&self, url: &AssetUrl) -> usize {
        let shard = self.inner.shard(url).lock();
        shard.get(url).map_or(0, |entry| entry.refcount)
    }

    /// Returns number of entries in the store.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Polls the entry for terminal state.
    /// Registers `waker` to be woken on transition if entry is still loading.
    pub(crate) fn poll(&self, url: &AssetUrl, waker: Option<&Waker>) -> Poll<Result<AnyAsset, Error>> {
        let mut shard = self.inner.shard(url).lock();

        let entry = match shard.get_mut(url) {
            Some(entry) => entry,
            None => return Poll::Ready(Err(Error::Missing { url: url.clone() })),
        };

        match &entry.state {
            EntryState::Ready { asset, .. } => Poll::Ready(Ok(asset.clone())),
            EntryState::Failed(err) => Poll::Ready(Err(err.clone())),
            EntryState::Loading => {
                if let Some(waker) = waker {
                    if !entry.waiters.iter().any(|w| w.will_wake(waker)) {
                        entry.waiters.push(waker.clone());
                    }
                }
                Poll::Pending
            }
        }
    }

    /// Moves entry out of `Loading` state and wakes all waiters.
    pub(crate) fn complete(&self, url: &AssetUrl, result: Result<(AnyAsset, Box<str>), Error>) {
        let mut shard = self.inner.shard(url).lock();

        let (waiters, evicted) = match shard.entry(url.clone()) {
            Entry::Vacant(_) => {
                tracing::error!("Completed asset {:?} is not in the store", url);
                return;
            }
            Entry::Occupied(mut entry) => {
                let cache_entry = entry.get_mut();
                if cache_entry.is_terminal() {
                    tracing::error!("Asset {:?} completed twice", url);
                    debug_assert!(false, "Asset {:?} completed twice", url);
                    return;
                }

                cache_entry.state = match result {
                    Ok((asset, mime)) => EntryState::Ready { asset, mime },
                    Err(err) => EntryState::Failed(err),
                };
                let waiters = take(&mut cache_entry.waiters);

                if cache_entry.refcount == 0 {
                    tracing::debug!("Asset {:?} is not referenced anymore", url);
                    let (url, cache_entry) = entry.remove_entry();
                    match cache_entry.state {
                        EntryState::Ready { asset, mime } => {
                            (waiters, Some(Evicted { url, mime, asset }))
                        }
                        _ => (waiters, None),
                    }
                } else {
                    (waiters, None)
                }
            }
        };

        drop(shard);

        if let Some(evicted) = evicted {
            (self.inner.on_evict)(evicted);
        }

        for waker in waiters {
            waker.wake();
        }
    }
}

/// Counted lease on a cache entry.
///
/// Cloning acquires one more reference, dropping releases exactly one.
pub struct Lease {
    store: Arc<StoreInner>,
    url: AssetUrl,
}

impl Lease {
    pub fn url(&self) -> &AssetUrl {
        &self.url
    }

    pub fn store(&self) -> AssetStore {
        AssetStore {
            inner: self.store.clone(),
        }
    }

    /// Explicitly releases the lease.
    pub fn release(self) {
        drop(self)
    }

    pub(crate) fn poll(&self, waker: Option<&Waker>) -> Poll<Result<AnyAsset, Error>> {
        self.store().poll(&self.url, waker)
    }
}

impl Clone for Lease {
    fn clone(&self) -> Self {
        self.store.retain(&self.url);
        Lease {
            store: self.store.clone(),
            url: self.url.clone(),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.store.release(&self.url);
    }
}

impl Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lease").field(&self.url).finish()
    }
}

/// Type-erased [`Ref`].
pub(crate) struct AnyRef {
    // Dropped before the lease, so the store holds the last pointer on eviction.
    asset: AnyAsset,
    lease: Lease,
}

impl AnyRef {
    pub(crate) fn new(lease: Lease, asset: AnyAsset) -> Self {
        AnyRef { asset, lease }
    }

    pub(crate) fn typed<T>(&self) -> Result<Ref<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        Ref::from_any(self.lease.clone(), self.asset.clone())
    }
}

/// Counted lease on a finalized asset resource.
///
/// Dereferences to the resource.
/// Cloning acquires one more reference on the cache entry,
/// dropping releases exactly one.
/// The resource is destroyed on the owning thread once all references are gone.
pub struct Ref<T> {
    // Dropped before the lease, so the store holds the last pointer on eviction.
    asset: Arc<T>,
    lease: Lease,
}

impl<T> Ref<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn from_any(lease: Lease, asset: AnyAsset) -> Result<Self, Error> {
        match asset.downcast::<T>() {
            Ok(asset) => Ok(Ref { asset, lease }),
            Err(_) => Err(Error::TypeMismatch {
                url: lease.url.clone(),
                expected: type_name::<T>(),
            }),
        }
    }
}

impl<T> Ref<T> {
    /// Identifier of the referenced asset.
    pub fn url(&self) -> &AssetUrl {
        &self.lease.url
    }

    /// Explicitly releases the reference.
    pub fn release(self) {
        drop(self)
    }

    /// Returns `true` if both references point to the same resource.
    pub fn ptr_eq(lhs: &Self, rhs: &Self) -> bool {
        Arc::ptr_eq(&lhs.asset, &rhs.asset)
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref {
            asset: self.asset.clone(),
            lease: self.lease.clone(),
        }
    }
}

impl<T> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.asset
    }
}

impl<T> Debug for Ref<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("url", &self.lease.url)
            .field("asset", &*self.asset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (AssetStore, flume::Receiver<Evicted>) {
        let (tx, rx) = flume::unbounded();
        let store = AssetStore::new(4, move |evicted| {
            let _ = tx.send(evicted);
        });
        (store, rx)
    }

    fn ready(value: u32) -> Result<(AnyAsset, Box<str>), Error> {
        let asset: AnyAsset = Arc::new(value);
        Ok((asset, "application/x-number".into()))
    }

    #[test]
    fn first_acquire_creates_loading_entry() {
        let (store, _rx) = store();
        let url = AssetUrl::parse("pak://a");

        let (first, created) = store.acquire(&url);
        assert!(created);
        let (second, created) = store.acquire(&url);
        assert!(!created);

        assert!(matches!(store.status(&url), Some(AssetStatus::Loading)));
        assert_eq!(store.refcount(&url), 2);
        drop((first, second));
    }

    #[test]
    fn refcount_tracks_acquire_and_release() {
        let (store, rx) = store();
        let url = AssetUrl::parse("pak://a");

        let mut leases: Vec<_> = (0..5).map(|_| store.acquire(&url).0).collect();
        store.complete(&url, ready(7));

        for released in 1..=3 {
            leases.pop().unwrap().release();
            assert_eq!(store.refcount(&url), 5 - released);
        }
        assert!(rx.try_recv().is_err());

        let lease = leases.pop().unwrap();
        let clone = lease.clone();
        assert_eq!(store.refcount(&url), 3);
        drop((lease, clone));
        assert_eq!(store.refcount(&url), 1);

        leases.pop().unwrap().release();
        assert_eq!(store.refcount(&url), 0);
        assert!(store.status(&url).is_none());

        let evicted = rx.try_recv().unwrap();
        assert_eq!(evicted.url, url);
        assert_eq!(*evicted.asset.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    fn loading_entry_is_not_evicted() {
        let (store, rx) = store();
        let url = AssetUrl::parse("pak://a");

        store.acquire(&url).0.release();
        assert!(matches!(store.status(&url), Some(AssetStatus::Loading)));

        // Late request joins the entry that is still loading.
        let (lease, created) = store.acquire(&url);
        assert!(!created);
        store.complete(&url, ready(1));
        assert!(rx.try_recv().is_err());

        lease.release();
        assert!(rx.try_recv().is_ok());
        assert!(store.is_empty());
    }

    #[test]
    fn unreferenced_entry_is_evicted_on_completion() {
        let (store, rx) = store();
        let url = AssetUrl::parse("pak://a");

        store.acquire(&url).0.release();
        store.complete(&url, ready(1));
        assert!(store.is_empty());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn failed_entry_is_removed_without_teardown() {
        let (store, rx) = store();
        let url = AssetUrl::parse("pak://a");

        let (lease, _) = store.acquire(&url);
        store.complete(&url, Err(Error::Missing { url: url.clone() }));
        assert!(matches!(store.status(&url), Some(AssetStatus::Failed(_))));
        assert!(matches!(store.poll(&url, None), Poll::Ready(Err(Error::Missing { .. }))));

        lease.release();
        assert!(store.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn typed_refs() {
        let (store, _rx) = store();
        let url = AssetUrl::parse("pak://a");

        let (lease, _) = store.acquire(&url);
        store.complete(&url, ready(42));
        let asset = match store.poll(&url, None) {
            Poll::Ready(Ok(asset)) => asset,
            _ => panic!("asset must be ready"),
        };

        let any = AnyRef::new(lease, asset);
        let number = any.typed::<u32>().unwrap();
        assert_eq!(*number, 42);
        assert_eq!(store.refcount(&url), 2);

        let copy = number.clone();
        assert!(Ref::ptr_eq(&number, &copy));
        assert_eq!(store.refcount(&url), 3);

        assert!(matches!(
            any.typed::<String>(),
            Err(Error::TypeMismatch { .. })
        ));
        assert_eq!(store.refcount(&url), 3);
    }
}
