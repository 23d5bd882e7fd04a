//! Session cache shared by every engine of one [`Config`](crate::Config).
//!
//! Lookups take a read lock only, so concurrent handshakes never block each
//! other on the fast path. Recency is an atomic tick per entry rather than a
//! linked list, which keeps lookups read-only on the map. Inserts take the
//! write lock and run at most one bounded eviction pass.
//!
//! Entries pinned by an in-flight handshake survive both eviction and expiry
//! until the last [`SessionPin`] is dropped.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use crate::session::Session;
use crate::types::SessionId;
use crate::Error;

/// Default number of cached sessions.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default lifetime of a cached session.
pub const DEFAULT_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// TTLs are kept in milliseconds, saturating.
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

pub struct SessionCache {
    inner: RwLock<Inner>,
    capacity: AtomicUsize,
    ttl_millis: AtomicU64,
    tick: AtomicU64,
    store: Option<Arc<dyn SessionStore>>,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<SessionId, Arc<Entry>>,
    by_ticket: HashMap<Vec<u8>, SessionId>,
}

struct Entry {
    session: Arc<Session>,
    pins: AtomicUsize,
    last_used: AtomicU64,
}

impl Entry {
    fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }
}

impl SessionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        SessionCache {
            inner: RwLock::new(Inner::default()),
            capacity: AtomicUsize::new(capacity),
            ttl_millis: AtomicU64::new(millis(ttl)),
            tick: AtomicU64::new(0),
            store: None,
        }
    }

    /// Add a persistent second tier.
    ///
    /// Lookups that miss memory consult the store, inserts are written through.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis.load(Ordering::Relaxed))
    }

    /// Number of entries held in memory, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the ids of every unexpired session in memory.
    pub fn ids(&self) -> Vec<SessionId> {
        self.ids_at(SystemTime::now())
    }

    /// As [`ids`](Self::ids), judging expiry at `now`.
    pub fn ids_at(&self, now: SystemTime) -> Vec<SessionId> {
        let ttl = self.ttl();
        self.read()
            .by_id
            .iter()
            .filter(|(_, e)| !e.session.is_expired(now, ttl))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.lookup_at(id, SystemTime::now())
    }

    /// Look up `id` as of `now`.
    ///
    /// An expired entry is treated as absent and removed unless pinned.
    pub fn lookup_at(&self, id: &SessionId, now: SystemTime) -> Option<Arc<Session>> {
        if id.is_empty() {
            return None;
        }

        let found = self.read().by_id.get(id).cloned();
        match found {
            Some(entry) => {
                if entry.session.is_expired(now, self.ttl()) {
                    trace!("Session {:?} expired", id);
                    if !entry.is_pinned() {
                        self.remove_expired(id, now);
                    }
                    return None;
                }
                self.mark_used(&entry, now);
                Some(entry.session.clone())
            }
            None => self.load_from_store(id, now),
        }
    }

    pub fn lookup_ticket(&self, ticket: &[u8]) -> Option<Arc<Session>> {
        self.lookup_ticket_at(ticket, SystemTime::now())
    }

    pub fn lookup_ticket_at(&self, ticket: &[u8], now: SystemTime) -> Option<Arc<Session>> {
        let id = self.read().by_ticket.get(ticket).cloned()?;
        self.lookup_at(&id, now)
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.insert_at(session, SystemTime::now())
    }

    /// Insert a frozen session.
    ///
    /// Sessions without an id are never cached. Inserting an identical session
    /// again only refreshes its recency.
    pub fn insert_at(&self, session: Arc<Session>, now: SystemTime) {
        if session.id().is_empty() {
            debug!("Not caching session without id");
            return;
        }
        if self.insert_memory(session.clone(), now) {
            self.write_through(&session);
        }
    }

    /// Insert a session and make it reachable by `ticket` as well.
    pub fn insert_ticket(&self, ticket: &[u8], session: Arc<Session>) {
        let id = session.id().clone();
        self.insert(session);
        if id.is_empty() || ticket.is_empty() {
            return;
        }
        let mut inner = self.write();
        if inner.by_id.contains_key(&id) {
            inner.by_ticket.insert(ticket.to_vec(), id);
        }
    }

    /// Pin `id` for the duration of a resuming handshake.
    pub fn pin(&self, id: &SessionId) -> Option<SessionPin> {
        self.pin_at(id, SystemTime::now())
    }

    pub fn pin_at(&self, id: &SessionId, now: SystemTime) -> Option<SessionPin> {
        // Pull a store hit into memory so the pin has an entry to hold.
        self.lookup_at(id, now)?;

        let inner = self.read();
        let entry = inner.by_id.get(id)?;
        if entry.session.is_expired(now, self.ttl()) {
            return None;
        }
        entry.pins.fetch_add(1, Ordering::AcqRel);
        Some(SessionPin {
            entry: entry.clone(),
        })
    }

    pub fn remove(&self, id: &SessionId) {
        {
            let mut inner = self.write();
            inner.by_id.remove(id);
            inner.by_ticket.retain(|_, v| v != id);
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id) {
                warn!("Failed to remove session from store: {}", e);
            }
        }
    }

    /// Change the capacity, trimming right away when shrinking.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        let mut inner = self.write();
        self.evict(&mut inner, SystemTime::now());
    }

    /// Change the TTL and purge whatever it expires.
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_millis.store(millis(ttl), Ordering::Relaxed);
        let mut inner = self.write();
        self.purge_expired(&mut inner, SystemTime::now());
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_used(&self, entry: &Entry, now: SystemTime) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        entry.last_used.store(tick, Ordering::Relaxed);
        entry.session.touch(now);
    }

    /// Returns whether the session was new to the cache.
    fn insert_memory(&self, session: Arc<Session>, now: SystemTime) -> bool {
        let mut inner = self.write();
        let id = session.id().clone();

        if let Some(existing) = inner.by_id.get(&id) {
            if *existing.session == *session {
                self.mark_used(existing, now);
                return false;
            }
        }

        let ticket = session.ticket().map(|t| t.to_vec());
        let entry = Arc::new(Entry {
            session,
            pins: AtomicUsize::new(0),
            last_used: AtomicU64::new(0),
        });
        self.mark_used(&entry, now);
        inner.by_id.insert(id.clone(), entry);
        if let Some(ticket) = ticket {
            inner.by_ticket.insert(ticket, id);
        }

        self.evict(&mut inner, now);
        true
    }

    fn evict(&self, inner: &mut Inner, now: SystemTime) {
        let capacity = self.capacity();
        if inner.by_id.len() <= capacity {
            return;
        }
        self.purge_expired(inner, now);

        while inner.by_id.len() > capacity {
            let victim = inner
                .by_id
                .iter()
                .filter(|(_, e)| !e.is_pinned())
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());

            let Some(id) = victim else {
                warn!(
                    "Session cache over capacity ({} > {}), every entry pinned",
                    inner.by_id.len(),
                    capacity
                );
                break;
            };
            trace!("Evicting session {:?}", id);
            inner.by_id.remove(&id);
            inner.by_ticket.retain(|_, v| *v != id);
        }
    }

    fn purge_expired(&self, inner: &mut Inner, now: SystemTime) {
        let ttl = self.ttl();
        inner
            .by_id
            .retain(|_, e| e.is_pinned() || !e.session.is_expired(now, ttl));
        let Inner { by_id, by_ticket } = inner;
        by_ticket.retain(|_, id| by_id.contains_key(id));
    }

    fn remove_expired(&self, id: &SessionId, now: SystemTime) {
        let mut inner = self.write();
        let expired = inner
            .by_id
            .get(id)
            .map(|e| !e.is_pinned() && e.session.is_expired(now, self.ttl()))
            .unwrap_or(false);
        if expired {
            inner.by_id.remove(id);
            inner.by_ticket.retain(|_, v| v != id);
        }
    }

    fn load_from_store(&self, id: &SessionId, now: SystemTime) -> Option<Arc<Session>> {
        let store = self.store.as_ref()?;
        match store.load(id) {
            Ok(Some(session)) => {
                if session.is_expired(now, self.ttl()) {
                    if let Err(e) = store.remove(id) {
                        warn!("Failed to remove expired session from store: {}", e);
                    }
                    return None;
                }
                debug!("Session {:?} loaded from store", id);
                self.insert_memory(session.clone(), now);
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Session store lookup failed: {}", e);
                None
            }
        }
    }

    fn write_through(&self, session: &Session) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(session) {
                warn!("Failed to persist session {:?}: {}", session.id(), e);
            }
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        SessionCache::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("ttl", &self.ttl())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

/// Keeps a cached session alive while a handshake resumes it.
pub struct SessionPin {
    entry: Arc<Entry>,
}

impl SessionPin {
    pub fn session(&self) -> &Arc<Session> {
        &self.entry.session
    }
}

impl Drop for SessionPin {
    fn drop(&mut self) {
        self.entry.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for SessionPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionPin")
            .field(self.entry.session.id())
            .finish()
    }
}

// ============================================================================
// Persistent tier
// ============================================================================

/// Persistent storage behind a [`SessionCache`].
pub trait SessionStore: Send + Sync + fmt::Debug {
    fn load(&self, id: &SessionId) -> Result<Option<Arc<Session>>, Error>;

    /// Persist a session atomically: a reader sees the whole record or nothing.
    fn save(&self, session: &Session) -> Result<(), Error>;

    fn remove(&self, id: &SessionId) -> Result<(), Error>;
}

/// One file per session in a directory.
///
/// Records are written to a temporary file, synced, then renamed over the
/// final name.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(store_error)?;
        Ok(FileSessionStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.session", hex(id.as_slice())))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, id: &SessionId) -> Result<Option<Arc<Session>>, Error> {
        let bytes = match fs::read(self.path_for(id)) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(e)),
        };
        let session = Session::decode(&bytes)?;
        if session.id() != id {
            return Err(Error::StoreError("session id does not match file name".into()));
        }
        Ok(Some(Arc::new(session)))
    }

    fn save(&self, session: &Session) -> Result<(), Error> {
        let path = self.path_for(session.id());
        let tmp = self.dir.join(format!(
            ".{}.{:016x}.tmp",
            hex(session.id().as_slice()),
            rand::random::<u64>()
        ));

        let encoded = session.encode();
        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(store_error(e));
        }
        Ok(())
    }

    fn remove(&self, id: &SessionId) -> Result<(), Error> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error(e)),
        }
    }
}

fn store_error(e: io::Error) -> Error {
    Error::StoreError(e.to_string())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::sample;

    fn id(n: u8) -> SessionId {
        SessionId::try_new(&[n; 32]).unwrap()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pakls_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn evicts_least_recently_used() {
        let now = SystemTime::now();
        let cache = SessionCache::new(3, DEFAULT_TTL);
        for n in 1..=3 {
            cache.insert_at(sample(n, now), now);
        }
        assert!(cache.lookup_at(&id(1), now).is_some());

        cache.insert_at(sample(4, now), now);
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup_at(&id(2), now).is_none());
        for n in [1, 3, 4] {
            assert!(cache.lookup_at(&id(n), now).is_some(), "{} evicted", n);
        }
    }

    #[test]
    fn pinned_entries_survive_eviction() {
        let now = SystemTime::now();
        let cache = SessionCache::new(2, DEFAULT_TTL);
        cache.insert_at(sample(1, now), now);
        cache.insert_at(sample(2, now), now);

        let pin = cache.pin_at(&id(1), now).unwrap();
        cache.lookup_at(&id(2), now);
        cache.insert_at(sample(3, now), now);

        // 1 is least recently used but pinned, so 2 goes.
        assert!(cache.lookup_at(&id(2), now).is_none());
        assert!(cache.lookup_at(&id(1), now).is_some());
        assert_eq!(pin.session().id(), &id(1));
        drop(pin);

        cache.set_capacity(1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn pinned_entry_is_never_the_victim() {
        let now = SystemTime::now();
        let cache = SessionCache::new(1, DEFAULT_TTL);
        cache.insert_at(sample(1, now), now);
        let _pin = cache.pin_at(&id(1), now).unwrap();
        cache.insert_at(sample(2, now), now);
        // 2 is the only unpinned entry, so it is evicted on its own insert.
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup_at(&id(1), now).is_some());
    }

    #[test]
    fn expired_entries_are_absent() {
        let now = SystemTime::now();
        let later = now + Duration::from_secs(120);
        let cache = SessionCache::new(10, Duration::from_secs(60));
        cache.insert_at(sample(1, now), now);
        cache.insert_at(sample(2, now), now);

        let pin = cache.pin_at(&id(2), now).unwrap();
        assert!(cache.lookup_at(&id(1), later).is_none());
        assert!(cache.lookup_at(&id(2), later).is_none());
        // Only the unpinned one was removed.
        assert_eq!(cache.len(), 1);
        drop(pin);
    }

    #[test]
    fn ids_follow_the_supplied_clock() {
        let now = SystemTime::now();
        let cache = SessionCache::new(10, Duration::from_secs(60));
        cache.insert_at(sample(1, now), now);
        cache.insert_at(sample(2, now + Duration::from_secs(90)), now);

        let mut ids = cache.ids_at(now + Duration::from_secs(30));
        ids.sort_by(|a, b| a.as_slice().cmp(b.as_slice()));
        assert_eq!(ids, vec![id(1), id(2)]);
        assert_eq!(cache.ids_at(now + Duration::from_secs(120)), vec![id(2)]);
    }

    #[test]
    fn sub_second_ttl_is_kept() {
        let now = SystemTime::now();
        let cache = SessionCache::new(10, Duration::from_millis(1500));
        assert_eq!(cache.ttl(), Duration::from_millis(1500));

        cache.insert_at(sample(1, now), now);
        cache.set_ttl(Duration::from_millis(250));
        assert_eq!(cache.ttl(), Duration::from_millis(250));
        assert!(cache.lookup_at(&id(1), now + Duration::from_millis(200)).is_some());
        assert!(cache.lookup_at(&id(1), now + Duration::from_millis(300)).is_none());
    }

    #[test]
    fn insert_is_idempotent_and_skips_empty_ids() {
        let now = SystemTime::now();
        let cache = SessionCache::default();
        let s = sample(1, now);
        cache.insert_at(s.clone(), now);
        cache.insert_at(s.clone(), now);
        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&cache.lookup_at(&id(1), now).unwrap(), &s));

        let mut b = crate::session::SessionBuilder::new(now);
        b.id(SessionId::empty())
            .version(crate::types::ProtocolVersion::Tls13)
            .cipher_suite(crate::types::CipherSuite::TLS_AES_128_GCM_SHA256)
            .master_secret(&[0; 32])
            .peer(crate::session::PeerIdentity::Anonymous);
        cache.insert_at(b.freeze().unwrap(), now);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ticket_index() {
        let now = SystemTime::now();
        let cache = SessionCache::default();
        cache.insert_ticket(b"ticket-1", sample(1, now));
        let found = cache.lookup_ticket_at(b"ticket-1", now).unwrap();
        assert_eq!(found.id(), &id(1));

        cache.remove(&id(1));
        assert!(cache.lookup_ticket_at(b"ticket-1", now).is_none());
    }

    #[test]
    fn file_store_is_second_tier() {
        let _ = env_logger::try_init();
        let dir = scratch_dir("second_tier");
        let store = Arc::new(FileSessionStore::new(dir.clone()).unwrap());
        let now = SystemTime::now();

        let first = SessionCache::default().with_store(store.clone());
        first.insert_at(sample(7, now), now);

        let files: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1, "no temporary files left behind");

        // A fresh cache over the same directory finds it.
        let second = SessionCache::default().with_store(store.clone());
        assert!(second.is_empty());
        let loaded = second.lookup_at(&id(7), now).unwrap();
        assert_eq!(*loaded, *sample(7, now));
        assert_eq!(second.len(), 1);

        second.remove(&id(7));
        assert!(store.load(&id(7)).unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_store_record_is_an_error() {
        let dir = scratch_dir("corrupt");
        let store = FileSessionStore::new(dir.clone()).unwrap();
        fs::write(store.path_for(&id(3)), b"PKLS\x01garbage").unwrap();
        assert!(matches!(store.load(&id(3)), Err(Error::StoreError(_))));
        let _ = fs::remove_dir_all(&dir);
    }
}
