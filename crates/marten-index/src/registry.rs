//! The index registry: a concurrent, in-process catalog of every secondary
//! index known to the engine.
//!
//! The registry enforces two uniqueness invariants per database (identifier
//! and expression-fingerprint multiset), runs a two-state lifecycle per
//! index, reference-counts indexes retained by running queries, and defers
//! on-disk deletion until the last holder releases. State is partitioned
//! across three locks so that readers never contend with the reference-count
//! hot path:
//!
//! | lock      | guards                          |
//! |-----------|---------------------------------|
//! | `catalog` | entries and statuses            |
//! | `drivers` | the driver table                |
//! | `refs`    | refcounts and the delete queue  |
//!
//! Lock order: reads take at most one lock; writes that need both `refs`
//! and `catalog` take `refs` first. No driver call and no signal fire
//! happens while a lock is held.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::driver::IndexDriver;
use crate::error::{Error, Result};
use crate::fingerprint::{self, Expression, Fingerprint};
use crate::index::Index;
use crate::status::IndexStatus;

/// Catalog key: database name plus lowercased index identifier.
///
/// Identifiers are normalized once, at insertion, so every read path can
/// key on the lowercased form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CatalogKey {
    db: String,
    id: String,
}

impl CatalogKey {
    fn new(db: &str, id: &str) -> Self {
        Self {
            db: db.to_string(),
            id: id.to_lowercase(),
        }
    }
}

#[derive(Default)]
struct CatalogState {
    entries: HashMap<CatalogKey, Arc<dyn Index>>,
    statuses: HashMap<CatalogKey, IndexStatus>,
}

#[derive(Default)]
struct RefState {
    counts: HashMap<CatalogKey, usize>,
    delete_queue: HashMap<CatalogKey, oneshot::Sender<()>>,
}

struct RegistryInner {
    root: PathBuf,
    catalog: RwLock<CatalogState>,
    drivers: RwLock<HashMap<String, Arc<dyn IndexDriver>>>,
    refs: RwLock<RefState>,
}

/// Keeps track of all indexes in the engine.
///
/// The registry is a cheap handle over shared state; clone it freely across
/// query-executing threads.
#[derive(Clone)]
pub struct IndexRegistry {
    inner: Arc<RegistryInner>,
}

impl IndexRegistry {
    /// Creates an empty registry. `root` is the filesystem path under which
    /// drivers place per-index data.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                root: root.into(),
                catalog: RwLock::new(CatalogState::default()),
                drivers: RwLock::new(HashMap::new()),
                refs: RwLock::new(RefState::default()),
            }),
        }
    }

    /// The root path under which drivers place per-index data.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Registers an index driver. A driver registered under an id that is
    /// already taken replaces the previous one.
    pub fn register_driver(&self, driver: Arc<dyn IndexDriver>) {
        let id = driver.id().to_string();
        let mut drivers = self.inner.drivers.write().unwrap();
        drivers.insert(id.clone(), driver);
        drop(drivers);
        info!(driver = %id, "index driver registered");
    }

    /// Returns the driver with the given id.
    pub fn driver(&self, id: &str) -> Option<Arc<dyn IndexDriver>> {
        let drivers = self.inner.drivers.read().unwrap();
        drivers.get(id).cloned()
    }

    /// Returns the index with the given id, case-insensitively.
    ///
    /// Returns `None` when no such index exists or when the index is not
    /// ready (still building, or being deleted). Does not retain the index.
    pub fn index(&self, db: &str, id: &str) -> Option<Arc<dyn Index>> {
        let key = CatalogKey::new(db, id);
        let catalog = self.inner.catalog.read().unwrap();
        match catalog.statuses.get(&key) {
            Some(status) if status.is_usable() => catalog.entries.get(&key).cloned(),
            _ => None,
        }
    }

    /// Returns a ready index over exactly the given expressions, comparing
    /// fingerprint lists as multisets, and atomically retains it.
    ///
    /// The caller owns one reference to the returned index and must pair it
    /// with a [`release_index`](IndexRegistry::release_index) call once its
    /// lookups and iterators are finished. Returns `None` when no ready
    /// index matches.
    pub fn index_by_expression<E: Expression>(
        &self,
        db: &str,
        exprs: &[E],
    ) -> Option<Arc<dyn Index>> {
        let wanted: Vec<Fingerprint> = exprs.iter().map(|e| Fingerprint::of(e)).collect();

        // The retain must be atomic with the scan; refs is taken first per
        // the lock order.
        let mut refs = self.inner.refs.write().unwrap();
        let catalog = self.inner.catalog.read().unwrap();
        for (key, idx) in catalog.entries.iter() {
            if idx.database() != db {
                continue;
            }
            let usable = catalog
                .statuses
                .get(key)
                .copied()
                .unwrap_or_default()
                .is_usable();
            if !usable {
                continue;
            }
            if fingerprint::lists_equal(idx.fingerprints(), &wanted) {
                *refs.counts.entry(key.clone()).or_insert(0) += 1;
                return Some(Arc::clone(idx));
            }
        }

        None
    }

    /// Returns whether the given index is ready to use.
    pub fn can_use_index(&self, idx: &dyn Index) -> bool {
        let key = CatalogKey::new(idx.database(), idx.id());
        let catalog = self.inner.catalog.read().unwrap();
        catalog
            .statuses
            .get(&key)
            .copied()
            .unwrap_or_default()
            .is_usable()
    }

    /// Adds the given index to the registry, marked as not ready.
    ///
    /// While not ready the index cannot be selected by
    /// [`index_by_expression`](IndexRegistry::index_by_expression), but it
    /// already reserves both its identifier and its expression fingerprints,
    /// so a concurrent add of a duplicate fails. Fire the returned
    /// [`ReadySignal`] once the driver has persisted the index to make it
    /// selectable.
    ///
    /// Dropping the signal without firing it leaves the entry permanently
    /// not ready: it keeps reserving its slots and cannot be deleted (delete
    /// requires a ready index). There is no abort path; a failed build holds
    /// the reservation until process restart.
    ///
    /// # Errors
    ///
    /// [`Error::IdAlreadyRegistered`] if an index with the same identifier
    /// (case-insensitive) exists in the database;
    /// [`Error::ExpressionAlreadyRegistered`] if an index over a
    /// fingerprint-multiset-equal expression list exists in the database.
    pub fn add_index(&self, idx: Arc<dyn Index>) -> Result<ReadySignal> {
        let key = CatalogKey::new(idx.database(), idx.id());

        // Validation and insertion share one write section so that of two
        // racing adds exactly one wins.
        let mut catalog = self.inner.catalog.write().unwrap();
        for (existing_key, existing) in catalog.entries.iter() {
            if existing.database() != idx.database() {
                continue;
            }
            if existing_key.id == key.id {
                return Err(Error::IdAlreadyRegistered(idx.id().to_string()));
            }
            if fingerprint::lists_equal(existing.fingerprints(), idx.fingerprints()) {
                let exprs = idx
                    .fingerprints()
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(Error::ExpressionAlreadyRegistered(exprs));
            }
        }
        catalog.statuses.insert(key.clone(), IndexStatus::NotReady);
        catalog.entries.insert(key.clone(), idx);
        drop(catalog);

        debug!(db = %key.db, index = %key.id, "index registered, awaiting build");
        Ok(ReadySignal {
            inner: Arc::clone(&self.inner),
            key,
        })
    }

    /// Deletes an index from the registry by id, case-insensitively.
    ///
    /// The index is first marked not ready, so new queries stop selecting
    /// it, while queries that already retained it may finish. If no query
    /// holds the index it is removed immediately and the returned signal has
    /// already fired; otherwise the removal happens on the final release and
    /// the signal fires then. Only after the signal fires may the caller ask
    /// the driver to remove the on-disk representation.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no index with the id exists in the database;
    /// [`Error::DeleteInvalidStatus`] if the index is not currently ready
    /// (still building, or already being deleted).
    pub fn delete_index(&self, db: &str, id: &str) -> Result<DoneSignal> {
        let key = CatalogKey::new(db, id);

        {
            let mut catalog = self.inner.catalog.write().unwrap();
            match catalog.statuses.get_mut(&key) {
                None => return Err(Error::NotFound(id.to_string())),
                Some(status) => {
                    if !status.is_usable() {
                        return Err(Error::DeleteInvalidStatus(id.to_string()));
                    }
                    *status = IndexStatus::NotReady;
                }
            }
        }

        let mut refs = self.inner.refs.write().unwrap();
        if refs.counts.get(&key).copied().unwrap_or(0) == 0 {
            // No query is using this index, delete it right away.
            let mut catalog = self.inner.catalog.write().unwrap();
            catalog.entries.remove(&key);
            catalog.statuses.remove(&key);
            drop(catalog);
            refs.counts.remove(&key);
            drop(refs);
            debug!(db = %key.db, index = %key.id, "index removed with no holders");
            return Ok(DoneSignal { rx: None });
        }

        let (tx, rx) = oneshot::channel();
        refs.delete_queue.insert(key.clone(), tx);
        drop(refs);
        debug!(db = %key.db, index = %key.id, "index removal deferred until last release");
        Ok(DoneSignal { rx: Some(rx) })
    }

    /// Releases one reference to an index previously retained by
    /// [`index_by_expression`](IndexRegistry::index_by_expression).
    ///
    /// If this was the last reference and the index is pending deletion,
    /// the entry is removed from the catalog and the deletion's
    /// [`DoneSignal`] fires.
    ///
    /// # Panics
    ///
    /// Panics if the index holds no references; releasing more than was
    /// retained is a programming error.
    pub fn release_index(&self, idx: &dyn Index) {
        let key = CatalogKey::new(idx.database(), idx.id());

        let mut refs = self.inner.refs.write().unwrap();
        let count = match refs.counts.get_mut(&key) {
            Some(count) if *count > 0 => count,
            _ => panic!(
                "released index {}.{} more times than it was retained",
                key.db, key.id
            ),
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        refs.counts.remove(&key);

        if let Some(tx) = refs.delete_queue.remove(&key) {
            let mut catalog = self.inner.catalog.write().unwrap();
            catalog.entries.remove(&key);
            catalog.statuses.remove(&key);
            drop(catalog);
            drop(refs);
            let _ = tx.send(());
            debug!(db = %key.db, index = %key.id, "last holder released, index removed");
        }
    }

    /// Repopulates the registry from every registered driver for startup
    /// recovery.
    ///
    /// Each driver's [`load`](IndexDriver::load) runs outside all registry
    /// locks; recovered indexes are installed directly as ready. Returns
    /// the loaded indexes.
    ///
    /// # Errors
    ///
    /// Driver I/O errors pass through. Uniqueness violations against
    /// already-registered indexes surface as the corresponding add errors.
    pub fn load_indexes(&self, db: &str, table: &str) -> Result<Vec<Arc<dyn Index>>> {
        let drivers: Vec<Arc<dyn IndexDriver>> = {
            let drivers = self.inner.drivers.read().unwrap();
            drivers.values().cloned().collect()
        };

        let mut loaded: Vec<Arc<dyn Index>> = Vec::new();
        for driver in drivers {
            for idx in driver.load(db, table)? {
                let idx: Arc<dyn Index> = Arc::from(idx);
                let signal = self.add_index(Arc::clone(&idx))?;
                signal.ready();
                loaded.push(idx);
            }
        }

        info!(db, table, count = loaded.len(), "indexes loaded from drivers");
        Ok(loaded)
    }
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

/// One-shot signal returned by [`IndexRegistry::add_index`].
///
/// Firing it marks the index as built and ready for use. Dropping it
/// unfired leaves the index permanently not ready while still reserving its
/// identifier and fingerprint slots.
#[must_use = "dropping the signal unfired leaves the index permanently not ready"]
pub struct ReadySignal {
    inner: Arc<RegistryInner>,
    key: CatalogKey,
}

impl std::fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySignal").field("key", &self.key).finish()
    }
}

impl ReadySignal {
    /// Marks the index as ready. Consumes the signal; it fires once.
    pub fn ready(self) {
        let mut catalog = self.inner.catalog.write().unwrap();
        if let Some(status) = catalog.statuses.get_mut(&self.key) {
            *status = IndexStatus::Ready;
        }
        drop(catalog);
        info!(db = %self.key.db, index = %self.key.id, "index ready");
    }
}

/// One-shot signal returned by [`IndexRegistry::delete_index`].
///
/// Fires when the last holder of the deleted index has released it and the
/// entry has been removed from the catalog. A deletion with no holders
/// returns an already-fired signal.
pub struct DoneSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for DoneSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoneSignal").field("pending", &self.rx.is_some()).finish()
    }
}

impl DoneSignal {
    /// Waits asynchronously for the drain to complete.
    pub async fn wait(self) {
        if let Some(rx) = self.rx {
            let _ = rx.await;
        }
    }

    /// Blocks the calling thread until the drain completes. Must not be
    /// called from an async context.
    pub fn blocking_wait(self) {
        if let Some(rx) = self.rx {
            let _ = rx.blocking_recv();
        }
    }

    /// Polls whether the drain has completed, without blocking.
    pub fn try_wait(&mut self) -> bool {
        match self.rx.as_mut() {
            None => true,
            Some(rx) => match rx.try_recv() {
                Ok(()) => {
                    self.rx = None;
                    true
                }
                Err(oneshot::error::TryRecvError::Empty) => false,
                Err(oneshot::error::TryRecvError::Closed) => false,
            },
        }
    }
}
