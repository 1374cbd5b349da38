//! The pluggable persistence driver contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::index::{Index, KeyValueIter};
use crate::types::DriverConfig;

/// A cancellation token honored by long-running driver operations.
///
/// Cloning shares the underlying flag; canceling any clone cancels them
/// all. The flag only ever transitions from not-canceled to canceled.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-canceled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    /// Returns whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}

/// Manages the coordination between indexes and their representation on
/// disk.
///
/// Drivers are registered with the registry by unique id; the last
/// registration for an id wins. Driver methods may block and perform I/O;
/// the registry guarantees it never holds any of its locks across a driver
/// call.
pub trait IndexDriver: Send + Sync {
    /// The unique name of the driver.
    fn id(&self) -> &str;

    /// Constructs a new, empty index descriptor. More than one fingerprint
    /// means a multi-column index. This is pure construction; the driver
    /// has no I/O obligation until [`save`](IndexDriver::save).
    fn create(
        &self,
        db: &str,
        table: &str,
        id: &str,
        fingerprints: Vec<Fingerprint>,
        config: DriverConfig,
    ) -> Result<Box<dyn Index>>;

    /// Loads all indexes previously saved for `db.table`, for startup
    /// recovery. A table with no saved indexes loads as an empty list.
    fn load(&self, db: &str, table: &str) -> Result<Vec<Box<dyn Index>>>;

    /// Consumes the build iterator and persists the index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`](crate::Error::Canceled) if `token` is
    /// canceled before the iterator is drained; partially written state
    /// must not become visible to [`load`](IndexDriver::load).
    fn save(
        &self,
        token: &CancellationToken,
        index: &dyn Index,
        iter: &mut dyn KeyValueIter,
    ) -> Result<()>;

    /// Removes the index's persisted representation.
    fn delete(&self, index: &dyn Index) -> Result<()>;
}
