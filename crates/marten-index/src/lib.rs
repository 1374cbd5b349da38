//! Concurrent secondary-index registry for the MartenDB SQL engine.
//!
//! The registry is an in-process catalog of the secondary indexes known to
//! the engine. It owns the lifecycle of every index (registration, build
//! readiness, in-use retention by query executors, and deferred deletion)
//! and dispatches persistence work to pluggable [`IndexDriver`]s that own
//! the on-disk representation.

#![deny(missing_docs)]

pub mod disk;
pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod memory;
pub mod registry;
pub mod status;
pub mod types;

pub use disk::DiskDriver;
pub use driver::{CancellationToken, IndexDriver};
pub use error::{Error, Result};
pub use fingerprint::{Expression, Fingerprint};
pub use index::{
    AscendIndex, DescendIndex, Index, IndexLookup, KeyValueIter, Mergeable, SetOperations,
    ValueIter,
};
pub use memory::{MemoryIndex, MemoryKeyValueIter, MemoryLookup};
pub use registry::{DoneSignal, IndexRegistry, ReadySignal};
pub use status::IndexStatus;
pub use types::{DriverConfig, IndexKey, Location};
