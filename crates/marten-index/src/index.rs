//! Traits for indexes, lookups, and their iterators.
//!
//! [`Index`] is the basic representation of a secondary index. Capabilities
//! beyond point lookup are modeled as orthogonal traits ([`AscendIndex`],
//! [`DescendIndex`], [`SetOperations`], [`Mergeable`]) that implementations
//! opt into; callers probe for them at runtime through the `Option`-returning
//! accessors and degrade gracefully when a capability is absent.

use std::any::Any;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::types::Location;

/// An iterator over the row locations in a subset of an index.
pub trait ValueIter: Send {
    /// Returns the next row location, or `None` once the subset is
    /// exhausted.
    fn next(&mut self) -> Result<Option<Location>>;

    /// Releases any resources held by the iterator. Must be called exactly
    /// once when the caller is done, whether or not the iterator was
    /// drained.
    fn close(&mut self) -> Result<()>;
}

/// An iterator over index key tuples produced while building an index.
///
/// Each item pairs the encoded values of the indexed columns for one row
/// with that row's location.
pub trait KeyValueIter: Send {
    /// Returns the next `(column values, location)` tuple. The length of
    /// the values slice equals the number of indexed expressions.
    fn next(&mut self) -> Result<Option<(Vec<Vec<u8>>, Location)>>;

    /// Releases any resources held by the iterator.
    fn close(&mut self) -> Result<()>;
}

/// The basic representation of a secondary index.
///
/// Implementations that maintain key order can additionally implement
/// [`AscendIndex`] and [`DescendIndex`] and surface them through
/// [`as_ascend`](Index::as_ascend) / [`as_descend`](Index::as_descend).
pub trait Index: Send + Sync {
    /// The identifier of the index.
    fn id(&self) -> &str;

    /// The database this index belongs to.
    fn database(&self) -> &str;

    /// The table this index belongs to.
    fn table(&self) -> &str;

    /// Fingerprints of the indexed expressions, in creation order. More
    /// than one fingerprint means a multi-column index.
    fn fingerprints(&self) -> &[Fingerprint];

    /// Returns a lookup over the rows matching `key` exactly.
    fn get(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>>;

    /// Returns whether `key` is present in the index.
    fn has(&self, key: &[u8]) -> Result<bool>;

    /// The ascending-order capability, if this index maintains key order.
    fn as_ascend(&self) -> Option<&dyn AscendIndex> {
        None
    }

    /// The descending-order capability, if this index maintains key order.
    fn as_descend(&self) -> Option<&dyn DescendIndex> {
        None
    }
}

/// Ascending half-open range queries over an ordered index.
pub trait AscendIndex {
    /// A lookup over keys `>= key`, ascending.
    fn ascend_greater_or_equal(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>>;

    /// A lookup over keys `< key`, ascending.
    fn ascend_less_than(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>>;

    /// A lookup over keys in `[greater_or_equal, less_than)`, ascending.
    fn ascend_range(
        &self,
        greater_or_equal: &[u8],
        less_than: &[u8],
    ) -> Result<Box<dyn IndexLookup>>;
}

/// Descending half-open range queries over an ordered index.
pub trait DescendIndex {
    /// A lookup over keys `> key`, descending.
    fn descend_greater(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>>;

    /// A lookup over keys `<= key`, descending.
    fn descend_less_or_equal(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>>;

    /// A lookup over keys in `(greater_than, less_or_equal]`, descending.
    fn descend_range(
        &self,
        less_or_equal: &[u8],
        greater_than: &[u8],
    ) -> Result<Box<dyn IndexLookup>>;
}

/// A subset of an index's key space.
///
/// Lookups are scoped to the retain/release bracket of the index they came
/// from; they must not outlive the release call.
pub trait IndexLookup: Send + Sync {
    /// Returns an iterator over the row locations in this subset.
    fn values(&self) -> Result<Box<dyn ValueIter>>;

    /// The lookup as [`Any`], for capability implementations that need the
    /// concrete peer type (e.g. [`Mergeable`]).
    fn as_any(&self) -> &dyn Any;

    /// The set-operations capability, if this lookup supports combining
    /// with other lookups.
    fn set_operations(&self) -> Option<&dyn SetOperations> {
        None
    }

    /// The mergeability capability, if this lookup can report whether it
    /// combines with another one.
    fn mergeable(&self) -> Option<&dyn Mergeable> {
        None
    }
}

/// Set operations between several lookups.
pub trait SetOperations {
    /// A new lookup over the intersection of this lookup and `others`.
    fn intersection(&self, others: &[&dyn IndexLookup]) -> Result<Box<dyn IndexLookup>>;

    /// A new lookup over the union of this lookup and `others`.
    fn union(&self, others: &[&dyn IndexLookup]) -> Result<Box<dyn IndexLookup>>;

    /// A new lookup over this lookup minus the locations in `others`.
    fn difference(&self, others: &[&dyn IndexLookup]) -> Result<Box<dyn IndexLookup>>;
}

/// Checks whether a lookup can be merged with another one.
pub trait Mergeable {
    /// Returns whether this lookup can be merged with `other`.
    fn is_mergeable(&self, other: &dyn IndexLookup) -> bool;
}
