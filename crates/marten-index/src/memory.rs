//! An in-memory index implementation backed by an ordered map.
//!
//! [`MemoryIndex`] implements the full capability surface: point lookups,
//! ascending and descending range queries, and lookups that support set
//! operations and merge probing. It doubles as the build target for
//! [`DiskDriver`](crate::disk::DiskDriver) saves and as the reference
//! implementation for tests.

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::index::{
    AscendIndex, DescendIndex, Index, IndexLookup, KeyValueIter, Mergeable, SetOperations,
    ValueIter,
};
use crate::types::{IndexKey, Location};

/// Encodes the values of the indexed columns for one row into a single
/// index key.
///
/// Each column is length-prefixed so adjacent columns can never alias each
/// other. The same row always encodes to the same key.
pub fn encode_key(columns: &[Vec<u8>]) -> IndexKey {
    let mut key = Vec::with_capacity(columns.iter().map(|c| c.len() + 4).sum());
    for column in columns {
        let len = u32::try_from(column.len()).unwrap_or(u32::MAX);
        key.extend_from_slice(&len.to_be_bytes());
        key.extend_from_slice(column);
    }
    key
}

/// An in-memory ordered index.
pub struct MemoryIndex {
    database: String,
    table: String,
    id: String,
    fingerprints: Vec<Fingerprint>,
    entries: RwLock<BTreeMap<IndexKey, Vec<Location>>>,
}

impl MemoryIndex {
    /// Creates an empty index descriptor for `db.table`.
    pub fn new(
        db: impl Into<String>,
        table: impl Into<String>,
        id: impl Into<String>,
        fingerprints: Vec<Fingerprint>,
    ) -> Self {
        Self {
            database: db.into(),
            table: table.into(),
            id: id.into(),
            fingerprints,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Inserts one `key -> location` mapping. A key may map to several
    /// locations; insertion order is preserved per key.
    pub fn insert(&self, key: impl Into<IndexKey>, location: impl Into<Location>) {
        let mut entries = self.entries.write().unwrap();
        entries.entry(key.into()).or_default().push(location.into());
    }

    /// An ordered snapshot of the index contents.
    pub fn snapshot(&self) -> Vec<(IndexKey, Vec<Location>)> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn empty_lookup(&self) -> MemoryLookup {
        MemoryLookup {
            index_id: self.id.clone(),
            locations: Vec::new(),
        }
    }

    fn lookup_range(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        descending: bool,
    ) -> MemoryLookup {
        let entries = self.entries.read().unwrap();
        let range = entries.range::<[u8], _>((lower, upper));
        let mut locations: Vec<Location> = Vec::new();
        if descending {
            for (_, locs) in range.rev() {
                locations.extend(locs.iter().cloned());
            }
        } else {
            for (_, locs) in range {
                locations.extend(locs.iter().cloned());
            }
        }
        MemoryLookup {
            index_id: self.id.clone(),
            locations,
        }
    }
}

impl Index for MemoryIndex {
    fn id(&self) -> &str {
        &self.id
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn fingerprints(&self) -> &[Fingerprint] {
        &self.fingerprints
    }

    fn get(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>> {
        let entries = self.entries.read().unwrap();
        let locations = entries.get(key).cloned().unwrap_or_default();
        Ok(Box::new(MemoryLookup {
            index_id: self.id.clone(),
            locations,
        }))
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        let entries = self.entries.read().unwrap();
        Ok(entries.contains_key(key))
    }

    fn as_ascend(&self) -> Option<&dyn AscendIndex> {
        Some(self)
    }

    fn as_descend(&self) -> Option<&dyn DescendIndex> {
        Some(self)
    }
}

impl AscendIndex for MemoryIndex {
    fn ascend_greater_or_equal(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>> {
        Ok(Box::new(self.lookup_range(
            Bound::Included(key),
            Bound::Unbounded,
            false,
        )))
    }

    fn ascend_less_than(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>> {
        Ok(Box::new(self.lookup_range(
            Bound::Unbounded,
            Bound::Excluded(key),
            false,
        )))
    }

    fn ascend_range(
        &self,
        greater_or_equal: &[u8],
        less_than: &[u8],
    ) -> Result<Box<dyn IndexLookup>> {
        if greater_or_equal > less_than {
            return Ok(Box::new(self.empty_lookup()));
        }
        Ok(Box::new(self.lookup_range(
            Bound::Included(greater_or_equal),
            Bound::Excluded(less_than),
            false,
        )))
    }
}

impl DescendIndex for MemoryIndex {
    fn descend_greater(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>> {
        Ok(Box::new(self.lookup_range(
            Bound::Excluded(key),
            Bound::Unbounded,
            true,
        )))
    }

    fn descend_less_or_equal(&self, key: &[u8]) -> Result<Box<dyn IndexLookup>> {
        Ok(Box::new(self.lookup_range(
            Bound::Unbounded,
            Bound::Included(key),
            true,
        )))
    }

    fn descend_range(
        &self,
        less_or_equal: &[u8],
        greater_than: &[u8],
    ) -> Result<Box<dyn IndexLookup>> {
        if greater_than > less_or_equal {
            return Ok(Box::new(self.empty_lookup()));
        }
        Ok(Box::new(self.lookup_range(
            Bound::Excluded(greater_than),
            Bound::Included(less_or_equal),
            true,
        )))
    }
}

/// A materialized subset of a [`MemoryIndex`].
pub struct MemoryLookup {
    index_id: String,
    locations: Vec<Location>,
}

impl MemoryLookup {
    fn drain(lookup: &dyn IndexLookup) -> Result<Vec<Location>> {
        let mut values = lookup.values()?;
        let mut locations = Vec::new();
        while let Some(location) = values.next()? {
            locations.push(location);
        }
        values.close()?;
        Ok(locations)
    }
}

impl IndexLookup for MemoryLookup {
    fn values(&self) -> Result<Box<dyn ValueIter>> {
        Ok(Box::new(MemoryValueIter {
            locations: self.locations.clone().into_iter(),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_operations(&self) -> Option<&dyn SetOperations> {
        Some(self)
    }

    fn mergeable(&self) -> Option<&dyn Mergeable> {
        Some(self)
    }
}

impl SetOperations for MemoryLookup {
    fn intersection(&self, others: &[&dyn IndexLookup]) -> Result<Box<dyn IndexLookup>> {
        let mut locations = self.locations.clone();
        for other in others {
            let theirs = Self::drain(*other)?;
            locations.retain(|location| theirs.contains(location));
        }
        Ok(Box::new(MemoryLookup {
            index_id: self.index_id.clone(),
            locations,
        }))
    }

    fn union(&self, others: &[&dyn IndexLookup]) -> Result<Box<dyn IndexLookup>> {
        let mut locations = self.locations.clone();
        for other in others {
            for location in Self::drain(*other)? {
                if !locations.contains(&location) {
                    locations.push(location);
                }
            }
        }
        Ok(Box::new(MemoryLookup {
            index_id: self.index_id.clone(),
            locations,
        }))
    }

    fn difference(&self, others: &[&dyn IndexLookup]) -> Result<Box<dyn IndexLookup>> {
        let mut locations = self.locations.clone();
        for other in others {
            let theirs = Self::drain(*other)?;
            locations.retain(|location| !theirs.contains(location));
        }
        Ok(Box::new(MemoryLookup {
            index_id: self.index_id.clone(),
            locations,
        }))
    }
}

impl Mergeable for MemoryLookup {
    fn is_mergeable(&self, other: &dyn IndexLookup) -> bool {
        other
            .as_any()
            .downcast_ref::<MemoryLookup>()
            .is_some_and(|other| other.index_id == self.index_id)
    }
}

/// Iterator over the locations of a [`MemoryLookup`].
pub struct MemoryValueIter {
    locations: std::vec::IntoIter<Location>,
}

impl ValueIter for MemoryValueIter {
    fn next(&mut self) -> Result<Option<Location>> {
        Ok(self.locations.next())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A [`KeyValueIter`] over pre-collected build rows, for drivers and tests.
pub struct MemoryKeyValueIter {
    rows: std::vec::IntoIter<(Vec<Vec<u8>>, Location)>,
}

impl MemoryKeyValueIter {
    /// Wraps the given `(column values, location)` rows.
    pub fn new(rows: Vec<(Vec<Vec<u8>>, Location)>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl KeyValueIter for MemoryKeyValueIter {
    fn next(&mut self) -> Result<Option<(Vec<Vec<u8>>, Location)>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> Location {
        s.as_bytes().to_vec()
    }

    fn sample_index() -> MemoryIndex {
        let idx = MemoryIndex::new("db", "users", "idx_users_name", vec![Fingerprint::of(&"name")]);
        idx.insert(*b"a", loc("row1"));
        idx.insert(*b"b", loc("row2"));
        idx.insert(*b"b", loc("row3"));
        idx.insert(*b"c", loc("row4"));
        idx
    }

    fn collect(lookup: Box<dyn IndexLookup>) -> Vec<Location> {
        let mut values = lookup.values().unwrap();
        let mut out = Vec::new();
        while let Some(location) = values.next().unwrap() {
            out.push(location);
        }
        values.close().unwrap();
        out
    }

    #[test]
    fn test_get_and_has() {
        let idx = sample_index();
        assert!(idx.has(b"a").unwrap());
        assert!(!idx.has(b"z").unwrap());

        assert_eq!(collect(idx.get(b"b").unwrap()), vec![loc("row2"), loc("row3")]);
        assert!(collect(idx.get(b"z").unwrap()).is_empty());
    }

    #[test]
    fn test_ascend_ranges() {
        let idx = sample_index();
        let asc = idx.as_ascend().unwrap();

        assert_eq!(
            collect(asc.ascend_greater_or_equal(b"b").unwrap()),
            vec![loc("row2"), loc("row3"), loc("row4")]
        );
        assert_eq!(collect(asc.ascend_less_than(b"b").unwrap()), vec![loc("row1")]);
        assert_eq!(
            collect(asc.ascend_range(b"a", b"c").unwrap()),
            vec![loc("row1"), loc("row2"), loc("row3")]
        );

        // Empty and inverted ranges yield no locations.
        assert!(collect(asc.ascend_range(b"b", b"b").unwrap()).is_empty());
        assert!(collect(asc.ascend_range(b"c", b"a").unwrap()).is_empty());
    }

    #[test]
    fn test_descend_ranges() {
        let idx = sample_index();
        let desc = idx.as_descend().unwrap();

        assert_eq!(
            collect(desc.descend_greater(b"a").unwrap()),
            vec![loc("row4"), loc("row2"), loc("row3")]
        );
        assert_eq!(
            collect(desc.descend_less_or_equal(b"b").unwrap()),
            vec![loc("row2"), loc("row3"), loc("row1")]
        );
        assert_eq!(
            collect(desc.descend_range(b"c", b"a").unwrap()),
            vec![loc("row4"), loc("row2"), loc("row3")]
        );

        assert!(collect(desc.descend_range(b"b", b"b").unwrap()).is_empty());
        assert!(collect(desc.descend_range(b"a", b"c").unwrap()).is_empty());
    }

    #[test]
    fn test_set_operations() {
        let idx = sample_index();
        let all = idx.as_ascend().unwrap().ascend_greater_or_equal(b"a").unwrap();
        let bees = idx.get(b"b").unwrap();

        let ops = all.set_operations().unwrap();
        assert_eq!(
            collect(ops.intersection(&[bees.as_ref()]).unwrap()),
            vec![loc("row2"), loc("row3")]
        );
        assert_eq!(
            collect(ops.difference(&[bees.as_ref()]).unwrap()),
            vec![loc("row1"), loc("row4")]
        );

        let just_a = idx.get(b"a").unwrap();
        let union = just_a.set_operations().unwrap().union(&[bees.as_ref()]).unwrap();
        assert_eq!(
            collect(union),
            vec![loc("row1"), loc("row2"), loc("row3")]
        );
    }

    #[test]
    fn test_mergeable_probing() {
        let idx = sample_index();
        let other_idx = MemoryIndex::new("db", "users", "idx_other", vec![Fingerprint::of(&"age")]);
        other_idx.insert(*b"a", loc("row1"));

        let a = idx.get(b"a").unwrap();
        let b = idx.get(b"b").unwrap();
        let foreign = other_idx.get(b"a").unwrap();

        let merge = a.mergeable().unwrap();
        assert!(merge.is_mergeable(b.as_ref()));
        assert!(!merge.is_mergeable(foreign.as_ref()));
    }

    #[test]
    fn test_encode_key_frames_columns() {
        // ["ab", "c"] and ["a", "bc"] must encode differently.
        let left = encode_key(&[b"ab".to_vec(), b"c".to_vec()]);
        let right = encode_key(&[b"a".to_vec(), b"bc".to_vec()]);
        assert_ne!(left, right);

        assert_eq!(
            encode_key(&[b"ab".to_vec()]),
            encode_key(&[b"ab".to_vec()])
        );
    }

    #[test]
    fn test_key_value_iter_drains() {
        let mut iter = MemoryKeyValueIter::new(vec![
            (vec![b"a".to_vec()], loc("row1")),
            (vec![b"b".to_vec()], loc("row2")),
        ]);
        assert_eq!(
            iter.next().unwrap(),
            Some((vec![b"a".to_vec()], loc("row1")))
        );
        assert_eq!(
            iter.next().unwrap(),
            Some((vec![b"b".to_vec()], loc("row2")))
        );
        assert_eq!(iter.next().unwrap(), None);
        iter.close().unwrap();
    }
}
