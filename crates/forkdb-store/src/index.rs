//! Persistent ordered row indexes and their diff streams.
//!
//! An [`OrderedIndex`] is an immutable ordered map from key tuple to row
//! tuple. Mutation goes through an [`IndexEditor`] whose `flush` produces a
//! new immutable index; readers of the original never observe edits.
//!
//! `diff(base)` streams the changes that turn `base` into this index as
//! [`Change`] events in strict key order. The merge engine's diff-of-diffs
//! walk is built entirely on this stream.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use forkdb_error::{ForkError, Result};
use forkdb_types::{Hash, Hasher, KeyTuple, RowTuple, Tuple};

/// One entry's difference between two ordered indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The key exists only in the newer index.
    Added { key: KeyTuple, new: RowTuple },
    /// The key exists only in the base index.
    Removed { key: KeyTuple, old: RowTuple },
    /// The key exists in both with different rows.
    Modified {
        key: KeyTuple,
        old: RowTuple,
        new: RowTuple,
    },
}

impl Change {
    pub fn key(&self) -> &KeyTuple {
        match self {
            Self::Added { key, .. } | Self::Removed { key, .. } | Self::Modified { key, .. } => key,
        }
    }

    /// The row on the base side, if any.
    pub fn from(&self) -> Option<&RowTuple> {
        match self {
            Self::Added { .. } => None,
            Self::Removed { old, .. } | Self::Modified { old, .. } => Some(old),
        }
    }

    /// The row on the newer side, if any.
    pub fn to(&self) -> Option<&RowTuple> {
        match self {
            Self::Removed { .. } => None,
            Self::Added { new, .. } | Self::Modified { new, .. } => Some(new),
        }
    }
}

/// An immutable, persistent ordered map from key tuple to row tuple.
///
/// Cloning is cheap; the row storage is shared.
#[derive(Debug, Clone, Default)]
pub struct OrderedIndex {
    rows: Arc<BTreeMap<KeyTuple, RowTuple>>,
}

impl OrderedIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = (KeyTuple, RowTuple)>) -> Self {
        Self {
            rows: Arc::new(rows.into_iter().collect()),
        }
    }

    pub fn get(&self, key: &KeyTuple) -> Option<&RowTuple> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &KeyTuple) -> bool {
        self.rows.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyTuple, &RowTuple)> {
        self.rows.iter()
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn prefix_scan<'a>(
        &'a self,
        prefix: &'a Tuple,
    ) -> impl Iterator<Item = (&'a KeyTuple, &'a RowTuple)> + 'a {
        self.rows
            .range::<KeyTuple, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    /// Open an editor seeded with this index's entries.
    pub fn editor(&self) -> IndexEditor {
        IndexEditor {
            rows: (*self.rows).clone(),
        }
    }

    /// Stream the changes that turn `base` into `self`, in key order.
    pub fn diff<'a>(&'a self, base: &'a OrderedIndex) -> DiffIter<'a> {
        DiffIter {
            base: base.rows.iter().peekable(),
            new: self.rows.iter().peekable(),
        }
    }

    /// Content address of this index.
    pub fn hash_of(&self) -> Hash {
        let mut hasher = Hasher::new();
        let mut buf = Vec::new();
        for (k, v) in self.rows.iter() {
            buf.clear();
            k.encode_into(&mut buf);
            v.encode_into(&mut buf);
            hasher.update(&buf);
        }
        hasher.finish()
    }
}

impl PartialEq for OrderedIndex {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.rows, &other.rows) || self.rows == other.rows
    }
}

impl Eq for OrderedIndex {}

/// Iterator over the ordered symmetric difference of two indexes.
pub struct DiffIter<'a> {
    base: std::iter::Peekable<std::collections::btree_map::Iter<'a, KeyTuple, RowTuple>>,
    new: std::iter::Peekable<std::collections::btree_map::Iter<'a, KeyTuple, RowTuple>>,
}

impl Iterator for DiffIter<'_> {
    type Item = Change;

    fn next(&mut self) -> Option<Change> {
        loop {
            match (self.base.peek(), self.new.peek()) {
                (None, None) => return None,
                (Some(_), None) => {
                    let (k, old) = self.base.next().expect("peeked");
                    return Some(Change::Removed {
                        key: k.clone(),
                        old: old.clone(),
                    });
                }
                (None, Some(_)) => {
                    let (k, new) = self.new.next().expect("peeked");
                    return Some(Change::Added {
                        key: k.clone(),
                        new: new.clone(),
                    });
                }
                (Some((bk, _)), Some((nk, _))) => {
                    if bk < nk {
                        let (k, old) = self.base.next().expect("peeked");
                        return Some(Change::Removed {
                            key: k.clone(),
                            old: old.clone(),
                        });
                    } else if nk < bk {
                        let (k, new) = self.new.next().expect("peeked");
                        return Some(Change::Added {
                            key: k.clone(),
                            new: new.clone(),
                        });
                    } else {
                        let (k, old) = self.base.next().expect("peeked");
                        let (_, new) = self.new.next().expect("peeked");
                        if old != new {
                            return Some(Change::Modified {
                                key: k.clone(),
                                old: old.clone(),
                                new: new.clone(),
                            });
                        }
                        // Equal rows produce no event; keep walking.
                    }
                }
            }
        }
    }
}

/// Mutable editor over an ordered index.
///
/// Accumulates edits in memory; `flush` seals them into a new immutable
/// [`OrderedIndex`].
#[derive(Debug)]
pub struct IndexEditor {
    rows: BTreeMap<KeyTuple, RowTuple>,
}

impl IndexEditor {
    pub fn get(&self, key: &KeyTuple) -> Option<&RowTuple> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &KeyTuple) -> bool {
        self.rows.contains_key(key)
    }

    /// Insert a new entry. Fails on an existing key.
    pub fn insert(&mut self, key: KeyTuple, row: RowTuple) -> Result<()> {
        if self.rows.contains_key(&key) {
            return Err(ForkError::DuplicateKey {
                key: format!("{key:?}"),
            });
        }
        self.rows.insert(key, row);
        Ok(())
    }

    /// Replace an existing entry. Fails if the key is absent.
    pub fn update(&mut self, key: KeyTuple, row: RowTuple) -> Result<()> {
        match self.rows.get_mut(&key) {
            Some(slot) => {
                *slot = row;
                Ok(())
            }
            None => Err(ForkError::internal(format!(
                "update of missing key {key:?}"
            ))),
        }
    }

    /// Insert or replace, with no occupancy requirement.
    pub fn put(&mut self, key: KeyTuple, row: RowTuple) {
        self.rows.insert(key, row);
    }

    /// Remove an entry if present.
    pub fn delete(&mut self, key: &KeyTuple) {
        self.rows.remove(key);
    }

    /// Seal the edits into a new immutable index.
    pub fn flush(self) -> OrderedIndex {
        OrderedIndex {
            rows: Arc::new(self.rows),
        }
    }
}
