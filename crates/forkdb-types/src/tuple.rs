//! Key and row tuples.
//!
//! A tuple is an ordered sequence of [`Value`]s. Key tuples hold a row's
//! primary-key projection and drive all streaming diffs through their total
//! order; row tuples hold the non-PK column values in schema projection
//! order.
//!
//! Keyless tables have no primary key: rows are identified by a surrogate
//! key (the hash of the field values) and the row tuple carries the row
//! cardinality as its first value, fields after it.

use std::fmt;

use crate::hash::Hash;
use crate::value::Value;

/// Position of the cardinality value in a keyless row tuple.
pub const KEYLESS_CARDINALITY_IDX: usize = 0;

/// An ordered sequence of column values.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize,
)]
pub struct Tuple(Vec<Value>);

/// A row's primary-key projection (or surrogate key for keyless rows).
pub type KeyTuple = Tuple;

/// A row's non-PK column values in schema projection order.
pub type RowTuple = Tuple;

impl Tuple {
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Whether `prefix` is a field-wise prefix of this tuple.
    pub fn starts_with(&self, prefix: &Tuple) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Append a self-delimiting encoding of every field to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.0.len() as u64).to_be_bytes());
        for v in &self.0 {
            v.encode_into(buf);
        }
    }

    /// The cardinality of a keyless row tuple.
    ///
    /// Panics if the tuple does not carry an integer cardinality in slot
    /// [`KEYLESS_CARDINALITY_IDX`]; that is corrupt input state.
    pub fn cardinality(&self) -> u64 {
        match self.0.get(KEYLESS_CARDINALITY_IDX) {
            Some(Value::Integer(n)) if *n >= 0 => *n as u64,
            other => panic!("keyless row tuple has no cardinality: {other:?}"),
        }
    }

    /// A copy of this keyless row tuple with the cardinality replaced.
    pub fn with_cardinality(&self, card: u64) -> Self {
        let mut values = self.0.clone();
        values[KEYLESS_CARDINALITY_IDX] = Value::Integer(card as i64);
        Self(values)
    }

    /// The field values of a keyless row tuple (cardinality stripped).
    pub fn keyless_fields(&self) -> &[Value] {
        &self.0[KEYLESS_CARDINALITY_IDX + 1..]
    }

    /// Build a keyless row tuple from fields and a cardinality.
    pub fn keyless_row(fields: &[Value], card: u64) -> Self {
        let mut values = Vec::with_capacity(fields.len() + 1);
        values.push(Value::Integer(card as i64));
        values.extend_from_slice(fields);
        Self(values)
    }

    /// The surrogate key for a keyless row: the hash of its field values.
    pub fn surrogate_key(fields: &[Value]) -> KeyTuple {
        let mut buf = Vec::new();
        for v in fields {
            v.encode_into(&mut buf);
        }
        Tuple::new(vec![Value::Blob(Hash::of(&buf).as_bytes().to_vec())])
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}
