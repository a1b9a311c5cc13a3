//! Core value, schema and tuple types for the ForkDB merge engine.

pub mod hash;
pub mod schema;
pub mod tuple;
pub mod value;

pub use hash::{Hash, Hasher, HASH_LEN};
pub use schema::{Column, ColumnCollection, IndexDef, Schema, Tag};
pub use tuple::{KeyTuple, RowTuple, Tuple, KEYLESS_CARDINALITY_IDX};
pub use value::{StorageClass, Value, ValueType};
