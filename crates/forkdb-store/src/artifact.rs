//! Artifact maps: durable markers for unresolved merge issues.
//!
//! An artifact map is an ordered map keyed by `(row key, artifact type)`.
//! Three artifact kinds exist: conflicts, constraint violations, and
//! foreign-key violations. Each carries a provenance hash (the commit that
//! generated it) and a type-specific JSON metadata payload.
//!
//! All conflicts stored in one map share a single `(base, ours, theirs)`
//! schema triple; mixing conflict schemas is forbidden.

use std::collections::BTreeMap;
use std::sync::Arc;

use forkdb_types::{Hash, Hasher, KeyTuple, RowTuple, Schema};

/// The kind of an artifact. Part of the map key: one row can carry one
/// artifact of each kind.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum ArtifactType {
    Conflict = 1,
    ConstraintViolation = 2,
    ForeignKeyViolation = 3,
}

/// Conflict artifact metadata, serialized at the system boundary as
/// `{"BaseTblHash": <20B>, "TheirTblHash": <20B>}`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConflictMetadata {
    #[serde(rename = "BaseTblHash", with = "serde_bytes_20")]
    pub base_tbl_hash: Hash,
    #[serde(rename = "TheirTblHash", with = "serde_bytes_20")]
    pub their_tbl_hash: Hash,
}

/// Unique-index constraint-violation metadata.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UniqueViolationMetadata {
    #[serde(rename = "IndexName")]
    pub index_name: String,
    #[serde(rename = "Columns")]
    pub columns: Vec<String>,
}

/// Foreign-key violation metadata.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ForeignKeyViolationMetadata {
    #[serde(rename = "ForeignKey")]
    pub foreign_key: String,
}

mod serde_bytes_20 {
    use forkdb_types::Hash;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, ser: S) -> Result<S::Ok, S::Error> {
        hash.as_bytes().as_slice().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Hash, D::Error> {
        let bytes = Vec::<u8>::deserialize(de)?;
        if bytes.len() != forkdb_types::HASH_LEN {
            return Err(serde::de::Error::custom("expected 20 bytes"));
        }
        Ok(Hash::from_padded(&bytes))
    }
}

/// A stored artifact: provenance plus a kind-specific metadata payload.
///
/// Violation artifacts also carry the offending row so it can be shown
/// without consulting historic roots.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Artifact {
    pub provenance: Hash,
    pub metadata: serde_json::Value,
    pub row: Option<RowTuple>,
}

impl Artifact {
    pub fn conflict(provenance: Hash, meta: &ConflictMetadata) -> Self {
        Self {
            provenance,
            metadata: serde_json::to_value(meta).expect("conflict metadata serializes"),
            row: None,
        }
    }

    pub fn unique_violation(
        provenance: Hash,
        meta: &UniqueViolationMetadata,
        row: RowTuple,
    ) -> Self {
        Self {
            provenance,
            metadata: serde_json::to_value(meta).expect("violation metadata serializes"),
            row: Some(row),
        }
    }

    pub fn foreign_key_violation(
        provenance: Hash,
        meta: &ForeignKeyViolationMetadata,
        row: RowTuple,
    ) -> Self {
        Self {
            provenance,
            metadata: serde_json::to_value(meta).expect("violation metadata serializes"),
            row: Some(row),
        }
    }
}

/// The `(base, ours, theirs)` schema triple recorded beside stored
/// conflicts.
pub type ConflictSchemas = (Schema, Schema, Schema);

/// An ordered map of artifacts keyed by `(row key, artifact type)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactMap {
    entries: Arc<BTreeMap<(KeyTuple, ArtifactType), Artifact>>,
    conflict_schemas: Option<Arc<ConflictSchemas>>,
}

impl ArtifactMap {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &KeyTuple, ty: ArtifactType) -> Option<&Artifact> {
        self.entries.get(&(key.clone(), ty))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(KeyTuple, ArtifactType), &Artifact)> {
        self.entries.iter()
    }

    pub fn count_of(&self, ty: ArtifactType) -> usize {
        self.entries.keys().filter(|(_, t)| *t == ty).count()
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.keys().any(|(_, t)| *t == ArtifactType::Conflict)
    }

    pub fn has_violations(&self) -> bool {
        self.entries.keys().any(|(_, t)| {
            matches!(
                t,
                ArtifactType::ConstraintViolation | ArtifactType::ForeignKeyViolation
            )
        })
    }

    /// The schema triple shared by all stored conflicts, if any are stored.
    pub fn conflict_schemas(&self) -> Option<&ConflictSchemas> {
        self.conflict_schemas.as_deref()
    }

    pub fn editor(&self) -> ArtifactEditor {
        ArtifactEditor {
            entries: (*self.entries).clone(),
            conflict_schemas: self.conflict_schemas.clone(),
        }
    }

    /// Content address of this artifact map.
    pub fn hash_of(&self) -> Hash {
        let mut hasher = Hasher::new();
        let mut buf = Vec::new();
        for ((key, ty), art) in self.entries.iter() {
            buf.clear();
            key.encode_into(&mut buf);
            buf.push(*ty as u8);
            buf.extend_from_slice(art.provenance.as_bytes());
            buf.extend_from_slice(art.metadata.to_string().as_bytes());
            hasher.update(&buf);
        }
        hasher.finish()
    }

    /// Three-way merge of artifact maps.
    ///
    /// Walks the diffs of ours and theirs against the ancestor in lock-step.
    /// Receiving two non-identical edits for the same `(key, type)` means the
    /// caller fed corrupt state: merging two sets of conflicts is not a
    /// defined operation, so this panics.
    pub fn merge(ours: &Self, theirs: &Self, ancestor: &Self) -> Self {
        let mut out = ours.editor();
        let mut our_diff = diff_entries(ancestor, ours).into_iter().peekable();
        let mut their_diff = diff_entries(ancestor, theirs).into_iter().peekable();

        loop {
            match (our_diff.peek(), their_diff.peek()) {
                (None, None) => break,
                (Some(_), None) => {
                    our_diff.next();
                }
                (None, Some(_)) => {
                    let (k, change) = their_diff.next().expect("peeked");
                    apply_artifact_change(&mut out, k, change);
                }
                (Some((ok, _)), Some((tk, _))) => match ok.cmp(tk) {
                    std::cmp::Ordering::Less => {
                        our_diff.next();
                    }
                    std::cmp::Ordering::Greater => {
                        let (k, change) = their_diff.next().expect("peeked");
                        apply_artifact_change(&mut out, k, change);
                    }
                    std::cmp::Ordering::Equal => {
                        let (_, our_change) = our_diff.next().expect("peeked");
                        let (k, their_change) = their_diff.next().expect("peeked");
                        assert!(
                            our_change == their_change,
                            "received a conflict when merging artifact maps at {k:?}"
                        );
                    }
                },
            }
        }

        if out.conflict_schemas.is_none() {
            out.conflict_schemas = theirs.conflict_schemas.clone();
        }
        let merged = out.flush();
        tracing::trace!(entries = merged.len(), "merged artifact maps");
        merged
    }
}

type ArtifactKey = (KeyTuple, ArtifactType);

#[derive(Debug, Clone, PartialEq)]
enum ArtifactChange {
    Added(Artifact),
    Removed,
    Modified(Artifact),
}

fn diff_entries(base: &ArtifactMap, new: &ArtifactMap) -> Vec<(ArtifactKey, ArtifactChange)> {
    let mut out = Vec::new();
    let mut b = base.entries.iter().peekable();
    let mut n = new.entries.iter().peekable();
    loop {
        match (b.peek(), n.peek()) {
            (None, None) => break,
            (Some(_), None) => {
                let (k, _) = b.next().expect("peeked");
                out.push((k.clone(), ArtifactChange::Removed));
            }
            (None, Some(_)) => {
                let (k, v) = n.next().expect("peeked");
                out.push((k.clone(), ArtifactChange::Added(v.clone())));
            }
            (Some((bk, _)), Some((nk, _))) => match bk.cmp(nk) {
                std::cmp::Ordering::Less => {
                    let (k, _) = b.next().expect("peeked");
                    out.push((k.clone(), ArtifactChange::Removed));
                }
                std::cmp::Ordering::Greater => {
                    let (k, v) = n.next().expect("peeked");
                    out.push((k.clone(), ArtifactChange::Added(v.clone())));
                }
                std::cmp::Ordering::Equal => {
                    let (_, bv) = b.next().expect("peeked");
                    let (k, nv) = n.next().expect("peeked");
                    if bv != nv {
                        out.push((k.clone(), ArtifactChange::Modified(nv.clone())));
                    }
                }
            },
        }
    }
    out
}

fn apply_artifact_change(out: &mut ArtifactEditor, key: ArtifactKey, change: ArtifactChange) {
    match change {
        ArtifactChange::Added(a) | ArtifactChange::Modified(a) => {
            out.entries.insert(key, a);
        }
        ArtifactChange::Removed => {
            out.entries.remove(&key);
        }
    }
}

/// Mutable editor over an artifact map.
#[derive(Debug)]
pub struct ArtifactEditor {
    entries: BTreeMap<ArtifactKey, Artifact>,
    conflict_schemas: Option<Arc<ConflictSchemas>>,
}

impl ArtifactEditor {
    /// Add (or replace) an artifact for `key`.
    pub fn add(&mut self, key: KeyTuple, ty: ArtifactType, artifact: Artifact) {
        self.entries.insert((key, ty), artifact);
    }

    pub fn get(&self, key: &KeyTuple, ty: ArtifactType) -> Option<&Artifact> {
        self.entries.get(&(key.clone(), ty))
    }

    pub fn delete(&mut self, key: &KeyTuple, ty: ArtifactType) {
        self.entries.remove(&(key.clone(), ty));
    }

    /// Record the schema triple for stored conflicts.
    pub fn set_conflict_schemas(&mut self, schemas: ConflictSchemas) {
        self.conflict_schemas = Some(Arc::new(schemas));
    }

    pub fn flush(self) -> ArtifactMap {
        let conflict_schemas = if self
            .entries
            .keys()
            .any(|(_, t)| *t == ArtifactType::Conflict)
        {
            self.conflict_schemas
        } else {
            // No conflicts stored; the triple has nothing to describe.
            None
        };
        ArtifactMap {
            entries: Arc::new(self.entries),
            conflict_schemas,
        }
    }
}
