use serde::{Deserialize, Serialize};

/// The classic ranged change shape raised by a bindable collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionChange {
    Insert { index: usize, count: usize },
    Remove { index: usize, count: usize },
    Replace { index: usize, count: usize },
    Reset,
}

/// The per-item vector change shape consumed by virtualized list controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VectorChange {
    ItemInserted { index: usize },
    ItemRemoved { index: usize },
    ItemChanged { index: usize },
    Reset,
}

impl CollectionChange {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Remove { .. } => "remove",
            Self::Replace { .. } => "replace",
            Self::Reset => "reset",
        }
    }

    /// The same change expressed in a larger index space. `Reset` has no
    /// index and passes through unchanged.
    pub fn offset_by(&self, offset: usize) -> CollectionChange {
        match *self {
            Self::Insert { index, count } => Self::Insert {
                index: index + offset,
                count,
            },
            Self::Remove { index, count } => Self::Remove {
                index: index + offset,
                count,
            },
            Self::Replace { index, count } => Self::Replace {
                index: index + offset,
                count,
            },
            Self::Reset => Self::Reset,
        }
    }

    /// Expand a ranged change into per-item vector changes. Structural
    /// changes (insert/remove) emit highest index first so each emitted
    /// index is valid at the moment it is applied; replacements do not
    /// shift and emit in ascending order.
    pub fn to_vector_changes(&self) -> Vec<VectorChange> {
        match *self {
            Self::Insert { index, count } => (0..count)
                .rev()
                .map(|i| VectorChange::ItemInserted { index: index + i })
                .collect(),
            Self::Remove { index, count } => (0..count)
                .rev()
                .map(|i| VectorChange::ItemRemoved { index: index + i })
                .collect(),
            Self::Replace { index, count } => (0..count)
                .map(|i| VectorChange::ItemChanged { index: index + i })
                .collect(),
            Self::Reset => vec![VectorChange::Reset],
        }
    }
}
