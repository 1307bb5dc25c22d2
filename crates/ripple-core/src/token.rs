use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ids::SourceId;

/// A per-source, monotonically increasing version marker. The sequence is
/// the only basis for freshness comparison — never wall-clock time. A
/// consumer holding two tokens for the same source must honor only the one
/// with the higher sequence.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub source: SourceId,
    pub sequence: u64,
}

impl RefreshToken {
    /// Seed token for a source, `sequence = 0`.
    pub fn initial(source: SourceId) -> Self {
        Self {
            source,
            sequence: 0,
        }
    }

    /// True when `self` is a strictly fresher token for the same source.
    pub fn supersedes(&self, other: &RefreshToken) -> bool {
        self.source == other.source && self.sequence > other.sequence
    }
}

/// Produces the strictly increasing token sequence for one source identity.
pub struct RefreshTokenSource {
    source: SourceId,
    sequence: AtomicU64,
}

impl RefreshTokenSource {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// The most recently issued token (the seed before any `next`).
    pub fn current(&self) -> RefreshToken {
        RefreshToken {
            source: self.source.clone(),
            sequence: self.sequence.load(Ordering::Relaxed),
        }
    }

    /// Atomically produce the next token for this source.
    pub fn next(&self) -> RefreshToken {
        RefreshToken {
            source: self.source.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }
}
