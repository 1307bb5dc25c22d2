use std::fmt;

use crate::entry::{ChangeSet, EntryBuilder, MessageEntry};

/// One immutable snapshot of a feed recomputation: the entry before, the
/// entry after, and exactly the axes whose value differs between the two
/// under each axis's own equality rule. Created once per execution pass and
/// superseded, never mutated, by the next pass.
pub struct Message<T> {
    previous: MessageEntry<T>,
    current: MessageEntry<T>,
    changes: ChangeSet,
}

impl<T> Clone for Message<T> {
    fn clone(&self) -> Self {
        Self {
            previous: self.previous.clone(),
            current: self.current.clone(),
            changes: self.changes.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("previous", &self.previous)
            .field("current", &self.current)
            .field("changes", &self.changes)
            .finish()
    }
}

impl<T> Message<T> {
    /// The first message of a session: a synthetic `previous` equal to the
    /// axis defaults, an identical `current`, and no changes.
    pub fn initial() -> Self {
        Self {
            previous: MessageEntry::initial(),
            current: MessageEntry::initial(),
            changes: ChangeSet::default(),
        }
    }

    pub fn previous(&self) -> &MessageEntry<T> {
        &self.previous
    }

    pub fn current(&self) -> &MessageEntry<T> {
        &self.current
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }
}

impl<T: PartialEq> Message<T> {
    /// Produce the next message by folding axis updates against this
    /// message's `current`. The result's `previous` is this `current`.
    pub fn advance(&self, build: impl FnOnce(&mut EntryBuilder<T>)) -> Message<T> {
        let mut builder = EntryBuilder::new(self.current.clone());
        build(&mut builder);
        let (current, changes) = builder.build();
        Message {
            previous: self.current.clone(),
            current,
            changes,
        }
    }
}
