use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::axis::{AxisKind, MessageAxis, Progress, DATA, ERROR, PROGRESS, REFRESH};
use crate::errors::FeedError;
use crate::token::RefreshToken;

/// The typed payload carried on one axis of a message entry.
pub enum AxisValue<T> {
    /// The computed value. `None` = not yet computed.
    Data(Option<Arc<T>>),
    /// The last computation failure. `None` = no error.
    Error(Option<Arc<FeedError>>),
    Progress(Progress),
    /// The most recent refresh token acted upon.
    Refresh(Option<RefreshToken>),
    /// User-defined payload, compared by reference.
    Custom(Option<Arc<dyn Any + Send + Sync>>),
}

impl<T> Clone for AxisValue<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Data(v) => Self::Data(v.clone()),
            Self::Error(e) => Self::Error(e.clone()),
            Self::Progress(p) => Self::Progress(*p),
            Self::Refresh(t) => Self::Refresh(t.clone()),
            Self::Custom(c) => Self::Custom(c.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AxisValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(v) => f.debug_tuple("Data").field(v).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Progress(p) => f.debug_tuple("Progress").field(p).finish(),
            Self::Refresh(t) => f.debug_tuple("Refresh").field(t).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl<T> AxisValue<T> {
    pub(crate) fn kind(&self) -> AxisKind {
        match self {
            Self::Data(_) => AxisKind::Data,
            Self::Error(_) => AxisKind::Error,
            Self::Progress(_) => AxisKind::Progress,
            Self::Refresh(_) => AxisKind::Refresh,
            Self::Custom(_) => AxisKind::Custom,
        }
    }

    /// The resting default for an axis: no data, no error, final progress.
    pub fn default_for(axis: MessageAxis) -> Self {
        match axis.kind() {
            AxisKind::Data => Self::Data(None),
            AxisKind::Error => Self::Error(None),
            AxisKind::Progress => Self::Progress(Progress::Final),
            AxisKind::Refresh => Self::Refresh(None),
            AxisKind::Custom => Self::Custom(None),
        }
    }
}

impl<T: PartialEq> AxisValue<T> {
    /// Per-axis equality rule: structural value equality for `Data`,
    /// reference-or-kind equality for `Error`, plain equality for `Progress`
    /// and `Refresh`, reference equality for `Custom`.
    pub fn same_as(&self, other: &AxisValue<T>) -> bool {
        match (self, other) {
            (Self::Data(a), Self::Data(b)) => match (a, b) {
                (None, None) => true,
                (Some(x), Some(y)) => x.as_ref() == y.as_ref(),
                _ => false,
            },
            (Self::Error(a), Self::Error(b)) => match (a, b) {
                (None, None) => true,
                (Some(x), Some(y)) => Arc::ptr_eq(x, y) || x.kind() == y.kind(),
                _ => false,
            },
            (Self::Progress(a), Self::Progress(b)) => a == b,
            (Self::Refresh(a), Self::Refresh(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => match (a, b) {
                (None, None) => true,
                (Some(x), Some(y)) => Arc::ptr_eq(x, y),
                _ => false,
            },
            _ => false,
        }
    }
}

/// An immutable snapshot of a feed's value across every axis. The entry is a
/// total function over the axis set: axes without an explicit value read as
/// the axis default. Rebuilt per message, never mutated in place.
pub struct MessageEntry<T> {
    values: Arc<BTreeMap<MessageAxis, AxisValue<T>>>,
}

impl<T> Clone for MessageEntry<T> {
    fn clone(&self) -> Self {
        Self {
            values: Arc::clone(&self.values),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MessageEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}

impl<T> MessageEntry<T> {
    /// The synthetic initial entry: every axis at its default.
    pub fn initial() -> Self {
        Self {
            values: Arc::new(BTreeMap::new()),
        }
    }

    pub(crate) fn from_values(values: BTreeMap<MessageAxis, AxisValue<T>>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// The value on `axis`, falling back to the axis default.
    pub fn get(&self, axis: MessageAxis) -> AxisValue<T> {
        self.values
            .get(&axis)
            .cloned()
            .unwrap_or_else(|| AxisValue::default_for(axis))
    }

    pub fn data(&self) -> Option<&T> {
        match self.values.get(&DATA) {
            Some(AxisValue::Data(Some(v))) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn data_arc(&self) -> Option<Arc<T>> {
        match self.values.get(&DATA) {
            Some(AxisValue::Data(v)) => v.clone(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<FeedError>> {
        match self.values.get(&ERROR) {
            Some(AxisValue::Error(Some(e))) => Some(e),
            _ => None,
        }
    }

    pub fn progress(&self) -> Progress {
        match self.values.get(&PROGRESS) {
            Some(AxisValue::Progress(p)) => *p,
            _ => Progress::Final,
        }
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        match self.values.get(&REFRESH) {
            Some(AxisValue::Refresh(t)) => t.as_ref(),
            _ => None,
        }
    }

    /// Axes with an explicit (possibly default-valued) entry.
    pub fn axes(&self) -> impl Iterator<Item = MessageAxis> + '_ {
        self.values.keys().copied()
    }
}

/// The set of axes whose value changed between two entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    axes: BTreeSet<MessageAxis>,
}

impl ChangeSet {
    pub fn contains(&self, axis: MessageAxis) -> bool {
        self.axes.contains(&axis)
    }

    pub fn iter(&self) -> impl Iterator<Item = MessageAxis> + '_ {
        self.axes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub(crate) fn insert(&mut self, axis: MessageAxis) {
        self.axes.insert(axis);
    }
}

impl FromIterator<MessageAxis> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = MessageAxis>>(iter: I) -> Self {
        Self {
            axes: iter.into_iter().collect(),
        }
    }
}

/// Builds the next entry from a previous one. Only the axes explicitly set
/// are applied; unmentioned axes carry over. `build` diffs each applied axis
/// under its own equality rule — setting an axis to a value equal to its
/// previous value does not mark it changed.
pub struct EntryBuilder<T> {
    base: MessageEntry<T>,
    updates: BTreeMap<MessageAxis, AxisValue<T>>,
}

impl<T> EntryBuilder<T> {
    pub fn new(base: MessageEntry<T>) -> Self {
        Self {
            base,
            updates: BTreeMap::new(),
        }
    }

    /// The entry this builder starts from.
    pub fn base(&self) -> &MessageEntry<T> {
        &self.base
    }

    pub fn set(&mut self, axis: MessageAxis, value: AxisValue<T>) -> &mut Self {
        debug_assert_eq!(
            axis.kind(),
            value.kind(),
            "axis {axis:?} cannot carry a {:?} payload",
            value.kind()
        );
        self.updates.insert(axis, value);
        self
    }

    pub fn set_data(&mut self, data: Option<Arc<T>>) -> &mut Self {
        self.set(DATA, AxisValue::Data(data))
    }

    pub fn set_error(&mut self, error: Option<Arc<FeedError>>) -> &mut Self {
        self.set(ERROR, AxisValue::Error(error))
    }

    pub fn set_progress(&mut self, progress: Progress) -> &mut Self {
        self.set(PROGRESS, AxisValue::Progress(progress))
    }

    pub fn set_refresh(&mut self, token: Option<RefreshToken>) -> &mut Self {
        self.set(REFRESH, AxisValue::Refresh(token))
    }
}

impl<T: PartialEq> EntryBuilder<T> {
    /// Fold the updates into a new entry, reporting exactly the axes whose
    /// value differs from the base under the per-axis equality rule.
    pub fn build(self) -> (MessageEntry<T>, ChangeSet) {
        let mut values: BTreeMap<MessageAxis, AxisValue<T>> =
            self.base.values.as_ref().clone();
        let mut changes = ChangeSet::default();

        for (axis, value) in self.updates {
            let previous = self.base.get(axis);
            if !previous.same_as(&value) {
                changes.insert(axis);
            }
            values.insert(axis, value);
        }

        (MessageEntry::from_values(values), changes)
    }
}
