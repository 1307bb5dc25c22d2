use serde::Serialize;
use std::fmt;

/// A tracked dimension of change on a feed message. The built-in axes cover
/// the value itself, its error state, the in-flight marker, and the refresh
/// transition; `custom` extends the set for user-defined dimensions.
///
/// Each axis defines its own equality rule — see `AxisValue::same_as`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageAxis {
    name: &'static str,
    kind: AxisKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AxisKind {
    Data,
    Error,
    Progress,
    Refresh,
    Custom,
}

/// The computed value axis.
pub const DATA: MessageAxis = MessageAxis {
    name: "data",
    kind: AxisKind::Data,
};

/// The error axis.
pub const ERROR: MessageAxis = MessageAxis {
    name: "error",
    kind: AxisKind::Error,
};

/// The in-flight / final axis.
pub const PROGRESS: MessageAxis = MessageAxis {
    name: "progress",
    kind: AxisKind::Progress,
};

/// The "refreshed with token" transition axis.
pub const REFRESH: MessageAxis = MessageAxis {
    name: "refresh",
    kind: AxisKind::Refresh,
};

impl MessageAxis {
    /// A user-defined axis. Compared by reference equality of its payload.
    pub const fn custom(name: &'static str) -> Self {
        Self {
            name,
            kind: AxisKind::Custom,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn kind(&self) -> AxisKind {
        self.kind
    }
}

impl fmt::Debug for MessageAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for MessageAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Whether a computation is in flight. `Final` is the terminal resting state;
/// an executing pass publishes `Loading` before the compute runs and the
/// completing fold restores `Final`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Loading,
    #[default]
    Final,
}

impl Progress {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final)
    }
}
