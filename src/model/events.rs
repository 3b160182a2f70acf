//! Change notifications and the dependency edges they maintain.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::keys::{CompKey, GroupKey, TsKey};

/// What changed upstream. The subject-key space depends on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    TsCreated,
    TsDeleted,
    TsModified,
    CompModified,
    GroupModified,
    FullEval,
    /// Emitted by some trigger revisions; not supported here.
    TsCodeChanged,
}

impl NotificationKind {
    /// Single-character event code used in the notification table.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::TsCreated => 'T',
            Self::TsDeleted => 'D',
            Self::TsModified => 'M',
            Self::CompModified => 'C',
            Self::GroupModified => 'G',
            Self::FullEval => 'F',
            Self::TsCodeChanged => 'X',
        }
    }

    /// Decode a stored event code. Unknown codes map to `None`.
    #[must_use]
    pub const fn from_code(code: char) -> Option<Self> {
        match code {
            'T' => Some(Self::TsCreated),
            'D' => Some(Self::TsDeleted),
            'M' => Some(Self::TsModified),
            'C' => Some(Self::CompModified),
            'G' => Some(Self::GroupModified),
            'F' => Some(Self::FullEval),
            'X' => Some(Self::TsCodeChanged),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TsCreated => "TS_CREATED",
            Self::TsDeleted => "TS_DELETED",
            Self::TsModified => "TS_MODIFIED",
            Self::CompModified => "COMP_MODIFIED",
            Self::GroupModified => "GROUP_MODIFIED",
            Self::FullEval => "FULL_EVAL",
            Self::TsCodeChanged => "TS_CODE_CHANGED",
        };
        f.write_str(name)
    }
}

/// One enqueued change event. Equality covers kind, key, and enqueue time —
/// the triple the consumer compares for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub kind: NotificationKind,
    pub key: i64,
    pub enqueued_at: DateTime<Utc>,
}

impl ChangeNotification {
    #[must_use]
    pub fn new(kind: NotificationKind, key: i64, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            key,
            enqueued_at,
        }
    }

    #[must_use]
    pub const fn ts_key(&self) -> TsKey {
        TsKey(self.key)
    }

    #[must_use]
    pub const fn comp_key(&self) -> CompKey {
        CompKey(self.key)
    }

    #[must_use]
    pub const fn group_key(&self) -> GroupKey {
        GroupKey(self.key)
    }
}

impl fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} key={} at={}",
            self.kind,
            self.key,
            self.enqueued_at.to_rfc3339()
        )
    }
}

/// "If this time series receives a new value, retrigger this computation."
/// One edge per (time-series key, computation key) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub ts: TsKey,
    pub comp: CompKey,
}

impl DependencyEdge {
    #[must_use]
    pub const fn new(ts: TsKey, comp: CompKey) -> Self {
        Self { ts, comp }
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(ts={}, comp={})", self.ts, self.comp)
    }
}
