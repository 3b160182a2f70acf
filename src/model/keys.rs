//! Surrogate-key newtypes and the dependency-column naming strategy.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! surrogate_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Sentinel for "no key assigned".
            pub const UNDEFINED: Self = Self(-1);

            #[must_use]
            pub const fn is_undefined(self) -> bool {
                self.0 < 0
            }

            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

surrogate_key!(
    /// Key of one time series.
    TsKey
);
surrogate_key!(
    /// Key of one computation.
    CompKey
);
surrogate_key!(
    /// Key of one time-series group.
    GroupKey
);
surrogate_key!(
    /// Key of one application identity (daemon instance scope).
    AppKey
);
surrogate_key!(
    /// Key of one site (location).
    SiteKey
);
surrogate_key!(
    /// Key of one data type (parameter).
    DataTypeKey
);

/// Name of the time-series key column in the dependency tables.
///
/// Older schema revisions named the column `SITE_DATATYPE_ID`; newer ones use
/// `TS_ID`. The variant is chosen once at startup from configuration and
/// threaded into the storage layer, never re-decided per query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependsKeyColumn {
    #[default]
    TsId,
    SiteDatatypeId,
}

impl DependsKeyColumn {
    /// Column name used in dependency-table SQL.
    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::TsId => "ts_id",
            Self::SiteDatatypeId => "site_datatype_id",
        }
    }

    /// Column name used in the group-member table, which followed the same
    /// schema split.
    #[must_use]
    pub const fn member_column_name(self) -> &'static str {
        match self {
            Self::TsId => "ts_id",
            Self::SiteDatatypeId => "data_id",
        }
    }
}
