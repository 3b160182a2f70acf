//! Time-series identifiers: surrogate key plus the six-part unique string.

#![allow(missing_docs)]

use std::fmt;

use crate::core::errors::{CddError, Result};
use crate::model::keys::{DataTypeKey, SiteKey, TsKey};

/// Named position inside the structured unique string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TsidPart {
    Location,
    Param,
    ParamType,
    Interval,
    Duration,
    Version,
}

impl TsidPart {
    /// All parts in unique-string order.
    pub const ALL: [Self; 6] = [
        Self::Location,
        Self::Param,
        Self::ParamType,
        Self::Interval,
        Self::Duration,
        Self::Version,
    ];

    /// Label used in group-filter rows and debug output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Param => "param",
            Self::ParamType => "param_type",
            Self::Interval => "interval",
            Self::Duration => "duration",
            Self::Version => "version",
        }
    }

    /// Parse a filter-row label. Case-insensitive.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|part| part.label().eq_ignore_ascii_case(label))
    }
}

/// One time series: a unique surrogate key plus the structured unique string
/// `location.param.param_type.interval.duration.version`.
///
/// Identifiers are never mutated in place; transformations produce a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesId {
    key: TsKey,
    site: SiteKey,
    data_type: DataTypeKey,
    parts: [String; 6],
    storage_units: String,
    active: bool,
}

impl TimeSeriesId {
    #[must_use]
    pub fn new(
        key: TsKey,
        site: SiteKey,
        data_type: DataTypeKey,
        parts: [String; 6],
        storage_units: String,
        active: bool,
    ) -> Self {
        Self {
            key,
            site,
            data_type,
            parts,
            storage_units,
            active,
        }
    }

    /// Parse a dotted unique string into a keyless identifier.
    pub fn parse_unique_string(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split('.').collect();
        if fields.len() != 6 {
            return Err(CddError::Runtime {
                details: format!("malformed time-series path '{s}': expected 6 parts"),
            });
        }
        let mut parts: [String; 6] = Default::default();
        for (slot, field) in parts.iter_mut().zip(&fields) {
            *slot = (*field).to_string();
        }
        Ok(Self {
            key: TsKey::UNDEFINED,
            site: SiteKey::UNDEFINED,
            data_type: DataTypeKey::UNDEFINED,
            parts,
            storage_units: String::new(),
            active: true,
        })
    }

    #[must_use]
    pub const fn key(&self) -> TsKey {
        self.key
    }

    #[must_use]
    pub const fn site(&self) -> SiteKey {
        self.site
    }

    #[must_use]
    pub const fn data_type(&self) -> DataTypeKey {
        self.data_type
    }

    #[must_use]
    pub fn storage_units(&self) -> &str {
        &self.storage_units
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// One part of the structured path.
    #[must_use]
    pub fn part(&self, part: TsidPart) -> &str {
        let idx = match part {
            TsidPart::Location => 0,
            TsidPart::Param => 1,
            TsidPart::ParamType => 2,
            TsidPart::Interval => 3,
            TsidPart::Duration => 4,
            TsidPart::Version => 5,
        };
        &self.parts[idx]
    }

    /// The dotted unique string.
    #[must_use]
    pub fn unique_string(&self) -> String {
        self.parts.join(".")
    }

    /// Upper-cased unique string, the canonical form for case-insensitive
    /// lookups and comparisons.
    #[must_use]
    pub fn unique_string_upper(&self) -> String {
        self.unique_string().to_uppercase()
    }

    /// Clone without the surrogate key, for transformation by a parameter.
    #[must_use]
    pub fn copy_no_key(&self) -> Self {
        Self {
            key: TsKey::UNDEFINED,
            ..self.clone()
        }
    }

    /// Copy with one part replaced. Site/data-type references are dropped
    /// since they may no longer describe the new path.
    #[must_use]
    pub fn with_part(&self, part: TsidPart, value: &str) -> Self {
        let mut next = self.copy_no_key();
        next.site = SiteKey::UNDEFINED;
        next.data_type = DataTypeKey::UNDEFINED;
        let idx = match part {
            TsidPart::Location => 0,
            TsidPart::Param => 1,
            TsidPart::ParamType => 2,
            TsidPart::Interval => 3,
            TsidPart::Duration => 4,
            TsidPart::Version => 5,
        };
        next.parts[idx] = value.to_string();
        next
    }
}

impl fmt::Display for TimeSeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.unique_string(), self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::{TimeSeriesId, TsidPart};
    use crate::model::keys::{DataTypeKey, SiteKey, TsKey};

    fn sample() -> TimeSeriesId {
        TimeSeriesId::new(
            TsKey(11),
            SiteKey(3),
            DataTypeKey(5),
            [
                "GAGE1".into(),
                "Flow".into(),
                "Inst".into(),
                "15Minutes".into(),
                "0".into(),
                "raw".into(),
            ],
            "cms".into(),
            true,
        )
    }

    #[test]
    fn unique_string_joins_parts() {
        assert_eq!(sample().unique_string(), "GAGE1.Flow.Inst.15Minutes.0.raw");
    }

    #[test]
    fn parse_round_trips() {
        let parsed =
            TimeSeriesId::parse_unique_string("GAGE1.Flow.Inst.15Minutes.0.raw").unwrap();
        assert_eq!(parsed.unique_string(), sample().unique_string());
        assert!(parsed.key().is_undefined());
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        assert!(TimeSeriesId::parse_unique_string("a.b.c").is_err());
    }

    #[test]
    fn with_part_produces_copy_without_key() {
        let original = sample();
        let morphed = original.with_part(TsidPart::Version, "computed");
        assert_eq!(morphed.part(TsidPart::Version), "computed");
        assert!(morphed.key().is_undefined());
        // source untouched
        assert_eq!(original.part(TsidPart::Version), "raw");
        assert_eq!(original.key(), TsKey(11));
    }
}
