//! Computations and their input/output parameters.

#![allow(missing_docs)]

use crate::model::keys::{AppKey, CompKey, DataTypeKey, GroupKey, SiteKey, TsKey};
use crate::model::tsid::{TimeSeriesId, TsidPart};

/// Whether a parameter feeds the computation or receives its result. Only
/// input parameters create dependency edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParmDirection {
    Input,
    Output,
}

/// Part overrides applied when binding a group member to a parameter role.
/// Unset parts pass through from the triggering identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParmTransform {
    pub location: Option<String>,
    pub param: Option<String>,
    pub param_type: Option<String>,
    pub interval: Option<String>,
    pub duration: Option<String>,
    pub version: Option<String>,
}

impl ParmTransform {
    /// True when no part is overridden (identity transform).
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.location.is_none()
            && self.param.is_none()
            && self.param_type.is_none()
            && self.interval.is_none()
            && self.duration.is_none()
            && self.version.is_none()
    }

    #[must_use]
    pub fn override_for(&self, part: TsidPart) -> Option<&str> {
        match part {
            TsidPart::Location => self.location.as_deref(),
            TsidPart::Param => self.param.as_deref(),
            TsidPart::ParamType => self.param_type.as_deref(),
            TsidPart::Interval => self.interval.as_deref(),
            TsidPart::Duration => self.duration.as_deref(),
            TsidPart::Version => self.version.as_deref(),
        }
    }

    /// Apply the overrides to a copy of `tsid`. The result carries no
    /// surrogate key; resolve it through the catalog if one is needed.
    #[must_use]
    pub fn apply(&self, tsid: &TimeSeriesId) -> TimeSeriesId {
        let mut morphed = tsid.copy_no_key();
        for part in TsidPart::ALL {
            if let Some(value) = self.override_for(part) {
                morphed = morphed.with_part(part, value);
            }
        }
        morphed
    }
}

/// One named parameter of a computation. Either fully resolved (bound to a
/// single time series) or group-relative (bound per group member through the
/// transform).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompParm {
    pub role: String,
    pub direction: ParmDirection,
    pub ts_key: Option<TsKey>,
    pub site: Option<SiteKey>,
    pub data_type: Option<DataTypeKey>,
    pub transform: ParmTransform,
}

impl CompParm {
    #[must_use]
    pub fn input(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            direction: ParmDirection::Input,
            ts_key: None,
            site: None,
            data_type: None,
            transform: ParmTransform::default(),
        }
    }

    #[must_use]
    pub fn output(role: impl Into<String>) -> Self {
        Self {
            direction: ParmDirection::Output,
            ..Self::input(role)
        }
    }

    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self.direction, ParmDirection::Input)
    }

    /// Whether a concrete identifier satisfies this parameter.
    ///
    /// A key binding is authoritative. Otherwise the site and data-type
    /// references must match where declared, as must every overridden part,
    /// and at least one constraint must be declared at all.
    #[must_use]
    pub fn matches(&self, tsid: &TimeSeriesId) -> bool {
        if let Some(key) = self.ts_key {
            return key == tsid.key();
        }
        let mut constrained = false;
        if let Some(site) = self.site {
            if site != tsid.site() {
                return false;
            }
            constrained = true;
        }
        if let Some(data_type) = self.data_type {
            if data_type != tsid.data_type() {
                return false;
            }
            constrained = true;
        }
        for part in TsidPart::ALL {
            if let Some(want) = self.transform.override_for(part) {
                if !want.eq_ignore_ascii_case(tsid.part(part)) {
                    return false;
                }
                constrained = true;
            }
        }
        constrained
    }
}

/// A computation as the dependency graph sees it: trigger bindings only, no
/// algorithm body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbComputation {
    key: CompKey,
    name: String,
    app: AppKey,
    enabled: bool,
    group: Option<GroupKey>,
    timed: bool,
    parms: Vec<CompParm>,
}

impl DbComputation {
    #[must_use]
    pub fn new(key: CompKey, name: impl Into<String>, app: AppKey) -> Self {
        Self {
            key,
            name: name.into(),
            app,
            enabled: true,
            group: None,
            timed: false,
            parms: Vec::new(),
        }
    }

    #[must_use]
    pub const fn key(&self) -> CompKey {
        self.key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn app(&self) -> AppKey {
        self.app
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub const fn group(&self) -> Option<GroupKey> {
        self.group
    }

    pub fn set_group(&mut self, group: Option<GroupKey>) {
        self.group = group;
    }

    /// Timed computations run on a wall-clock schedule and never appear in
    /// the dependency graph.
    #[must_use]
    pub const fn is_timed(&self) -> bool {
        self.timed
    }

    pub fn set_timed(&mut self, timed: bool) {
        self.timed = timed;
    }

    pub fn add_parm(&mut self, parm: CompParm) {
        self.parms.push(parm);
    }

    #[must_use]
    pub fn parms(&self) -> &[CompParm] {
        &self.parms
    }

    pub fn parms_mut(&mut self) -> &mut Vec<CompParm> {
        &mut self.parms
    }

    /// Input parameters in declaration order.
    pub fn input_parms(&self) -> impl Iterator<Item = &CompParm> {
        self.parms.iter().filter(|parm| parm.is_input())
    }

    /// Whether this computation belongs in the dependency graph at all.
    #[must_use]
    pub const fn is_graph_eligible(&self) -> bool {
        self.enabled && !self.timed
    }
}

#[cfg(test)]
mod tests {
    use super::{CompParm, DbComputation, ParmTransform};
    use crate::model::keys::{AppKey, CompKey, DataTypeKey, SiteKey, TsKey};
    use crate::model::tsid::{TimeSeriesId, TsidPart};

    fn tsid() -> TimeSeriesId {
        TimeSeriesId::new(
            TsKey(4),
            SiteKey(1),
            DataTypeKey(2),
            [
                "GAGE1".into(),
                "Stage".into(),
                "Inst".into(),
                "1Hour".into(),
                "0".into(),
                "raw".into(),
            ],
            "m".into(),
            true,
        )
    }

    #[test]
    fn key_binding_is_authoritative() {
        let mut parm = CompParm::input("in1");
        parm.ts_key = Some(TsKey(4));
        parm.site = Some(SiteKey(999));
        assert!(parm.matches(&tsid()));
    }

    #[test]
    fn site_and_datatype_must_both_match() {
        let mut parm = CompParm::input("in1");
        parm.site = Some(SiteKey(1));
        parm.data_type = Some(DataTypeKey(2));
        assert!(parm.matches(&tsid()));
        parm.data_type = Some(DataTypeKey(7));
        assert!(!parm.matches(&tsid()));
    }

    #[test]
    fn unconstrained_parm_matches_nothing() {
        let parm = CompParm::input("in1");
        assert!(!parm.matches(&tsid()));
    }

    #[test]
    fn transform_applies_overrides_and_drops_key() {
        let transform = ParmTransform {
            version: Some("computed".into()),
            ..ParmTransform::default()
        };
        let morphed = transform.apply(&tsid());
        assert_eq!(morphed.part(TsidPart::Version), "computed");
        assert_eq!(morphed.part(TsidPart::Location), "GAGE1");
        assert!(morphed.key().is_undefined());
    }

    #[test]
    fn timed_comp_is_not_graph_eligible() {
        let mut comp = DbComputation::new(CompKey(1), "avg", AppKey(1));
        assert!(comp.is_graph_eligible());
        comp.set_timed(true);
        assert!(!comp.is_graph_eligible());
    }
}
