//! Time-series group definitions: explicit members, attribute filters, and
//! the include/exclude/intersect subgroup relations.

#![allow(missing_docs)]

use std::collections::HashSet;

use crate::model::keys::{DataTypeKey, GroupKey, SiteKey, TsKey};
use crate::model::tsid::TsidPart;

/// How a subgroup combines into its parent during expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubgroupRelation {
    Include,
    Exclude,
    Intersect,
}

/// One wildcard filter on a part of the unique string. `*` matches any run
/// of characters within the part; comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFilter {
    pub part: TsidPart,
    pub pattern: String,
}

/// A named, possibly-nested set definition over time-series identifiers.
///
/// The subgroup relations may form an arbitrary directed graph, cycles
/// included; expansion is cycle-guarded and always terminates.
#[derive(Debug, Clone)]
pub struct TsGroup {
    key: GroupKey,
    name: String,
    group_type: String,
    description: String,
    explicit_members: Vec<TsKey>,
    site_ids: Vec<SiteKey>,
    data_type_ids: Vec<DataTypeKey>,
    part_filters: Vec<PartFilter>,
    included: Vec<GroupKey>,
    excluded: Vec<GroupKey>,
    intersected: Vec<GroupKey>,
    expanded: HashSet<TsKey>,
    is_expanded: bool,
}

impl TsGroup {
    #[must_use]
    pub fn new(key: GroupKey, name: impl Into<String>, group_type: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            group_type: group_type.into(),
            description: String::new(),
            explicit_members: Vec::new(),
            site_ids: Vec::new(),
            data_type_ids: Vec::new(),
            part_filters: Vec::new(),
            included: Vec::new(),
            excluded: Vec::new(),
            intersected: Vec::new(),
            expanded: HashSet::new(),
            is_expanded: false,
        }
    }

    #[must_use]
    pub const fn key(&self) -> GroupKey {
        self.key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn group_type(&self) -> &str {
        &self.group_type
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn add_explicit_member(&mut self, ts: TsKey) {
        if !self.explicit_members.contains(&ts) {
            self.explicit_members.push(ts);
        }
    }

    pub fn remove_explicit_member(&mut self, ts: TsKey) -> bool {
        let before = self.explicit_members.len();
        self.explicit_members.retain(|member| *member != ts);
        self.explicit_members.len() != before
    }

    #[must_use]
    pub fn explicit_members(&self) -> &[TsKey] {
        &self.explicit_members
    }

    pub fn add_site_id(&mut self, site: SiteKey) {
        self.site_ids.push(site);
    }

    #[must_use]
    pub fn site_ids(&self) -> &[SiteKey] {
        &self.site_ids
    }

    pub fn add_data_type_id(&mut self, data_type: DataTypeKey) {
        self.data_type_ids.push(data_type);
    }

    #[must_use]
    pub fn data_type_ids(&self) -> &[DataTypeKey] {
        &self.data_type_ids
    }

    pub fn add_part_filter(&mut self, part: TsidPart, pattern: impl Into<String>) {
        self.part_filters.push(PartFilter {
            part,
            pattern: pattern.into(),
        });
    }

    #[must_use]
    pub fn part_filters(&self) -> &[PartFilter] {
        &self.part_filters
    }

    /// Whether any filter category (sites, data types, part patterns) is
    /// declared. A group with no filters contributes no filtered members.
    #[must_use]
    pub fn has_filters(&self) -> bool {
        !self.site_ids.is_empty() || !self.data_type_ids.is_empty() || !self.part_filters.is_empty()
    }

    pub fn add_sub_group(&mut self, sub: GroupKey, relation: SubgroupRelation) {
        let list = match relation {
            SubgroupRelation::Include => &mut self.included,
            SubgroupRelation::Exclude => &mut self.excluded,
            SubgroupRelation::Intersect => &mut self.intersected,
        };
        if !list.contains(&sub) {
            list.push(sub);
        }
    }

    #[must_use]
    pub fn included(&self) -> &[GroupKey] {
        &self.included
    }

    #[must_use]
    pub fn excluded(&self) -> &[GroupKey] {
        &self.excluded
    }

    #[must_use]
    pub fn intersected(&self) -> &[GroupKey] {
        &self.intersected
    }

    /// True when `other` appears in any of the three subgroup relations.
    /// This is the parent edge followed by the upward re-expansion walk.
    #[must_use]
    pub fn references(&self, other: GroupKey) -> bool {
        self.included.contains(&other)
            || self.excluded.contains(&other)
            || self.intersected.contains(&other)
    }

    #[must_use]
    pub const fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    #[must_use]
    pub const fn expanded_members(&self) -> &HashSet<TsKey> {
        &self.expanded
    }

    /// Install a freshly computed expansion.
    pub fn set_expansion(&mut self, members: HashSet<TsKey>) {
        self.expanded = members;
        self.is_expanded = true;
    }

    /// Drop the materialized expansion, forcing re-expansion on next use.
    pub fn invalidate_expansion(&mut self) {
        self.expanded.clear();
        self.is_expanded = false;
    }

    pub fn add_to_expansion(&mut self, ts: TsKey) {
        self.expanded.insert(ts);
    }

    pub fn remove_from_expansion(&mut self, ts: TsKey) -> bool {
        self.expanded.remove(&ts)
    }
}

#[cfg(test)]
mod tests {
    use super::{SubgroupRelation, TsGroup};
    use crate::model::keys::{GroupKey, TsKey};
    use crate::model::tsid::TsidPart;

    #[test]
    fn subgroup_lists_deduplicate() {
        let mut group = TsGroup::new(GroupKey(1), "basin", "basin");
        group.add_sub_group(GroupKey(2), SubgroupRelation::Include);
        group.add_sub_group(GroupKey(2), SubgroupRelation::Include);
        assert_eq!(group.included(), &[GroupKey(2)]);
    }

    #[test]
    fn references_covers_all_three_relations() {
        let mut group = TsGroup::new(GroupKey(1), "basin", "basin");
        group.add_sub_group(GroupKey(2), SubgroupRelation::Include);
        group.add_sub_group(GroupKey(3), SubgroupRelation::Exclude);
        group.add_sub_group(GroupKey(4), SubgroupRelation::Intersect);
        assert!(group.references(GroupKey(2)));
        assert!(group.references(GroupKey(3)));
        assert!(group.references(GroupKey(4)));
        assert!(!group.references(GroupKey(5)));
    }

    #[test]
    fn explicit_member_removal_reports_presence() {
        let mut group = TsGroup::new(GroupKey(1), "g", "");
        group.add_explicit_member(TsKey(9));
        assert!(group.remove_explicit_member(TsKey(9)));
        assert!(!group.remove_explicit_member(TsKey(9)));
    }

    #[test]
    fn filters_mark_the_group_as_filtered() {
        let mut group = TsGroup::new(GroupKey(1), "g", "");
        assert!(!group.has_filters());
        group.add_part_filter(TsidPart::Interval, "15Minutes");
        assert!(group.has_filters());
        assert_eq!(group.part_filters().len(), 1);
    }
}
