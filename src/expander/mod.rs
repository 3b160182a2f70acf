//! Group expansion: set algebra over time-series identifiers with
//! cycle-guarded recursion.
//!
//! Members compose as `(explicit ∪ filtered ∪ included) \ excluded ∩
//! intersected`. The unions land before the exclude and intersect passes;
//! reordering changes the result.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use regex::Regex;
use tracing::{debug, warn};

use crate::cache::DependencyCache;
use crate::model::{GroupKey, TimeSeriesId, TsGroup, TsKey, TsidPart};

/// Pure graph-expansion logic. Holds no cache state of its own; everything
/// it reads and writes lives in the [`DependencyCache`] passed per call.
pub struct GroupExpander {
    dump_dir: Option<PathBuf>,
}

impl GroupExpander {
    #[must_use]
    pub const fn new(dump_dir: Option<PathBuf>) -> Self {
        Self { dump_dir }
    }

    /// Expand one group, materializing its member set into the cache.
    ///
    /// A group absent from the cache expands to the empty set.
    pub fn expand(&self, cache: &mut DependencyCache, group: GroupKey) -> HashSet<TsKey> {
        let mut visited = Vec::new();
        self.do_expand(cache, group, &mut visited)
    }

    /// Re-expand every cached group from scratch.
    pub fn eval_all(&self, cache: &mut DependencyCache) {
        let keys = cache.group_keys();
        for key in &keys {
            if let Some(group) = cache.group_mut(*key) {
                group.invalidate_expansion();
            }
        }
        for key in keys {
            self.expand(cache, key);
        }
        self.dump_tsid_cache(cache);
    }

    fn do_expand(
        &self,
        cache: &mut DependencyCache,
        group: GroupKey,
        visited: &mut Vec<GroupKey>,
    ) -> HashSet<TsKey> {
        if visited.contains(&group) {
            // Cycle: hand back whatever a sibling call has materialized so
            // far. The next full refresh converges the closing node.
            return cache
                .group(group)
                .map(|cached| cached.expanded_members().clone())
                .unwrap_or_default();
        }
        visited.push(group);

        let Some(def) = cache.group(group).cloned() else {
            return HashSet::new();
        };

        let mut members: HashSet<TsKey> = def.explicit_members().iter().copied().collect();

        if def.has_filters() {
            let filters = CompiledFilters::new(&def);
            members.extend(
                cache
                    .all_tsids()
                    .filter(|tsid| filters.passes(&def, tsid))
                    .map(TimeSeriesId::key),
            );
        }

        for included in def.included() {
            members.extend(self.do_expand(cache, *included, visited));
        }
        for excluded in def.excluded() {
            let out = self.do_expand(cache, *excluded, visited);
            members.retain(|key| !out.contains(key));
        }
        for intersected in def.intersected() {
            let keep = self.do_expand(cache, *intersected, visited);
            members.retain(|key| keep.contains(key));
        }

        if let Some(cached) = cache.group_mut(group) {
            cached.set_expansion(members.clone());
        }
        debug!(group = %group, members = members.len(), "group expanded");
        self.dump_group(cache, group);
        members
    }

    /// Answer "is this one identifier a member of this group" without a
    /// full expansion, updating the group's expanded cache on confirmation.
    pub fn check_membership(
        &self,
        cache: &mut DependencyCache,
        group: GroupKey,
        tsid: &TimeSeriesId,
    ) -> bool {
        let mut visited = Vec::new();
        self.do_check(cache, group, tsid, &mut visited)
    }

    fn do_check(
        &self,
        cache: &mut DependencyCache,
        group: GroupKey,
        tsid: &TimeSeriesId,
        visited: &mut Vec<GroupKey>,
    ) -> bool {
        if visited.contains(&group) {
            return cache
                .group(group)
                .is_some_and(|cached| cached.expanded_members().contains(&tsid.key()));
        }
        visited.push(group);

        let Some(def) = cache.group(group).cloned() else {
            return false;
        };

        let mut member = def.explicit_members().contains(&tsid.key());
        if !member && def.has_filters() {
            member = CompiledFilters::new(&def).passes(&def, tsid);
        }
        if !member {
            member = def
                .included()
                .iter()
                .any(|included| self.do_check(cache, *included, tsid, visited));
        }
        if member {
            // Exclusion is itself a full recursive membership test.
            if def
                .excluded()
                .iter()
                .any(|excluded| self.do_check(cache, *excluded, tsid, visited))
            {
                member = false;
            }
        }
        if member {
            member = def
                .intersected()
                .iter()
                .all(|intersected| self.do_check(cache, *intersected, tsid, visited));
        }

        if member {
            if let Some(cached) = cache.group_mut(group) {
                cached.add_to_expansion(tsid.key());
            }
        }
        member
    }

    /// Re-expand every ancestor whose expansion can be altered by a change
    /// to `changed`. Returns the affected keys, `changed` included, in walk
    /// order. Cycle-safe: each group is re-expanded at most once.
    pub fn evaluate_parents(
        &self,
        cache: &mut DependencyCache,
        changed: GroupKey,
    ) -> Vec<GroupKey> {
        let mut affected = vec![changed];
        let mut cursor = 0;
        while cursor < affected.len() {
            let current = affected[cursor];
            cursor += 1;
            let parents: Vec<GroupKey> = cache
                .groups()
                .filter(|candidate| candidate.references(current))
                .map(TsGroup::key)
                .collect();
            for parent in parents {
                if !affected.contains(&parent) {
                    self.expand(cache, parent);
                    affected.push(parent);
                }
            }
        }
        affected
    }

    // ──────────────────── debug dumps ────────────────────

    fn dump_group(&self, cache: &DependencyCache, group: GroupKey) {
        let Some(dir) = &self.dump_dir else { return };
        let Some(cached) = cache.group(group) else {
            return;
        };
        let path = dir.join(sanitize_name(cached.name()));
        let result = std::fs::File::create(&path).and_then(|mut file| {
            let mut members: Vec<String> = cached
                .expanded_members()
                .iter()
                .map(|key| {
                    cache
                        .tsid_any(*key)
                        .map_or_else(|| key.to_string(), TimeSeriesId::unique_string)
                })
                .collect();
            members.sort();
            for member in members {
                writeln!(file, "{member}")?;
            }
            Ok(())
        });
        if let Err(err) = result {
            warn!(path = %path.display(), %err, "cannot write group dump");
        }
    }

    /// Dump the identifier catalog alongside the group dumps.
    pub fn dump_tsid_cache(&self, cache: &DependencyCache) {
        let Some(dir) = &self.dump_dir else { return };
        let path = dir.join("tsids");
        let result = std::fs::File::create(&path).and_then(|mut file| {
            let mut lines: Vec<String> =
                cache.all_tsids().map(ToString::to_string).collect();
            lines.sort();
            for line in lines {
                writeln!(file, "{line}")?;
            }
            Ok(())
        });
        if let Err(err) = result {
            warn!(path = %path.display(), %err, "cannot write tsid dump");
        }
    }
}

/// File-name-safe form of a group name.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// A group's part filters compiled to anchored, upper-cased regexes.
struct CompiledFilters {
    patterns: Vec<(TsidPart, Regex)>,
}

impl CompiledFilters {
    fn new(group: &TsGroup) -> Self {
        let mut patterns = Vec::new();
        for filter in group.part_filters() {
            match compile_wildcard(&filter.pattern) {
                Ok(regex) => patterns.push((filter.part, regex)),
                Err(err) => warn!(
                    group = %group.key(),
                    pattern = %filter.pattern,
                    %err,
                    "cannot compile part filter"
                ),
            }
        }
        Self { patterns }
    }

    fn part_matches(&self, part: TsidPart, value: &str) -> Option<bool> {
        let mut declared = false;
        let upper = value.to_uppercase();
        for (filter_part, regex) in &self.patterns {
            if *filter_part != part {
                continue;
            }
            declared = true;
            if regex.is_match(&upper) {
                return Some(true);
            }
        }
        declared.then_some(false)
    }

    /// A candidate passes when every declared filter category matches and
    /// at least one category is declared — an empty definition contains
    /// nothing.
    fn passes(&self, group: &TsGroup, tsid: &TimeSeriesId) -> bool {
        let mut matched = 0u32;

        // Location category: direct site references and location patterns
        // are alternative ways of naming the same thing.
        let location_patterns = self.part_matches(TsidPart::Location, tsid.part(TsidPart::Location));
        if !group.site_ids().is_empty() || location_patterns.is_some() {
            let by_site = group.site_ids().contains(&tsid.site());
            if !by_site && location_patterns != Some(true) {
                return false;
            }
            matched += 1;
        }

        // Param category: data-type references or param patterns.
        let param_patterns = self.part_matches(TsidPart::Param, tsid.part(TsidPart::Param));
        if !group.data_type_ids().is_empty() || param_patterns.is_some() {
            let by_data_type = group.data_type_ids().contains(&tsid.data_type());
            if !by_data_type && param_patterns != Some(true) {
                return false;
            }
            matched += 1;
        }

        for part in [
            TsidPart::ParamType,
            TsidPart::Interval,
            TsidPart::Duration,
            TsidPart::Version,
        ] {
            match self.part_matches(part, tsid.part(part)) {
                Some(true) => matched += 1,
                Some(false) => return false,
                None => {}
            }
        }

        matched > 0
    }
}

/// `*` matches any run of characters within the part; everything else is
/// literal. Comparison is case-insensitive via upper-casing both sides.
fn compile_wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .to_uppercase()
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::{GroupExpander, compile_wildcard};
    use crate::cache::DependencyCache;
    use crate::model::{
        DataTypeKey, GroupKey, SiteKey, SubgroupRelation, TimeSeriesId, TsGroup, TsKey, TsidPart,
    };

    fn tsid(key: i64, location: &str, param: &str, version: &str) -> TimeSeriesId {
        TimeSeriesId::new(
            TsKey(key),
            SiteKey(key),
            DataTypeKey(100 + key),
            [
                location.into(),
                param.into(),
                "Inst".into(),
                "1Hour".into(),
                "0".into(),
                version.into(),
            ],
            "cms".into(),
            true,
        )
    }

    fn cache() -> DependencyCache {
        DependencyCache::new(Duration::from_secs(3_600))
    }

    fn keys(values: &[i64]) -> HashSet<TsKey> {
        values.iter().map(|v| TsKey(*v)).collect()
    }

    #[test]
    fn include_exclude_composition() {
        // G: explicit {t1}, includes {t2, t3}, excludes {t3} => {t1, t2}
        let mut cache = cache();
        let mut g = TsGroup::new(GroupKey(1), "G", "");
        g.add_explicit_member(TsKey(1));
        g.add_sub_group(GroupKey(2), SubgroupRelation::Include);
        g.add_sub_group(GroupKey(3), SubgroupRelation::Exclude);
        let mut inc = TsGroup::new(GroupKey(2), "inc", "");
        inc.add_explicit_member(TsKey(2));
        inc.add_explicit_member(TsKey(3));
        let mut exc = TsGroup::new(GroupKey(3), "exc", "");
        exc.add_explicit_member(TsKey(3));
        cache.put_group(g);
        cache.put_group(inc);
        cache.put_group(exc);

        let expander = GroupExpander::new(None);
        assert_eq!(expander.expand(&mut cache, GroupKey(1)), keys(&[1, 2]));
        assert!(cache.group(GroupKey(1)).unwrap().is_expanded());
    }

    #[test]
    fn intersect_narrows_the_union() {
        let mut cache = cache();
        let mut g = TsGroup::new(GroupKey(1), "G", "");
        g.add_explicit_member(TsKey(1));
        g.add_explicit_member(TsKey(2));
        g.add_sub_group(GroupKey(2), SubgroupRelation::Intersect);
        let mut ix = TsGroup::new(GroupKey(2), "ix", "");
        ix.add_explicit_member(TsKey(2));
        ix.add_explicit_member(TsKey(9));
        cache.put_group(g);
        cache.put_group(ix);

        let expander = GroupExpander::new(None);
        assert_eq!(expander.expand(&mut cache, GroupKey(1)), keys(&[2]));
    }

    #[test]
    fn cyclic_graph_terminates() {
        // A includes B includes A.
        let mut cache = cache();
        let mut a = TsGroup::new(GroupKey(1), "A", "");
        a.add_explicit_member(TsKey(1));
        a.add_sub_group(GroupKey(2), SubgroupRelation::Include);
        let mut b = TsGroup::new(GroupKey(2), "B", "");
        b.add_explicit_member(TsKey(2));
        b.add_sub_group(GroupKey(1), SubgroupRelation::Include);
        cache.put_group(a);
        cache.put_group(b);

        let expander = GroupExpander::new(None);
        let expanded = expander.expand(&mut cache, GroupKey(1));
        assert_eq!(expanded, keys(&[1, 2]));
    }

    #[test]
    fn filters_require_every_declared_category() {
        let mut cache = cache();
        cache.put_tsid(tsid(1, "GAGE1", "Flow", "raw"));
        cache.put_tsid(tsid(2, "GAGE2", "Flow", "computed"));
        cache.put_tsid(tsid(3, "DAM1", "Flow", "raw"));

        let mut g = TsGroup::new(GroupKey(1), "gages-raw", "");
        g.add_part_filter(TsidPart::Location, "GAGE*");
        g.add_part_filter(TsidPart::Version, "raw");
        cache.put_group(g);

        let expander = GroupExpander::new(None);
        assert_eq!(expander.expand(&mut cache, GroupKey(1)), keys(&[1]));
    }

    #[test]
    fn site_list_and_location_pattern_are_alternatives() {
        let mut cache = cache();
        cache.put_tsid(tsid(1, "GAGE1", "Flow", "raw"));
        cache.put_tsid(tsid(2, "DAM1", "Flow", "raw"));

        let mut g = TsGroup::new(GroupKey(1), "either", "");
        g.add_site_id(SiteKey(2)); // DAM1's site
        g.add_part_filter(TsidPart::Location, "GAGE*");
        cache.put_group(g);

        let expander = GroupExpander::new(None);
        assert_eq!(expander.expand(&mut cache, GroupKey(1)), keys(&[1, 2]));
    }

    #[test]
    fn empty_group_expands_empty() {
        let mut cache = cache();
        cache.put_tsid(tsid(1, "GAGE1", "Flow", "raw"));
        cache.put_group(TsGroup::new(GroupKey(1), "empty", ""));
        let expander = GroupExpander::new(None);
        assert!(expander.expand(&mut cache, GroupKey(1)).is_empty());
    }

    #[test]
    fn check_membership_matches_expansion_and_caches_hit() {
        let mut cache = cache();
        let hit = tsid(1, "GAGE1", "Flow", "raw");
        let miss = tsid(2, "GAGE2", "Flow", "computed");
        cache.put_tsid(hit.clone());
        cache.put_tsid(miss.clone());

        let mut g = TsGroup::new(GroupKey(1), "raw-only", "");
        g.add_part_filter(TsidPart::Version, "raw");
        cache.put_group(g);

        let expander = GroupExpander::new(None);
        assert!(expander.check_membership(&mut cache, GroupKey(1), &hit));
        assert!(!expander.check_membership(&mut cache, GroupKey(1), &miss));
        assert!(
            cache
                .group(GroupKey(1))
                .unwrap()
                .expanded_members()
                .contains(&TsKey(1))
        );
    }

    #[test]
    fn membership_respects_nested_exclusion() {
        // G includes inc, excludes exc; exc itself excludes the candidate,
        // so exc does not disqualify it.
        let mut cache = cache();
        let candidate = tsid(1, "GAGE1", "Flow", "raw");
        cache.put_tsid(candidate.clone());

        let mut g = TsGroup::new(GroupKey(1), "G", "");
        g.add_explicit_member(TsKey(1));
        g.add_sub_group(GroupKey(2), SubgroupRelation::Exclude);
        let mut exc = TsGroup::new(GroupKey(2), "exc", "");
        exc.add_explicit_member(TsKey(1));
        exc.add_sub_group(GroupKey(3), SubgroupRelation::Exclude);
        let mut inner = TsGroup::new(GroupKey(3), "inner", "");
        inner.add_explicit_member(TsKey(1));
        cache.put_group(g);
        cache.put_group(exc);
        cache.put_group(inner);

        let expander = GroupExpander::new(None);
        // exc \ inner = {}, so G keeps t1.
        assert!(expander.check_membership(&mut cache, GroupKey(1), &candidate));
    }

    #[test]
    fn evaluate_parents_walks_transitive_closure_with_cycles() {
        let mut cache = cache();
        // parent -> mid -> leaf, and cyclic extra <-> parent.
        let mut parent = TsGroup::new(GroupKey(1), "parent", "");
        parent.add_sub_group(GroupKey(2), SubgroupRelation::Include);
        let mut mid = TsGroup::new(GroupKey(2), "mid", "");
        mid.add_sub_group(GroupKey(3), SubgroupRelation::Include);
        let leaf = TsGroup::new(GroupKey(3), "leaf", "");
        let mut extra = TsGroup::new(GroupKey(4), "extra", "");
        extra.add_sub_group(GroupKey(1), SubgroupRelation::Exclude);
        cache.put_group(parent);
        cache.put_group(mid);
        cache.put_group(leaf);
        cache.put_group(extra);

        let expander = GroupExpander::new(None);
        let affected = expander.evaluate_parents(&mut cache, GroupKey(3));
        let affected: HashSet<GroupKey> = affected.into_iter().collect();
        assert_eq!(
            affected,
            [GroupKey(3), GroupKey(2), GroupKey(1), GroupKey(4)]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn wildcard_patterns_are_anchored_and_case_insensitive() {
        let regex = compile_wildcard("gage*").unwrap();
        assert!(regex.is_match("GAGE1"));
        assert!(regex.is_match("GAGE-AUX"));
        assert!(!regex.is_match("XGAGE1"));
        let literal = compile_wildcard("Flow.Total").unwrap();
        assert!(literal.is_match("FLOW.TOTAL"));
        assert!(!literal.is_match("FLOWxTOTAL"));
    }
}
