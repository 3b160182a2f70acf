//! In-memory caches: identifier catalog, groups, enabled computations, and
//! the dependency-edge mirror.
//!
//! One instance is owned by the notification loop and passed explicitly to
//! the expander and the reconciler. No ambient state.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::core::errors::Result;
use crate::dao::{ComputationStore, DependsStore, GroupStore, TimeSeriesCatalog};
use crate::model::{
    AppKey, CompKey, DbComputation, DependencyEdge, GroupKey, TimeSeriesId, TsGroup, TsKey,
};

struct CachedTsid {
    tsid: TimeSeriesId,
    loaded_at: Instant,
}

/// The three caches plus the group cache they feed, independently
/// refreshable, mutated incrementally between full refreshes.
pub struct DependencyCache {
    ttl: Duration,
    never_expire: bool,
    by_key: HashMap<TsKey, CachedTsid>,
    by_unique: HashMap<String, TsKey>,
    groups: HashMap<GroupKey, TsGroup>,
    comps: HashMap<CompKey, DbComputation>,
    edges: HashSet<DependencyEdge>,
}

impl DependencyCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            never_expire: false,
            by_key: HashMap::new(),
            by_unique: HashMap::new(),
            groups: HashMap::new(),
            comps: HashMap::new(),
            edges: HashSet::new(),
        }
    }

    /// Suspend staleness checks during bulk-refresh windows, where re-fetch
    /// per access would defeat the refresh.
    pub fn set_never_expire(&mut self, never_expire: bool) {
        self.never_expire = never_expire;
    }

    // ──────────────────── TSID cache ────────────────────

    pub fn put_tsid(&mut self, tsid: TimeSeriesId) {
        if let Some(old) = self.by_key.get(&tsid.key()) {
            self.by_unique.remove(&old.tsid.unique_string_upper());
        }
        self.by_unique.insert(tsid.unique_string_upper(), tsid.key());
        self.by_key.insert(
            tsid.key(),
            CachedTsid {
                tsid,
                loaded_at: Instant::now(),
            },
        );
    }

    pub fn remove_tsid(&mut self, key: TsKey) -> Option<TimeSeriesId> {
        let entry = self.by_key.remove(&key)?;
        self.by_unique.remove(&entry.tsid.unique_string_upper());
        Some(entry.tsid)
    }

    fn is_fresh(&self, entry: &CachedTsid) -> bool {
        self.never_expire || entry.loaded_at.elapsed() <= self.ttl
    }

    /// Cached identifier, fresh entries only. Stale entries answer `None`
    /// so the caller re-fetches.
    #[must_use]
    pub fn tsid_by_key(&self, key: TsKey) -> Option<&TimeSeriesId> {
        self.by_key
            .get(&key)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| &entry.tsid)
    }

    #[must_use]
    pub fn tsid_by_unique(&self, unique: &str) -> Option<&TimeSeriesId> {
        let key = *self.by_unique.get(&unique.to_uppercase())?;
        self.tsid_by_key(key)
    }

    /// Fresh-or-fetch by key. A catalog miss is `Ok(None)` (deleted
    /// upstream), and evicts any stale cache entry.
    pub fn fetch_tsid_by_key(
        &mut self,
        catalog: &dyn TimeSeriesCatalog,
        key: TsKey,
    ) -> Result<Option<TimeSeriesId>> {
        if let Some(entry) = self.by_key.get(&key) {
            if self.is_fresh(entry) {
                return Ok(Some(entry.tsid.clone()));
            }
        }
        match catalog.get_by_key(key)? {
            Some(tsid) => {
                self.put_tsid(tsid.clone());
                Ok(Some(tsid))
            }
            None => {
                self.remove_tsid(key);
                Ok(None)
            }
        }
    }

    /// Cached identifier regardless of freshness. Evaluation passes work on
    /// whatever the cache holds; the TTL governs fetch paths only.
    #[must_use]
    pub fn tsid_any(&self, key: TsKey) -> Option<&TimeSeriesId> {
        self.by_key.get(&key).map(|entry| &entry.tsid)
    }

    /// Every cached identifier, freshness ignored. This is the candidate
    /// set for group filter evaluation.
    pub fn all_tsids(&self) -> impl Iterator<Item = &TimeSeriesId> {
        self.by_key.values().map(|entry| &entry.tsid)
    }

    pub fn reload_tsids(&mut self, catalog: &dyn TimeSeriesCatalog) -> Result<()> {
        self.by_key.clear();
        self.by_unique.clear();
        for tsid in catalog.list_all()? {
            self.put_tsid(tsid);
        }
        debug!(count = self.by_key.len(), "TSID cache reloaded");
        Ok(())
    }

    // ──────────────────── group cache ────────────────────

    #[must_use]
    pub fn group(&self, key: GroupKey) -> Option<&TsGroup> {
        self.groups.get(&key)
    }

    pub fn group_mut(&mut self, key: GroupKey) -> Option<&mut TsGroup> {
        self.groups.get_mut(&key)
    }

    pub fn put_group(&mut self, group: TsGroup) {
        self.groups.insert(group.key(), group);
    }

    pub fn remove_group(&mut self, key: GroupKey) -> Option<TsGroup> {
        self.groups.remove(&key)
    }

    #[must_use]
    pub fn group_keys(&self) -> Vec<GroupKey> {
        self.groups.keys().copied().collect()
    }

    pub fn groups(&self) -> impl Iterator<Item = &TsGroup> {
        self.groups.values()
    }

    pub fn reload_groups(&mut self, store: &dyn GroupStore) -> Result<()> {
        self.groups.clear();
        for group in store.list_groups()? {
            self.groups.insert(group.key(), group);
        }
        debug!(count = self.groups.len(), "group cache reloaded");
        Ok(())
    }

    // ──────────────────── computation cache ────────────────────

    #[must_use]
    pub fn comp(&self, key: CompKey) -> Option<&DbComputation> {
        self.comps.get(&key)
    }

    pub fn put_comp(&mut self, mut comp: DbComputation) {
        self.resolve_parm_references(&mut comp);
        self.comps.insert(comp.key(), comp);
    }

    pub fn remove_comp(&mut self, key: CompKey) -> Option<DbComputation> {
        self.comps.remove(&key)
    }

    pub fn comps(&self) -> impl Iterator<Item = &DbComputation> {
        self.comps.values()
    }

    #[must_use]
    pub fn comp_keys(&self) -> Vec<CompKey> {
        self.comps.keys().copied().collect()
    }

    /// Enabled, non-timed computations only; timed computations are
    /// scheduled by wall clock and never enter the graph.
    pub fn reload_comps(&mut self, store: &dyn ComputationStore, app: AppKey) -> Result<()> {
        self.comps.clear();
        for comp in store.list_enabled(app)? {
            if comp.is_timed() {
                continue;
            }
            self.put_comp(comp);
        }
        debug!(count = self.comps.len(), "computation cache reloaded");
        Ok(())
    }

    /// Pre-resolve input-parameter site/data-type references from the bound
    /// identifier so later matching needs no catalog I/O.
    fn resolve_parm_references(&self, comp: &mut DbComputation) {
        let mut resolved: Vec<(usize, crate::model::SiteKey, crate::model::DataTypeKey)> =
            Vec::new();
        for (idx, parm) in comp.parms().iter().enumerate() {
            if !parm.is_input() || parm.site.is_some() {
                continue;
            }
            if let Some(bound) = parm.ts_key.and_then(|key| self.tsid_by_key(key)) {
                resolved.push((idx, bound.site(), bound.data_type()));
            }
        }
        for (idx, site, data_type) in resolved {
            let parm = &mut comp.parms_mut()[idx];
            parm.site = Some(site);
            parm.data_type = Some(data_type);
        }
    }

    // ──────────────────── edge cache ────────────────────

    #[must_use]
    pub const fn edges(&self) -> &HashSet<DependencyEdge> {
        &self.edges
    }

    pub fn add_edge(&mut self, edge: DependencyEdge) -> bool {
        self.edges.insert(edge)
    }

    pub fn remove_edges_for_ts(&mut self, ts: TsKey) -> Vec<DependencyEdge> {
        let removed: Vec<DependencyEdge> = self
            .edges
            .iter()
            .filter(|edge| edge.ts == ts)
            .copied()
            .collect();
        for edge in &removed {
            self.edges.remove(edge);
        }
        removed
    }

    pub fn remove_edges_for_comp(&mut self, comp: CompKey) -> usize {
        let before = self.edges.len();
        self.edges.retain(|edge| edge.comp != comp);
        before - self.edges.len()
    }

    /// Swap in the freshly computed edge set for one computation.
    pub fn replace_edges_for_comp(&mut self, comp: CompKey, fresh: &HashSet<DependencyEdge>) {
        self.edges.retain(|edge| edge.comp != comp);
        self.edges.extend(fresh.iter().copied());
    }

    pub fn set_edges(&mut self, edges: HashSet<DependencyEdge>) {
        self.edges = edges;
    }

    pub fn reload_edges(&mut self, store: &dyn DependsStore, app: AppKey) -> Result<()> {
        self.edges = store.load_all_edges(app)?;
        debug!(count = self.edges.len(), "dependency-edge cache reloaded");
        Ok(())
    }
}
