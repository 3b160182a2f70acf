//! Dependency evaluation and staging-table reconciliation.
//!
//! `eval_comp` is pure over the caches. The reconcile paths write through a
//! scratchpad table so no reader ever observes a computation with zero
//! edges mid-replacement, and the scratchpad is cleared afterwards so no
//! foreign-key reference to a deleted time series lingers.

#![allow(missing_docs)]

use std::collections::HashSet;

use tracing::debug;

use crate::cache::DependencyCache;
use crate::core::errors::Result;
use crate::dao::DependsStore;
use crate::model::{AppKey, CompKey, DbComputation, DependencyEdge, TsidPart};

/// Stateless; all inputs arrive per call.
pub struct DependencyReconciler;

impl DependencyReconciler {
    /// Compute the edge set for one computation from the caches alone.
    ///
    /// Group computations iterate parameters × expanded members; the caller
    /// re-expands the group first if its expansion was invalidated. Point
    /// computations use each input parameter's single binding.
    #[must_use]
    pub fn eval_comp(
        &self,
        cache: &DependencyCache,
        comp: &DbComputation,
    ) -> HashSet<DependencyEdge> {
        let mut edges = HashSet::new();
        if !comp.is_graph_eligible() {
            return edges;
        }

        let group = comp.group().and_then(|key| cache.group(key));
        if let Some(group) = group {
            for member in group.expanded_members() {
                let Some(member_tsid) = cache.tsid_any(*member) else {
                    continue;
                };
                for parm in comp.input_parms() {
                    let morphed = parm.transform.apply(member_tsid);
                    if let Some(bound) = cache.tsid_by_unique(&morphed.unique_string()) {
                        edges.insert(DependencyEdge::new(bound.key(), comp.key()));
                        break;
                    }
                }
            }
        } else {
            for parm in comp.input_parms() {
                if let Some(key) = parm.ts_key {
                    edges.insert(DependencyEdge::new(key, comp.key()));
                    continue;
                }
                // A keyless parameter with a complete path still binds if
                // the catalog knows the path.
                if let Some(path) = full_path(parm) {
                    if let Some(bound) = cache.tsid_by_unique(&path) {
                        edges.insert(DependencyEdge::new(bound.key(), comp.key()));
                    }
                    continue;
                }
                // Site/data-type bindings mirror the TS_CREATED matching
                // logic, so a full evaluation reproduces the same edges the
                // incremental path creates.
                edges.extend(
                    cache
                        .all_tsids()
                        .filter(|tsid| parm.matches(tsid))
                        .map(|tsid| DependencyEdge::new(tsid.key(), comp.key())),
                );
            }
        }
        debug!(comp = %comp.key(), edges = edges.len(), "dependencies evaluated");
        edges
    }

    /// Replace the persisted edges of one computation with `edges`.
    pub fn reconcile_comp(
        &self,
        store: &dyn DependsStore,
        cache: &mut DependencyCache,
        comp: CompKey,
        edges: &HashSet<DependencyEdge>,
    ) -> Result<()> {
        store.clear_staging()?;
        store.insert_staging(edges)?;
        store.delete_edges_for_comp(comp)?;
        store.remove_existing_from_staging()?;
        store.copy_staging_to_live()?;
        store.clear_staging()?;
        cache.replace_edges_for_comp(comp, edges);
        Ok(())
    }

    /// Merge new edges into the live table without deleting anything:
    /// incremental additions when a new time series starts triggering
    /// existing computations.
    pub fn merge_edges(
        &self,
        store: &dyn DependsStore,
        cache: &mut DependencyCache,
        edges: &HashSet<DependencyEdge>,
    ) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        store.clear_staging()?;
        store.insert_staging(edges)?;
        store.remove_existing_from_staging()?;
        store.copy_staging_to_live()?;
        store.clear_staging()?;
        for edge in edges {
            cache.add_edge(*edge);
        }
        Ok(())
    }

    /// Replace the whole dependency table for `app` with `edges` in one
    /// diff pass. Running it twice with the same input is a no-op the
    /// second time.
    pub fn reconcile_full(
        &self,
        store: &dyn DependsStore,
        cache: &mut DependencyCache,
        app: AppKey,
        edges: HashSet<DependencyEdge>,
    ) -> Result<()> {
        store.clear_staging()?;
        store.insert_staging(&edges)?;
        store.delete_live_not_in_staging(app)?;
        store.insert_live_from_staging_diff()?;
        store.clear_staging()?;
        cache.set_edges(edges);
        Ok(())
    }
}

/// Full dotted path from a parameter's part overrides, if all six are set.
fn full_path(parm: &crate::model::CompParm) -> Option<String> {
    let mut parts = Vec::with_capacity(6);
    for part in TsidPart::ALL {
        parts.push(parm.transform.override_for(part)?);
    }
    Some(parts.join("."))
}
