//! Property tests: expansion terminates on arbitrary subgroup digraphs, and
//! reconciliation is an idempotent exact replacement for arbitrary edge
//! sets.

use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;

use comp_depends_daemon::cache::DependencyCache;
use comp_depends_daemon::dao::sqlite::SqliteDb;
use comp_depends_daemon::dao::{ComputationStore, DependsStore, LockStore};
use comp_depends_daemon::expander::GroupExpander;
use comp_depends_daemon::model::{
    CompKey, DbComputation, DependencyEdge, DependsKeyColumn, GroupKey, SubgroupRelation, TsGroup,
    TsKey,
};
use comp_depends_daemon::reconciler::DependencyReconciler;

const MAX_GROUPS: i64 = 6;

#[derive(Debug, Clone)]
struct EdgeSpec {
    parent: i64,
    child: i64,
    relation: u8,
}

fn relation(code: u8) -> SubgroupRelation {
    match code % 3 {
        0 => SubgroupRelation::Include,
        1 => SubgroupRelation::Exclude,
        _ => SubgroupRelation::Intersect,
    }
}

fn arb_graph() -> impl Strategy<Value = (Vec<Vec<i64>>, Vec<EdgeSpec>)> {
    let members = proptest::collection::vec(
        proptest::collection::vec(0_i64..12, 0..4),
        MAX_GROUPS as usize,
    );
    let edges = proptest::collection::vec(
        (0..MAX_GROUPS, 0..MAX_GROUPS, any::<u8>()).prop_map(|(parent, child, relation)| {
            EdgeSpec {
                parent,
                child,
                relation,
            }
        }),
        0..12,
    );
    (members, edges)
}

fn build_cache(members: &[Vec<i64>], edges: &[EdgeSpec]) -> DependencyCache {
    let mut cache = DependencyCache::new(Duration::from_secs(3_600));
    for (idx, group_members) in members.iter().enumerate() {
        let key = GroupKey(i64::try_from(idx).unwrap());
        let mut group = TsGroup::new(key, format!("g{idx}"), "");
        for member in group_members {
            group.add_explicit_member(TsKey(*member));
        }
        cache.put_group(group);
    }
    for edge in edges {
        if let Some(parent) = cache.group_mut(GroupKey(edge.parent)) {
            parent.add_sub_group(GroupKey(edge.child), relation(edge.relation));
        }
    }
    cache
}

proptest! {
    /// Any subgroup digraph — cycles, self-loops, duplicate edges — expands
    /// to a finite set without diverging.
    #[test]
    fn expansion_terminates_on_arbitrary_graphs((members, edges) in arb_graph()) {
        let mut cache = build_cache(&members, &edges);
        let expander = GroupExpander::new(None);
        for id in 0..MAX_GROUPS {
            let expanded = expander.expand(&mut cache, GroupKey(id));
            prop_assert!(expanded.len() <= 12);
            prop_assert!(cache.group(GroupKey(id)).unwrap().is_expanded());
        }
    }

    /// On acyclic graphs (edges only point to higher-numbered groups) the
    /// expansion is a fixpoint: re-expanding changes nothing.
    #[test]
    fn acyclic_expansion_is_stable((members, mut edges) in arb_graph()) {
        edges.retain(|edge| edge.parent < edge.child);
        let mut cache = build_cache(&members, &edges);
        let expander = GroupExpander::new(None);

        let first: Vec<HashSet<TsKey>> = (0..MAX_GROUPS)
            .map(|id| expander.expand(&mut cache, GroupKey(id)))
            .collect();
        let second: Vec<HashSet<TsKey>> = (0..MAX_GROUPS)
            .map(|id| expander.expand(&mut cache, GroupKey(id)))
            .collect();
        prop_assert_eq!(first, second);
    }

    /// Membership checks agree with full expansion on acyclic graphs.
    #[test]
    fn membership_agrees_with_expansion((members, mut edges) in arb_graph(), probe in 0_i64..12) {
        edges.retain(|edge| edge.parent < edge.child);
        let mut cache = build_cache(&members, &edges);
        let expander = GroupExpander::new(None);

        let expanded = expander.expand(&mut cache, GroupKey(0));
        // A fresh cache so check_membership sees unexpanded groups.
        let mut fresh = build_cache(&members, &edges);
        let tsid = comp_depends_daemon::model::TimeSeriesId::new(
            TsKey(probe),
            comp_depends_daemon::model::SiteKey(1),
            comp_depends_daemon::model::DataTypeKey(1),
            [
                format!("LOC{probe}"),
                "Flow".into(),
                "Inst".into(),
                "1Hour".into(),
                "0".into(),
                "raw".into(),
            ],
            String::new(),
            true,
        );
        let member = expander.check_membership(&mut fresh, GroupKey(0), &tsid);
        prop_assert_eq!(member, expanded.contains(&TsKey(probe)));
    }

    /// reconcile_full is idempotent and exact for arbitrary edge sets.
    #[test]
    fn full_reconcile_is_idempotent(
        seed in proptest::collection::hash_set((0_i64..50, 0_i64..5), 0..20),
        fresh in proptest::collection::hash_set((0_i64..50, 0_i64..5), 0..20),
    ) {
        let db = SqliteDb::open_in_memory(DependsKeyColumn::TsId).unwrap();
        let app = db.register_app("prop").unwrap();
        for comp in 0..5 {
            db.write_computation(&DbComputation::new(CompKey(comp), "c", app)).unwrap();
        }
        let to_edges = |pairs: &std::collections::HashSet<(i64, i64)>| -> HashSet<DependencyEdge> {
            pairs
                .iter()
                .map(|(ts, comp)| DependencyEdge::new(TsKey(*ts), CompKey(*comp)))
                .collect()
        };

        // Seed the live table with an arbitrary prior state.
        let seed_edges = to_edges(&seed);
        db.insert_staging(&seed_edges).unwrap();
        db.copy_staging_to_live().unwrap();
        db.clear_staging().unwrap();

        let mut cache = DependencyCache::new(Duration::from_secs(60));
        let fresh_edges = to_edges(&fresh);
        let reconciler = DependencyReconciler;
        reconciler.reconcile_full(&db, &mut cache, app, fresh_edges.clone()).unwrap();
        prop_assert_eq!(&db.load_all_edges(app).unwrap(), &fresh_edges);
        reconciler.reconcile_full(&db, &mut cache, app, fresh_edges.clone()).unwrap();
        prop_assert_eq!(&db.load_all_edges(app).unwrap(), &fresh_edges);
    }
}
