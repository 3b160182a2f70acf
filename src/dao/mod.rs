//! Data-access seams the daemon core runs against.
//!
//! Each trait mirrors one collaborator contract: the notification queue, the
//! time-series catalog, the group and computation stores, the raw dependency
//! table primitives, and the lock table. [`sqlite::SqliteDb`] implements all
//! of them over a single connection; tests substitute per-trait mocks.

#![allow(missing_docs)]

pub mod sqlite;

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::core::errors::Result;
use crate::model::{
    AppKey, ChangeNotification, CompKey, DbComputation, DependencyEdge, GroupKey, ProcessLock,
    TimeSeriesId, TsGroup, TsKey,
};

/// FIFO change-notification queue. Delivery is at-least-once; duplicate
/// suppression lives in the consumer.
pub trait NotificationSource {
    /// Pop the single oldest unconsumed notification, if any.
    fn poll_next(&self) -> Result<Option<ChangeNotification>>;

    /// Append a notification. Used by the ops CLI; production rows come from
    /// database triggers.
    fn enqueue(&self, notification: &ChangeNotification) -> Result<()>;
}

/// Read access to the time-series identifier catalog.
pub trait TimeSeriesCatalog {
    fn list_all(&self) -> Result<Vec<TimeSeriesId>>;

    /// Not-found is ordinary control flow, not an error: the loop treats a
    /// missing identifier as an implicit delete.
    fn get_by_key(&self, key: TsKey) -> Result<Option<TimeSeriesId>>;

    fn get_by_unique_string(&self, unique: &str) -> Result<Option<TimeSeriesId>>;

    /// Re-enqueue stored values for `tsid` back to `since` so computations
    /// whose edges were just created see values that arrived before the
    /// edges existed. Best-effort; callers log and continue on failure.
    fn replay_history(&self, tsid: &TimeSeriesId, since: DateTime<Utc>) -> Result<usize>;
}

/// Read/write access to group definitions. Expanded member sets are a cache
/// concern and are never persisted here.
pub trait GroupStore {
    fn list_groups(&self) -> Result<Vec<TsGroup>>;

    fn get_group_by_id(&self, key: GroupKey) -> Result<Option<TsGroup>>;

    fn write_group(&self, group: &TsGroup) -> Result<()>;

    /// Remove one explicit-membership row (time series deleted upstream).
    fn delete_explicit_member(&self, group: GroupKey, ts: TsKey) -> Result<()>;
}

/// Read/write access to computation records.
pub trait ComputationStore {
    /// All enabled computations, timed ones included; the cache filters
    /// timed computations out of the graph.
    fn list_enabled(&self, app: AppKey) -> Result<Vec<DbComputation>>;

    fn get_comp_by_id(&self, key: CompKey) -> Result<Option<DbComputation>>;

    fn write_computation(&self, comp: &DbComputation) -> Result<()>;
}

/// Raw set-oriented primitives over the dependency table and its staging
/// twin. No ORM layer; the reconciler drives these directly.
pub trait DependsStore {
    /// Every live edge belonging to `app`'s computations.
    fn load_all_edges(&self, app: AppKey) -> Result<HashSet<DependencyEdge>>;

    fn delete_edges_for_comp(&self, comp: CompKey) -> Result<()>;

    fn delete_edges_for_comps(&self, comps: &[CompKey]) -> Result<()>;

    fn delete_edges_for_ts(&self, ts: TsKey) -> Result<()>;

    fn clear_staging(&self) -> Result<()>;

    fn insert_staging(&self, edges: &HashSet<DependencyEdge>) -> Result<()>;

    /// Drop staging rows that already exist live, so the copy step never
    /// violates the pair uniqueness constraint.
    fn remove_existing_from_staging(&self) -> Result<()>;

    /// Append every remaining staging row to the live table.
    fn copy_staging_to_live(&self) -> Result<()>;

    /// Full-eval diff: delete live rows (scoped to `app`) absent from
    /// staging, then insert staging rows absent from live.
    fn delete_live_not_in_staging(&self, app: AppKey) -> Result<()>;

    fn insert_live_from_staging_diff(&self) -> Result<()>;
}

/// The lock table plus the application registry it is keyed on.
pub trait LockStore {
    fn read_lock(&self, app: AppKey) -> Result<Option<ProcessLock>>;

    fn insert_lock(&self, lock: &ProcessLock) -> Result<()>;

    fn update_lock(&self, lock: &ProcessLock) -> Result<()>;

    fn delete_lock(&self, app: AppKey) -> Result<()>;

    fn list_locks(&self) -> Result<Vec<ProcessLock>>;

    fn lookup_app(&self, name: &str) -> Result<Option<AppKey>>;

    /// Look up or create the application row for `name`.
    fn register_app(&self, name: &str) -> Result<AppKey>;
}

/// Everything the daemon needs from its database, as one bound.
pub trait TsdbPort:
    NotificationSource + TimeSeriesCatalog + GroupStore + ComputationStore + DependsStore + LockStore
{
}

impl<T> TsdbPort for T where
    T: NotificationSource
        + TimeSeriesCatalog
        + GroupStore
        + ComputationStore
        + DependsStore
        + LockStore
{
}
