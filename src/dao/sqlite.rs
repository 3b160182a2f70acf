//! SQLite-backed implementation of every storage seam, one connection.
//!
//! Schema note: the dependency and group-member tables name their
//! time-series key column through [`DependsKeyColumn`], fixed at open time.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::warn;

use crate::core::errors::{CddError, Result};
use crate::dao::{
    ComputationStore, DependsStore, GroupStore, LockStore, NotificationSource, TimeSeriesCatalog,
};
use crate::model::{
    AppKey, ChangeNotification, CompKey, CompParm, DataTypeKey, DbComputation, DependencyEdge,
    DependsKeyColumn, GroupKey, NotificationKind, ParmDirection, ParmTransform, ProcessLock,
    SiteKey, SubgroupRelation, TimeSeriesId, TsGroup, TsKey, TsidPart,
};

/// All tables behind one connection. Methods take `&self`; multi-statement
/// writes run inside unchecked transactions (single-connection process).
pub struct SqliteDb {
    conn: Connection,
    key_col: DependsKeyColumn,
}

impl SqliteDb {
    /// Open (creating the schema if absent) with WAL journaling.
    pub fn open(path: &Path, key_col: DependsKeyColumn) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        Self::with_connection(conn, key_col)
    }

    /// In-memory database, for tests and one-shot tooling.
    pub fn open_in_memory(key_col: DependsKeyColumn) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, key_col)
    }

    fn with_connection(conn: Connection, key_col: DependsKeyColumn) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self { conn, key_col };
        db.create_schema()?;
        Ok(db)
    }

    fn create_schema(&self) -> Result<()> {
        let key = self.key_col.column_name();
        let member = self.key_col.member_column_name();
        let ddl = format!(
            "
            CREATE TABLE IF NOT EXISTS loading_application (
                app_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                app_name  TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS time_series (
                ts_id          INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id        INTEGER NOT NULL,
                data_type_id   INTEGER NOT NULL,
                location       TEXT NOT NULL,
                param          TEXT NOT NULL,
                param_type     TEXT NOT NULL,
                interval       TEXT NOT NULL,
                duration       TEXT NOT NULL,
                version        TEXT NOT NULL,
                storage_units  TEXT NOT NULL DEFAULT '',
                active         INTEGER NOT NULL DEFAULT 1,
                unique_upper   TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS ts_group (
                group_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                group_name   TEXT NOT NULL,
                group_type   TEXT NOT NULL DEFAULT '',
                description  TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS ts_group_member (
                group_id  INTEGER NOT NULL,
                {member}  INTEGER NOT NULL,
                PRIMARY KEY (group_id, {member})
            );
            CREATE TABLE IF NOT EXISTS ts_group_site (
                group_id  INTEGER NOT NULL,
                site_id   INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ts_group_data_type (
                group_id      INTEGER NOT NULL,
                data_type_id  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ts_group_filter (
                group_id  INTEGER NOT NULL,
                part      TEXT NOT NULL,
                pattern   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ts_group_sub (
                parent_id  INTEGER NOT NULL,
                child_id   INTEGER NOT NULL,
                relation   TEXT NOT NULL CHECK (relation IN ('A', 'S', 'I')),
                PRIMARY KEY (parent_id, child_id, relation)
            );
            CREATE TABLE IF NOT EXISTS computation (
                computation_id  INTEGER PRIMARY KEY AUTOINCREMENT,
                comp_name       TEXT NOT NULL,
                app_id          INTEGER NOT NULL,
                enabled         INTEGER NOT NULL DEFAULT 1,
                group_id        INTEGER,
                timed           INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS comp_parm (
                computation_id  INTEGER NOT NULL,
                role            TEXT NOT NULL,
                direction       TEXT NOT NULL CHECK (direction IN ('i', 'o')),
                ts_id           INTEGER,
                site_id         INTEGER,
                data_type_id    INTEGER,
                location        TEXT,
                param           TEXT,
                param_type      TEXT,
                interval        TEXT,
                duration        TEXT,
                version         TEXT,
                sort_order      INTEGER NOT NULL,
                PRIMARY KEY (computation_id, role)
            );
            CREATE TABLE IF NOT EXISTS comp_depends (
                {key}           INTEGER NOT NULL,
                computation_id  INTEGER NOT NULL,
                PRIMARY KEY ({key}, computation_id)
            );
            CREATE TABLE IF NOT EXISTS comp_depends_scratchpad (
                {key}           INTEGER NOT NULL,
                computation_id  INTEGER NOT NULL,
                PRIMARY KEY ({key}, computation_id)
            );
            CREATE TABLE IF NOT EXISTS cp_depends_notify (
                record_num        INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type        TEXT NOT NULL,
                record_key        INTEGER NOT NULL,
                date_time_loaded  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS comp_proc_lock (
                app_id      INTEGER PRIMARY KEY,
                pid         INTEGER NOT NULL,
                hostname    TEXT NOT NULL,
                heartbeat   TEXT NOT NULL,
                cur_status  TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS cp_tasklist (
                record_num  INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_id       INTEGER NOT NULL,
                queued_at   TEXT NOT NULL
            );
            ",
            key = key,
            member = member
        );
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }

    // ──────────────────── seed-side helpers ────────────────────
    // Upstream writers (ingest pipelines, editors) own these tables in
    // production; the daemon only observes them. The helpers exist for the
    // ops CLI and tests.

    /// Insert a time series, assigning a key if the identifier has none.
    pub fn insert_time_series(&self, tsid: &TimeSeriesId) -> Result<TsKey> {
        let key: Option<i64> = if tsid.key().is_undefined() {
            None
        } else {
            Some(tsid.key().value())
        };
        self.conn.execute(
            "INSERT INTO time_series (ts_id, site_id, data_type_id, location, param,
                param_type, interval, duration, version, storage_units, active, unique_upper)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                key,
                tsid.site().value(),
                tsid.data_type().value(),
                tsid.part(TsidPart::Location),
                tsid.part(TsidPart::Param),
                tsid.part(TsidPart::ParamType),
                tsid.part(TsidPart::Interval),
                tsid.part(TsidPart::Duration),
                tsid.part(TsidPart::Version),
                tsid.storage_units(),
                i32::from(tsid.is_active()),
                tsid.unique_string_upper(),
            ],
        )?;
        Ok(TsKey(self.conn.last_insert_rowid()))
    }

    /// Delete a time series row (upstream delete, simulated).
    pub fn delete_time_series(&self, key: TsKey) -> Result<()> {
        self.conn
            .execute("DELETE FROM time_series WHERE ts_id = ?1", [key.value()])?;
        Ok(())
    }

    /// Delete a group definition and its satellite rows.
    pub fn delete_group(&self, key: GroupKey) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for table in [
            "ts_group_member",
            "ts_group_site",
            "ts_group_data_type",
            "ts_group_filter",
        ] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE group_id = ?1"),
                [key.value()],
            )?;
        }
        tx.execute(
            "DELETE FROM ts_group_sub WHERE parent_id = ?1",
            [key.value()],
        )?;
        tx.execute("DELETE FROM ts_group WHERE group_id = ?1", [key.value()])?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a computation and its parameters.
    pub fn delete_computation(&self, key: CompKey) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM comp_parm WHERE computation_id = ?1",
            [key.value()],
        )?;
        tx.execute(
            "DELETE FROM computation WHERE computation_id = ?1",
            [key.value()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Rows currently in the history-replay tasklist, oldest first.
    pub fn tasklist_keys(&self) -> Result<Vec<TsKey>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ts_id FROM cp_tasklist ORDER BY record_num")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(TsKey(row?));
        }
        Ok(keys)
    }

    // ──────────────────── row assembly ────────────────────

    fn row_to_tsid(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimeSeriesId> {
        Ok(TimeSeriesId::new(
            TsKey(row.get(0)?),
            SiteKey(row.get(1)?),
            DataTypeKey(row.get(2)?),
            [
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ],
            row.get(9)?,
            row.get::<_, i64>(10)? != 0,
        ))
    }

    const TSID_COLS: &'static str = "ts_id, site_id, data_type_id, location, param, param_type,
        interval, duration, version, storage_units, active";

    fn fill_group(&self, group: &mut TsGroup) -> Result<()> {
        let id = group.key().value();
        let member = self.key_col.member_column_name();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {member} FROM ts_group_member WHERE group_id = ?1"
        ))?;
        for row in stmt.query_map([id], |row| row.get::<_, i64>(0))? {
            group.add_explicit_member(TsKey(row?));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT site_id FROM ts_group_site WHERE group_id = ?1")?;
        for row in stmt.query_map([id], |row| row.get::<_, i64>(0))? {
            group.add_site_id(SiteKey(row?));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT data_type_id FROM ts_group_data_type WHERE group_id = ?1")?;
        for row in stmt.query_map([id], |row| row.get::<_, i64>(0))? {
            group.add_data_type_id(DataTypeKey(row?));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT part, pattern FROM ts_group_filter WHERE group_id = ?1")?;
        for row in stmt.query_map([id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })? {
            let (label, pattern) = row?;
            match TsidPart::from_label(&label) {
                Some(part) => group.add_part_filter(part, pattern),
                None => warn!(group = id, %label, "ignoring filter row with unknown part"),
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT child_id, relation FROM ts_group_sub WHERE parent_id = ?1")?;
        for row in stmt.query_map([id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })? {
            let (child, relation) = row?;
            let relation = match relation.as_str() {
                "A" => SubgroupRelation::Include,
                "S" => SubgroupRelation::Exclude,
                "I" => SubgroupRelation::Intersect,
                other => {
                    warn!(group = id, relation = other, "ignoring unknown subgroup relation");
                    continue;
                }
            };
            group.add_sub_group(GroupKey(child), relation);
        }
        Ok(())
    }

    fn row_to_parm(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompParm> {
        let direction: String = row.get(1)?;
        Ok(CompParm {
            role: row.get(0)?,
            direction: if direction == "i" {
                ParmDirection::Input
            } else {
                ParmDirection::Output
            },
            ts_key: row.get::<_, Option<i64>>(2)?.map(TsKey),
            site: row.get::<_, Option<i64>>(3)?.map(SiteKey),
            data_type: row.get::<_, Option<i64>>(4)?.map(DataTypeKey),
            transform: ParmTransform {
                location: row.get(5)?,
                param: row.get(6)?,
                param_type: row.get(7)?,
                interval: row.get(8)?,
                duration: row.get(9)?,
                version: row.get(10)?,
            },
        })
    }

    fn fill_parms(&self, comp: &mut DbComputation) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT role, direction, ts_id, site_id, data_type_id, location, param,
                param_type, interval, duration, version
             FROM comp_parm WHERE computation_id = ?1 ORDER BY sort_order",
        )?;
        for row in stmt.query_map([comp.key().value()], Self::row_to_parm)? {
            comp.add_parm(row?);
        }
        Ok(())
    }

    fn row_to_comp(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbComputation> {
        let mut comp = DbComputation::new(
            CompKey(row.get(0)?),
            row.get::<_, String>(1)?,
            AppKey(row.get(2)?),
        );
        comp.set_enabled(row.get::<_, i64>(3)? != 0);
        comp.set_group(row.get::<_, Option<i64>>(4)?.map(GroupKey));
        comp.set_timed(row.get::<_, i64>(5)? != 0);
        Ok(comp)
    }

    fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ProcessLock, String)> {
        let raw_heartbeat: String = row.get(3)?;
        let mut lock = ProcessLock::new(
            AppKey(row.get(0)?),
            row.get::<_, u32>(1)?,
            row.get::<_, String>(2)?,
            Utc::now(),
        );
        lock.status = row.get(4)?;
        Ok((lock, raw_heartbeat))
    }
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| CddError::sql("timestamp parse", err))
}

impl NotificationSource for SqliteDb {
    fn poll_next(&self) -> Result<Option<ChangeNotification>> {
        let oldest = self
            .conn
            .query_row(
                "SELECT record_num, event_type, record_key, date_time_loaded
                 FROM cp_depends_notify ORDER BY record_num LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((record_num, event_type, record_key, loaded)) = oldest else {
            return Ok(None);
        };
        self.conn.execute(
            "DELETE FROM cp_depends_notify WHERE record_num = ?1",
            [record_num],
        )?;
        let Some(kind) = event_type
            .chars()
            .next()
            .and_then(NotificationKind::from_code)
        else {
            return Err(CddError::sql(
                "poll_next",
                format!("unknown event type '{event_type}'"),
            ));
        };
        Ok(Some(ChangeNotification::new(
            kind,
            record_key,
            parse_utc(&loaded)?,
        )))
    }

    fn enqueue(&self, notification: &ChangeNotification) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cp_depends_notify (event_type, record_key, date_time_loaded)
             VALUES (?1, ?2, ?3)",
            params![
                notification.kind.code().to_string(),
                notification.key,
                notification.enqueued_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl TimeSeriesCatalog for SqliteDb {
    fn list_all(&self) -> Result<Vec<TimeSeriesId>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM time_series", Self::TSID_COLS))?;
        let rows = stmt.query_map([], Self::row_to_tsid)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_by_key(&self, key: TsKey) -> Result<Option<TimeSeriesId>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM time_series WHERE ts_id = ?1",
                    Self::TSID_COLS
                ),
                [key.value()],
                Self::row_to_tsid,
            )
            .optional()?)
    }

    fn get_by_unique_string(&self, unique: &str) -> Result<Option<TimeSeriesId>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM time_series WHERE unique_upper = ?1",
                    Self::TSID_COLS
                ),
                [unique.to_uppercase()],
                Self::row_to_tsid,
            )
            .optional()?)
    }

    fn replay_history(&self, tsid: &TimeSeriesId, since: DateTime<Utc>) -> Result<usize> {
        let inserted = self.conn.execute(
            "INSERT INTO cp_tasklist (ts_id, queued_at) VALUES (?1, ?2)",
            params![tsid.key().value(), since.to_rfc3339()],
        )?;
        Ok(inserted)
    }
}

impl GroupStore for SqliteDb {
    fn list_groups(&self) -> Result<Vec<TsGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_id, group_name, group_type, description FROM ts_group")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut groups = Vec::new();
        for row in rows {
            let (id, name, group_type, description) = row?;
            let mut group = TsGroup::new(GroupKey(id), name, group_type);
            group.set_description(description);
            groups.push(group);
        }
        drop(stmt);
        for group in &mut groups {
            self.fill_group(group)?;
        }
        Ok(groups)
    }

    fn get_group_by_id(&self, key: GroupKey) -> Result<Option<TsGroup>> {
        let base = self
            .conn
            .query_row(
                "SELECT group_id, group_name, group_type, description
                 FROM ts_group WHERE group_id = ?1",
                [key.value()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, name, group_type, description)) = base else {
            return Ok(None);
        };
        let mut group = TsGroup::new(GroupKey(id), name, group_type);
        group.set_description(description);
        self.fill_group(&mut group)?;
        Ok(Some(group))
    }

    fn write_group(&self, group: &TsGroup) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let id = group.key().value();
        tx.execute(
            "INSERT INTO ts_group (group_id, group_name, group_type, description)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (group_id) DO UPDATE SET
                group_name = excluded.group_name,
                group_type = excluded.group_type,
                description = excluded.description",
            params![id, group.name(), group.group_type(), group.description()],
        )?;
        for table in [
            "ts_group_member",
            "ts_group_site",
            "ts_group_data_type",
            "ts_group_filter",
        ] {
            tx.execute(&format!("DELETE FROM {table} WHERE group_id = ?1"), [id])?;
        }
        tx.execute("DELETE FROM ts_group_sub WHERE parent_id = ?1", [id])?;

        let member = self.key_col.member_column_name();
        for ts in group.explicit_members() {
            tx.execute(
                &format!("INSERT INTO ts_group_member (group_id, {member}) VALUES (?1, ?2)"),
                params![id, ts.value()],
            )?;
        }
        for site in group.site_ids() {
            tx.execute(
                "INSERT INTO ts_group_site (group_id, site_id) VALUES (?1, ?2)",
                params![id, site.value()],
            )?;
        }
        for data_type in group.data_type_ids() {
            tx.execute(
                "INSERT INTO ts_group_data_type (group_id, data_type_id) VALUES (?1, ?2)",
                params![id, data_type.value()],
            )?;
        }
        for filter in group.part_filters() {
            tx.execute(
                "INSERT INTO ts_group_filter (group_id, part, pattern) VALUES (?1, ?2, ?3)",
                params![id, filter.part.label(), filter.pattern],
            )?;
        }
        for (list, code) in [
            (group.included(), "A"),
            (group.excluded(), "S"),
            (group.intersected(), "I"),
        ] {
            for child in list {
                tx.execute(
                    "INSERT INTO ts_group_sub (parent_id, child_id, relation) VALUES (?1, ?2, ?3)",
                    params![id, child.value(), code],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_explicit_member(&self, group: GroupKey, ts: TsKey) -> Result<()> {
        let member = self.key_col.member_column_name();
        self.conn.execute(
            &format!("DELETE FROM ts_group_member WHERE group_id = ?1 AND {member} = ?2"),
            params![group.value(), ts.value()],
        )?;
        Ok(())
    }
}

impl ComputationStore for SqliteDb {
    fn list_enabled(&self, app: AppKey) -> Result<Vec<DbComputation>> {
        let mut stmt = self.conn.prepare(
            "SELECT computation_id, comp_name, app_id, enabled, group_id, timed
             FROM computation WHERE enabled = 1 AND app_id = ?1",
        )?;
        let rows = stmt.query_map([app.value()], Self::row_to_comp)?;
        let mut comps = Vec::new();
        for row in rows {
            comps.push(row?);
        }
        drop(stmt);
        for comp in &mut comps {
            self.fill_parms(comp)?;
        }
        Ok(comps)
    }

    fn get_comp_by_id(&self, key: CompKey) -> Result<Option<DbComputation>> {
        let base = self
            .conn
            .query_row(
                "SELECT computation_id, comp_name, app_id, enabled, group_id, timed
                 FROM computation WHERE computation_id = ?1",
                [key.value()],
                Self::row_to_comp,
            )
            .optional()?;
        let Some(mut comp) = base else {
            return Ok(None);
        };
        self.fill_parms(&mut comp)?;
        Ok(Some(comp))
    }

    fn write_computation(&self, comp: &DbComputation) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let id = comp.key().value();
        tx.execute(
            "INSERT INTO computation (computation_id, comp_name, app_id, enabled, group_id, timed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (computation_id) DO UPDATE SET
                comp_name = excluded.comp_name,
                app_id = excluded.app_id,
                enabled = excluded.enabled,
                group_id = excluded.group_id,
                timed = excluded.timed",
            params![
                id,
                comp.name(),
                comp.app().value(),
                i32::from(comp.is_enabled()),
                comp.group().map(GroupKey::value),
                i32::from(comp.is_timed()),
            ],
        )?;
        tx.execute("DELETE FROM comp_parm WHERE computation_id = ?1", [id])?;
        for (order, parm) in comp.parms().iter().enumerate() {
            tx.execute(
                "INSERT INTO comp_parm (computation_id, role, direction, ts_id, site_id,
                    data_type_id, location, param, param_type, interval, duration, version,
                    sort_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id,
                    parm.role,
                    if parm.is_input() { "i" } else { "o" },
                    parm.ts_key.map(TsKey::value),
                    parm.site.map(SiteKey::value),
                    parm.data_type.map(DataTypeKey::value),
                    parm.transform.location,
                    parm.transform.param,
                    parm.transform.param_type,
                    parm.transform.interval,
                    parm.transform.duration,
                    parm.transform.version,
                    i64::try_from(order).unwrap_or(i64::MAX),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl DependsStore for SqliteDb {
    fn load_all_edges(&self, app: AppKey) -> Result<HashSet<DependencyEdge>> {
        let key = self.key_col.column_name();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT d.{key}, d.computation_id FROM comp_depends d
             JOIN computation c ON c.computation_id = d.computation_id
             WHERE c.app_id = ?1"
        ))?;
        let rows = stmt.query_map([app.value()], |row| {
            Ok(DependencyEdge::new(
                TsKey(row.get(0)?),
                CompKey(row.get(1)?),
            ))
        })?;
        let mut edges = HashSet::new();
        for row in rows {
            edges.insert(row?);
        }
        Ok(edges)
    }

    fn delete_edges_for_comp(&self, comp: CompKey) -> Result<()> {
        self.conn.execute(
            "DELETE FROM comp_depends WHERE computation_id = ?1",
            [comp.value()],
        )?;
        self.conn.execute(
            "DELETE FROM comp_depends_scratchpad WHERE computation_id = ?1",
            [comp.value()],
        )?;
        Ok(())
    }

    fn delete_edges_for_comps(&self, comps: &[CompKey]) -> Result<()> {
        if comps.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; comps.len()].join(", ");
        self.conn.execute(
            &format!("DELETE FROM comp_depends WHERE computation_id IN ({placeholders})"),
            params_from_iter(comps.iter().map(|comp| comp.value())),
        )?;
        Ok(())
    }

    fn delete_edges_for_ts(&self, ts: TsKey) -> Result<()> {
        let key = self.key_col.column_name();
        self.conn.execute(
            &format!("DELETE FROM comp_depends WHERE {key} = ?1"),
            [ts.value()],
        )?;
        self.conn.execute(
            &format!("DELETE FROM comp_depends_scratchpad WHERE {key} = ?1"),
            [ts.value()],
        )?;
        Ok(())
    }

    fn clear_staging(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM comp_depends_scratchpad", [])?;
        Ok(())
    }

    fn insert_staging(&self, edges: &HashSet<DependencyEdge>) -> Result<()> {
        let key = self.key_col.column_name();
        let mut stmt = self.conn.prepare(&format!(
            "INSERT OR IGNORE INTO comp_depends_scratchpad ({key}, computation_id) VALUES (?1, ?2)"
        ))?;
        for edge in edges {
            stmt.execute(params![edge.ts.value(), edge.comp.value()])?;
        }
        Ok(())
    }

    fn remove_existing_from_staging(&self) -> Result<()> {
        let key = self.key_col.column_name();
        self.conn.execute(
            &format!(
                "DELETE FROM comp_depends_scratchpad WHERE EXISTS (
                    SELECT 1 FROM comp_depends d
                    WHERE d.computation_id = comp_depends_scratchpad.computation_id
                      AND d.{key} = comp_depends_scratchpad.{key})"
            ),
            [],
        )?;
        Ok(())
    }

    fn copy_staging_to_live(&self) -> Result<()> {
        self.conn.execute(
            "INSERT INTO comp_depends SELECT * FROM comp_depends_scratchpad",
            [],
        )?;
        Ok(())
    }

    fn delete_live_not_in_staging(&self, app: AppKey) -> Result<()> {
        let key = self.key_col.column_name();
        self.conn.execute(
            &format!(
                "DELETE FROM comp_depends WHERE computation_id IN (
                    SELECT computation_id FROM computation WHERE app_id = ?1)
                 AND NOT EXISTS (
                    SELECT 1 FROM comp_depends_scratchpad s
                    WHERE s.computation_id = comp_depends.computation_id
                      AND s.{key} = comp_depends.{key})"
            ),
            [app.value()],
        )?;
        Ok(())
    }

    fn insert_live_from_staging_diff(&self) -> Result<()> {
        let key = self.key_col.column_name();
        self.conn.execute(
            &format!(
                "INSERT INTO comp_depends ({key}, computation_id)
                 SELECT s.{key}, s.computation_id FROM comp_depends_scratchpad s
                 WHERE NOT EXISTS (
                    SELECT 1 FROM comp_depends d
                    WHERE d.computation_id = s.computation_id AND d.{key} = s.{key})"
            ),
            [],
        )?;
        Ok(())
    }
}

impl LockStore for SqliteDb {
    fn read_lock(&self, app: AppKey) -> Result<Option<ProcessLock>> {
        let found = self
            .conn
            .query_row(
                "SELECT app_id, pid, hostname, heartbeat, cur_status
                 FROM comp_proc_lock WHERE app_id = ?1",
                [app.value()],
                Self::row_to_lock,
            )
            .optional()?;
        let Some((mut lock, raw_heartbeat)) = found else {
            return Ok(None);
        };
        lock.heartbeat = parse_utc(&raw_heartbeat)?;
        Ok(Some(lock))
    }

    fn insert_lock(&self, lock: &ProcessLock) -> Result<()> {
        self.conn.execute(
            "INSERT INTO comp_proc_lock (app_id, pid, hostname, heartbeat, cur_status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                lock.app.value(),
                lock.pid,
                lock.host,
                lock.heartbeat.to_rfc3339(),
                lock.status,
            ],
        )?;
        Ok(())
    }

    fn update_lock(&self, lock: &ProcessLock) -> Result<()> {
        self.conn.execute(
            "UPDATE comp_proc_lock SET heartbeat = ?1, cur_status = ?2 WHERE app_id = ?3",
            params![
                lock.heartbeat.to_rfc3339(),
                lock.status,
                lock.app.value()
            ],
        )?;
        Ok(())
    }

    fn delete_lock(&self, app: AppKey) -> Result<()> {
        self.conn.execute(
            "DELETE FROM comp_proc_lock WHERE app_id = ?1",
            [app.value()],
        )?;
        Ok(())
    }

    fn list_locks(&self) -> Result<Vec<ProcessLock>> {
        let mut stmt = self.conn.prepare(
            "SELECT app_id, pid, hostname, heartbeat, cur_status
             FROM comp_proc_lock ORDER BY app_id",
        )?;
        let rows = stmt.query_map([], Self::row_to_lock)?;
        let mut locks = Vec::new();
        for row in rows {
            let (mut lock, raw_heartbeat) = row?;
            lock.heartbeat = parse_utc(&raw_heartbeat)?;
            locks.push(lock);
        }
        Ok(locks)
    }

    fn lookup_app(&self, name: &str) -> Result<Option<AppKey>> {
        Ok(self
            .conn
            .query_row(
                "SELECT app_id FROM loading_application WHERE app_name = ?1",
                [name],
                |row| row.get::<_, i64>(0).map(AppKey),
            )
            .optional()?)
    }

    fn register_app(&self, name: &str) -> Result<AppKey> {
        self.conn.execute(
            "INSERT OR IGNORE INTO loading_application (app_name) VALUES (?1)",
            [name],
        )?;
        self.lookup_app(name)?.ok_or_else(|| CddError::NoSuchApp {
            name: name.to_string(),
        })
    }
}
