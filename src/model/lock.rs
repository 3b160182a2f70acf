//! The process-lock row: one per running application identity.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::keys::AppKey;

/// One row of the lock table. Presence of a fresh row blocks acquisition by
/// other processes; absence or staleness permits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessLock {
    pub app: AppKey,
    pub pid: u32,
    pub host: String,
    pub heartbeat: DateTime<Utc>,
    pub status: String,
}

impl ProcessLock {
    #[must_use]
    pub fn new(app: AppKey, pid: u32, host: impl Into<String>, heartbeat: DateTime<Utc>) -> Self {
        Self {
            app,
            pid,
            host: host.into(),
            heartbeat,
            status: "Starting".to_string(),
        }
    }

    /// A lock whose heartbeat is older than the staleness threshold belongs
    /// to a crashed holder and may be stolen.
    #[must_use]
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.heartbeat);
        age.num_milliseconds() > i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX)
    }

    /// Same holder: pid and hostname both match (hostname compared
    /// case-insensitively, as reported names vary in case across resolvers).
    #[must_use]
    pub fn same_holder(&self, pid: u32, host: &str) -> bool {
        self.pid == pid && self.host.eq_ignore_ascii_case(host)
    }
}

impl fmt::Display for ProcessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "app={} pid={} host={} heartbeat={} status={}",
            self.app,
            self.pid,
            self.host,
            self.heartbeat.to_rfc3339(),
            self.status
        )
    }
}
