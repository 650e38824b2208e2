//! Persisted remote cursor (watermark)
//!
//! The remote watcher resumes incremental polling from a small set of
//! string values kept in the store's key/value config table. This module
//! owns the key names, the string encoding, and the typed view of those
//! values; the watcher performs the actual store reads and writes so the
//! domain stays I/O free.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Config key: server sync date (epoch milliseconds) of the last poll.
pub const KEY_LAST_SYNC_DATE: &str = "remote_last_sync_date";
/// Config key: upper bound of the remote event log consumed so far.
pub const KEY_LAST_EVENT_LOG_ID: &str = "remote_last_event_log_id";
/// Config key: last known set of synchronized root definitions.
pub const KEY_LAST_ROOT_DEFINITIONS: &str = "remote_last_root_definitions";
/// Config key: RFC 3339 timestamp of the last completed remote full scan.
pub const KEY_LAST_FULL_SCAN: &str = "remote_last_full_scan";
/// Config key: RFC 3339 timestamp of the last completed local full scan.
pub const KEY_LOCAL_LAST_FULL_SCAN: &str = "local_last_full_scan";

/// Typed view of the persisted remote change-log cursor.
///
/// A missing `last_full_scan` is the "never scanned" signal that makes the
/// remote watcher start with a full tree walk instead of an incremental
/// poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCursor {
    /// Server-side sync date in epoch milliseconds; never decreases.
    pub sync_date: Option<i64>,
    /// Last consumed event-log id, when the server exposes one.
    pub event_log_id: Option<i64>,
    /// Opaque server encoding of the active synchronization roots.
    pub root_definitions: Option<String>,
    /// Completion time of the last remote full scan.
    pub last_full_scan: Option<DateTime<Utc>>,
}

impl RemoteCursor {
    /// Rebuilds the cursor from raw config values, one per key constant.
    ///
    /// Unparseable values are treated as absent rather than failing the
    /// watcher startup; the consequence is a full rescan, which is the
    /// safe recovery.
    #[must_use]
    pub fn from_config(
        sync_date: Option<String>,
        event_log_id: Option<String>,
        root_definitions: Option<String>,
        last_full_scan: Option<String>,
    ) -> Self {
        Self {
            sync_date: sync_date.and_then(|v| v.parse().ok()),
            event_log_id: event_log_id.and_then(|v| v.parse().ok()),
            root_definitions,
            last_full_scan: last_full_scan
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    /// The `(key, value)` entries to persist, in a fixed order.
    ///
    /// `None` values are included so callers can clear stale keys.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, Option<String>); 4] {
        [
            (KEY_LAST_SYNC_DATE, self.sync_date.map(|v| v.to_string())),
            (
                KEY_LAST_EVENT_LOG_ID,
                self.event_log_id.map(|v| v.to_string()),
            ),
            (KEY_LAST_ROOT_DEFINITIONS, self.root_definitions.clone()),
            (
                KEY_LAST_FULL_SCAN,
                self.last_full_scan.map(|dt| dt.to_rfc3339()),
            ),
        ]
    }
}
