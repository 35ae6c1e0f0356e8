//! Access audit logging.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Audit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Access allowed.
    Allowed,
    /// Access denied.
    Denied,
}

impl AuditOutcome {
    /// Maps a decision flag to an outcome.
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

impl std::str::FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allowed" | "allow" => Ok(Self::Allowed),
            "denied" | "deny" => Ok(Self::Denied),
            other => Err(format!("unknown audit result: {}", other)),
        }
    }
}

/// One recorded access decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Entry ID.
    pub id: String,
    /// Timestamp.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// User ID.
    pub user_id: String,
    /// User display name.
    pub user_name: String,
    /// Action attempted.
    pub action: String,
    /// Resource type.
    pub resource: String,
    /// Resource instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Outcome.
    pub result: AuditOutcome,
    /// Decision reason.
    pub reason: String,
}

impl AuditLogEntry {
    /// Creates an entry stamped now.
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: AuditOutcome,
        reason: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_name: user_id.clone(),
            user_id,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            result,
            reason: reason.into(),
        }
    }

    /// Sets the user display name.
    #[must_use]
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    /// Sets the resource instance.
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: Option<String>) -> Self {
        self.resource_id = resource_id;
        self
    }
}

/// Audit query for searching entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditQuery {
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Filter by resource type.
    pub resource: Option<String>,
    /// Filter by action.
    pub action: Option<String>,
    /// Filter by outcome.
    pub result: Option<AuditOutcome>,
    /// Inclusive lower time bound.
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper time bound.
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub end_date: Option<DateTime<Utc>>,
    /// Limit results.
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Creates a new query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by user.
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Filters by resource.
    #[must_use]
    pub fn on_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Filters by action.
    #[must_use]
    pub fn for_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Filters by outcome.
    #[must_use]
    pub fn with_result(mut self, result: AuditOutcome) -> Self {
        self.result = Some(result);
        self
    }

    /// Filters by time range.
    #[must_use]
    pub fn in_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Matches an entry against this query.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(ref user_id) = self.user_id {
            if &entry.user_id != user_id {
                return false;
            }
        }

        if let Some(ref resource) = self.resource {
            if &entry.resource != resource {
                return false;
            }
        }

        if let Some(ref action) = self.action {
            if &entry.action != action {
                return false;
            }
        }

        if let Some(result) = self.result {
            if entry.result != result {
                return false;
            }
        }

        if let Some(start) = self.start_date {
            if entry.timestamp < start {
                return false;
            }
        }

        if let Some(end) = self.end_date {
            if entry.timestamp > end {
                return false;
            }
        }

        true
    }
}

/// Bounded in-memory audit log, oldest entries dropped first.
pub struct AuditLog {
    entries: RwLock<VecDeque<AuditLogEntry>>,
    capacity: usize,
    dirty: AtomicBool,
}

impl AuditLog {
    /// Creates a log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dirty: AtomicBool::new(false),
        }
    }

    /// Appends an entry and emits it as a tracing event.
    pub fn append(&self, entry: AuditLogEntry) {
        match entry.result {
            AuditOutcome::Allowed => {
                tracing::info!(
                    user_id = %entry.user_id,
                    action = %entry.action,
                    resource = %entry.resource,
                    resource_id = ?entry.resource_id,
                    decision = "allowed",
                    reason = %entry.reason,
                    "Access audit"
                );
            }
            AuditOutcome::Denied => {
                tracing::warn!(
                    user_id = %entry.user_id,
                    action = %entry.action,
                    resource = %entry.resource,
                    resource_id = ?entry.resource_id,
                    decision = "denied",
                    reason = %entry.reason,
                    "Access audit"
                );
            }
        }

        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns matching entries, newest first.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditLogEntry> {
        let limit = query.limit.unwrap_or(usize::MAX);
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the retention bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns all entries, oldest first.
    pub fn snapshot(&self) -> Vec<AuditLogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Replaces the contents with previously persisted entries.
    pub fn restore(&self, mut loaded: Vec<AuditLogEntry>) {
        loaded.sort_by_key(|e| e.timestamp);
        let skip = loaded.len().saturating_sub(self.capacity);

        let mut entries = self.entries.write();
        entries.clear();
        entries.extend(loaded.into_iter().skip(skip));
        self.dirty.store(false, Ordering::Release);
    }

    /// Returns a snapshot if anything changed since the last call.
    pub fn take_dirty(&self) -> Option<Vec<AuditLogEntry>> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// Marks the log as needing a flush.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(user: &str, result: AuditOutcome) -> AuditLogEntry {
        AuditLogEntry::new(user, "read", "conversation", result, "test")
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!("denied".parse::<AuditOutcome>().unwrap(), AuditOutcome::Denied);
        assert_eq!("Allowed".parse::<AuditOutcome>().unwrap(), AuditOutcome::Allowed);
        assert!("maybe".parse::<AuditOutcome>().is_err());
    }

    #[test]
    fn test_bounded_log_drops_oldest() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.append(entry(&format!("u{}", i), AuditOutcome::Allowed));
        }

        assert_eq!(log.len(), 3);
        let users: Vec<_> = log.snapshot().into_iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec!["u2", "u3", "u4"]);
    }

    #[test]
    fn test_query_filters_newest_first() {
        let log = AuditLog::new(100);
        log.append(entry("u1", AuditOutcome::Denied));
        log.append(entry("u2", AuditOutcome::Denied));
        log.append(entry("u1", AuditOutcome::Allowed));
        log.append(entry("u1", AuditOutcome::Denied).with_resource_id(Some("c-2".into())));

        let denials = log.query(&AuditQuery::new().for_user("u1").with_result(AuditOutcome::Denied));
        assert_eq!(denials.len(), 2);
        assert_eq!(denials[0].resource_id.as_deref(), Some("c-2"));

        let limited = log.query(&AuditQuery::new().limit(1));
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].user_id, "u1");
    }

    #[test]
    fn test_query_time_range() {
        let log = AuditLog::new(10);
        log.append(entry("u1", AuditOutcome::Allowed));
        let now = Utc::now();

        let past = AuditQuery::new().in_time_range(now - Duration::hours(2), now - Duration::hours(1));
        assert!(log.query(&past).is_empty());

        let around = AuditQuery::new().in_time_range(now - Duration::hours(1), now + Duration::hours(1));
        assert_eq!(log.query(&around).len(), 1);
    }

    #[test]
    fn test_dirty_tracking() {
        let log = AuditLog::new(10);
        assert!(log.take_dirty().is_none());

        log.append(entry("u1", AuditOutcome::Allowed));
        assert_eq!(log.take_dirty().map(|v| v.len()), Some(1));
        assert!(log.take_dirty().is_none());
    }

    #[test]
    fn test_restore_keeps_newest() {
        let log = AuditLog::new(2);
        let mut loaded = Vec::new();
        for i in 0..4 {
            let mut e = entry(&format!("u{}", i), AuditOutcome::Allowed);
            e.timestamp = Utc::now() + Duration::seconds(i);
            loaded.push(e);
        }
        log.restore(loaded);

        let users: Vec<_> = log.snapshot().into_iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec!["u2", "u3"]);
        assert!(log.take_dirty().is_none());
    }

    #[test]
    fn test_entry_wire_format() {
        let e = entry("u1", AuditOutcome::Denied);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["userName"], "u1");
        assert_eq!(json["result"], "denied");
        assert!(json["timestamp"].is_i64());
        assert!(json.get("resourceId").is_none());
    }
}
