//! Freshness-gated sync cache.
//!
//! Tracks only when each scope was last synced successfully; the store stays
//! the source of truth for content.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default freshness window for both scope classes
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// What a sync covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncScope {
    /// The conversation list
    Conversations,
    /// Messages of one conversation
    Messages(String),
}

impl SyncScope {
    pub fn messages(conversation_id: impl Into<String>) -> Self {
        Self::Messages(conversation_id.into())
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncScope::Conversations => f.write_str("conversations"),
            SyncScope::Messages(id) => write!(f, "messages:{}", id),
        }
    }
}

/// Decides whether a network refresh is required for a scope
#[derive(Debug, Clone)]
pub struct FreshnessCache {
    conversations_ttl: Duration,
    messages_ttl: Duration,
    last_synced: HashMap<SyncScope, DateTime<Utc>>,
}

impl Default for FreshnessCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_TTL)
    }
}

impl FreshnessCache {
    pub fn new(conversations_ttl: Duration, messages_ttl: Duration) -> Self {
        Self {
            conversations_ttl,
            messages_ttl,
            last_synced: HashMap::new(),
        }
    }

    /// Freshness window for a scope
    pub fn ttl(&self, scope: &SyncScope) -> Duration {
        match scope {
            SyncScope::Conversations => self.conversations_ttl,
            SyncScope::Messages(_) => self.messages_ttl,
        }
    }

    /// Whether `scope` must be fetched from the network at `now`
    pub fn should_sync(&self, scope: &SyncScope, force_refresh: bool, now: DateTime<Utc>) -> bool {
        if force_refresh {
            return true;
        }
        let Some(last) = self.last_synced.get(scope) else {
            return true;
        };
        match (now - *last).to_std() {
            Ok(elapsed) => elapsed >= self.ttl(scope),
            // Clock moved backwards; keep the cached data.
            Err(_) => false,
        }
    }

    /// Record a successful sync. Call only after the fetch completed without error.
    pub fn mark_synced(&mut self, scope: SyncScope, now: DateTime<Utc>) {
        tracing::debug!("Marked {} synced at {}", scope, now);
        self.last_synced.insert(scope, now);
    }

    pub fn last_synced(&self, scope: &SyncScope) -> Option<DateTime<Utc>> {
        self.last_synced.get(scope).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_unsynced_scope_needs_sync() {
        let cache = FreshnessCache::default();
        assert!(cache.should_sync(&SyncScope::Conversations, false, t0()));
        assert!(cache.last_synced(&SyncScope::Conversations).is_none());
    }

    #[test]
    fn test_fresh_immediately_after_mark() {
        let mut cache = FreshnessCache::default();
        cache.mark_synced(SyncScope::Conversations, t0());
        assert!(!cache.should_sync(&SyncScope::Conversations, false, t0()));
        assert!(cache.should_sync(&SyncScope::Conversations, true, t0()));
    }

    #[test]
    fn test_messages_window_boundary() {
        let ttl = Duration::from_secs(300);
        let mut cache = FreshnessCache::new(ttl, ttl);
        let scope = SyncScope::messages("conv-1");
        assert_eq!(scope.to_string(), "messages:conv-1");

        assert!(cache.should_sync(&scope, false, t0()));
        cache.mark_synced(scope.clone(), t0());

        let ttl = chrono::Duration::from_std(ttl).unwrap();
        let just_before = t0() + ttl - chrono::Duration::seconds(1);
        assert!(!cache.should_sync(&scope, false, just_before));
        assert!(cache.should_sync(&scope, false, t0() + ttl));
        assert!(cache.should_sync(&scope, false, t0() + ttl + chrono::Duration::hours(2)));
    }

    #[test]
    fn test_scopes_are_independent() {
        let mut cache = FreshnessCache::new(Duration::from_secs(60), Duration::from_secs(10));
        cache.mark_synced(SyncScope::messages("a"), t0());

        assert!(cache.should_sync(&SyncScope::messages("b"), false, t0()));
        assert!(cache.should_sync(&SyncScope::Conversations, false, t0()));

        let later = t0() + chrono::Duration::seconds(10);
        assert!(cache.should_sync(&SyncScope::messages("a"), false, later));
    }

    #[test]
    fn test_clock_skew_keeps_cache() {
        let mut cache = FreshnessCache::default();
        cache.mark_synced(SyncScope::Conversations, t0());
        let earlier = t0() - chrono::Duration::minutes(30);
        assert!(!cache.should_sync(&SyncScope::Conversations, false, earlier));
    }
}
