use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::TimeDelta;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::guild_config::SpikeThresholds;
use crate::panic::{PanicLevel, PanicStateMachine};
use crate::seclog::{SecurityEvent, SecurityLog};
use crate::store::GuildConfigs;
use crate::window::SlidingWindowCounter;

pub mod webhooks;

/// Upper bound for per-guild spike windows; configured windows are clamped to it.
const MAX_SPIKE_WINDOW_SECS: i64 = 300;

/// Types of destructive actions monitored by the antinuke service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ChannelDelete,
    RoleDelete,
    RolePermissionUpdate,
    Ban,
}

impl EventType {
    /// Threshold for this event type in the guild's configuration.
    pub fn threshold(self, t: &SpikeThresholds) -> u32 {
        match self {
            Self::ChannelDelete => t.channel_delete,
            Self::RoleDelete => t.role_delete,
            Self::RolePermissionUpdate => t.role_permission_update,
            Self::Ban => t.ban,
        }
    }
}

/// Result of feeding one event into the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpikeVerdict {
    /// Counted, below threshold (or breach already handled).
    Counted { count: usize },
    /// Threshold reached: panic escalated.
    Escalated { count: usize },
    /// Threshold reached during maintenance: no escalation.
    Suppressed { count: usize },
    /// Not counted at all (no-op permission update).
    Ignored,
}

/// Antinuke service responsible for tracking destructive events and escalating
/// the guild's panic level when configured thresholds are reached.
pub struct Antinuke {
    clock: Arc<dyn Clock>,
    configs: Arc<GuildConfigs>,
    panic: Arc<PanicStateMachine>,
    log: Arc<SecurityLog>,
    events: SlidingWindowCounter<(u64, EventType)>,
    breached: DashMap<(u64, EventType), ()>,
    maintenance: Mutex<HashSet<u64>>,
}

impl Antinuke {
    pub fn new(
        configs: Arc<GuildConfigs>,
        panic: Arc<PanicStateMachine>,
        clock: Arc<dyn Clock>,
        log: Arc<SecurityLog>,
    ) -> Self {
        Self {
            events: SlidingWindowCounter::new(
                TimeDelta::seconds(MAX_SPIKE_WINDOW_SECS),
                clock.clone(),
            ),
            clock,
            configs,
            panic,
            log,
            breached: DashMap::new(),
            maintenance: Mutex::new(HashSet::new()),
        }
    }

    /// Record destructive action and escalate if threshold reached.
    ///
    /// A breach escalates once and stays latched while the count is at or over
    /// the threshold. The latch re-arms when the count drops back below the
    /// threshold, or when the panic it raised is gone (expired, disabled) while
    /// the breach keeps going.
    pub async fn notify(&self, guild_id: u64, kind: EventType) -> SpikeVerdict {
        let cfg = self.configs.get_or_default(guild_id).await;
        let thresholds = &cfg.security.spike;
        let threshold = kind.threshold(thresholds).max(1);
        let window_secs = i64::from(thresholds.window_secs.max(1)).min(MAX_SPIKE_WINDOW_SECS);

        let key = (guild_id, kind);
        self.events.record(key);
        let count = self.events.count(&key, TimeDelta::seconds(window_secs));

        if count < threshold as usize {
            self.breached.remove(&key);
            tracing::debug!(guild_id, ?kind, count, threshold, "antinuke event counted");
            return SpikeVerdict::Counted { count };
        }
        let suppressed = self.in_maintenance(guild_id);
        let latched = self.breached.insert(key, ()).is_some();
        if latched && (suppressed || self.panic.get_level(guild_id) >= PanicLevel::Medium) {
            return SpikeVerdict::Counted { count };
        }

        tracing::warn!(guild_id, ?kind, count, threshold, suppressed, "antinuke spike detected");
        self.log.emit(SecurityEvent::SpikeDetected {
            guild_id,
            kind,
            count,
            threshold,
            suppressed,
        });
        if suppressed {
            return SpikeVerdict::Suppressed { count };
        }

        self.panic
            .escalate(guild_id, PanicLevel::Medium, cfg.security.panic_minutes)
            .await;
        SpikeVerdict::Escalated { count }
    }

    pub async fn notify_channel_delete(&self, guild_id: u64) -> SpikeVerdict {
        self.notify(guild_id, EventType::ChannelDelete).await
    }

    pub async fn notify_role_delete(&self, guild_id: u64) -> SpikeVerdict {
        self.notify(guild_id, EventType::RoleDelete).await
    }

    pub async fn notify_ban(&self, guild_id: u64) -> SpikeVerdict {
        self.notify(guild_id, EventType::Ban).await
    }

    /// Role update: counted only when the permission bitfield actually changed.
    /// Unknown previous permissions (cache miss) are not counted.
    pub async fn notify_role_update(
        &self,
        guild_id: u64,
        old_permissions: Option<u64>,
        new_permissions: u64,
    ) -> SpikeVerdict {
        match old_permissions {
            Some(old) if old != new_permissions => {
                self.notify(guild_id, EventType::RolePermissionUpdate).await
            }
            _ => SpikeVerdict::Ignored,
        }
    }

    /// Events in the guild's current window for `kind`.
    pub fn current_count(&self, guild_id: u64, kind: EventType, window: TimeDelta) -> usize {
        self.events.count(&(guild_id, kind), window)
    }

    /* ---------- maintenance ---------- */

    /// Planned restructuring: events are still counted, breaches do not escalate.
    pub fn start_maintenance(&self, guild_id: u64) {
        tracing::info!(guild_id, at = %self.clock.now(), "antinuke maintenance started");
        self.maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(guild_id);
    }

    pub fn stop_maintenance(&self, guild_id: u64) {
        tracing::info!(guild_id, at = %self.clock.now(), "antinuke maintenance stopped");
        self.maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&guild_id);
    }

    pub fn in_maintenance(&self, guild_id: u64) -> bool {
        self.maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&guild_id)
    }

    /// Drop windows of keys without activity for `idle`.
    pub fn evict_idle(&self, idle: TimeDelta) -> usize {
        let evicted = self.events.evict_idle(idle);
        self.breached
            .retain(|key, _| self.events.current(key) > 0);
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryConfigStore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryConfigStore>,
        panic: Arc<PanicStateMachine>,
        an: Antinuke,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryConfigStore::new());
        let configs = Arc::new(GuildConfigs::new(store.clone(), Duration::from_secs(30)));
        let log = Arc::new(SecurityLog::new());
        let panic = Arc::new(PanicStateMachine::new(configs.clone(), clock.clone(), log.clone()));
        let an = Antinuke::new(configs, panic.clone(), clock.clone(), log);
        Fixture { clock, store, panic, an }
    }

    #[tokio::test]
    async fn notify_threshold() {
        let f = fixture();
        for i in 1..5 {
            assert_eq!(
                f.an.notify_channel_delete(1).await,
                SpikeVerdict::Counted { count: i }
            );
        }
        assert_eq!(f.an.notify_channel_delete(1).await, SpikeVerdict::Escalated { count: 5 });
        assert_eq!(f.panic.get_level(1), PanicLevel::Medium);
    }

    #[tokio::test]
    async fn breach_escalates_once_then_rearms() {
        let f = fixture();
        for _ in 0..5 {
            f.an.notify_role_delete(1).await;
        }
        assert_eq!(f.an.notify_role_delete(1).await, SpikeVerdict::Counted { count: 6 });

        f.clock.advance(TimeDelta::seconds(11));
        assert_eq!(f.an.notify_role_delete(1).await, SpikeVerdict::Counted { count: 1 });
        for _ in 0..3 {
            f.an.notify_role_delete(1).await;
        }
        assert_eq!(f.an.notify_role_delete(1).await, SpikeVerdict::Escalated { count: 5 });
    }

    #[tokio::test]
    async fn slow_deletions_never_escalate() {
        let f = fixture();
        for _ in 0..20 {
            f.an.notify_channel_delete(1).await;
            f.clock.advance(TimeDelta::seconds(3));
        }
        assert_eq!(f.panic.get_level(1), PanicLevel::None);
    }

    #[tokio::test]
    async fn noop_permission_updates_are_ignored() {
        let f = fixture();
        for _ in 0..10 {
            assert_eq!(f.an.notify_role_update(1, Some(8), 8).await, SpikeVerdict::Ignored);
            assert_eq!(f.an.notify_role_update(1, None, 8).await, SpikeVerdict::Ignored);
        }
        for i in 1..6 {
            assert_eq!(
                f.an.notify_role_update(1, Some(0), 8).await,
                SpikeVerdict::Counted { count: i }
            );
        }
        assert_eq!(
            f.an.notify_role_update(1, Some(0), 8).await,
            SpikeVerdict::Escalated { count: 6 }
        );
    }

    #[tokio::test]
    async fn guild_override_threshold() {
        let f = fixture();
        f.store.seed(
            42,
            json!({ "security": { "spike": { "ban": 1 }, "panic_minutes": 30 } }),
        );
        assert_eq!(f.an.notify_ban(42).await, SpikeVerdict::Escalated { count: 1 });
        let state = f.panic.state(42).unwrap();
        assert_eq!(state.expires_at - state.activated_at, TimeDelta::minutes(30));
    }

    #[tokio::test]
    async fn maintenance_suppresses_escalation() {
        let f = fixture();
        f.an.start_maintenance(1);
        for _ in 0..4 {
            f.an.notify_channel_delete(1).await;
        }
        assert_eq!(f.an.notify_channel_delete(1).await, SpikeVerdict::Suppressed { count: 5 });
        assert_eq!(f.panic.get_level(1), PanicLevel::None);

        f.an.stop_maintenance(1);
        f.clock.advance(TimeDelta::seconds(11));
        for _ in 0..4 {
            f.an.notify_channel_delete(1).await;
        }
        assert_eq!(f.an.notify_channel_delete(1).await, SpikeVerdict::Escalated { count: 5 });
    }

    #[tokio::test]
    async fn single_event_threshold_rearms_once_panic_is_gone() {
        let f = fixture();
        f.store.seed(7, json!({ "security": { "spike": { "ban": 1 } } }));
        assert_eq!(f.an.notify_ban(7).await, SpikeVerdict::Escalated { count: 1 });

        f.panic.disable_panic(7).await;
        f.clock.advance(TimeDelta::seconds(60));
        assert_eq!(f.an.notify_ban(7).await, SpikeVerdict::Escalated { count: 1 });
        assert_eq!(f.panic.get_level(7), PanicLevel::Medium);
    }

    #[tokio::test]
    async fn sustained_breach_outlives_panic_expiry() {
        let f = fixture();
        f.store.seed(
            3,
            json!({ "security": { "spike": { "channel_delete": 3, "window_secs": 10 }, "panic_minutes": 15 } }),
        );
        let mut escalations = 0;
        // jedno usunięcie co 2 s przez 20 minut: licznik stale >= progu
        for _ in 0..600 {
            if matches!(f.an.notify_channel_delete(3).await, SpikeVerdict::Escalated { .. }) {
                escalations += 1;
            }
            f.clock.advance(TimeDelta::seconds(2));
        }
        assert_eq!(escalations, 2);
        assert_eq!(f.panic.get_level(3), PanicLevel::Medium);
    }
}
