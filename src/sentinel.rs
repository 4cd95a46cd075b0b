//! Korzeń kompozycji rdzenia.
//!
//! `Sentinel` jest jedynym właścicielem wszystkich map per gildia (stany
//! paniki, okna, blokady bramki) – każdy komponent dostaje swoje zależności
//! przez konstruktor, nic nie siedzi w statycznych globalach.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::antinuke::webhooks::WebhookGuard;
use crate::antinuke::{Antinuke, EventType};
use crate::clock::Clock;
use crate::config::SentinelSettings;
use crate::gateway::VerificationGateway;
use crate::guard::ActionGuard;
use crate::panic::{PanicLevel, PanicStateMachine};
use crate::platform::{Messageable, Platform, RoleMutable, WebhookOwner};
use crate::seclog::{SecurityEvent, SecurityLog};
use crate::store::{ConfigStore, GuildConfigs};

pub struct Sentinel {
    pub clock: Arc<dyn Clock>,
    pub configs: Arc<GuildConfigs>,
    pub log: Arc<SecurityLog>,
    pub panic: Arc<PanicStateMachine>,
    pub guard: Arc<ActionGuard>,
    pub antinuke: Arc<Antinuke>,
    pub webhooks: Arc<WebhookGuard>,
    pub gateway: Arc<VerificationGateway>,
    pub messenger: Arc<dyn Messageable>,
}

/// Podgląd stanu zagrożenia gildii (endpoint statusu, komendy admina).
#[derive(Debug, Clone, Serialize)]
pub struct GuildStatus {
    pub guild_id: u64,
    pub panic_level: PanicLevel,
    pub panic_until: Option<DateTime<Utc>>,
    pub gateway_locked_until: Option<DateTime<Utc>>,
    pub maintenance: bool,
    pub recent_events: Vec<SecurityEvent>,
}

impl Sentinel {
    pub fn new<P: Platform + 'static>(
        platform: Arc<P>,
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
        settings: &SentinelSettings,
    ) -> Arc<Self> {
        let messenger: Arc<dyn Messageable> = platform.clone();
        let roles: Arc<dyn RoleMutable> = platform.clone();
        let hooks: Arc<dyn WebhookOwner> = platform;

        let log = Arc::new(match settings.log_channel_id {
            Some(channel_id) => SecurityLog::with_channel(messenger.clone(), channel_id),
            None => SecurityLog::new(),
        });
        let configs = Arc::new(GuildConfigs::new(store, settings.config_cache_ttl()));
        let panic = Arc::new(PanicStateMachine::new(configs.clone(), clock.clone(), log.clone()));
        let guard = Arc::new(ActionGuard::new(panic.clone(), log.clone()));
        let antinuke = Arc::new(Antinuke::new(
            configs.clone(),
            panic.clone(),
            clock.clone(),
            log.clone(),
        ));
        let webhooks = Arc::new(WebhookGuard::new(
            configs.clone(),
            panic.clone(),
            guard.clone(),
            hooks,
            clock.clone(),
            log.clone(),
        ));
        let gateway = Arc::new(VerificationGateway::new(
            configs.clone(),
            panic.clone(),
            guard.clone(),
            roles,
            clock.clone(),
            log.clone(),
        ));

        Arc::new(Self {
            clock,
            configs,
            log,
            panic,
            guard,
            antinuke,
            webhooks,
            gateway,
            messenger,
        })
    }

    /// Gildia dostępna (start / powrót): odtwórz panikę, zasiej bazę webhooków.
    pub async fn warmup(&self, guild_id: u64) {
        self.panic.warmup(guild_id).await;
        self.webhooks.warmup(guild_id).await;
        tracing::debug!(guild_id, "sentinel warmed up");
    }

    /// Usuń okna bez aktywności od `idle`; zwraca liczbę usuniętych kluczy.
    pub fn evict_idle(&self, idle: TimeDelta) -> usize {
        self.antinuke.evict_idle(idle)
            + self.webhooks.evict_idle(idle)
            + self.gateway.evict_idle(idle)
            + self.configs.evict_unused_locks()
    }

    /// Okresowe sprzątanie; task kończy się sam, gdy `Sentinel` zniknie.
    pub fn spawn_sweep(this: &Arc<Self>, every: Duration, idle: TimeDelta) -> JoinHandle<()> {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(strong) = weak.upgrade() else {
                    break;
                };
                let evicted = strong.evict_idle(idle);
                if evicted > 0 {
                    tracing::debug!(evicted, "idle windows evicted");
                }
            }
        })
    }

    pub async fn status(&self, guild_id: u64) -> GuildStatus {
        let panic = self.panic.state(guild_id);
        GuildStatus {
            guild_id,
            panic_level: panic.as_ref().map(|s| s.level).unwrap_or(PanicLevel::None),
            panic_until: panic.map(|s| s.expires_at),
            gateway_locked_until: self.gateway.is_locked(guild_id).await,
            maintenance: self.antinuke.in_maintenance(guild_id),
            recent_events: self.log.recent(guild_id),
        }
    }

    /// Liczba zdarzeń typu `kind` w bieżącym oknie gildii.
    pub async fn spike_count(&self, guild_id: u64, kind: EventType) -> usize {
        let cfg = self.configs.get_or_default(guild_id).await;
        let window = TimeDelta::seconds(i64::from(cfg.security.spike.window_secs.max(1)));
        self.antinuke.current_count(guild_id, kind, window)
    }
}
