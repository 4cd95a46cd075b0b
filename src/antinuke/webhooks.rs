//! Webhook abuse guard.
//!
//! The platform only tells us "webhooks changed somewhere in this guild", so
//! every notification triggers a reconciliation pass: fetch the current set,
//! diff it against what we already know, and count the genuinely new ids in a
//! per-guild window. A burst over the threshold deletes every webhook created
//! inside the window and escalates panic.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::guard::{ActionGuard, actions};
use crate::panic::{PanicLevel, PanicStateMachine};
use crate::guild_config::GuildConfig;
use crate::platform::{WebhookInfo, WebhookOwner, snowflake_created_at};
use crate::seclog::{SecurityEvent, SecurityLog};
use crate::store::GuildConfigs;
use crate::window::SlidingWindowCounter;

const MAX_WEBHOOK_WINDOW_SECS: i64 = 600;
const AUDIT_REASON: &str = "Tigris antinuke: webhook burst";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownWebhook {
    pub id: u64,
    pub observed_at: DateTime<Utc>,
    /// Present before we started watching; never counted as new.
    pub baseline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookVerdict {
    /// ActionGuard denied `WEBHOOK_CREATE`; pass skipped.
    Skipped,
    /// Could not list webhooks.
    FetchFailed,
    /// First pass for the guild; existing webhooks became the baseline.
    Seeded { known: usize },
    Reconciled { new: usize, count: usize },
    Remediated { deleted: Vec<u64>, failed: Vec<u64> },
}

pub struct WebhookGuard {
    clock: Arc<dyn Clock>,
    configs: Arc<GuildConfigs>,
    panic: Arc<PanicStateMachine>,
    guard: Arc<ActionGuard>,
    webhooks: Arc<dyn WebhookOwner>,
    log: Arc<SecurityLog>,
    known: DashMap<u64, Vec<KnownWebhook>>,
    creations: SlidingWindowCounter<u64>,
    passes: DashMap<u64, Arc<Mutex<()>>>,
}

impl WebhookGuard {
    pub fn new(
        configs: Arc<GuildConfigs>,
        panic: Arc<PanicStateMachine>,
        guard: Arc<ActionGuard>,
        webhooks: Arc<dyn WebhookOwner>,
        clock: Arc<dyn Clock>,
        log: Arc<SecurityLog>,
    ) -> Self {
        Self {
            creations: SlidingWindowCounter::new(
                TimeDelta::seconds(MAX_WEBHOOK_WINDOW_SECS),
                clock.clone(),
            ),
            clock,
            configs,
            panic,
            guard,
            webhooks,
            log,
            known: DashMap::new(),
            passes: DashMap::new(),
        }
    }

    /// Seed the baseline from the platform (guild became available).
    pub async fn warmup(&self, guild_id: u64) {
        match self.webhooks.list_webhooks(guild_id).await {
            Ok(current) => {
                let now = self.clock.now();
                self.seed(guild_id, &current, now);
            }
            Err(e) => tracing::warn!(error = ?e, guild_id, "webhook baseline not loaded"),
        }
    }

    fn seed(&self, guild_id: u64, current: &[WebhookInfo], now: DateTime<Utc>) -> usize {
        let list: Vec<KnownWebhook> = current
            .iter()
            .map(|w| KnownWebhook {
                id: w.id,
                observed_at: now,
                baseline: true,
            })
            .collect();
        let n = list.len();
        self.known.insert(guild_id, list);
        tracing::debug!(guild_id, known = n, "webhook baseline seeded");
        n
    }

    /// Seeding from a notification (warmup missed or failed): webhooks whose
    /// snowflake falls inside the window may be the very ones that triggered
    /// it, so they are not trusted as baseline. Returns their ids.
    fn seed_cold(
        &self,
        guild_id: u64,
        current: &[WebhookInfo],
        now: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> Vec<u64> {
        let list: Vec<KnownWebhook> = current
            .iter()
            .map(|w| KnownWebhook {
                id: w.id,
                observed_at: now,
                baseline: snowflake_created_at(w.id) < since,
            })
            .collect();
        let fresh: Vec<u64> = list.iter().filter(|k| !k.baseline).map(|k| k.id).collect();
        tracing::debug!(guild_id, known = list.len(), fresh = fresh.len(), "webhook baseline seeded on notification");
        self.known.insert(guild_id, list);
        fresh
    }

    /// Coarse "webhooks changed" notification for a guild.
    pub async fn on_webhooks_update(&self, guild_id: u64) -> WebhookVerdict {
        if !self.guard.assert_allowed(guild_id, actions::WEBHOOK_CREATE) {
            tracing::debug!(guild_id, "webhook reconciliation skipped by action guard");
            return WebhookVerdict::Skipped;
        }

        // two notifications in a row must not both see the same ids as new
        let pass = self
            .passes
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _pass = pass.lock().await;

        let current = match self.webhooks.list_webhooks(guild_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, guild_id, "webhook list failed");
                return WebhookVerdict::FetchFailed;
            }
        };
        let now = self.clock.now();

        let cfg = self.configs.get_or_default(guild_id).await;
        let threshold = cfg.security.webhooks.threshold.max(1) as usize;
        let window = TimeDelta::seconds(
            i64::from(cfg.security.webhooks.window_secs.max(1)).min(MAX_WEBHOOK_WINDOW_SECS),
        );

        let Some(new_ids) = self.diff_known(guild_id, &current, now) else {
            let fresh = self.seed_cold(guild_id, &current, now, now - window);
            if fresh.is_empty() {
                return WebhookVerdict::Seeded { known: current.len() };
            }
            return self.tally(guild_id, fresh, threshold, window, &cfg).await;
        };
        self.tally(guild_id, new_ids, threshold, window, &cfg).await
    }

    /// Forget vanished webhooks, remember the new ones. `None` = no baseline yet.
    fn diff_known(&self, guild_id: u64, current: &[WebhookInfo], now: DateTime<Utc>) -> Option<Vec<u64>> {
        let mut known = self.known.get_mut(&guild_id)?;
        known.retain(|k| current.iter().any(|w| w.id == k.id));
        let new_ids: Vec<u64> = current
            .iter()
            .filter(|w| !known.iter().any(|k| k.id == w.id))
            .map(|w| w.id)
            .collect();
        known.extend(new_ids.iter().map(|&id| KnownWebhook {
            id,
            observed_at: now,
            baseline: false,
        }));
        Some(new_ids)
    }

    /// Count new ids in the creation window; remediate over the threshold.
    async fn tally(
        &self,
        guild_id: u64,
        new_ids: Vec<u64>,
        threshold: usize,
        window: TimeDelta,
        cfg: &GuildConfig,
    ) -> WebhookVerdict {
        let now = self.clock.now();
        for id in &new_ids {
            tracing::info!(guild_id, webhook_id = id, "new webhook observed");
            self.creations.record(guild_id);
        }
        let count = self.creations.count(&guild_id, window);

        if new_ids.is_empty() || count <= threshold {
            return WebhookVerdict::Reconciled {
                new: new_ids.len(),
                count,
            };
        }

        tracing::warn!(guild_id, count, threshold, "webhook burst detected");
        let (deleted, failed) = self.remediate(guild_id, now - window).await;
        self.log.emit(SecurityEvent::WebhookRemediation {
            guild_id,
            new_webhooks: count,
            deleted: deleted.clone(),
            failed: failed.clone(),
        });
        self.panic
            .escalate(guild_id, PanicLevel::Medium, cfg.security.panic_minutes)
            .await;
        WebhookVerdict::Remediated { deleted, failed }
    }

    /// Delete every non-baseline webhook observed since `since`.
    async fn remediate(&self, guild_id: u64, since: DateTime<Utc>) -> (Vec<u64>, Vec<u64>) {
        let targets: Vec<u64> = self
            .known
            .get(&guild_id)
            .map(|known| {
                known
                    .iter()
                    .filter(|k| !k.baseline && k.observed_at >= since)
                    .map(|k| k.id)
                    .collect()
            })
            .unwrap_or_default();

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for id in targets {
            match self.webhooks.delete_webhook(id, AUDIT_REASON).await {
                Ok(()) => deleted.push(id),
                Err(e) => {
                    tracing::warn!(error = ?e, guild_id, webhook_id = id, "webhook delete failed");
                    failed.push(id);
                }
            }
        }

        if let Some(mut known) = self.known.get_mut(&guild_id) {
            known.retain(|k| !deleted.contains(&k.id));
        }
        (deleted, failed)
    }

    pub fn known(&self, guild_id: u64) -> Vec<KnownWebhook> {
        self.known
            .get(&guild_id)
            .map(|k| k.clone())
            .unwrap_or_default()
    }

    /// Drop idle creation windows, unused pass mutexes and baselines of quiet
    /// guilds. An evicted baseline is re-seeded from the next notification.
    pub fn evict_idle(&self, idle: TimeDelta) -> usize {
        let evicted = self.creations.evict_idle(idle);
        let cutoff = self.clock.now() - idle;
        self.passes.retain(|_, pass| Arc::strong_count(pass) > 1);
        let before = self.known.len();
        self.known.retain(|guild_id, known| {
            self.passes.contains_key(guild_id)
                || self.creations.current(guild_id) > 0
                || known.iter().any(|k| k.observed_at >= cutoff)
        });
        evicted + before.saturating_sub(self.known.len())
    }
}
