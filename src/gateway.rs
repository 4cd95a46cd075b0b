//! Bramka weryfikacji (admission gateway).
//!
//! Jedno wejście: `process(guild, user)`. Kolejne kroki potoku, pierwszy
//! pasujący wygrywa: blokada bramki → już wprowadzony → obejście → wiek konta
//! → wiek dołączenia → limit na użytkownika → wykrywanie rajdu → role →
//! wynik zaufania → zapis.
//!
//! Stan blokady w pamięci jest autorytatywny; w konfiguracji trzymamy tylko
//! lustro (`modules.gateway_v4.slots`), adoptowane po restarcie.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::SentinelResult;
use crate::guard::{ActionGuard, actions};
use crate::guild_config::{GuildConfig, MemberScore, Risk, VerificationStats, patch};
use crate::panic::{PanicLevel, PanicStateMachine};
use crate::platform::{MemberInfo, RoleMutable};
use crate::seclog::{SecurityEvent, SecurityLog};
use crate::store::GuildConfigs;
use crate::window::SlidingWindowCounter;

const ATTEMPT_WINDOW_SECS: i64 = 60;
const NEW_ACCOUNT_DAYS: i64 = 7;
const AUDIT_REASON: &str = "Tigris gateway: verification";

/* ==============================
   Wyniki
   ============================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NotConfigured,
    MemberUnavailable,
    RoleGrantFailed,
    ActionBlocked,
    ConfigUnavailable,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::MemberUnavailable => "member_unavailable",
            Self::RoleGrantFailed => "role_grant_failed",
            Self::ActionBlocked => "action_blocked",
            Self::ConfigUnavailable => "config_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadyVerified,
    Bypassed,
    Success(TrustScore),
    BlockedAccountAge,
    BlockedJoinAge,
    BlockedRateLimit,
    GatewayLocked,
    Error(FailureReason),
}

impl Outcome {
    /// Kod do logów i zdarzeń bezpieczeństwa.
    pub fn code(&self) -> String {
        match self {
            Self::AlreadyVerified => "already_verified".into(),
            Self::Bypassed => "bypassed".into(),
            Self::Success(_) => "success".into(),
            Self::BlockedAccountAge => "blocked_account_age".into(),
            Self::BlockedJoinAge => "blocked_join_age".into(),
            Self::BlockedRateLimit => "blocked_rate_limit".into(),
            Self::GatewayLocked => "gateway_locked".into(),
            Self::Error(reason) => format!("error({})", reason.as_str()),
        }
    }

    /// Czy użytkownik ma (teraz albo już wcześniej) rolę zweryfikowanego.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::AlreadyVerified | Self::Bypassed | Self::Success(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/* ==============================
   Wynik zaufania
   ============================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustScore {
    pub score: u8,
    pub risk: Risk,
}

/// Heurystyka 0..=100: wiek konta, liczba prób w minucie, czas od dołączenia.
pub fn trust_score(account_age_days: i64, attempts: usize, latency: TimeDelta) -> TrustScore {
    let mut score: i64 = 0;
    score += match account_age_days {
        d if d >= 365 => 30,
        d if d >= 30 => 15,
        _ => 5,
    };
    score += match attempts {
        1 => 20,
        2..=3 => 10,
        _ => 0,
    };
    score += if latency < TimeDelta::minutes(5) { 10 } else { 5 };

    let score = score.clamp(0, 100) as u8;
    let risk = match score {
        70.. => Risk::Low,
        40..=69 => Risk::Medium,
        _ => Risk::High,
    };
    TrustScore { score, risk }
}

/* ==============================
   Blokada bramki
   ============================== */

enum LockSlot {
    Locked {
        until: DateTime<Utc>,
        generation: u64,
        timer: AbortHandle,
    },
    /// Zdjęta w tym procesie – lustro w konfiguracji już nie obowiązuje.
    Released,
}

pub struct VerificationGateway {
    clock: Arc<dyn Clock>,
    configs: Arc<GuildConfigs>,
    panic: Arc<PanicStateMachine>,
    guard: Arc<ActionGuard>,
    roles: Arc<dyn RoleMutable>,
    log: Arc<SecurityLog>,
    user_attempts: SlidingWindowCounter<(u64, u64)>,
    guild_attempts: SlidingWindowCounter<u64>,
    locks: DashMap<u64, LockSlot>,
    generation: AtomicU64,
}

impl VerificationGateway {
    pub fn new(
        configs: Arc<GuildConfigs>,
        panic: Arc<PanicStateMachine>,
        guard: Arc<ActionGuard>,
        roles: Arc<dyn RoleMutable>,
        clock: Arc<dyn Clock>,
        log: Arc<SecurityLog>,
    ) -> Self {
        Self {
            user_attempts: SlidingWindowCounter::new(
                TimeDelta::seconds(ATTEMPT_WINDOW_SECS),
                clock.clone(),
            ),
            guild_attempts: SlidingWindowCounter::new(
                TimeDelta::seconds(ATTEMPT_WINDOW_SECS),
                clock.clone(),
            ),
            clock,
            configs,
            panic,
            guard,
            roles,
            log,
            locks: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Pełny potok weryfikacji jednego użytkownika.
    pub async fn process(self: &Arc<Self>, guild_id: u64, user_id: u64) -> Outcome {
        let outcome = self.run(guild_id, user_id).await;
        match outcome {
            Outcome::Success(ts) => {
                tracing::info!(guild_id, user_id, score = ts.score, risk = ?ts.risk, "verification passed")
            }
            Outcome::Error(reason) => {
                tracing::warn!(guild_id, user_id, reason = reason.as_str(), "verification failed")
            }
            other => tracing::info!(guild_id, user_id, outcome = %other, "verification finished"),
        }
        self.log.emit(SecurityEvent::VerificationOutcome {
            guild_id,
            user_id,
            outcome: outcome.code(),
        });
        outcome
    }

    async fn run(self: &Arc<Self>, guild_id: u64, user_id: u64) -> Outcome {
        let cfg = match self.configs.get(guild_id).await {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = ?e, guild_id, "gateway config unavailable");
                return Outcome::Error(FailureReason::ConfigUnavailable);
            }
        };
        let intro = &cfg.modules.introduce;

        // 1. blokada
        if self.lock_until(guild_id, &cfg).is_some() {
            return Outcome::GatewayLocked;
        }

        // 2. już wprowadzony
        if intro.introduced_users.contains(&user_id) {
            return Outcome::AlreadyVerified;
        }

        // 3. rola docelowa + członek + obejście
        let Some(verified_role) = intro.verified_role_id else {
            return Outcome::Error(FailureReason::NotConfigured);
        };
        let member = match self.roles.fetch_member(guild_id, user_id).await {
            Ok(Some(m)) => m,
            Ok(None) => return Outcome::Error(FailureReason::MemberUnavailable),
            Err(e) => {
                tracing::warn!(error = ?e, guild_id, user_id, "member fetch failed");
                return Outcome::Error(FailureReason::MemberUnavailable);
            }
        };

        if member.has_any_role(&intro.bypass_role_ids) {
            if let Err(reason) = self.grant_verified(guild_id, user_id, verified_role).await {
                return Outcome::Error(reason);
            }
            self.record_introduction(guild_id, user_id, None).await;
            return Outcome::Bypassed;
        }

        let now = self.clock.now();
        let account_age_days = (now - member.account_created_at).num_days();

        // 4. wiek konta
        if account_age_days < i64::from(intro.min_account_age_days) {
            self.record_blocked(guild_id).await;
            return Outcome::BlockedAccountAge;
        }

        // 5. wiek dołączenia
        let join_minutes = member
            .joined_at
            .map(|j| (now - j).num_minutes())
            .unwrap_or(0);
        if join_minutes < i64::from(intro.min_join_minutes) {
            self.record_blocked(guild_id).await;
            return Outcome::BlockedJoinAge;
        }

        // 6. limit na użytkownika
        let attempts = self.user_attempts.record((guild_id, user_id));
        if attempts > intro.rate_limit_per_minute as usize {
            self.guild_attempts.record(guild_id);
            self.record_blocked(guild_id).await;
            return Outcome::BlockedRateLimit;
        }

        // 7. rajd
        let raid = self.guild_attempts.record(guild_id);
        if raid > intro.raid_threshold_per_minute as usize {
            if intro.auto_lock {
                tracing::warn!(guild_id, attempts = raid, "raid detected, locking gateway");
                let minutes = intro.lock_duration_minutes.max(1);
                self.lock_with(guild_id, minutes, raid).await;
                self.panic
                    .escalate(guild_id, PanicLevel::Light, minutes)
                    .await;
                return Outcome::GatewayLocked;
            }
            tracing::warn!(guild_id, attempts = raid, "raid detected, auto-lock disabled");
        }

        // 8. role
        self.assign_flags(guild_id, &cfg, &member, account_age_days).await;
        if let Err(reason) = self.grant_verified(guild_id, user_id, verified_role).await {
            return Outcome::Error(reason);
        }
        if let Some(role) = intro.unverified_role_id {
            self.remove_transient(guild_id, user_id, role).await;
        }

        // 9. wynik zaufania
        let latency = member
            .joined_at
            .map(|j| now - j)
            .unwrap_or_else(TimeDelta::zero);
        let trust = trust_score(account_age_days, attempts, latency);

        // 10. zapis
        let score = MemberScore {
            score: trust.score,
            risk: trust.risk,
            calculated_at: now,
        };
        self.record_introduction(guild_id, user_id, Some(score)).await;
        Outcome::Success(trust)
    }

    /* ---------- role ---------- */

    async fn grant_verified(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), FailureReason> {
        if !self.guard.assert_allowed(guild_id, actions::ROLE_ASSIGN) {
            return Err(FailureReason::ActionBlocked);
        }
        self.roles
            .add_role(guild_id, user_id, role_id, AUDIT_REASON)
            .await
            .map_err(|e| {
                tracing::warn!(error = ?e, guild_id, user_id, role_id, "verified role grant failed");
                FailureReason::RoleGrantFailed
            })
    }


    /// Role-flagi: nowe konto, podejrzane. Błędy tylko logujemy.
    async fn assign_flags(&self, guild_id: u64, cfg: &GuildConfig, member: &MemberInfo, account_age_days: i64) {
        let intro = &cfg.modules.introduce;
        let flags = [
            (intro.new_account_role_id, account_age_days < NEW_ACCOUNT_DAYS),
            (
                intro.suspicious_role_id,
                account_age_days < 2 * i64::from(intro.min_account_age_days),
            ),
        ];
        for (role, applies) in flags {
            let (Some(role_id), true) = (role, applies) else {
                continue;
            };
            if member.roles.contains(&role_id) {
                continue;
            }
            if !self.guard.assert_allowed(guild_id, actions::ROLE_ASSIGN) {
                continue;
            }
            if let Err(e) = self
                .roles
                .add_role(guild_id, member.user_id, role_id, AUDIT_REASON)
                .await
            {
                tracing::warn!(error = ?e, guild_id, user_id = member.user_id, role_id, "flag role not assigned");
            }
        }
    }

    async fn remove_transient(&self, guild_id: u64, user_id: u64, role_id: u64) {
        if !self.guard.assert_allowed(guild_id, actions::ROLE_ASSIGN) {
            return;
        }
        if let Err(e) = self
            .roles
            .remove_role(guild_id, user_id, role_id, AUDIT_REASON)
            .await
        {
            tracing::warn!(error = ?e, guild_id, user_id, role_id, "unverified role not removed");
        }
    }

    /* ---------- zapis ---------- */

    async fn record_blocked(&self, guild_id: u64) {
        let today = self.clock.now().date_naive();
        let res = self
            .configs
            .update(guild_id, |cfg| {
                let stats = cfg.modules.introduce.stats.bumped(today, false);
                (Some(patch::stats(&stats)), ())
            })
            .await;
        if let Err(e) = res {
            tracing::warn!(error = ?e, guild_id, "blocked counter not persisted");
        }
    }

    /// Wpis do `introduced_users` (+ wynik) i `total_verified += 1`, raz na użytkownika.
    async fn record_introduction(&self, guild_id: u64, user_id: u64, score: Option<MemberScore>) {
        let today = self.clock.now().date_naive();
        let res = self
            .configs
            .update(guild_id, move |cfg| {
                let intro = &cfg.modules.introduce;
                if intro.introduced_users.contains(&user_id) {
                    return (None, false);
                }
                let mut introduced = intro.introduced_users.clone();
                introduced.insert(user_id);
                let stats = intro.stats.bumped(today, true);
                let patch = patch::introduced(
                    &introduced,
                    score.as_ref().map(|s| (user_id, s)),
                    &stats,
                );
                (Some(patch), true)
            })
            .await;
        match res {
            Ok((_, true)) => {}
            Ok((_, false)) => tracing::debug!(guild_id, user_id, "introduction already recorded"),
            Err(e) => tracing::warn!(error = ?e, guild_id, user_id, "introduction not persisted"),
        }
    }

    /* ==============================
       Blokada: stan, timer, operacje admina
       ============================== */

    /// Koniec aktywnej blokady. Pamięć wygrywa; lustro z konfiguracji jest
    /// adoptowane tylko gdy w tym procesie nic o gildii nie wiemy.
    fn lock_until(self: &Arc<Self>, guild_id: u64, cfg: &GuildConfig) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        if let Some(slot) = self.locks.get(&guild_id) {
            return match &*slot {
                LockSlot::Locked { until, .. } if now < *until => Some(*until),
                _ => None,
            };
        }

        let slots = &cfg.modules.gateway_v4.slots;
        let (true, Some(until)) = (slots.locked, slots.lock_until) else {
            return None;
        };
        if until <= now {
            return None;
        }
        match self.locks.entry(guild_id) {
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let timer = self.schedule_unlock(guild_id, generation, until);
                slot.insert(LockSlot::Locked {
                    until,
                    generation,
                    timer,
                });
                tracing::info!(guild_id, %until, "persisted gateway lock adopted");
            }
        }
        Some(until)
    }

    fn schedule_unlock(self: &Arc<Self>, guild_id: u64, generation: u64, until: DateTime<Utc>) -> AbortHandle {
        // termin liczony teraz, nie przy pierwszym pollu taska
        let deadline = Instant::now() + (until - self.clock.now()).to_std().unwrap_or_default();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(gateway) = weak.upgrade() {
                gateway.expire_lock(guild_id, generation).await;
            }
        })
        .abort_handle()
    }

    /// Timer blokady `generation`; starszy timer nie zdejmie nowszej blokady.
    async fn expire_lock(&self, guild_id: u64, generation: u64) {
        let released = match self.locks.get_mut(&guild_id) {
            Some(mut slot) => {
                let current = matches!(&*slot, LockSlot::Locked { generation: g, .. } if *g == generation);
                if current {
                    *slot = LockSlot::Released;
                }
                current
            }
            None => false,
        };
        if !released {
            return;
        }
        tracing::info!(guild_id, "gateway lock expired");
        self.persist_unlock(guild_id).await;
    }

    async fn persist_unlock(&self, guild_id: u64) {
        if let Err(e) = self.configs.patch(guild_id, patch::gateway_unlock()).await {
            tracing::warn!(error = ?e, guild_id, "gateway unlock not persisted");
        }
        self.log.emit(SecurityEvent::GatewayUnlocked { guild_id });
    }

    async fn lock_with(self: &Arc<Self>, guild_id: u64, minutes: u32, attempts: usize) -> DateTime<Utc> {
        let until = self.clock.now() + TimeDelta::minutes(i64::from(minutes.max(1)));
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = self.schedule_unlock(guild_id, generation, until);
        let previous = self.locks.insert(
            guild_id,
            LockSlot::Locked {
                until,
                generation,
                timer,
            },
        );
        if let Some(LockSlot::Locked { timer, .. }) = previous {
            timer.abort();
        }

        if let Err(e) = self.configs.patch(guild_id, patch::gateway_lock(until)).await {
            tracing::warn!(error = ?e, guild_id, "gateway lock not persisted");
        }
        self.log.emit(SecurityEvent::GatewayLocked {
            guild_id,
            until,
            attempts,
        });
        until
    }

    /// Ręczna blokada (albo przedłużenie) na `minutes` minut.
    pub async fn lock(self: &Arc<Self>, guild_id: u64, minutes: u32) -> DateTime<Utc> {
        tracing::warn!(guild_id, minutes, "gateway locked manually");
        self.lock_with(guild_id, minutes, 0).await
    }

    /// Natychmiastowe zdjęcie blokady; zwraca, czy jakaś była aktywna.
    pub async fn unlock(&self, guild_id: u64) -> bool {
        let now = self.clock.now();
        let was_locked = match self.locks.insert(guild_id, LockSlot::Released) {
            Some(LockSlot::Locked { until, timer, .. }) => {
                timer.abort();
                now < until
            }
            _ => false,
        };
        tracing::info!(guild_id, was_locked, "gateway unlocked");
        self.persist_unlock(guild_id).await;
        was_locked
    }

    pub async fn is_locked(self: &Arc<Self>, guild_id: u64) -> Option<DateTime<Utc>> {
        let cfg = self.configs.get_or_default(guild_id).await;
        self.lock_until(guild_id, &cfg)
    }

    /// Statystyki z liczeniem „dziś” wg bieżącej daty UTC.
    pub async fn stats(&self, guild_id: u64) -> SentinelResult<VerificationStats> {
        let mut stats = self.configs.get(guild_id).await?.modules.introduce.stats;
        if stats.day != Some(self.clock.now().date_naive()) {
            stats.today_verified = 0;
            stats.today_blocked = 0;
        }
        Ok(stats)
    }

    pub fn evict_idle(&self, idle: TimeDelta) -> usize {
        self.user_attempts.evict_idle(idle) + self.guild_attempts.evict_idle(idle)
    }
}
