//! Poziomy paniki per gildia.
//!
//! Stan w pamięci jest źródłem prawdy dla `ActionGuard`; lustro w konfiguracji
//! (`security.panic`) zapisujemy best-effort – błąd zapisu tylko logujemy.
//! Wygaśnięcie jest leniwe: wpis po `expires_at` znika przy najbliższym odczycie.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::guild_config::patch;
use crate::seclog::{SecurityEvent, SecurityLog};
use crate::store::GuildConfigs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanicLevel {
    None,
    Light,
    Medium,
    Full,
}

impl PanicLevel {
    pub const ALL: [PanicLevel; 4] = [Self::None, Self::Light, Self::Medium, Self::Full];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for PanicLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PanicLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "light" => Ok(Self::Light),
            "medium" => Ok(Self::Medium),
            "full" => Ok(Self::Full),
            other => anyhow::bail!("unknown panic level `{other}`"),
        }
    }
}

/// Stan paniki gildii. Nie ma zapisanej flagi `active`: aktywność wynika z
/// czasu (`is_active_at`), a `PanicStateMachine::state` zwraca wyłącznie
/// stany aktywne.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanicState {
    pub guild_id: u64,
    pub level: PanicLevel,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PanicState {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.level != PanicLevel::None && now < self.expires_at
    }
}

pub struct PanicStateMachine {
    states: DashMap<u64, PanicState>,
    configs: Arc<GuildConfigs>,
    clock: Arc<dyn Clock>,
    log: Arc<SecurityLog>,
}

impl PanicStateMachine {
    pub fn new(configs: Arc<GuildConfigs>, clock: Arc<dyn Clock>, log: Arc<SecurityLog>) -> Self {
        Self {
            states: DashMap::new(),
            configs,
            clock,
            log,
        }
    }

    /// Włącz (albo nadpisz) panikę na `minutes` minut (minimum 1).
    pub async fn enable_panic(&self, guild_id: u64, level: PanicLevel, minutes: u32) -> Option<PanicState> {
        if level == PanicLevel::None {
            self.disable_panic(guild_id).await;
            return None;
        }

        let now = self.clock.now();
        let minutes = minutes.max(1);
        let state = PanicState {
            guild_id,
            level,
            activated_at: now,
            expires_at: now + TimeDelta::minutes(i64::from(minutes)),
        };
        self.states.insert(guild_id, state.clone());

        tracing::warn!(guild_id, %level, minutes, "panic enabled");
        self.log.emit(SecurityEvent::PanicEnabled {
            guild_id,
            level,
            until: state.expires_at,
        });

        if let Err(e) = self
            .configs
            .patch(guild_id, patch::panic_active(level, now, state.expires_at))
            .await
        {
            tracing::warn!(error = ?e, guild_id, "panic mirror not persisted");
        }
        Some(state)
    }

    /// Automatyczna eskalacja: jak `enable_panic`, ale nigdy nie obniża
    /// aktywnego, wyższego poziomu (np. ręcznej FULL). Równy poziom odświeża czas.
    pub async fn escalate(&self, guild_id: u64, level: PanicLevel, minutes: u32) -> Option<PanicState> {
        let current = self.get_level(guild_id);
        if current > level {
            tracing::info!(guild_id, %current, requested = %level, "panic escalation skipped, higher level active");
            return None;
        }
        self.enable_panic(guild_id, level, minutes).await
    }

    pub async fn disable_panic(&self, guild_id: u64) {
        let removed = self.states.remove(&guild_id);
        if removed.is_some() {
            tracing::info!(guild_id, "panic disabled");
        }
        self.log.emit(SecurityEvent::PanicDisabled { guild_id });

        if let Err(e) = self.configs.patch(guild_id, patch::panic_inactive()).await {
            tracing::warn!(error = ?e, guild_id, "panic mirror not persisted");
        }
    }

    /// Aktualny poziom; `None` gdy brak wpisu albo wygasł (wtedy go usuwamy).
    pub fn get_level(&self, guild_id: u64) -> PanicLevel {
        self.state(guild_id)
            .map(|s| s.level)
            .unwrap_or(PanicLevel::None)
    }

    pub fn state(&self, guild_id: u64) -> Option<PanicState> {
        let now = self.clock.now();
        let expired = {
            let entry = self.states.get(&guild_id)?;
            if entry.is_active_at(now) {
                return Some(entry.clone());
            }
            entry.level
        };
        // drop guard przed remove – inaczej deadlock na shardzie
        if self
            .states
            .remove_if(&guild_id, |_, s| !s.is_active_at(now))
            .is_some()
        {
            tracing::info!(guild_id, level = %expired, "panic expired");
            self.log.emit(SecurityEvent::PanicExpired {
                guild_id,
                level: expired,
            });
        }
        None
    }

    /// Odtwórz stan z lustra po restarcie (tylko niewygasły).
    pub async fn warmup(&self, guild_id: u64) {
        let cfg = match self.configs.get(guild_id).await {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = ?e, guild_id, "panic warmup skipped");
                return;
            }
        };
        let mirror = cfg.security.panic;
        let (true, Some(level), Some(until)) = (mirror.active, mirror.level, mirror.until) else {
            return;
        };
        let now = self.clock.now();
        if level == PanicLevel::None || until <= now {
            return;
        }
        let state = PanicState {
            guild_id,
            level,
            activated_at: mirror.since.filter(|s| *s < until).unwrap_or(now),
            expires_at: until,
        };
        tracing::info!(guild_id, %level, %until, "panic state restored from config");
        self.states.entry(guild_id).or_insert(state);
    }
}
