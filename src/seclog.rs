//! Dziennik bezpieczeństwa – boczny kanał zdarzeń rdzenia.
//!
//! Każde zdarzenie idzie do `tracing` (target `tigris::security`), do krótkiego
//! bufora w pamięci (podgląd statusu, testy) i – jeśli skonfigurowano kanał –
//! na Discorda, best-effort w osobnym tasku.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::antinuke::EventType;
use crate::panic::PanicLevel;
use crate::platform::Messageable;

const RECENT_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    PanicEnabled {
        guild_id: u64,
        level: PanicLevel,
        until: DateTime<Utc>,
    },
    PanicDisabled {
        guild_id: u64,
    },
    PanicExpired {
        guild_id: u64,
        level: PanicLevel,
    },
    ActionBlocked {
        guild_id: u64,
        level: PanicLevel,
        action: String,
    },
    SpikeDetected {
        guild_id: u64,
        kind: EventType,
        count: usize,
        threshold: u32,
        suppressed: bool,
    },
    WebhookRemediation {
        guild_id: u64,
        new_webhooks: usize,
        deleted: Vec<u64>,
        failed: Vec<u64>,
    },
    GatewayLocked {
        guild_id: u64,
        until: DateTime<Utc>,
        attempts: usize,
    },
    GatewayUnlocked {
        guild_id: u64,
    },
    VerificationOutcome {
        guild_id: u64,
        user_id: u64,
        outcome: String,
    },
}

impl SecurityEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            Self::PanicEnabled { guild_id, .. }
            | Self::PanicDisabled { guild_id }
            | Self::PanicExpired { guild_id, .. }
            | Self::ActionBlocked { guild_id, .. }
            | Self::SpikeDetected { guild_id, .. }
            | Self::WebhookRemediation { guild_id, .. }
            | Self::GatewayLocked { guild_id, .. }
            | Self::GatewayUnlocked { guild_id }
            | Self::VerificationOutcome { guild_id, .. } => *guild_id,
        }
    }

    /// Jednolinijkowy opis do kanału logów.
    pub fn summary(&self) -> String {
        match self {
            Self::PanicEnabled { level, until, .. } => {
                format!("🚨 Panic **{level}** enabled until <t:{}:T>", until.timestamp())
            }
            Self::PanicDisabled { .. } => "✅ Panic disabled".into(),
            Self::PanicExpired { level, .. } => format!("⌛ Panic **{level}** expired"),
            Self::ActionBlocked { level, action, .. } => {
                format!("⛔ `{action}` blocked (panic {level})")
            }
            Self::SpikeDetected { kind, count, threshold, suppressed, .. } => format!(
                "📈 Spike {kind:?}: {count} events (threshold {threshold}){}",
                if *suppressed { " – maintenance, no escalation" } else { "" }
            ),
            Self::WebhookRemediation { new_webhooks, deleted, failed, .. } => format!(
                "🪝 Webhook burst ({new_webhooks} new): deleted {}, failed {}",
                deleted.len(),
                failed.len()
            ),
            Self::GatewayLocked { until, attempts, .. } => format!(
                "🔒 Verification gateway locked until <t:{}:T> ({attempts} attempts/min)",
                until.timestamp()
            ),
            Self::GatewayUnlocked { .. } => "🔓 Verification gateway unlocked".into(),
            Self::VerificationOutcome { user_id, outcome, .. } => {
                format!("🪪 <@{user_id}> verification: `{outcome}`")
            }
        }
    }
}

pub struct SecurityLog {
    recent: Mutex<VecDeque<SecurityEvent>>,
    sink: Option<(Arc<dyn Messageable>, u64)>,
}

impl Default for SecurityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityLog {
    /// Dziennik tylko do `tracing` + bufora.
    pub fn new() -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(64)),
            sink: None,
        }
    }

    /// Dodatkowo przekazuj zdarzenia na kanał Discorda.
    pub fn with_channel(messenger: Arc<dyn Messageable>, channel_id: u64) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(64)),
            sink: Some((messenger, channel_id)),
        }
    }

    pub fn emit(&self, event: SecurityEvent) {
        let guild_id = event.guild_id();
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            SecurityEvent::VerificationOutcome { .. } | SecurityEvent::PanicExpired { .. } => {
                tracing::info!(target: "tigris::security", guild_id, %payload, "security event")
            }
            _ => tracing::warn!(target: "tigris::security", guild_id, %payload, "security event"),
        }

        if let Some((messenger, channel_id)) = &self.sink {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let messenger = messenger.clone();
                let channel_id = *channel_id;
                let text = format!("[guild {guild_id}] {}", event.summary());
                handle.spawn(async move {
                    if let Err(e) = messenger.send_message(channel_id, &text).await {
                        tracing::warn!(error = ?e, channel_id, "security log delivery failed");
                    }
                });
            }
        }

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() >= RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    /// Ostatnie zdarzenia gildii (najstarsze pierwsze).
    pub fn recent(&self, guild_id: u64) -> Vec<SecurityEvent> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.guild_id() == guild_id)
            .cloned()
            .collect()
    }
}
