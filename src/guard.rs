//! Strażnik akcji uprzywilejowanych.
//!
//! Każda mutacja uprawnień/ról/kanałów w bocie najpierw pyta
//! `ActionGuard::assert_allowed`. Odpowiedź zależy wyłącznie od poziomu paniki
//! gildii; przy jakimkolwiek problemie strażnik przepuszcza (fail-open).

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::panic::{PanicLevel, PanicStateMachine};
use crate::seclog::{SecurityEvent, SecurityLog};

/// Nazwy akcji używane w bocie. Lista otwarta – strażnik operuje na napisach.
pub mod actions {
    pub const ROLE_MODIFY: &str = "ROLE_MODIFY";
    pub const ROLE_ASSIGN: &str = "ROLE_ASSIGN";
    pub const CHANNEL_DELETE: &str = "CHANNEL_DELETE";
    pub const WEBHOOK_CREATE: &str = "WEBHOOK_CREATE";
    pub const PERMISSION_UPDATE: &str = "PERMISSION_UPDATE";
    pub const MASS_BAN: &str = "MASS_BAN";
    pub const BULK_DELETE: &str = "BULK_DELETE";
}

static MEDIUM_BLOCKED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    use actions::*;
    HashSet::from([ROLE_MODIFY, CHANNEL_DELETE, WEBHOOK_CREATE, PERMISSION_UPDATE])
});

/// Tabela polityki: czy `action` jest zablokowana na poziomie `level`.
pub fn is_blocked(level: PanicLevel, action: &str) -> bool {
    match level {
        PanicLevel::None => false,
        PanicLevel::Light => action.contains("MASS") || action.contains("BULK"),
        PanicLevel::Medium => MEDIUM_BLOCKED.contains(action),
        PanicLevel::Full => true,
    }
}

pub struct ActionGuard {
    panic: Arc<PanicStateMachine>,
    log: Arc<SecurityLog>,
}

impl ActionGuard {
    pub fn new(panic: Arc<PanicStateMachine>, log: Arc<SecurityLog>) -> Self {
        Self { panic, log }
    }

    /// `true` = wolno. Blokada trafia do dziennika bezpieczeństwa.
    pub fn assert_allowed(&self, guild_id: u64, action: &str) -> bool {
        let level = self.panic.get_level(guild_id);
        if !is_blocked(level, action) {
            return true;
        }
        tracing::warn!(guild_id, %level, action, "privileged action blocked");
        self.log.emit(SecurityEvent::ActionBlocked {
            guild_id,
            level,
            action: action.to_string(),
        });
        false
    }
}
